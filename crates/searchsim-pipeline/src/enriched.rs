//! The enriched-document tree.
//!
//! A skill pipeline's scratch space: a tree whose root is conventionally
//! addressed `/document`. Nodes are scalars, ordered sequences, or mappings.
//! Inputs and outputs reference nodes by path expressions
//! (`/document/foo/bar`); a context ending in `/*` fans out over a sequence,
//! binding the context to each element in turn. Paths are constructed
//! top-down, so no cycles can form.

use serde_json::{Map, Value};

/// The enriched document of one source document.
#[derive(Debug, Clone)]
pub struct EnrichedDocument {
    root: Value,
}

impl EnrichedDocument {
    /// Create the tree with the given `/document` payload.
    #[must_use]
    pub fn new(document: Value) -> Self {
        let mut root = Map::new();
        root.insert("document".to_string(), document);
        Self {
            root: Value::Object(root),
        }
    }

    /// The raw `/document` subtree.
    #[must_use]
    pub fn document(&self) -> Option<&Value> {
        self.get("/document")
    }

    /// Resolve a node by absolute path (`/document/pages/0/text`). Numeric
    /// segments index into sequences.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in segments(path) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a node by absolute path, creating intermediate mappings as needed.
    /// Writing a child under a scalar promotes the scalar to a mapping whose
    /// original value moves to `$value` (so fan-out outputs can annotate
    /// sequence elements). Fails when a sequence index is out of bounds.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), String> {
        let parts: Vec<&str> = segments(path).collect();
        let Some((last, ancestors)) = parts.split_last() else {
            return Err("empty enrichment path".to_string());
        };

        let mut current = &mut self.root;
        for segment in ancestors {
            promote_scalar(current);
            current = match current {
                Value::Object(map) => map
                    .entry((*segment).to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => {
                    let index: usize = segment
                        .parse()
                        .map_err(|_| format!("non-numeric index '{segment}' in path '{path}'"))?;
                    items
                        .get_mut(index)
                        .ok_or_else(|| format!("index {index} out of bounds in path '{path}'"))?
                }
                _ => unreachable!("scalars are promoted above"),
            };
        }

        promote_scalar(current);
        match current {
            Value::Object(map) => {
                map.insert((*last).to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let index: usize = last
                    .parse()
                    .map_err(|_| format!("non-numeric index '{last}' in path '{path}'"))?;
                if index < items.len() {
                    items[index] = value;
                    Ok(())
                } else {
                    Err(format!("index {index} out of bounds in path '{path}'"))
                }
            }
            _ => unreachable!("scalars are promoted above"),
        }
    }

    /// Expand a context path into concrete bindings. A trailing `/*` yields
    /// one binding per element of the referenced sequence; otherwise the
    /// context itself is the single binding.
    #[must_use]
    pub fn expand_context(&self, context: &str) -> Vec<String> {
        let Some(base) = context.strip_suffix("/*") else {
            return vec![context.to_string()];
        };
        match self.get(base) {
            Some(Value::Array(items)) => (0..items.len())
                .map(|index| format!("{base}/{index}"))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Resolve a source expression relative to a context: absolute paths
    /// (`/document/x`) stand alone, relative ones append to the context.
    #[must_use]
    pub fn resolve_source(context: &str, source: &str) -> String {
        if source.starts_with('/') {
            source.to_string()
        } else {
            format!("{}/{}", context.trim_end_matches('/'), source)
        }
    }

    /// Consume the tree, returning the root value.
    #[must_use]
    pub fn into_root(self) -> Value {
        self.root
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Replace a scalar node with `{"$value": <scalar>}` so children can attach.
fn promote_scalar(node: &mut Value) {
    if !(node.is_object() || node.is_array()) {
        let original = node.take();
        let mut map = Map::new();
        if !original.is_null() {
            map.insert("$value".to_string(), original);
        }
        *node = Value::Object(map);
    }
}
