//! Content-addressed cache keys.
//!
//! Components are rendered as canonical JSON (object keys sorted at every
//! level), length-prefixed, and hashed with SHA-256. Length prefixes keep
//! `["ab", "c"]` and `["a", "bc"]` apart; canonical rendering makes key order
//! inside payloads irrelevant.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{ForgeError, Result};

pub struct CacheKeyDeriver;

impl CacheKeyDeriver {
    /// Derive `namespace:hex(sha256(...))` from JSON components.
    pub fn derive(namespace: &str, components: &[Value]) -> Result<String> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(ForgeError::InvalidInput(
                "cache key namespace must not be empty".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        update_framed(&mut hasher, namespace.as_bytes());
        hasher.update((components.len() as u64).to_le_bytes());
        for component in components {
            let mut rendered = String::new();
            write_canonical(component, &mut rendered);
            update_framed(&mut hasher, rendered.as_bytes());
        }

        Ok(format!("{}:{:x}", namespace, hasher.finalize()))
    }

    /// Derive from anything serializable. Serialization failures
    /// (such as maps with non-string keys) are invalid input.
    pub fn derive_serializable<T: Serialize>(namespace: &str, components: &[T]) -> Result<String> {
        let values = components
            .iter()
            .map(|c| {
                serde_json::to_value(c).map_err(|e| {
                    ForgeError::InvalidInput(format!("cache key component not serializable: {}", e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::derive(namespace, &values)
    }

    /// Hex SHA-256 of a value's canonical form
    pub fn content_hash(value: &Value) -> String {
        let mut rendered = String::new();
        write_canonical(value, &mut rendered);
        format!("{:x}", Sha256::digest(rendered.as_bytes()))
    }
}

/// Lowercased, whitespace-collapsed prefix of free text
pub fn normalized_snippet(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(max_chars)
        .collect()
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
