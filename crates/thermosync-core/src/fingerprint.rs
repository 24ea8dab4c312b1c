// ── Change-detection fingerprints ──
//
// blake3 over a canonical walk of a JSON section. Object keys are visited
// in sorted order and volatile keys are skipped at any depth, so two
// payloads that differ only in key order or timestamps hash the same.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

/// Hash of one snapshot section.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_hex();
        write!(f, "Fingerprint({})", &hex[..12])
    }
}

/// Computes fingerprints with a fixed set of volatile keys.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    volatile: BTreeSet<String>,
}

impl Fingerprinter {
    pub fn new<I, S>(volatile: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            volatile: volatile.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fingerprint(&self, value: &Value) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        self.walk(value, &mut hasher);
        Fingerprint(hasher.finalize())
    }

    fn walk(&self, value: &Value, hasher: &mut blake3::Hasher) {
        match value {
            Value::Null => {
                hasher.update(b"n");
            }
            Value::Bool(b) => {
                hasher.update(if *b { b"t" } else { b"f" });
            }
            Value::Number(n) => {
                hasher.update(b"d");
                write_str(hasher, &n.to_string());
            }
            Value::String(s) => {
                hasher.update(b"s");
                write_str(hasher, s);
            }
            Value::Array(items) => {
                hasher.update(b"a");
                hasher.update(&len_prefix(items.len()));
                for item in items {
                    self.walk(item, hasher);
                }
            }
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .keys()
                    .filter(|k| !self.volatile.contains(k.as_str()))
                    .collect();
                keys.sort();
                hasher.update(b"o");
                hasher.update(&len_prefix(keys.len()));
                for key in keys {
                    write_str(hasher, key);
                    self.walk(&map[key], hasher);
                }
            }
        }
    }
}

fn len_prefix(len: usize) -> [u8; 8] {
    u64::try_from(len).unwrap_or(u64::MAX).to_le_bytes()
}

/// Length-prefixed so adjacent strings cannot run together.
fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&len_prefix(s.len()));
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_VOLATILE_FIELDS;
    use serde_json::json;

    fn fingerprinter() -> Fingerprinter {
        Fingerprinter::new(DEFAULT_VOLATILE_FIELDS.iter().copied())
    }

    #[test]
    fn key_order_does_not_matter() {
        let fp = fingerprinter();
        let a = json!({ "mode": "heat", "zones": [{ "id": "1", "htsp": "68" }] });
        let b = json!({ "zones": [{ "htsp": "68", "id": "1" }], "mode": "heat" });
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn volatile_fields_are_ignored_at_any_depth() {
        let fp = fingerprinter();
        let a = json!({ "localTime": "10:00", "zones": [{ "id": "1", "timestamp": 1 }] });
        let b = json!({ "localTime": "10:05", "zones": [{ "id": "1", "timestamp": 2 }] });
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn real_changes_are_detected() {
        let fp = fingerprinter();
        assert_ne!(
            fp.fingerprint(&json!({ "mode": "heat" })),
            fp.fingerprint(&json!({ "mode": "cool" }))
        );
        assert_ne!(fp.fingerprint(&json!("68")), fp.fingerprint(&json!(68)));
        assert_ne!(
            fp.fingerprint(&json!(["ab", "c"])),
            fp.fingerprint(&json!(["a", "bc"]))
        );
    }
}
