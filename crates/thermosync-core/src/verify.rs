// ── Post-push verification ──
//
// Advisory comparison of executed writes against a fresh snapshot.
// Mismatches are reported, never retried.

use std::fmt;

use serde_json::Value;

use crate::snapshot::Snapshot;
use crate::write::{FieldValue, Target, WriteRequest};

/// A written field that the fresh snapshot does not reflect.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub target: Target,
    pub field: String,
    pub expected: FieldValue,
    /// `None` when the target or the field is missing.
    pub actual: Option<Value>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{} {}: expected {}, found {actual}",
                self.target, self.field, self.expected
            ),
            None => write!(
                f,
                "{} {}: expected {}, field missing",
                self.target, self.field, self.expected
            ),
        }
    }
}

/// Compare every explicitly set field of `writes` against `snapshot`.
pub fn verify(writes: &[WriteRequest], snapshot: &Snapshot) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    for write in writes {
        let target = write.target();
        let object = snapshot.locate(&target);
        for (field, expected) in write.fields() {
            let actual = object.and_then(|o| o.get(field));
            if !actual.is_some_and(|v| expected.matches(v)) {
                mismatches.push(Mismatch {
                    target: target.clone(),
                    field: field.clone(),
                    expected: expected.clone(),
                    actual: actual.cloned(),
                });
            }
        }
    }
    mismatches
}
