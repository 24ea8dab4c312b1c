// ── Snapshot ──
//
// Full copy of one remote system's state. Three JSON sections; zones live
// at `config.zones[]` keyed by `id`, activities at
// `config.zones[].activities[]` keyed by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter};

use crate::error::CoreError;
use crate::write::{Target, WriteRequest};

/// A logical section of the snapshot, tracked separately for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Section {
    Profile,
    Status,
    Config,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub profile: Value,
    pub status: Value,
    pub config: Value,
}

/// Zone and activity ids arrive as strings or numbers depending on firmware.
fn id_matches(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

fn find<'a>(list: Option<&'a Value>, key: &str, id: &str) -> Option<&'a Value> {
    list?
        .as_array()?
        .iter()
        .find(|item| id_matches(item.get(key), id))
}

fn find_mut<'a>(list: Option<&'a mut Value>, key: &str, id: &str) -> Option<&'a mut Value> {
    list?
        .as_array_mut()?
        .iter_mut()
        .find(|item| id_matches(item.get(key), id))
}

impl Snapshot {
    pub fn section(&self, section: Section) -> &Value {
        match section {
            Section::Profile => &self.profile,
            Section::Status => &self.status,
            Section::Config => &self.config,
        }
    }

    /// Configured zones, in remote order.
    pub fn zones(&self) -> impl Iterator<Item = &Value> {
        self.config
            .get("zones")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    pub fn zone(&self, id: &str) -> Option<&Value> {
        find(self.config.get("zones"), "id", id)
    }

    pub fn activity(&self, zone: &str, activity: &str) -> Option<&Value> {
        find(self.zone(zone)?.get("activities"), "type", activity)
    }

    /// System operating mode (`config.mode`).
    pub fn mode(&self) -> Option<&str> {
        self.config.get("mode").and_then(Value::as_str)
    }

    /// The object a write to `target` lands on.
    pub fn locate(&self, target: &Target) -> Option<&Value> {
        match target {
            Target::System => Some(&self.config),
            Target::Zone(zone) => self.zone(zone),
            Target::Activity { zone, activity } => self.activity(zone, activity),
        }
    }

    fn locate_mut(&mut self, target: &Target) -> Option<&mut Value> {
        match target {
            Target::System => Some(&mut self.config),
            Target::Zone(zone) => find_mut(self.config.get_mut("zones"), "id", zone),
            Target::Activity { zone, activity } => {
                let zone = find_mut(self.config.get_mut("zones"), "id", zone)?;
                find_mut(zone.get_mut("activities"), "type", activity)
            }
        }
    }

    /// Apply a write's fields to its target in place.
    ///
    /// Only the target object changes; sibling zones and activities are
    /// never touched.
    pub fn apply(&mut self, write: &WriteRequest) -> Result<(), CoreError> {
        let target = write.target();
        let object = self
            .locate_mut(&target)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| CoreError::TargetNotFound {
                target: target.to_string(),
            })?;

        for (name, value) in write.fields() {
            let stored = value.to_json_like(object.get(name));
            object.insert(name.clone(), stored);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Snapshot {
        Snapshot {
            profile: json!({ "name": "Home" }),
            status: json!({ "mode": "off" }),
            config: json!({
                "mode": "off",
                "zones": [
                    { "id": "1", "name": "Main", "htsp": "68", "activities": [
                        { "type": "home", "htsp": "68", "fan": "auto" },
                        { "type": "away", "htsp": "60", "fan": "low" }
                    ]},
                    { "id": 2, "name": "Upstairs", "htsp": "66", "activities": [] }
                ]
            }),
        }
    }

    #[test]
    fn locates_zones_by_string_or_numeric_id() {
        let snap = sample();
        assert_eq!(snap.zone("1").and_then(|z| z.get("name")), Some(&json!("Main")));
        assert_eq!(snap.zone("2").and_then(|z| z.get("name")), Some(&json!("Upstairs")));
        assert!(snap.zone("3").is_none());
        assert_eq!(snap.zones().count(), 2);
    }

    #[test]
    fn activity_write_leaves_siblings_alone() {
        let mut snap = sample();
        snap.apply(&WriteRequest::activity("1", "away", [("htsp", 58.0)]))
            .unwrap();

        assert_eq!(snap.activity("1", "away").unwrap()["htsp"], json!("58"));
        assert_eq!(snap.activity("1", "home").unwrap()["htsp"], json!("68"));
        assert_eq!(snap.zone("1").unwrap()["htsp"], json!("68"));
    }

    #[test]
    fn system_write_targets_config_root() {
        let mut snap = sample();
        snap.apply(&WriteRequest::system([("mode", "cool")])).unwrap();
        assert_eq!(snap.mode(), Some("cool"));
        assert_eq!(snap.status["mode"], json!("off"));
    }

    #[test]
    fn missing_target_is_reported() {
        let mut snap = sample();
        let err = snap
            .apply(&WriteRequest::zone("9", [("htsp", 70.0)]))
            .unwrap_err();
        assert!(matches!(err, CoreError::TargetNotFound { ref target } if target == "zone 9"));
        assert_eq!(snap, sample());
    }
}
