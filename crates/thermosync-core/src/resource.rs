// ── Resource dialect ──
//
// Maps the engine's read and write operations onto opaque transport
// requests for one remote resource. The engine never looks inside the
// query text.

use serde_json::{Map, Value, json};
use thermosync_api::Request;

use crate::error::CoreError;
use crate::snapshot::Snapshot;
use crate::write::{Fields, WriteRequest};

/// One synchronized remote resource.
pub trait Resource: Send + Sync {
    /// Short name for log fields.
    fn name(&self) -> String;

    fn read_request(&self) -> Request;

    fn parse_snapshot(&self, payload: Value) -> Result<Snapshot, CoreError>;

    fn write_request(&self, write: &WriteRequest) -> Request;
}

const READ_SYSTEM: &str = "query getInfinitySystem($serial: String!) {
  infinitySystem(serial: $serial) {
    profile
    status
    config
  }
}";

const UPDATE_CONFIG: &str = "mutation updateInfinityConfig($input: InfinityConfigInput!) {
  updateInfinityConfig(input: $input) { etag }
}";

const UPDATE_ZONE: &str = "mutation updateInfinityZoneConfig($input: InfinityZoneConfigInput!) {
  updateInfinityZoneConfig(input: $input) { etag }
}";

const UPDATE_ACTIVITY: &str =
    "mutation updateInfinityZoneActivity($input: InfinityZoneActivityInput!) {
  updateInfinityZoneActivity(input: $input) { etag }
}";

/// A cloud-connected HVAC system addressed by its serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HvacSystem {
    pub serial: String,
}

impl HvacSystem {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    fn input(&self, ids: &[(&str, &str)], fields: &Fields) -> Value {
        let mut input = Map::new();
        input.insert("serial".into(), Value::String(self.serial.clone()));
        for (key, id) in ids {
            input.insert((*key).into(), Value::String((*id).to_owned()));
        }
        for (name, value) in fields {
            input.insert(name.clone(), json!(value));
        }
        json!({ "input": input })
    }
}

impl Resource for HvacSystem {
    fn name(&self) -> String {
        format!("system {}", self.serial)
    }

    fn read_request(&self) -> Request {
        Request::new(
            "getInfinitySystem",
            READ_SYSTEM,
            json!({ "serial": self.serial }),
        )
    }

    fn parse_snapshot(&self, mut payload: Value) -> Result<Snapshot, CoreError> {
        let system = payload
            .get_mut("infinitySystem")
            .filter(|v| v.is_object())
            .ok_or_else(|| CoreError::Malformed {
                message: format!("no infinitySystem object for serial {}", self.serial),
            })?;

        let mut take = |section: &str| {
            system
                .get_mut(section)
                .filter(|v| v.is_object())
                .map(Value::take)
                .ok_or_else(|| CoreError::Malformed {
                    message: format!("infinitySystem is missing its {section} section"),
                })
        };

        Ok(Snapshot {
            profile: take("profile")?,
            status: take("status")?,
            config: take("config")?,
        })
    }

    fn write_request(&self, write: &WriteRequest) -> Request {
        let (operation, query, variables) = match write {
            WriteRequest::System { fields } => {
                ("updateInfinityConfig", UPDATE_CONFIG, self.input(&[], fields))
            }
            WriteRequest::Zone { zone, fields } => (
                "updateInfinityZoneConfig",
                UPDATE_ZONE,
                self.input(&[("zoneId", zone.as_str())], fields),
            ),
            WriteRequest::Activity {
                zone,
                activity,
                fields,
            } => (
                "updateInfinityZoneActivity",
                UPDATE_ACTIVITY,
                self.input(
                    &[("zoneId", zone.as_str()), ("activityId", activity.as_str())],
                    fields,
                ),
            ),
        };
        Request::new(operation, query, variables)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_the_three_sections() {
        let system = HvacSystem::new("S1");
        let payload = json!({
            "infinitySystem": {
                "profile": { "name": "Home" },
                "status": { "mode": "heat" },
                "config": { "mode": "heat", "zones": [] }
            }
        });
        let snap = system.parse_snapshot(payload).unwrap();
        assert_eq!(snap.profile["name"], "Home");
        assert_eq!(snap.mode(), Some("heat"));
    }

    #[test]
    fn missing_section_is_malformed() {
        let system = HvacSystem::new("S1");
        let payload = json!({ "infinitySystem": { "profile": {}, "status": {} } });
        assert!(matches!(
            system.parse_snapshot(payload),
            Err(CoreError::Malformed { .. })
        ));
        assert!(matches!(
            system.parse_snapshot(json!({ "infinitySystem": null })),
            Err(CoreError::Malformed { .. })
        ));
    }

    #[test]
    fn activity_write_carries_both_ids() {
        let system = HvacSystem::new("S1");
        let req = system.write_request(&WriteRequest::activity("1", "home", [("fan", "high")]));
        assert_eq!(req.operation_name, "updateInfinityZoneActivity");
        assert_eq!(
            req.variables,
            json!({
                "input": { "serial": "S1", "zoneId": "1", "activityId": "home", "fan": "high" }
            })
        );
    }

    #[test]
    fn system_write_uses_config_operation() {
        let system = HvacSystem::new("S1");
        let req = system.write_request(&WriteRequest::system([("mode", "cool")]));
        assert_eq!(req.operation_name, "updateInfinityConfig");
        assert_eq!(req.variables["input"]["mode"], "cool");
        assert_eq!(system.read_request().variables, json!({ "serial": "S1" }));
    }
}
