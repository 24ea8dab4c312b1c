// Shared fixtures: an in-memory remote that speaks the HVAC system
// dialect, and an auth backend that always grants.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};

use thermosync_api::{AuthBackend, Credentials, Error, Request, TokenGrant, TokenManager, Transport};
use thermosync_core::{HvacSystem, Reconciler, SyncConfig};

pub const SERIAL: &str = "S1";

pub fn initial_system() -> Value {
    json!({
        "profile": { "name": "Home", "model": "SYSTXCCITC01" },
        "status": { "mode": "off", "localTime": "2026-10-14T08:00", "zones": [] },
        "config": {
            "mode": "off",
            "etag": "a1",
            "zones": [
                {
                    "id": "1", "name": "Main", "htsp": 68.0, "clsp": 76.0, "hold": "off",
                    "activities": [
                        { "type": "home", "htsp": 68.0, "clsp": 76.0, "fan": "auto" },
                        { "type": "away", "htsp": 60.0, "clsp": 85.0, "fan": "low" }
                    ]
                },
                {
                    "id": "2", "name": "Upstairs", "htsp": 66.0, "clsp": 78.0, "hold": "off",
                    "activities": []
                }
            ]
        }
    })
}

#[derive(Default)]
struct RemoteState {
    system: Value,
    reads: u32,
    writes: Vec<Request>,
    fail_reads: u32,
    fail_writes: u32,
    reject_reads: u32,
    reject_writes: u32,
    ignore_writes: bool,
}

/// In-memory stand-in for the controller API.
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    latency: Duration,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_latency(Duration::ZERO))
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                system: initial_system(),
                ..RemoteState::default()
            }),
            latency,
        }
    }

    pub fn reads(&self) -> u32 {
        self.state.lock().unwrap().reads
    }

    pub fn writes(&self) -> Vec<Request> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().unwrap().fail_reads = n;
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().unwrap().fail_writes = n;
    }

    /// Answer the next `n` reads with a 401, like an expired bearer token.
    pub fn reject_next_reads(&self, n: u32) {
        self.state.lock().unwrap().reject_reads = n;
    }

    pub fn reject_next_writes(&self, n: u32) {
        self.state.lock().unwrap().reject_writes = n;
    }

    /// Accept writes without changing state, like a backend that lags.
    pub fn ignore_writes(&self) {
        self.state.lock().unwrap().ignore_writes = true;
    }

    /// Edit the remote state directly.
    pub fn edit(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.state.lock().unwrap().system);
    }

    pub fn system(&self) -> Value {
        self.state.lock().unwrap().system.clone()
    }
}

fn find_by<'a>(list: &'a mut Value, key: &str, id: &Value) -> &'a mut Value {
    list.as_array_mut()
        .unwrap()
        .iter_mut()
        .find(|item| item.get(key) == Some(id))
        .unwrap()
}

fn apply_write(system: &mut Value, request: &Request) {
    let mut input = request.variables["input"].as_object().unwrap().clone();
    input.remove("serial");
    let zone_id = input.remove("zoneId");
    let activity_id = input.remove("activityId");

    let config = &mut system["config"];
    let target = match (zone_id, activity_id) {
        (None, None) => config,
        (Some(zone), None) => find_by(&mut config["zones"], "id", &zone),
        (Some(zone), Some(activity)) => {
            let zone = find_by(&mut config["zones"], "id", &zone);
            find_by(&mut zone["activities"], "type", &activity)
        }
        (None, Some(_)) => panic!("activity write without zone"),
    };
    for (key, value) in input {
        target[key] = value;
    }
}

fn token_rejected() -> Error {
    Error::Authentication {
        message: "bearer token rejected (HTTP 401)".into(),
    }
}

#[async_trait]
impl Transport for FakeRemote {
    async fn send(&self, request: &Request) -> Result<Value, Error> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.state.lock().unwrap();

        if request.operation_name == "getInfinitySystem" {
            state.reads += 1;
            if state.reject_reads > 0 {
                state.reject_reads -= 1;
                return Err(token_rejected());
            }
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(Error::Http {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            return Ok(json!({ "infinitySystem": state.system.clone() }));
        }

        state.writes.push(request.clone());
        if state.reject_writes > 0 {
            state.reject_writes -= 1;
            return Err(token_rejected());
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Error::Remote {
                message: "write rejected".into(),
            });
        }
        if !state.ignore_writes {
            apply_write(&mut state.system, request);
        }
        let mut body = serde_json::Map::new();
        body.insert(request.operation_name.clone(), json!({ "etag": "b2" }));
        Ok(Value::Object(body))
    }
}

/// Grants a long-lived token on every login.
#[derive(Default)]
pub struct AlwaysGrant {
    pub logins: AtomicU32,
}

#[async_trait]
impl AuthBackend for AlwaysGrant {
    async fn login(&self, _credentials: &Credentials) -> Result<TokenGrant, Error> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: format!("access-{n}"),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh".into()),
            expires_in: Duration::from_secs(3600),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, Error> {
        self.login(&Credentials::new("unused", SecretString::from("unused")))
            .await
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub auth: Arc<AlwaysGrant>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    harness_with(FakeRemote::new(), SyncConfig::default())
}

pub fn harness_with(remote: Arc<FakeRemote>, config: SyncConfig) -> Harness {
    let auth = Arc::new(AlwaysGrant::default());
    let tokens = Arc::new(TokenManager::new(
        Credentials::new("owner@example.com", SecretString::from("pw")),
        Arc::clone(&auth) as Arc<dyn AuthBackend>,
    ));
    let reconciler = Reconciler::new(
        Arc::new(HvacSystem::new(SERIAL)),
        Arc::clone(&remote) as Arc<dyn Transport>,
        tokens,
        config,
    );
    Harness {
        remote,
        auth,
        reconciler,
    }
}
