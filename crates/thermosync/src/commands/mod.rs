//! Command handlers. Everything except `config` runs against a
//! connected [`System`].

pub mod config_cmd;
pub mod set;
pub mod status;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use thermosync_api::{ApiClient, HttpAuthBackend, RequestSigner, TokenManager};
use thermosync_core::{FetchOutcome, HvacSystem, Reconciler, Snapshot};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// A profile resolved into a live reconciler.
pub struct System {
    pub profile: String,
    pub serial: String,
    pub poll_interval: Duration,
    pub reconciler: Reconciler,
}

/// Build the api client, token manager and reconciler for the active profile.
///
/// Logs in before returning so credential problems surface as errors
/// rather than as backoff.
pub async fn connect(global: &GlobalOpts) -> Result<System, CliError> {
    let cfg = thermosync_config::load_config()?;
    let (name, profile) = cfg.profile(global.profile.as_deref())?;
    let settings = thermosync_config::profile_to_settings(profile, name, &cfg.defaults)?;

    let backend = HttpAuthBackend::new(settings.auth, &settings.transport)?;
    let tokens = Arc::new(TokenManager::new(settings.credentials, Arc::new(backend)));
    let signer: Arc<dyn RequestSigner> = Arc::clone(&tokens) as Arc<dyn RequestSigner>;
    let client = ApiClient::new(settings.api_url, &settings.transport)?.with_signer(signer);

    tokens.ensure_valid().await?;

    let poll_interval = settings.sync.poll_interval;
    let reconciler = Reconciler::new(
        Arc::new(HvacSystem::new(settings.serial.clone())),
        Arc::new(client),
        tokens,
        settings.sync,
    );

    Ok(System {
        profile: settings.profile_name,
        serial: settings.serial,
        poll_interval,
        reconciler,
    })
}

pub async fn dispatch(cmd: Command, system: &System, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle(system, global).await,
        Command::Watch => watch::handle(system, global).await,
        Command::Set(args) => set::handle(args, system, global).await,
        Command::Config(args) => config_cmd::handle(args, global),
    }
}

/// Fetch once and return the readable snapshot.
pub async fn load_snapshot(system: &System) -> Result<Arc<Snapshot>, CliError> {
    if let FetchOutcome::Failed { message } = system.reconciler.fetch().await {
        return Err(CliError::Api { message });
    }
    Ok(system.reconciler.snapshot()?)
}
