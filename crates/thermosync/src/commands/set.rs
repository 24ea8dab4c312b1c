use thermosync_core::{FieldValue, Mutation, PushOutcome};
use tokio::sync::watch;
use tracing::info;

use crate::cli::{GlobalOpts, OutputFormat, SetCommand};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::{System, load_snapshot};

fn parse_value(raw: &str) -> FieldValue {
    raw.parse().unwrap_or_else(|never| match never {})
}

/// Validate the target against the current snapshot and build the mutation.
fn build(cmd: SetCommand, snapshot: &thermosync_core::Snapshot) -> Result<Mutation, CliError> {
    match cmd {
        SetCommand::Mode { mode } => Ok(Mutation::system(vec![(
            "mode".into(),
            FieldValue::Text(mode),
        )])),
        SetCommand::Zone { zone, field, value } => {
            if snapshot.zone(&zone).is_none() {
                return Err(CliError::NotFound {
                    target: format!("zone {zone}"),
                });
            }
            Ok(Mutation::zone(zone, vec![(field, parse_value(&value))]))
        }
        SetCommand::Activity {
            zone,
            activity,
            field,
            value,
        } => {
            if snapshot.activity(&zone, &activity).is_none() {
                return Err(CliError::NotFound {
                    target: format!("zone {zone} activity {activity}"),
                });
            }
            Ok(Mutation::activity(
                zone,
                activity,
                vec![(field, parse_value(&value))],
            ))
        }
    }
}

/// Wait for the next published outcome.
async fn next_outcome(rx: &mut watch::Receiver<Option<PushOutcome>>) -> Option<PushOutcome> {
    loop {
        rx.changed().await.ok()?;
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return Some(outcome);
        }
    }
}

pub async fn handle(cmd: SetCommand, system: &System, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = load_snapshot(system).await?;
    let mutation = build(cmd, &snapshot)?;
    let label = mutation.label().to_owned();

    let mut outcomes = system.reconciler.push_outcomes();
    system.reconciler.enqueue(mutation);
    info!(mutation = %label, "waiting for the remote to confirm");

    let outcome = tokio::select! {
        outcome = next_outcome(&mut outcomes) => outcome,
        _ = tokio::signal::ctrl_c() => return Err(CliError::Interrupted),
    };
    let Some(outcome) = outcome else {
        return Err(CliError::Interrupted);
    };

    report(&label, &outcome, global)
}

fn report(label: &str, outcome: &PushOutcome, global: &GlobalOpts) -> Result<(), CliError> {
    let painter = Painter::new(global.color);
    let (status, line) = match outcome {
        PushOutcome::Confirmed { writes: 0 } => (
            "dropped",
            painter.warn(&format!("{label}: target disappeared, nothing written")),
        ),
        PushOutcome::Confirmed { .. } => ("confirmed", painter.ok(&format!("{label}: confirmed"))),
        PushOutcome::Unverified { .. } => (
            "unverified",
            painter.warn(&format!("{label}: written, confirmation still pending")),
        ),
        PushOutcome::Mismatched { mismatches } => {
            return Err(CliError::Mismatch {
                details: mismatches
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }
        PushOutcome::Failed { message } | PushOutcome::Anomaly { message } => {
            return Err(CliError::WriteFailed {
                message: message.clone(),
            });
        }
        PushOutcome::Cancelled | PushOutcome::Superseded | PushOutcome::NothingQueued => {
            return Err(CliError::Interrupted);
        }
    };

    let rendered = match global.output {
        OutputFormat::Json => output::render_json(&serde_json::json!({
            "mutation": label,
            "outcome": status,
        })),
        OutputFormat::Table => line,
    };
    output::print_output(&rendered);
    Ok(())
}
