use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::System;

/// Print every change notification until Ctrl-C.
pub async fn handle(system: &System, global: &GlobalOpts) -> Result<(), CliError> {
    let painter = Painter::new(global.color);
    let mut changes = system.reconciler.subscribe(&[]);
    system.reconciler.spawn_poller();

    if global.output == OutputFormat::Table {
        eprintln!(
            "Watching {} ({}), polling every {}. Press Ctrl-C to stop.",
            system.profile,
            system.serial,
            humantime::format_duration(system.poll_interval)
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else { break };
                output::print_output(&output::render_change(global.output, &change, &painter));
            }
        }
    }
    Ok(())
}
