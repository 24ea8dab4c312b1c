use tracing::debug;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, Painter};

use super::{System, load_snapshot};

pub async fn handle(system: &System, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = load_snapshot(system).await?;
    debug!(profile = %system.profile, serial = %system.serial, "snapshot loaded");
    let painter = Painter::new(global.color);
    output::print_output(&output::render_status(global.output, &snapshot, &painter));
    Ok(())
}
