//! Output formatting: table or JSON.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! JSON serializes the snapshot via serde.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::Value;
use tabled::{Table, Tabled, settings::Style};

use thermosync_core::{Change, Section, Snapshot, Topic};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

pub struct Painter {
    color: bool,
}

impl Painter {
    pub fn new(mode: ColorMode) -> Self {
        Self {
            color: should_color(mode),
        }
    }

    pub fn ok(&self, text: &str) -> String {
        if self.color { text.green().to_string() } else { text.to_owned() }
    }

    pub fn warn(&self, text: &str) -> String {
        if self.color { text.yellow().to_string() } else { text.to_owned() }
    }

    pub fn label(&self, text: &str) -> String {
        if self.color { text.cyan().bold().to_string() } else { text.to_owned() }
    }
}

// ── Zone table ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ZoneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Temp")]
    temp: String,
    #[tabled(rename = "Heat")]
    heat: String,
    #[tabled(rename = "Cool")]
    cool: String,
    #[tabled(rename = "Hold")]
    hold: String,
}

/// Render a scalar JSON value for a table cell.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn zone_id(zone: &Value) -> String {
    cell(zone.get("id"))
}

/// Live readings live under `status.zones[]`, keyed like the config zones.
fn status_zone<'a>(snapshot: &'a Snapshot, id: &str) -> Option<&'a Value> {
    snapshot
        .status
        .get("zones")?
        .as_array()?
        .iter()
        .find(|zone| zone_id(zone) == id)
}

fn zone_rows(snapshot: &Snapshot) -> Vec<ZoneRow> {
    snapshot
        .zones()
        .map(|zone| {
            let id = zone_id(zone);
            let temp = cell(status_zone(snapshot, &id).and_then(|z| z.get("rt")));
            ZoneRow {
                name: cell(zone.get("name")),
                temp,
                heat: cell(zone.get("htsp")),
                cool: cell(zone.get("clsp")),
                hold: cell(zone.get("hold")),
                id,
            }
        })
        .collect()
}

pub fn render_status(format: OutputFormat, snapshot: &Snapshot, painter: &Painter) -> String {
    match format {
        OutputFormat::Json => render_json(snapshot),
        OutputFormat::Table => {
            let name = cell(snapshot.profile.get("name"));
            let mode = snapshot.mode().unwrap_or("-");
            let table = Table::new(zone_rows(snapshot)).with(Style::rounded()).to_string();
            format!(
                "{} {name}\n{} {mode}\n{table}",
                painter.label("System:"),
                painter.label("Mode:  ")
            )
        }
    }
}

// ── Change notifications ─────────────────────────────────────────────

fn summarize(snapshot: &Snapshot) -> String {
    let mut parts = vec![format!("mode {}", snapshot.mode().unwrap_or("-"))];
    parts.extend(snapshot.zones().map(|zone| {
        format!(
            "{} {}/{}",
            cell(zone.get("name")),
            cell(zone.get("htsp")),
            cell(zone.get("clsp"))
        )
    }));
    parts.join(", ")
}

fn section_for(topic: Topic) -> Section {
    match topic {
        Topic::Profile => Section::Profile,
        Topic::Status => Section::Status,
        Topic::Config | Topic::LocalMutation => Section::Config,
    }
}

pub fn render_change(format: OutputFormat, change: &Change, painter: &Painter) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "topic": change.topic.to_string(),
            "section": change.snapshot.section(section_for(change.topic)),
        })
        .to_string(),
        OutputFormat::Table => {
            let topic = format!("[{}]", change.topic);
            let topic = if change.topic == Topic::LocalMutation {
                painter.warn(&topic)
            } else {
                painter.label(&topic)
            };
            format!("{topic} {}", summarize(&change.snapshot))
        }
    }
}

// ── Shared renderers ─────────────────────────────────────────────────

pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Pretty-printed JSON.
pub fn render_json<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}
