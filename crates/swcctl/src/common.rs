use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use swc::{Platform, ProbeOutcome};
use tracing::info;

/// Load the platform description without binding anything.
pub fn load_platform(path: &Path) -> Result<Platform> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("read platform description {}", path.display()))?;
    Platform::from_xml(&xml).with_context(|| format!("parse {}", path.display()))
}

/// Load the platform, bind every backend except `unbound` and probe all
/// peripherals once.
pub fn bring_up(
    path: &Path,
    unbound: &[String],
) -> Result<(Platform, Vec<(String, ProbeOutcome)>)> {
    let mut platform = load_platform(path)?;
    let skip: Vec<&str> = unbound.iter().map(String::as_str).collect();
    let bound = platform.bind_backends(&skip).context("bind backends")?;
    info!(bound = bound.len(), skipped = skip.len(), "backends bound");
    let outcomes = platform.discover_all();
    Ok((platform, outcomes))
}

pub fn outcome_label(outcome: ProbeOutcome) -> String {
    match outcome {
        ProbeOutcome::Ready => "ready".into(),
        ProbeOutcome::Deferred => "deferred".into(),
        ProbeOutcome::Failed(kind) => format!("failed ({kind:?})"),
    }
}

pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean (0/1/true/false), got '{other}'"),
    }
}

/// Classic 16 bytes per row hex dump starting at `base`.
pub fn hex_dump(base: usize, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let bytes = chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{:08x}  {bytes}", base + row * 16)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}
