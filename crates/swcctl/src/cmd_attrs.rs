use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct AttributeEntry<'a> {
    name: &'a str,
    writable: bool,
    device: &'a str,
    offset: u64,
    value: Option<bool>,
    error: Option<String>,
}

pub fn run(path: &Path, unbound: &[String], target: &str, json: bool) -> Result<()> {
    let (platform, _) = common::bring_up(path, unbound)?;
    let instance = platform
        .instance(target)
        .with_context(|| format!("select peripheral {target}"))?;
    info!(owner = %instance.owner(), attrs = instance.list().len(), "listing attributes");

    let entries: Vec<AttributeEntry<'_>> = instance
        .list()
        .iter()
        .map(|attr| {
            let read = instance.get(&attr.name);
            AttributeEntry {
                name: &attr.name,
                writable: attr.access.is_writable(),
                device: attr.backing.handle.name(),
                offset: attr.backing.offset,
                value: read.as_ref().ok().copied(),
                error: read.err().map(|err| err.to_string()),
            }
        })
        .collect();

    if json {
        return common::print_json(&entries);
    }

    println!(
        "{:<16} {:<4} {:<10} {:<8} {}",
        "ATTRIBUTE", "RW", "DEVICE", "OFFSET", "VALUE"
    );
    for entry in &entries {
        let value = match (&entry.value, &entry.error) {
            (Some(value), _) => u8::from(*value).to_string(),
            (None, Some(err)) => format!("error: {err}"),
            (None, None) => "-".into(),
        };
        println!(
            "{:<16} {:<4} {:<10} {:<#8x} {}",
            entry.name,
            if entry.writable { "rw" } else { "ro" },
            entry.device,
            entry.offset,
            value,
        );
    }

    Ok(())
}
