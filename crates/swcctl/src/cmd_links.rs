use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::common;

#[derive(Serialize)]
struct LinkEntry<'a> {
    name: &'a str,
    target: &'a str,
}

pub fn run(path: &Path, unbound: &[String], target: &str, json: bool) -> Result<()> {
    let (platform, _) = common::bring_up(path, unbound)?;
    let links = platform
        .links(target)
        .with_context(|| format!("select peripheral {target}"))?;
    let entries: Vec<LinkEntry<'_>> = links
        .iter()
        .map(|link| LinkEntry {
            name: &link.name,
            target: link.target.name(),
        })
        .collect();

    if json {
        return common::print_json(&entries);
    }

    if entries.is_empty() {
        println!("{target} has no links.");
        return Ok(());
    }
    for entry in &entries {
        println!("{} -> {}", entry.name, entry.target);
    }
    Ok(())
}
