use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use swc::peripheral::drivers::template_for;
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct NodeEntry {
    name: String,
    compatible: Option<String>,
    enabled: bool,
    address: Option<u64>,
    driver: Option<&'static str>,
    references: usize,
}

pub fn run(path: &Path, json: bool) -> Result<()> {
    let platform = common::load_platform(path)?;
    let firmware = platform.firmware();
    info!(nodes = firmware.nodes().len(), "listing firmware nodes");

    let entries: Vec<NodeEntry> = firmware
        .nodes()
        .iter()
        .map(|node| NodeEntry {
            name: node.name.clone(),
            compatible: node.compatible.clone(),
            enabled: node.enabled,
            address: node.address,
            driver: node
                .compatible
                .as_deref()
                .and_then(template_for)
                .map(|template| template.driver),
            references: node.references.len(),
        })
        .collect();

    if json {
        return common::print_json(&entries);
    }

    if entries.is_empty() {
        println!("No nodes described.");
        return Ok(());
    }

    println!(
        "{:<12} {:<16} {:<9} {:<8} {:<10} {}",
        "NODE", "COMPATIBLE", "STATUS", "ADDRESS", "DRIVER", "REFS"
    );
    for entry in &entries {
        println!(
            "{:<12} {:<16} {:<9} {:<8} {:<10} {}",
            entry.name,
            entry.compatible.as_deref().unwrap_or("-"),
            if entry.enabled { "okay" } else { "disabled" },
            entry
                .address
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".into()),
            entry.driver.unwrap_or("-"),
            entry.references,
        );
    }

    Ok(())
}
