use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use swc::{probe_with_backoff, Platform, ProbeOutcome, RetryPolicy};
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct ProbeEntry {
    owner: String,
    driver: Option<&'static str>,
    outcome: String,
    class_device: Option<String>,
    attributes: usize,
}

pub struct ProbeArgs<'a> {
    pub path: &'a Path,
    pub unbound: &'a [String],
    /// Nodes bound only after the first discovery pass.
    pub late: &'a [String],
    pub policy: RetryPolicy,
}

/// Retry every deferred owner under `policy`. Late devices arrive one per
/// attempt, so each retry sees a changed topology; any left over are bound
/// at the end.
pub async fn settle(
    platform: &mut Platform,
    late: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<(String, ProbeOutcome)>> {
    let mut late: VecDeque<String> = late.iter().cloned().collect();
    let deferred: Vec<String> = platform.deferred().map(str::to_string).collect();
    let mut settled = Vec::with_capacity(deferred.len());
    for owner in deferred {
        let outcome = probe_with_backoff(policy, || {
            if let Some(node) = late.pop_front() {
                let reprobed = platform.bind_backend(&node)?;
                info!(device = %node, reprobed = reprobed.len(), "late device bound");
            }
            platform.on_discovered(&owner)
        })
        .await
        .with_context(|| format!("probe {owner}"))?;
        info!(owner = %owner, outcome = %common::outcome_label(outcome), "retry finished");
        settled.push((owner, outcome));
    }
    for node in late {
        platform
            .bind_backend(&node)
            .with_context(|| format!("bind late device {node}"))?;
    }
    Ok(settled)
}

pub async fn run(args: ProbeArgs<'_>, json: bool) -> Result<()> {
    let mut skip = args.unbound.to_vec();
    skip.extend(args.late.iter().cloned());
    let (mut platform, first) = common::bring_up(args.path, &skip)?;
    info!(probed = first.len(), "first discovery pass");

    let settled = settle(&mut platform, args.late, &args.policy).await?;
    info!(settled = settled.len(), "deferred peripherals settled");

    let entries: Vec<ProbeEntry> = platform
        .peripheral_nodes()
        .filter_map(|node| {
            let outcome = platform.outcome(&node.name)?;
            let instance = platform.instance(&node.name).ok();
            Some(ProbeEntry {
                owner: node.name.clone(),
                driver: instance.map(|inst| inst.driver()),
                outcome: common::outcome_label(outcome),
                class_device: platform.find_class_device(&node.name).map(|dev| dev.name()),
                attributes: instance.map_or(0, |inst| inst.list().len()),
            })
        })
        .collect();

    if json {
        return common::print_json(&entries);
    }

    println!(
        "{:<12} {:<10} {:<28} {:<8} {}",
        "OWNER", "DRIVER", "OUTCOME", "CLASS", "ATTRS"
    );
    for entry in &entries {
        println!(
            "{:<12} {:<10} {:<28} {:<8} {}",
            entry.owner,
            entry.driver.unwrap_or("-"),
            entry.outcome,
            entry.class_device.as_deref().unwrap_or("-"),
            entry.attributes,
        );
    }
    let ready = entries
        .iter()
        .filter(|entry| entry.outcome == common::outcome_label(ProbeOutcome::Ready))
        .count();
    println!("{ready}/{} peripherals ready", entries.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"
        <FirmwareDescription Version="1">
            <Device Name="CPLD0" Compatible="swc-cpld">
                <Register Offset="0x10" Mask="0x01" Value="0x00" Access="RO" />
            </Device>
            <Device Name="TWI0" Compatible="sff-twi" Size="128" Identifier="0x03" />
            <Device Name="TWI1" Compatible="sff-twi" Size="128" Identifier="0x03" />
            <Device Name="PORT1" Compatible="sff-sfpp-fw" Address="1">
                <Reference Property="serial-interface" Target="TWI0" />
                <Reference Property="present" Target="CPLD0" Args="0x10" />
            </Device>
        </FirmwareDescription>
    "#;

    #[tokio::test(start_paused = true)]
    async fn late_devices_unblock_deferred_owners() {
        let mut platform = Platform::from_xml(XML).expect("load platform");
        platform
            .bind_backends(&["TWI0", "TWI1"])
            .expect("bind backends");
        assert_eq!(
            platform.on_discovered("PORT1").expect("first probe"),
            ProbeOutcome::Deferred
        );

        let late = ["TWI0".to_string(), "TWI1".to_string()];
        let settled = settle(&mut platform, &late, &RetryPolicy::default())
            .await
            .expect("settle");
        assert_eq!(settled, [("PORT1".to_string(), ProbeOutcome::Ready)]);
        assert!(platform.get("PORT1", "present").expect("present"));
        assert!(platform.devices().is_registered("TWI1"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_nothing_arrives() {
        let mut platform = Platform::from_xml(XML).expect("load platform");
        platform.bind_backends(&["TWI0"]).expect("bind backends");
        platform.discover_all();

        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let settled = settle(&mut platform, &[], &policy).await.expect("settle");
        assert_eq!(settled, [("PORT1".to_string(), ProbeOutcome::Deferred)]);
    }
}
