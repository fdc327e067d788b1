use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct AttributeValue<'a> {
    target: &'a str,
    name: &'a str,
    value: bool,
}

pub fn run(path: &Path, unbound: &[String], target: &str, name: &str, json: bool) -> Result<()> {
    let (platform, _) = common::bring_up(path, unbound)?;
    info!(target, attribute = name, "reading attribute");
    let value = platform
        .get(target, name)
        .with_context(|| format!("read attribute {name} of {target}"))?;

    if json {
        let payload = AttributeValue {
            target,
            name,
            value,
        };
        common::print_json(&payload)?;
    } else {
        println!("{}", u8::from(value));
    }

    Ok(())
}
