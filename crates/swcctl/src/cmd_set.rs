use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct SetResponse<'a> {
    target: &'a str,
    name: &'a str,
    value: bool,
}

pub fn run(
    path: &Path,
    unbound: &[String],
    target: &str,
    name: &str,
    value: &str,
    json: bool,
) -> Result<()> {
    let value = common::parse_bool(value)?;
    let (platform, _) = common::bring_up(path, unbound)?;
    info!(target, attribute = name, value, "writing attribute");
    platform
        .set(target, name, value)
        .with_context(|| format!("write attribute {name} of {target}"))?;
    let read_back = platform
        .get(target, name)
        .with_context(|| format!("read attribute {name} of {target}"))?;

    if json {
        let payload = SetResponse {
            target,
            name,
            value: read_back,
        };
        common::print_json(&payload)?;
    } else {
        println!("{}", u8::from(read_back));
    }

    Ok(())
}
