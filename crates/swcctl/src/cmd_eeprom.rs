use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common;

#[derive(Serialize)]
struct EepromDump<'a> {
    target: &'a str,
    offset: usize,
    data: Vec<u8>,
}

pub fn run(
    path: &Path,
    unbound: &[String],
    target: &str,
    offset: usize,
    len: usize,
    json: bool,
) -> Result<()> {
    let (platform, _) = common::bring_up(path, unbound)?;
    info!(target, offset, len, "reading module eeprom");
    let data = platform
        .read_serial_memory(target, offset, len)
        .with_context(|| format!("read eeprom of {target}"))?;

    if json {
        let payload = EepromDump {
            target,
            offset,
            data,
        };
        return common::print_json(&payload);
    }

    println!("{}", common::hex_dump(offset, &data));
    Ok(())
}
