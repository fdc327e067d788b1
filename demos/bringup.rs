//! Bring up the demo platform with one serial interface arriving late.
//!
//! `cargo run --example bringup`

use swc::{probe_with_backoff, Platform, PlatformError, ProbeOutcome, RetryPolicy};
use tracing_subscriber::EnvFilter;

const PLATFORM: &str = include_str!("platform.xml");

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), PlatformError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut platform = Platform::from_xml(PLATFORM)?;
    platform.bind_backends(&["TWI1"])?;
    for (owner, outcome) in platform.discover_all() {
        println!("{owner:<6} {outcome:?}");
    }

    let mut attempt = 0;
    let outcome = probe_with_backoff(&RetryPolicy::default(), || {
        attempt += 1;
        if attempt == 3 {
            platform.bind_backend("TWI1")?;
        }
        platform.on_discovered("PORT2")
    })
    .await?;
    println!("PORT2 settled after {attempt} attempts: {outcome:?}");
    assert_eq!(outcome, ProbeOutcome::Ready);

    for instance in platform.instances() {
        let attrs: Vec<String> = instance
            .list()
            .iter()
            .map(|attr| match instance.get(&attr.name) {
                Ok(value) => format!("{}={}", attr.name, u8::from(value)),
                Err(_) => format!("{}=?", attr.name),
            })
            .collect();
        println!("{:<6} {:<8} {}", instance.owner(), instance.driver(), attrs.join(" "));
    }

    platform.set("LED0", "diag_green", true)?;
    println!("diag_green -> {}", u8::from(platform.get("LED0", "diag_green")?));

    if let Some(device) = platform.find_class_device("PSU1") {
        println!("PSU1 is {device}, present={}", platform.get(&device.name(), "present")?);
    }

    let ident = platform.read_serial_memory("PORT1", 0, 1)?;
    println!("PORT1 module identifier {:#04x}", ident[0]);
    Ok(())
}
