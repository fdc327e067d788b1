use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use swc::RetryPolicy;
use tracing_subscriber::EnvFilter;

use swcctl::cmd_attrs;
use swcctl::cmd_eeprom;
use swcctl::cmd_get;
use swcctl::cmd_links;
use swcctl::cmd_list;
use swcctl::cmd_probe::{self, ProbeArgs};
use swcctl::cmd_set;

#[derive(Parser, Debug)]
#[command(name = "swcctl", version, about = "Switch complex peripheral CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// Platform firmware description (XML)
    #[arg(long, default_value = "platform.xml")]
    platform: PathBuf,
    /// Devices left unregistered (comma separated)
    #[arg(long, value_delimiter = ',')]
    unbound: Vec<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List firmware nodes
    List,
    /// Bind devices and probe every peripheral
    Probe {
        /// Devices registered only after the first discovery pass
        #[arg(long, value_delimiter = ',')]
        late: Vec<String>,
        #[arg(long, default_value_t = 8)]
        attempts: usize,
        #[arg(long, default_value_t = 20)]
        base_delay_ms: u64,
        #[arg(long, default_value_t = 1000)]
        max_delay_ms: u64,
        #[arg(long, default_value_t = 10)]
        jitter_ms: u64,
    },
    /// Show the published attributes of a peripheral
    Attrs {
        /// Owner node or class device (e.g. psu0)
        target: String,
    },
    /// Read an attribute
    Get { target: String, name: String },
    /// Write an attribute (0/1/true/false)
    Set {
        target: String,
        name: String,
        value: String,
    },
    /// Show the links of a peripheral
    Links { target: String },
    /// Dump module memory through the serial interface
    Eeprom {
        target: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 128)]
        len: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        platform,
        unbound,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .init();

    match cmd {
        Cmd::List => cmd_list::run(&platform, json)?,
        Cmd::Probe {
            late,
            attempts,
            base_delay_ms,
            max_delay_ms,
            jitter_ms,
        } => {
            let args = ProbeArgs {
                path: &platform,
                unbound: &unbound,
                late: &late,
                policy: RetryPolicy {
                    max_attempts: attempts,
                    base_delay: Duration::from_millis(base_delay_ms),
                    max_delay: Duration::from_millis(max_delay_ms),
                    jitter: Duration::from_millis(jitter_ms),
                },
            };
            cmd_probe::run(args, json).await?
        }
        Cmd::Attrs { target } => cmd_attrs::run(&platform, &unbound, &target, json)?,
        Cmd::Get { target, name } => cmd_get::run(&platform, &unbound, &target, &name, json)?,
        Cmd::Set {
            target,
            name,
            value,
        } => cmd_set::run(&platform, &unbound, &target, &name, &value, json)?,
        Cmd::Links { target } => cmd_links::run(&platform, &unbound, &target, json)?,
        Cmd::Eeprom {
            target,
            offset,
            len,
        } => cmd_eeprom::run(&platform, &unbound, &target, offset, len, json)?,
    };

    Ok(())
}
