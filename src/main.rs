//! multiroom: apply or tear down a speaker configuration from the shell.
//!
//! Reads the same configuration JSON the BLE control channel submits,
//! runs the orchestrator once, and prints the structured report. Exit
//! codes: 0 success, 2 usage or configuration error, 3 no usable
//! controllers, 4 audio server unavailable, 1 anything else.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use multiroom_audio::PactlAudio;
use multiroom_bluetooth::BluezControl;
use multiroom_core::{Configuration, ConfigurationInput};
use multiroom_orchestrator::Orchestrator;
use tracing::warn;

struct Args {
    /// Path to the configuration JSON.
    config: PathBuf,
    /// Tear the configuration down instead of bringing it up.
    disconnect: bool,
    /// Abort the apply after this many seconds.
    deadline_secs: Option<u64>,
    /// Enable debug logging.
    debug: bool,
}

fn print_help() {
    println!("multiroom - Bluetooth multi-speaker audio hub");
    println!();
    println!("Usage: multiroom [OPTIONS] <config.json>");
    println!();
    println!("Options:");
    println!("  --disconnect         Disconnect the configuration's speakers and");
    println!("                       tear down the audio routing");
    println!("  --deadline <secs>    Abort the apply after this many seconds");
    println!("  --debug, -d          Enable debug logging");
    println!("  --help, -h           Show this help");
    println!();
    println!(
        "The {} environment variable must name the radio",
        multiroom_bluetooth::RESERVED_ENV
    );
    println!("reserved for the BLE control channel (hciN or MAC).");
}

fn parse_args() -> Result<Args, String> {
    let mut config = None;
    let mut disconnect = false;
    let mut deadline_secs = None;
    let mut debug = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--disconnect" => disconnect = true,
            "--deadline" => {
                let value = iter.next().ok_or("--deadline needs a value")?;
                deadline_secs = Some(value.parse().map_err(|_| "--deadline needs seconds")?);
            }
            "--debug" | "-d" => debug = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            path => {
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("more than one configuration file given".to_string());
                }
            }
        }
    }

    Ok(Args {
        config: config.ok_or("no configuration file given")?,
        disconnect,
        deadline_secs,
        debug,
    })
}

async fn run(args: Args) -> i32 {
    let raw = match std::fs::read_to_string(&args.config) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read {}: {e}", args.config.display());
            return 2;
        }
    };
    let input: ConfigurationInput = match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("invalid configuration JSON: {e}");
            return 2;
        }
    };
    let config = match Configuration::from_input(input) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return 2;
        }
    };

    let bt = match BluezControl::from_env().await {
        Ok(bt) => bt,
        Err(e) => {
            eprintln!("cannot reach the Bluetooth daemon: {e}");
            return 1;
        }
    };
    let orchestrator = Orchestrator::new(Arc::new(bt), Arc::new(PactlAudio::new()));

    // Pick up modules a previous run left behind, so re-applies and
    // teardowns manage them instead of duplicating them.
    if let Err(e) = orchestrator.adopt_existing_topology().await {
        warn!("could not inspect existing audio topology: {e}");
    }

    let result = if args.disconnect {
        orchestrator.disconnect_configuration(&config).await
    } else {
        orchestrator
            .apply_with_deadline(&config, args.deadline_secs.map(Duration::from_secs))
            .await
    };

    match result {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("cannot serialize report: {e}");
                    return 1;
                }
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!();
            print_help();
            std::process::exit(2);
        }
    };

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = run(args).await;
    std::process::exit(code);
}
