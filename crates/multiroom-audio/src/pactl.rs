//! `pactl`-backed implementation of [`AudioControl`].
//!
//! Works against native PulseAudio and PipeWire's pipewire-pulse shim
//! alike. Listings use the `short` machine format, which is tab-separated.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::control::{AudioControl, ModuleInfo, SinkInfo};
use crate::error::{AudioError, Result};

/// How many times a loopback load is attempted before giving up.
const LOOPBACK_ATTEMPTS: u32 = 3;

/// Pause between loopback attempts.
const LOOPBACK_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Production audio backend driving the `pactl` utility.
#[derive(Debug, Default)]
pub struct PactlAudio;

impl PactlAudio {
    pub fn new() -> Self {
        Self
    }

    /// Run `pactl` with the given arguments and return trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("pactl {}", args.join(" "));
        let output = Command::new("pactl")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::Command(format!(
                "pactl {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Parse the output of `pactl list short sinks`.
///
/// Each line is `<id>\t<name>\t<driver>\t<format>\t<state>`; the format
/// field itself contains spaces, so splitting happens on tabs only.
fn parse_sinks(output: &str) -> Vec<SinkInfo> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                return None;
            }
            let id = fields[0].trim().parse().ok()?;
            Some(SinkInfo {
                id,
                name: fields[1].trim().to_string(),
                state: fields.last().map(|s| s.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Parse the output of `pactl list short modules`.
fn parse_modules(output: &str) -> Vec<ModuleInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let id = fields.next()?.trim().parse().ok()?;
            let name = fields.next()?.trim().to_string();
            let args = fields.next().unwrap_or("").trim().to_string();
            Some(ModuleInfo { id, name, args })
        })
        .collect()
}

/// Parse the module id `pactl load-module` prints on success.
fn parse_module_id(output: &str) -> Option<u32> {
    output.trim().parse().ok()
}

#[async_trait]
impl AudioControl for PactlAudio {
    async fn ping(&self) -> bool {
        match self.run(&["info"]).await {
            Ok(out) => out.contains("Server Name"),
            Err(_) => false,
        }
    }

    async fn load_null_sink(&self, name: &str) -> Result<u32> {
        let sink_name = format!("sink_name={name}");
        let props = format!("sink_properties=device.description={name}");
        let out = self
            .run(&["load-module", "module-null-sink", &sink_name, &props])
            .await?;
        parse_module_id(&out)
            .ok_or_else(|| AudioError::Parse(format!("load-module returned {out:?}")))
    }

    async fn load_loopback(&self, source: &str, sink: &str, latency_ms: u64) -> Result<u32> {
        let source_arg = format!("source={source}");
        let sink_arg = format!("sink={sink}");
        let latency_arg = format!("latency_msec={latency_ms}");

        for attempt in 1..=LOOPBACK_ATTEMPTS {
            match self
                .run(&[
                    "load-module",
                    "module-loopback",
                    &source_arg,
                    &sink_arg,
                    &latency_arg,
                ])
                .await
            {
                Ok(out) => match parse_module_id(&out) {
                    Some(id) => return Ok(id),
                    None => warn!(
                        "loopback load for {sink} returned non-numeric {out:?} \
                         (attempt {attempt}/{LOOPBACK_ATTEMPTS})"
                    ),
                },
                Err(e) => warn!(
                    "loopback load for {sink} failed: {e} (attempt {attempt}/{LOOPBACK_ATTEMPTS})"
                ),
            }
            if attempt < LOOPBACK_ATTEMPTS {
                tokio::time::sleep(LOOPBACK_RETRY_DELAY).await;
            }
        }
        Err(AudioError::LoopbackLoad {
            sink: sink.to_string(),
        })
    }

    async fn unload_module(&self, id: u32) -> Result<()> {
        self.run(&["unload-module", &id.to_string()]).await?;
        Ok(())
    }

    async fn list_sinks(&self) -> Result<Vec<SinkInfo>> {
        let out = self.run(&["list", "short", "sinks"]).await?;
        Ok(parse_sinks(&out))
    }

    async fn list_modules(&self) -> Result<Vec<ModuleInfo>> {
        let out = self.run(&["list", "short", "modules"]).await?;
        Ok(parse_modules(&out))
    }

    async fn unsuspend_sink(&self, name: &str) -> Result<()> {
        self.run(&["suspend-sink", name, "0"]).await?;
        Ok(())
    }

    async fn set_sink_volume(&self, name: &str, percent: u32) -> Result<()> {
        let volume = format!("{percent}%");
        self.run(&["set-sink-volume", name, &volume]).await?;
        Ok(())
    }
}
