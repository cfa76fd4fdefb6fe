//! Target discovery public API module.
//!
//! Queries the simulator lister and the physical/local device lister
//! concurrently and merges them into one deterministic list:
//! physical and local-host targets first (in listed order), then simulators
//! sorted running-first, then by platform name, then by target name.
//!
//! The simulator source is structured; failing to decode it is the only
//! error discovery reports. The device source degrades to an empty list.

pub mod devices;
pub mod simulators;

pub use devices::{classify_device, parse_device_line, parse_device_list, DeviceLine};
pub use simulators::{parse_runtime, parse_simulator_list, runtime_identifier};

use crate::config::Settings;
use crate::error::DiscoveryError;
use crate::models::Target;
use crate::system::{describe_command, run_command_raw};

/// Entry point for listing deploy targets.
#[derive(Clone, Debug)]
pub struct TargetDiscovery {
    device_tool: String,
}

impl TargetDiscovery {
    pub fn new(settings: &Settings) -> Self {
        TargetDiscovery {
            device_tool: settings.device_tool.clone(),
        }
    }

    /// Discover every viable target.
    pub async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        let (simulated, physical) = tokio::join!(self.list_simulators(), self.list_devices());
        let simulated = simulated?;
        log::info!(
            "[Discovery] Found {} device(s) and {} simulator(s)",
            physical.len(),
            simulated.len()
        );
        Ok(merge_targets(physical, simulated))
    }

    /// `simctl list devices available --json`
    pub async fn list_simulators(&self) -> Result<Vec<Target>, DiscoveryError> {
        let args = strings(&["simctl", "list", "devices", "available", "--json"]);
        let output = run_command_raw(&self.device_tool, &args)
            .await
            .map_err(|e| DiscoveryError::CommandFailed {
                cmd: describe_command(&self.device_tool, &args),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            log::warn!(
                "[Discovery] [SIM] simctl exited with {}; decoding whatever it printed",
                output.status
            );
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_simulator_list(&text)
    }

    /// `xctrace list devices`; never fails.
    pub async fn list_devices(&self) -> Vec<Target> {
        let args = strings(&["xctrace", "list", "devices"]);
        let output = match run_command_raw(&self.device_tool, &args).await {
            Ok(output) => output,
            Err(e) => {
                log::warn!("[Discovery] [DEVICE] Could not launch xctrace: {}", e);
                return Vec::new();
            }
        };
        if !output.status.success() {
            log::warn!("[Discovery] [DEVICE] xctrace exited with {}", output.status);
            return Vec::new();
        }

        // xctrace has printed its listing on either stream across releases.
        let mut bytes = output.stdout;
        bytes.extend_from_slice(&output.stderr);
        match String::from_utf8(bytes) {
            Ok(text) => parse_device_list(&text),
            Err(e) => {
                log::warn!("[Discovery] [DEVICE] Undecodable xctrace output: {}", e);
                Vec::new()
            }
        }
    }
}

/// Physical targets keep their order; simulators are sorted running-first,
/// then by platform name, then by name.
pub fn merge_targets(physical: Vec<Target>, mut simulated: Vec<Target>) -> Vec<Target> {
    simulated.sort_by(|a, b| {
        b.is_running()
            .cmp(&a.is_running())
            .then_with(|| a.platform.as_str().cmp(b.platform.as_str()))
            .then_with(|| a.name.cmp(&b.name))
    });
    physical.into_iter().chain(simulated).collect()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
