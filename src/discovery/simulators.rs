//! Simulator listing: decodes `simctl list devices available --json`.

use crate::error::DiscoveryError;
use crate::models::{Platform, PowerState, Target, TargetKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Platforms that ship simulator runtimes, in match order.
const SIMULATOR_PLATFORMS: [Platform; 4] = [
    Platform::Ios,
    Platform::WatchOs,
    Platform::TvOs,
    Platform::VisionOs,
];

static VERSION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:-\d+)*$").expect("valid version regex"));

#[derive(Debug, Deserialize)]
struct SimctlList {
    devices: BTreeMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    name: String,
    #[serde(alias = "udid")]
    id: String,
    #[serde(default)]
    state: String,
    #[serde(rename = "isAvailable", default = "available_by_default")]
    is_available: bool,
}

fn available_by_default() -> bool {
    true
}

/// Classify a runtime identifier such as
/// `com.apple.CoreSimulator.SimRuntime.iOS-17-2` into `(Platform::Ios, "17.2")`.
///
/// Unknown runtimes return `None`.
pub fn parse_runtime(identifier: &str) -> Option<(Platform, String)> {
    SIMULATOR_PLATFORMS.iter().find_map(|platform| {
        let prefix = platform.runtime_prefix()?;
        let suffix = identifier.strip_prefix(prefix)?;
        if !VERSION_SUFFIX.is_match(suffix) {
            return None;
        }
        Some((*platform, suffix.replace('-', ".")))
    })
}

/// Inverse of [`parse_runtime`].
pub fn runtime_identifier(platform: Platform, version: &str) -> Option<String> {
    platform
        .runtime_prefix()
        .map(|prefix| format!("{}{}", prefix, version.replace('.', "-")))
}

fn power_state(state: &str) -> PowerState {
    match state {
        "Booted" => PowerState::Running,
        _ => PowerState::Stopped,
    }
}

/// Decode the simulator list. Records under unclassifiable runtimes and
/// unavailable devices are dropped.
pub fn parse_simulator_list(json: &str) -> Result<Vec<Target>, DiscoveryError> {
    let list: SimctlList =
        serde_json::from_str(json).map_err(DiscoveryError::InvalidSimulatorList)?;

    let mut targets = Vec::new();
    for (runtime, devices) in list.devices {
        let Some((platform, version)) = parse_runtime(&runtime) else {
            log::debug!("[Discovery] [SIM] Skipping unknown runtime {}", runtime);
            continue;
        };
        for device in devices.into_iter().filter(|d| d.is_available) {
            targets.push(Target {
                id: device.id,
                name: device.name,
                kind: TargetKind::Simulated,
                platform,
                state: power_state(&device.state),
                os_version: Some(version.clone()),
            });
        }
    }
    Ok(targets)
}
