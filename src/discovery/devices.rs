//! Physical and local-host device listing from `xctrace list devices`.
//!
//! The listing is line-oriented text grouped under `== Section ==` headers.
//! Only the `Devices` section is read; anything unparseable is skipped.

use crate::models::{Platform, PowerState, Target, TargetKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// `Name (Version) (ID)`
static WITH_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)\s+\(([^()]+)\)\s+\(([^()]+)\)$").expect("valid device regex")
});

/// `Name (ID)`, used by the local host
static WITHOUT_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s+\(([^()]+)\)$").expect("valid device regex"));

const MAC_TOKENS: [&str; 6] = ["mac", "imac", "macbook", "macmini", "macpro", "macstudio"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLine {
    pub name: String,
    pub version: Option<String>,
    pub id: String,
}

/// Match one line against the two device grammars, versioned form first.
pub fn parse_device_line(line: &str) -> Option<DeviceLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(caps) = WITH_VERSION.captures(line) {
        return Some(DeviceLine {
            name: caps[1].trim().to_string(),
            version: Some(caps[2].trim().to_string()),
            id: caps[3].trim().to_string(),
        });
    }
    WITHOUT_VERSION.captures(line).map(|caps| DeviceLine {
        name: caps[1].trim().to_string(),
        version: None,
        id: caps[2].trim().to_string(),
    })
}

/// Name heuristics for kind and platform.
pub fn classify_device(name: &str) -> (TargetKind, Platform) {
    let lower = name.to_lowercase();
    let is_mac = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| MAC_TOKENS.contains(&word));

    if lower.contains("watch") {
        (TargetKind::Physical, Platform::WatchOs)
    } else if lower.contains("apple tv") || lower.contains("appletv") {
        (TargetKind::Physical, Platform::TvOs)
    } else if lower.contains("vision") {
        (TargetKind::Physical, Platform::VisionOs)
    } else if is_mac {
        (TargetKind::LocalHost, Platform::MacOs)
    } else {
        (TargetKind::Physical, Platform::Ios)
    }
}

fn section_header(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("==")
        .and_then(|rest| rest.strip_suffix("=="))
        .map(str::trim)
}

/// Parse the `Devices` section of the listing into targets, in listed order.
pub fn parse_device_list(text: &str) -> Vec<Target> {
    let mut in_devices = false;
    let mut targets = Vec::new();

    for line in text.lines() {
        if let Some(section) = section_header(line) {
            in_devices = section == "Devices";
            continue;
        }
        if !in_devices {
            continue;
        }
        let Some(device) = parse_device_line(line) else {
            continue;
        };
        let (kind, platform) = classify_device(&device.name);
        targets.push(Target {
            id: device.id,
            name: device.name,
            kind,
            platform,
            state: PowerState::Available,
            os_version: device.version,
        });
    }
    targets
}
