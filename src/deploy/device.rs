//! Physical device strategy: install and launch through `devicectl`.
//!
//! A launch that fails because the device is locked is retried exactly once,
//! after polling the lock state until the device reports it is usable.

use super::console::{stream_console, Invocation};
use super::RunContext;
use crate::error::DeployError;
use crate::models::{RunPhase, Target};
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

const LOCK_HINT: &str = "Unlock the device and keep it awake until the app launches";

/// Progress phase suggested by one line of install output.
pub fn classify_install_line(line: &str) -> Option<RunPhase> {
    let lower = line.to_lowercase();
    if ["unlock", "passcode", "locked"].iter().any(|k| lower.contains(k)) {
        Some(RunPhase::WaitingForUnlock)
    } else if lower.contains("preparing") {
        Some(RunPhase::Preparing)
    } else if lower.contains("copying") || lower.contains("transferring") {
        Some(RunPhase::Copying)
    } else if lower.contains("verifying") {
        Some(RunPhase::Verifying)
    } else {
        None
    }
}

/// Map failed install output onto an error category.
pub fn classify_install_failure(output: &str) -> DeployError {
    let lower = output.to_lowercase();
    let detail = output.trim().to_string();

    if lower.contains("locked") || lower.contains("passcode") {
        DeployError::DeviceNotReady {
            reason: "the device is locked".to_string(),
            hint: LOCK_HINT.to_string(),
        }
    } else if lower.contains("trust") || lower.contains("pairing") {
        DeployError::DeviceNotReady {
            reason: "the device does not trust this computer".to_string(),
            hint: "Unlock the device and tap Trust when prompted, then retry".to_string(),
        }
    } else if lower.contains("developer mode") {
        DeployError::DeviceNotReady {
            reason: "Developer Mode is disabled".to_string(),
            hint: "Enable Developer Mode in Settings > Privacy & Security and restart the device"
                .to_string(),
        }
    } else if ["provisioning", "signing", "signature", "certificate", "entitlement"]
        .iter()
        .any(|k| lower.contains(k))
    {
        DeployError::InstallFailed {
            detail,
            hint: Some(
                "Check the signing team and provisioning profile include this device".to_string(),
            ),
        }
    } else {
        DeployError::InstallFailed { detail, hint: None }
    }
}

/// Launch failures caused by a locked device.
pub fn is_lock_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("locked") || lower.contains("passcode") || lower.contains("unlock")
}

/// devicectl's "Launched application with <id> bundle identifier." line.
pub fn is_launch_confirmation(line: &str) -> bool {
    line.to_lowercase().contains("launched application")
}

/// Whether a lock-state report says the device is usable. `None` when the
/// report carries none of the recognized fields.
pub fn parse_lock_state(json: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(json).ok()?;
    find_lock_field(&value)
}

fn find_lock_field(value: &Value) -> Option<bool> {
    let object = value.as_object()?;
    for key in ["passcodeRequired", "isLocked", "locked"] {
        if let Some(flag) = object.get(key).and_then(as_flag) {
            return Some(!flag);
        }
    }
    if let Some(state) = object.get("lockState").and_then(Value::as_str) {
        match state.to_ascii_lowercase().as_str() {
            "unlocked" => return Some(true),
            "locked" => return Some(false),
            _ => {}
        }
    }
    // devicectl nests the payload under "result".
    if let Some(found) = object.get("result").and_then(find_lock_field) {
        return Some(found);
    }
    object
        .iter()
        .filter(|(key, _)| key.as_str() != "result")
        .find_map(|(_, nested)| find_lock_field(nested))
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn devicectl(args: &[&str]) -> Vec<String> {
    std::iter::once("devicectl")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Install, then launch with a single lock-wait retry.
pub async fn deploy(
    ctx: &RunContext,
    target: &Target,
    app: &Path,
    bundle_id: &str,
    console: bool,
) -> Result<(), DeployError> {
    install(ctx, target, app).await?;

    ctx.progress(RunPhase::Launching, format!("Launching {}", bundle_id));
    let first = match launch(ctx, target, bundle_id, console).await? {
        None => return Ok(()),
        Some(failure) => failure,
    };
    if !is_lock_error(&first) {
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Launching,
            detail: first.trim().to_string(),
        });
    }

    wait_for_unlock(ctx, target).await?;
    ctx.progress(RunPhase::Launching, format!("Retrying launch of {}", bundle_id));
    match launch(ctx, target, bundle_id, console).await? {
        None => Ok(()),
        Some(second) if is_lock_error(&second) => Err(DeployError::DeviceNotReady {
            reason: format!("{} is still locked", target.name),
            hint: LOCK_HINT.to_string(),
        }),
        Some(second) => Err(DeployError::LaunchFailed {
            phase: RunPhase::Launching,
            detail: second.trim().to_string(),
        }),
    }
}

async fn install(ctx: &RunContext, target: &Target, app: &Path) -> Result<(), DeployError> {
    ctx.progress(RunPhase::Installing, format!("Installing on {}", target.name));
    let app_arg = app.display().to_string();
    let args = devicectl(&["device", "install", "app", "--device", &target.id, &app_arg]);

    let mut last_phase = RunPhase::Installing;
    let (success, output) = ctx
        .stream(ctx.device_tool(), &args, |line| {
            if let Some(phase) = classify_install_line(&line.text) {
                if phase != last_phase {
                    last_phase = phase;
                    ctx.progress(phase, line.text.trim().to_string());
                }
            }
        })
        .await?;

    if success {
        Ok(())
    } else {
        Err(classify_install_failure(&output))
    }
}

/// One launch attempt. `Ok(None)` on success, `Ok(Some(output))` when the
/// tool reported a failure.
async fn launch(
    ctx: &RunContext,
    target: &Target,
    bundle_id: &str,
    console: bool,
) -> Result<Option<String>, DeployError> {
    if console {
        let launcher = Invocation::new(
            ctx.device_tool(),
            devicectl(&["device", "process", "launch", "--console", "--device", &target.id, bundle_id]),
        )
        .with_ready_marker(is_launch_confirmation);
        let exit = stream_console(ctx, &launcher, None).await?;
        if exit.success {
            return Ok(None);
        }
        if !exit.launch_confirmed {
            return Ok(Some(exit.failure_detail()));
        }
        // The app itself exited with an error; its output is not devicectl's.
        return Err(DeployError::LaunchFailed {
            phase: RunPhase::Running,
            detail: exit.failure_detail(),
        });
    }

    let args = devicectl(&["device", "process", "launch", "--device", &target.id, bundle_id]);
    let output = ctx.run(ctx.device_tool(), &args).await?;
    if output.success {
        ctx.progress(RunPhase::Running, format!("{} running on {}", bundle_id, target.name));
        Ok(None)
    } else {
        Ok(Some(output.combined()))
    }
}

/// Poll the lock state until the device is usable, cancelled, or the
/// configured wait expires.
async fn wait_for_unlock(ctx: &RunContext, target: &Target) -> Result<(), DeployError> {
    ctx.progress(
        RunPhase::WaitingForUnlock,
        format!("{} is locked; unlock it to continue", target.name),
    );
    let deadline = ctx.settings.lock_wait_timeout().map(|t| Instant::now() + t);

    loop {
        ctx.check_cancelled()?;
        if query_unlocked(ctx, target).await? {
            log::info!("[Deploy] [LOCK] {} unlocked", target.name);
            return Ok(());
        }
        if deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(DeployError::DeviceNotReady {
                reason: format!("{} stayed locked", target.name),
                hint: LOCK_HINT.to_string(),
            });
        }
        ctx.sleep(ctx.settings.lock_poll_interval()).await?;
    }
}

async fn query_unlocked(ctx: &RunContext, target: &Target) -> Result<bool, DeployError> {
    let report = tempfile::Builder::new()
        .prefix("lockstate-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| DeployError::CommandFailed {
            cmd: "lockState".to_string(),
            reason: format!("cannot create report file: {}", e),
        })?;
    let report_arg = report.path().display().to_string();
    let args = devicectl(&[
        "device",
        "info",
        "lockState",
        "--device",
        &target.id,
        "--json-output",
        &report_arg,
    ]);

    let output = ctx.run(ctx.device_tool(), &args).await?;
    if !output.success {
        log::debug!("[Deploy] [LOCK] lockState query failed: {}", output.combined());
    }
    let contents = std::fs::read_to_string(report.path()).unwrap_or_default();
    let ready = parse_lock_state(&contents).unwrap_or(false);
    log::debug!("[Deploy] [LOCK] {} ready: {}", target.name, ready);
    Ok(ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_line_classification() {
        assert_eq!(
            classify_install_line("Waiting for the device to be unlocked"),
            Some(RunPhase::WaitingForUnlock)
        );
        assert_eq!(
            classify_install_line("Preparing device for installation"),
            Some(RunPhase::Preparing)
        );
        assert_eq!(
            classify_install_line("13%... Copying files"),
            Some(RunPhase::Copying)
        );
        assert_eq!(
            classify_install_line("Transferring app data"),
            Some(RunPhase::Copying)
        );
        assert_eq!(
            classify_install_line("Verifying application"),
            Some(RunPhase::Verifying)
        );
        assert_eq!(classify_install_line("App installed."), None);
    }

    #[test]
    fn test_install_failure_categories() {
        assert!(matches!(
            classify_install_failure("ERROR: The device is locked."),
            DeployError::DeviceNotReady { .. }
        ));
        match classify_install_failure("Could not establish a trusted connection") {
            DeployError::DeviceNotReady { reason, .. } => assert!(reason.contains("trust")),
            other => panic!("unexpected {:?}", other),
        }
        match classify_install_failure("Developer Mode disabled") {
            DeployError::DeviceNotReady { reason, .. } => assert!(reason.contains("Developer Mode")),
            other => panic!("unexpected {:?}", other),
        }
        match classify_install_failure("  The provisioning profile does not include this device  ") {
            DeployError::InstallFailed { detail, hint } => {
                assert_eq!(detail, "The provisioning profile does not include this device");
                assert!(hint.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify_install_failure("disk full"),
            DeployError::InstallFailed {
                detail: "disk full".to_string(),
                hint: None
            }
        );
    }

    #[test]
    fn test_lock_error_detection() {
        assert!(is_lock_error("ERROR: The device was locked (com.apple.dt.CoreDeviceError 1)"));
        assert!(is_lock_error("Unlock iPhone to continue"));
        assert!(is_lock_error("passcode required"));
        assert!(!is_lock_error("The application could not be found"));
    }

    #[test]
    fn test_launch_confirmation_line() {
        assert!(is_launch_confirmation(
            "Launched application with com.example.App bundle identifier."
        ));
        assert!(!is_launch_confirmation("ERROR: The device was locked."));
        assert!(!is_launch_confirmation("app: launched"));
    }

    #[test]
    fn test_lock_state_encodings() {
        assert_eq!(
            parse_lock_state(r#"{"info":{"outcome":"success"},"result":{"passcodeRequired":false}}"#),
            Some(true)
        );
        assert_eq!(
            parse_lock_state(r#"{"result":{"passcodeRequired":true,"unlockedSinceBoot":true}}"#),
            Some(false)
        );
        assert_eq!(parse_lock_state(r#"{"isLocked":"false"}"#), Some(true));
        assert_eq!(parse_lock_state(r#"{"locked":"yes"}"#), Some(false));
        assert_eq!(parse_lock_state(r#"{"result":{"lockState":"Unlocked"}}"#), Some(true));
        assert_eq!(parse_lock_state(r#"{"lockState":"locked"}"#), Some(false));
        assert_eq!(parse_lock_state(r#"{"result":{"deviceIdentifier":"X"}}"#), None);
        assert_eq!(parse_lock_state("not json"), None);
        assert_eq!(parse_lock_state(""), None);
    }
}
