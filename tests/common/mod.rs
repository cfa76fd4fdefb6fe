//! Shared fixtures: executable shell scripts standing in for the Apple
//! toolchain, plus helpers for reading what they were asked to do.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use xcdeploy::Settings;

/// Write an executable `/bin/sh` script. `@DIR@` in the body expands to
/// `dir`, so scripts can keep state files next to themselves.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{}\n", body.replace("@DIR@", &dir.display().to_string()));
    fs::write(&path, script).expect("Failed to write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("Failed to chmod script");
    path
}

/// Every invocation a script appended to `<dir>/calls.log`, one per line.
pub fn read_calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Script prologue that logs `name args...` to `calls.log`.
pub fn record_call(name: &str) -> String {
    format!("echo \"{} $*\" >> @DIR@/calls.log", name)
}

pub fn info_plist(bundle_id: &str, executable: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0"><dict>
<key>CFBundleIdentifier</key><string>{}</string>
<key>CFBundleExecutable</key><string>{}</string>
</dict></plist>"#,
        bundle_id, executable
    )
}

/// Build cache metadata recording `workspace` as the owning project.
pub fn derived_data_plist(workspace: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0"><dict>
<key>WorkspacePath</key><string>{}</string>
</dict></plist>"#,
        workspace.display()
    )
}

/// Minimal installable bundle.
pub fn make_app_bundle(dir: &Path, name: &str, bundle_id: &str) -> PathBuf {
    let app = dir.join(format!("{}.app", name));
    fs::create_dir_all(&app).expect("Failed to create bundle");
    fs::write(app.join("Info.plist"), info_plist(bundle_id, name)).expect("Failed to write plist");
    app
}

/// Settings pointing every tool at `bin_dir` with no settle delays.
pub fn test_settings(bin_dir: &Path, derived_data: &Path) -> Settings {
    Settings {
        build_tool: bin_dir.join("xcodebuild").display().to_string(),
        device_tool: bin_dir.join("xcrun").display().to_string(),
        open_tool: bin_dir.join("open").display().to_string(),
        derived_data_root: Some(derived_data.to_path_buf()),
        boot_settle_ms: 0,
        viewer_settle_ms: 0,
        lock_poll_interval_ms: 100,
        lock_wait_timeout_secs: Some(10),
        terminate_grace_ms: 500,
        ..Settings::default()
    }
}

/// `xcodebuild` stand-in that prints a realistic build and creates the
/// bundle under the requested derived data path.
pub const SUCCESSFUL_XCODEBUILD: &str = r#"
echo "xcodebuild $*" >> @DIR@/calls.log
DD=""
while [ $# -gt 0 ]; do
  case "$1" in
    -derivedDataPath) DD="$2"; shift ;;
  esac
  shift
done
PRODUCTS="$DD/Build/Products/Debug-iphonesimulator"
mkdir -p "$PRODUCTS/App.app"
cat > "$PRODUCTS/App.app/Info.plist" <<PLIST
<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>CFBundleIdentifier</key><string>com.example.App</string>
<key>CFBundleExecutable</key><string>App</string>
</dict></plist>
PLIST
echo "Command line invocation:"
echo "Resolve Package Graph"
echo "ComputeTargetDependencyGraph"
echo "CompileSwift normal arm64 /src/AppDelegate.swift"
echo "CompileSwift normal arm64 /src/ContentView.swift"
echo "/src/ContentView.swift:12:9: warning: variable 'x' was never used" >&2
echo "Ld $PRODUCTS/App.app/App normal"
echo "CodeSign $PRODUCTS/App.app"
echo "Touch $PRODUCTS/App.app"
echo "** BUILD SUCCEEDED **"
"#;
