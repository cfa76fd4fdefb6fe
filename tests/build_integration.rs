#![cfg(unix)]

mod common;

use common::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use xcdeploy::orchestrator::fallback_dir_name;
use xcdeploy::{
    BuildError, BuildEvent, BuildOrchestrator, BuildPhase, BuildProgressEvent, BuildRequest,
    Platform, PowerState, Target, TargetKind,
};

fn simulator() -> Target {
    Target {
        id: "SIM-1234".to_string(),
        name: "iPhone 15".to_string(),
        kind: TargetKind::Simulated,
        platform: Platform::Ios,
        state: PowerState::Stopped,
        os_version: Some("17.2".to_string()),
    }
}

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    project: PathBuf,
    derived_data: PathBuf,
}

fn fixture(xcodebuild: &str) -> Fixture {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let root = temp.path().to_path_buf();
    let project = root.join("App.xcodeproj");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("project.pbxproj"), "// !$*UTF8*$!").unwrap();
    write_script(&root, "xcodebuild", xcodebuild);
    Fixture {
        derived_data: root.join("DerivedData"),
        _temp: temp,
        root,
        project,
    }
}

fn progress_events(rx: &mut mpsc::UnboundedReceiver<BuildEvent>) -> Vec<BuildProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BuildEvent::Progress(p) = event {
            events.push(p);
        }
    }
    events
}

#[tokio::test]
async fn test_successful_build_reports_progress_and_artifact() {
    let fx = fixture(SUCCESSFUL_XCODEBUILD);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator =
        BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data)).with_events(tx);

    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.expect("build should start");

    eprintln!("[TEST] build result: {:?}", result);
    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.errors.is_empty());
    assert_eq!(
        result.cache_dir,
        fx.derived_data.join(fallback_dir_name("App", &fx.project))
    );
    let artifact = result.clone().into_artifact().expect("artifact");
    assert!(artifact.to_string_lossy().ends_with(".app"));
    assert!(artifact.is_dir());

    let events = progress_events(&mut rx);
    let phases: Vec<BuildPhase> = events.iter().map(|e| e.phase).collect();
    assert_eq!(phases.first(), Some(&BuildPhase::Preparing));
    assert!(phases.contains(&BuildPhase::Compiling));
    assert!(phases.contains(&BuildPhase::Linking));
    assert_eq!(phases.last(), Some(&BuildPhase::Succeeded));
    assert_eq!(
        phases.iter().filter(|p| **p == BuildPhase::Succeeded).count(),
        1
    );
    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(events.last().map(|e| e.percent), Some(100));

    let calls = read_calls(&fx.root);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("-project"));
    assert!(calls[0].contains("-scheme App"));
    assert!(calls[0].contains("-configuration Debug"));
    assert!(calls[0].contains("-destination platform=iOS Simulator,id=SIM-1234"));
    assert!(calls[0].ends_with(" build"));
}

#[tokio::test]
async fn test_failed_build_collects_errors() {
    let fx = fixture(
        r#"
echo "CompileSwift normal arm64 /src/A.swift"
echo "/src/A.swift:3:5: error: cannot find 'foo' in scope"
echo "** BUILD FAILED **"
exit 65
"#,
    );
    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.unwrap();

    assert!(!result.success);
    assert!(!result.cancelled);
    assert_eq!(result.exit_code, Some(65));
    assert!(result.artifact_path.is_none());
    match result.into_artifact() {
        Err(err @ BuildError::BuildFailed { .. }) => {
            assert_eq!(
                err.user_message(),
                "Build failed: /src/A.swift:3:5: error: cannot find 'foo' in scope"
            );
        }
        other => panic!("expected BuildFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_artifact_found_by_products_scan() {
    let fx = fixture(
        r#"
DD=""
while [ $# -gt 0 ]; do
  case "$1" in
    -derivedDataPath) DD="$2"; shift ;;
  esac
  shift
done
mkdir -p "$DD/Build/Products/Debug-iphonesimulator/App.app"
echo "** BUILD SUCCEEDED **"
"#,
    );
    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.unwrap();

    let artifact = result.artifact_path.expect("scan should find bundle");
    assert!(artifact.ends_with("Build/Products/Debug-iphonesimulator/App.app"));
}

#[tokio::test]
async fn test_success_without_bundle_is_artifact_missing() {
    let fx = fixture("echo '** BUILD SUCCEEDED **'");
    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.unwrap();

    assert!(result.success);
    assert!(matches!(
        result.into_artifact(),
        Err(BuildError::ArtifactMissing(_))
    ));
}

#[tokio::test]
async fn test_corrupted_cache_emits_advisory_and_uses_fallback() {
    let fx = fixture(SUCCESSFUL_XCODEBUILD);
    let existing = fx.derived_data.join("App-bxqzkdjfhqwe");
    fs::create_dir_all(existing.join("SourcePackages")).unwrap();
    fs::write(existing.join("info.plist"), derived_data_plist(&fx.project)).unwrap();
    fs::write(
        existing.join("SourcePackages/workspace-state.json"),
        "{ truncated",
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator =
        BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data)).with_events(tx);
    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.unwrap();

    assert_ne!(result.cache_dir, existing);
    assert_eq!(
        result.cache_dir,
        fx.derived_data.join(fallback_dir_name("App", &fx.project))
    );
    let events = progress_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| e.phase == BuildPhase::Preparing && e.message.contains("corrupted")));
}

#[tokio::test]
async fn test_healthy_existing_cache_is_reused() {
    let fx = fixture(SUCCESSFUL_XCODEBUILD);
    let existing = fx.derived_data.join("App-healthy");
    fs::create_dir_all(&existing).unwrap();
    fs::write(existing.join("info.plist"), derived_data_plist(&fx.project)).unwrap();
    let sibling = fx.derived_data.join("App-sibling");
    fs::create_dir_all(&sibling).unwrap();
    let sibling_project = PathBuf::from(format!("{}-old", fx.project.display()));
    fs::write(sibling.join("info.plist"), derived_data_plist(&sibling_project)).unwrap();

    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let request = BuildRequest::new(&fx.project, "App", simulator());
    let result = orchestrator.build(&request).await.unwrap();
    assert_eq!(result.cache_dir, existing);
    assert!(result.artifact_path.unwrap().starts_with(&existing));
}

#[tokio::test]
async fn test_cancel_terminates_build() {
    let fx = fixture(
        r#"
echo "CompileSwift normal arm64 /src/A.swift"
exec sleep 30
echo "** BUILD SUCCEEDED **"
"#,
    );
    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let cancel = orchestrator.cancel_handle();
    let request = BuildRequest::new(&fx.project, "App", simulator());

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    };
    let (result, _) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(orchestrator.build(&request), trigger)
    })
    .await
    .expect("cancelled build should return promptly");

    let result = result.unwrap();
    assert!(result.cancelled);
    assert!(!result.success);
    assert!(result.artifact_path.is_none());
    assert!(matches!(
        result.into_artifact(),
        Err(BuildError::BuildCancelled)
    ));
}

#[tokio::test]
async fn test_cancel_before_build_is_honored_once() {
    let fx = fixture(SUCCESSFUL_XCODEBUILD);
    let orchestrator = BuildOrchestrator::new(test_settings(&fx.root, &fx.derived_data));
    let request = BuildRequest::new(&fx.project, "App", simulator());

    orchestrator.cancel_handle().cancel();
    let result = orchestrator.build(&request).await.unwrap();
    assert!(result.cancelled);
    assert!(!result.success);
    assert!(read_calls(&fx.root).is_empty());

    let result = orchestrator.build(&request).await.unwrap();
    assert!(!result.cancelled);
    assert!(result.success);
    assert_eq!(read_calls(&fx.root).len(), 1);
}

#[tokio::test]
async fn test_missing_build_tool_is_spawn_failure() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("App.xcodeproj");
    fs::create_dir_all(&project).unwrap();
    let mut settings = test_settings(temp.path(), &temp.path().join("DD"));
    settings.build_tool = Path::new("/nonexistent/xcodebuild").display().to_string();

    let orchestrator = BuildOrchestrator::new(settings);
    let request = BuildRequest::new(&project, "App", simulator());
    assert!(matches!(
        orchestrator.build(&request).await,
        Err(BuildError::SpawnFailed(_))
    ));
}
