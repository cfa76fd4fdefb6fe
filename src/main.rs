use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use xcdeploy::log_collector::get_global_logs_path;
use xcdeploy::{
    BuildEvent, BuildOrchestrator, BuildRequest, DeployOrchestrator, LogCollector,
    PreferenceStore, ProjectLocator, RunEvent, SchemeCacheStore, SchemeLister, Settings,
    SettingsManager, Target, TargetDiscovery,
};

#[derive(Parser)]
#[command(name = "xcdeploy")]
#[command(version, about = "Build an Xcode scheme and run it on a simulator, device or this Mac", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List simulators, connected devices and this Mac
    Targets,
    /// List the schemes of a project or workspace
    Schemes {
        /// Project, workspace, or a directory containing one
        project: PathBuf,
    },
    /// Build a scheme and run it on a target
    Run {
        /// Project, workspace, or a directory containing one
        project: PathBuf,
        /// Scheme to build
        #[arg(long, short = 's')]
        scheme: String,
        /// Target identifier or name
        #[arg(long, short = 't')]
        target: String,
        /// Build configuration (defaults to the configured one, usually Debug)
        #[arg(long, short = 'c')]
        configuration: Option<String>,
        /// Mirror raw build output
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Stay attached and relay the app's console output
        #[arg(long)]
        console: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match cli.settings {
        Some(ref path) => SettingsManager::load_from(path),
        None => SettingsManager::load(),
    };
    settings
        .validate()
        .map_err(|e| anyhow!("Invalid settings: {}", e))?;

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    let log_collector = init_logging(&settings, verbose)?;

    let result = match cli.command {
        Commands::Targets => list_targets(&settings).await,
        Commands::Schemes { project } => list_schemes(&settings, &project).await,
        Commands::Run {
            project,
            scheme,
            target,
            configuration,
            verbose,
            console,
        } => {
            let configuration =
                configuration.unwrap_or_else(|| settings.default_configuration.clone());
            run(
                &settings,
                Arc::clone(&log_collector),
                &project,
                &scheme,
                &target,
                &configuration,
                verbose,
                console,
            )
            .await
        }
    };

    let _ = log_collector.wait_for_empty().await;
    result
}

fn init_logging(settings: &Settings, verbose: bool) -> Result<Arc<LogCollector>> {
    let log_dir = match settings.log_dir {
        Some(ref dir) => dir.clone(),
        None => get_global_logs_path().map_err(|e| anyhow!(e))?,
    };
    let collector = Arc::new(LogCollector::new(log_dir).map_err(|e| anyhow!(e))?);
    let session = format!("{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    collector
        .start_new_session(&session)
        .map_err(|e| anyhow!(e))?;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(e) = Arc::clone(&collector).init_global_logger(level) {
        eprintln!("warning: {}", e);
    }
    Ok(collector)
}

async fn list_targets(settings: &Settings) -> Result<()> {
    let targets = TargetDiscovery::new(settings).discover().await?;
    if targets.is_empty() {
        println!("No targets found");
    }
    for target in targets {
        println!(
            "{:<40} {:<9} {:<9} {}",
            target.display_name(),
            target.platform.as_str(),
            format!("{:?}", target.state).to_lowercase(),
            target.id
        );
    }
    Ok(())
}

fn locate_project(path: &Path) -> Result<PathBuf> {
    if path.is_dir() && xcdeploy::ProjectKind::from_path(path).is_none() {
        return ProjectLocator::find(path)
            .ok_or_else(|| anyhow!("No .xcworkspace or .xcodeproj in {}", path.display()));
    }
    Ok(path.to_path_buf())
}

fn scheme_lister(settings: &Settings) -> (SchemeLister, Arc<SchemeCacheStore>) {
    let store = Arc::new(PreferenceStore::open(&settings.state_dir()));
    let cache = Arc::new(SchemeCacheStore::load(store));
    (SchemeLister::new(settings, Arc::clone(&cache)), cache)
}

async fn list_schemes(settings: &Settings, project: &Path) -> Result<()> {
    let project = locate_project(project)?;
    let (lister, cache) = scheme_lister(settings);
    let schemes = lister.list(&project).await?;
    if let Err(e) = cache.flush() {
        log::warn!("[Main] Could not persist scheme cache: {}", e);
    }
    for scheme in schemes {
        println!("{}", scheme);
    }
    Ok(())
}

fn select_target(targets: Vec<Target>, wanted: &str) -> Result<Target> {
    let lowered = wanted.to_lowercase();
    targets
        .into_iter()
        .find(|t| {
            t.id == wanted
                || t.name.to_lowercase() == lowered
                || t.display_name().to_lowercase() == lowered
        })
        .ok_or_else(|| anyhow!("No target matches '{}' (see `xcdeploy targets`)", wanted))
}

#[allow(clippy::too_many_arguments)]
async fn run(
    settings: &Settings,
    log_collector: Arc<LogCollector>,
    project: &Path,
    scheme: &str,
    target: &str,
    configuration: &str,
    verbose: bool,
    console: bool,
) -> Result<()> {
    let project = locate_project(project)?;
    let targets = TargetDiscovery::new(settings).discover().await?;
    let target = select_target(targets, target)?;

    let request = BuildRequest::new(&project, scheme, target.clone())
        .with_configuration(configuration)
        .with_verbose(verbose);

    let (build_tx, mut build_rx) = mpsc::unbounded_channel();
    let builder = BuildOrchestrator::new(settings.clone())
        .with_events(build_tx)
        .with_log_collector(log_collector);
    let printer = tokio::spawn(async move {
        while let Some(event) = build_rx.recv().await {
            match event {
                BuildEvent::Progress(p) => println!("[{:>3}%] {}", p.percent, p.message),
                BuildEvent::Output(line) => println!("{}", line),
            }
        }
    });

    let cancel = builder.cancel_handle();
    // Ctrl-C terminates the build tool; the build still returns its result.
    let build = {
        let running = builder.build(&request);
        tokio::pin!(running);
        tokio::select! {
            result = &mut running => result?,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                running.await?
            }
        }
    };
    drop(builder);
    let _ = printer.await;

    for warning in &build.warnings {
        println!("{}", warning);
    }
    let artifact = build.into_artifact().map_err(|e| {
        if let Some(hint) = e.remediation() {
            eprintln!("{}", hint);
        }
        anyhow!(e.user_message())
    })?;

    let (run_tx, mut run_rx) = mpsc::unbounded_channel();
    let deployer = DeployOrchestrator::new(settings.clone()).with_events(run_tx);
    let printer = tokio::spawn(async move {
        while let Some(event) = run_rx.recv().await {
            match event {
                RunEvent::Progress(p) => println!("[{}] {}", p.phase, p.message),
                RunEvent::Console(line) => println!("{}", line.text),
            }
        }
    });

    let cancel = deployer.cancel_handle();
    let outcome = {
        let running = deployer.deploy(&target, &artifact, console);
        tokio::pin!(running);
        tokio::select! {
            result = &mut running => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                running.await
            }
        }
    };
    drop(deployer);
    let _ = printer.await;

    outcome.map_err(|e| {
        if let Some(hint) = e.remediation() {
            eprintln!("{}", hint);
        }
        anyhow!(e.user_message())
    })
    .with_context(|| format!("Running {} on {}", scheme, target.display_name()))
}
