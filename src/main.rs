use clap::Parser;
use icdaemon::cli::{Cli, Commands};
use icdaemon::logs::init_logging;
use icdaemon::{LifecycleController, Result, Settings, StopOutcome};
use std::process::ExitCode;

fn execute(command: Commands, controller: &LifecycleController) -> Result<()> {
    match command {
        Commands::Start => controller.start(),
        Commands::Stop => {
            report_stop(controller.stop()?);
            Ok(())
        }
        Commands::Restart => controller.restart(),
    }
}

fn report_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::NotRunning => {}
        StopOutcome::Stale { pid } => {
            println!("ℹ️  Process {} was not running, removed stale pidfile", pid);
        }
        StopOutcome::Stopped { pid, .. } => println!("✅ Daemon {} stopped", pid),
    }
}

fn main() -> ExitCode {
    // exits with status 2 on usage errors
    let cli = Cli::parse();

    let loaded = Settings::default_path()
        .and_then(|path| Settings::load_from(&path).map(|settings| (path, settings)));
    let (path, settings) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.debug_mode);
    tracing::debug!(command = ?cli.command, "icdaemon {}", env!("CARGO_PKG_VERSION"));
    if path.exists() {
        tracing::debug!(path = %path.display(), "settings loaded");
    } else {
        tracing::debug!(path = %path.display(), "no settings file, using defaults");
    }

    let config = match settings.service_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    let controller = LifecycleController::new(settings.identity(), config);
    match execute(cli.command, &controller) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
