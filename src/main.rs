// pidstat - version 0.1.0
// Process watch service with tracing logging
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, info_span};

use pidstat::cli::{Args, Commands};
use pidstat::commands::{command_check, command_config, command_generate_testdata};
use pidstat::config::{render_config, resolve_config, validate_effective_config, Config};
use pidstat::handlers::build_router;
use pidstat::metrics::ExporterMetrics;
use pidstat::monitor::ProcessMonitor;
use pidstat::source::{ProcessSource, ProcfsSource, SyntheticSource};
use pidstat::state::AppState;

/// Sets up the tracing subscriber based on the CLI log level.
fn setup_logging(args: &Args) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(&args.log_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Picks the process source: synthetic test data if configured, /proc otherwise.
fn select_source(config: &Config) -> anyhow::Result<Arc<dyn ProcessSource>> {
    match &config.test_data_file {
        Some(path) => {
            info!("Using synthetic test data from {}", path.display());
            Ok(Arc::new(SyntheticSource::from_file(path)?))
        }
        None => Ok(Arc::new(ProcfsSource::new())),
    }
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        print!("{}", render_config(&config, &args.config_format)?);
        return Ok(());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Check {
                proc,
                self_sample,
                all,
            } => {
                let config = resolve_config(&args)?;
                command_check(*proc, *self_sample, *all, &config)
            }
            Commands::Config { output, format } => command_config(output.clone(), format.clone()),
            Commands::GenerateTestdata {
                output,
                count,
                exiting,
            } => command_generate_testdata(output.clone(), *count, *exiting),
        };
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&args);
    info!("Starting pidstat");

    let source = select_source(&config)?;
    let options = config.monitor_options();
    debug!(
        "Process list interval {:?}, sample interval {:?}, max samples {:?}",
        options.process_list_interval, options.sample_interval, options.max_samples
    );

    let monitor = Arc::new(ProcessMonitor::start(source, options, info_span!("monitor")).await);
    let metrics = ExporterMetrics::new()?;
    debug!("Prometheus registry initialized");

    let addr: SocketAddr = format!("{}:{}", config.bind_addr(), config.listen_port()).parse()?;
    let state = Arc::new(AppState::new(Arc::clone(&monitor), metrics, config));
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("pidstat listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!("Server error: {}", e);
        monitor.shutdown().await;
        return Err(e.into());
    }

    // Cleanup: stop watches and the refresh task before exit
    monitor.shutdown().await;
    info!("pidstat stopped gracefully");
    Ok(())
}
