//! kumi - Local model-stack supervisor
//!
//! Entry point for the kumi application.

use clap::Parser;
use kumi::cli::{
    target_url, Cli, Commands, ConfigCommands, EnsureModelArgs, ServeArgs, StatusArgs, StopArgs,
};
use kumi::config::{Config, LogFormat, LogOutput, LoggingConfig};
use kumi::error::exit_code;
use kumi::runtime::create_runtime;
use kumi::server::response::ApiResponse;
use kumi::{KumiClient, KumiError, StackController};
use serde::Serialize;
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// What a command prints on success.
enum Output {
    /// JSON envelope on stdout.
    Json(serde_json::Value),
    /// Plain text on stdout.
    Text(String),
    /// Nothing.
    None,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings live in the config file, so it is read first.
    let config = Config::load(cli.config.as_deref());
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();

    if let Err(e) = init_logging(&cli, &logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(exit_code::GENERAL_ERROR as u8);
    }

    match run(&cli, config) {
        Ok(Output::Json(data)) => {
            print_json(&ApiResponse::success(data));
            ExitCode::SUCCESS
        }
        Ok(Output::Text(text)) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Ok(Output::None) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = %e.code(), "{}", e);
            print_json(&ApiResponse::<()>::from_error(&e));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Initialize the tracing subscriber from the logging config and CLI flags.
fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = cli.log_level().unwrap_or(logging.level);
    let filter = EnvFilter::try_new(logging.filter_directives(level))?;

    let (writer, ansi) = match logging.output {
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::File => {
            let path = logging
                .file_path
                .as_deref()
                .ok_or("logging.file_path is required when output is file")?;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    match logging.format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Text => builder.with_ansi(ansi).try_init()?,
    }

    Ok(())
}

/// Main application logic.
fn run(cli: &Cli, config: kumi::Result<Config>) -> kumi::Result<Output> {
    match &cli.command {
        Commands::Start => cmd_start(config?),
        Commands::Stop(args) => cmd_stop(config, args),
        Commands::Status(args) => cmd_status(config, args),
        Commands::EnsureModel(args) => cmd_ensure_model(config, args),
        Commands::Serve(args) => cmd_serve(config?, args),
        Commands::Config(subcmd) => cmd_config(config, subcmd),
    }
}

/// Handle the `start` command.
fn cmd_start(config: Config) -> kumi::Result<Output> {
    tracing::info!(
        project = %config.project,
        services = config.services.len(),
        "Starting stack"
    );

    block_on(async {
        let cancel = shutdown_token();
        let controller = StackController::new(&config, create_runtime(&config))?;
        let status = controller.start(&cancel).await?;
        to_json(&status)
    })
}

/// Handle the `stop` command.
fn cmd_stop(config: kumi::Result<Config>, args: &StopArgs) -> kumi::Result<Output> {
    if let Some(target) = &args.target {
        tracing::info!(target = %target, "Stopping remote stack");
        return block_on(async {
            let client = KumiClient::new(target_url(target))?;
            to_json(&client.stop(args.purge_volumes).await?)
        });
    }

    let config = config?;
    tracing::info!(project = %config.project, purge_volumes = args.purge_volumes, "Stopping stack");

    block_on(async {
        let controller = StackController::new(&config, create_runtime(&config))?;
        to_json(&controller.stop(args.purge_volumes).await?)
    })
}

/// Handle the `status` command.
fn cmd_status(config: kumi::Result<Config>, args: &StatusArgs) -> kumi::Result<Output> {
    if let Some(target) = &args.target {
        tracing::debug!(target = %target, "Checking remote stack status");
        return block_on(async {
            let client = KumiClient::new(target_url(target))?;
            match &args.service {
                Some(service) => to_json(&client.service(service).await?),
                None => to_json(&client.status().await?),
            }
        });
    }

    let config = config?;
    block_on(async {
        let controller = StackController::new(&config, create_runtime(&config))?;
        let status = controller.observe().await?;
        match &args.service {
            Some(service) => to_json(&controller.service_status(service)?),
            None => to_json(&status),
        }
    })
}

/// Handle the `ensure-model` command.
fn cmd_ensure_model(config: kumi::Result<Config>, args: &EnsureModelArgs) -> kumi::Result<Output> {
    tracing::info!(service = %args.service, model = %args.model, "Ensuring model");

    if let Some(target) = &args.target {
        let (timeout, models) = config.map(|c| (c.timeout, c.models)).unwrap_or_default();
        // A remote ensure can spend every attempt on a full pull.
        let budget = timeout
            .model_seconds
            .saturating_mul(u64::from(models.max_attempts))
            .saturating_add(timeout.command_seconds);

        return block_on(async {
            let client = KumiClient::with_timeout(target_url(target), Duration::from_secs(budget))?;
            to_json(&client.ensure_model(&args.service, &args.model).await?)
        });
    }

    let config = config?;
    block_on(async {
        let cancel = shutdown_token();
        let controller = StackController::new(&config, create_runtime(&config))?;
        let report = controller
            .ensure_model(&args.service, &args.model, &cancel)
            .await?;
        to_json(&report)
    })
}

/// Handle the `serve` command.
fn cmd_serve(mut config: Config, args: &ServeArgs) -> kumi::Result<Output> {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        project = %config.project,
        bind = %config.server.bind,
        port = %config.server.port,
        "Starting kumi daemon"
    );

    block_on(async {
        let shutdown = shutdown_token();
        kumi::serve(&config, create_runtime(&config), shutdown).await?;
        Ok(Output::None)
    })
}

/// Handle the `config` subcommand.
fn cmd_config(config: kumi::Result<Config>, subcmd: &ConfigCommands) -> kumi::Result<Output> {
    let config = config?;

    match subcmd {
        ConfigCommands::Validate => {
            let order = kumi::graph::DependencyGraph::new(&config.services)?;
            tracing::debug!(?config, "Validated configuration");
            Ok(Output::Json(serde_json::json!({
                "valid": true,
                "project": config.project,
                "services": config.services.len(),
                "start_order": order.start_order(),
            })))
        }
        ConfigCommands::Show => {
            let yaml = serde_yaml::to_string(&config).map_err(|e| {
                KumiError::config_with_source("Failed to serialize configuration", e)
            })?;
            Ok(Output::Text(yaml))
        }
    }
}

/// Runs a future on a fresh multi-threaded runtime.
fn block_on<F, T>(future: F) -> kumi::Result<T>
where
    F: std::future::Future<Output = kumi::Result<T>>,
{
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| KumiError::runtime_with_source("Failed to create async runtime", e))?;
    runtime.block_on(future)
}

/// Returns a token cancelled on Ctrl-C or SIGTERM.
///
/// Must be called from inside the runtime.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("Shutdown signal received");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn to_json<T: Serialize>(value: &T) -> kumi::Result<Output> {
    Ok(Output::Json(serde_json::to_value(value)?))
}

fn print_json<T: Serialize>(response: &ApiResponse<T>) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}
