//! modelport - backend selection and process lifecycle for local inference
//!
//! This is the main entry point for the modelport binary. It discovers
//! backend executables, starts them on loopback ports, waits for them to
//! answer and asks them to load a model.

mod backend;
mod cli;
mod config;
mod error;
mod loader;
mod logging;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::CpuFeatures;
use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::loader::{greedy_candidates, ClientIsolation, ExternalBackend, ModelLoader};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Backends { config, asset_dir } => {
            let mut config = LoaderConfig::load(config.as_deref())?;
            if let Some(dir) = asset_dir {
                config.loader.asset_dir = dir;
            }
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            list_backends(&config)
        }
        Commands::Load {
            model,
            backend,
            model_file,
            external,
            single_active,
            per_call,
            hold,
            config,
        } => {
            let config = LoaderConfig::load(config.as_deref())?;

            // The guards must be kept alive for the lifetime of the program
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

            info!(
                version = %version::BUILD.full_version(),
                target = %version::BUILD.target,
                profile = %version::BUILD.profile,
                "Starting modelport"
            );

            let request = LoadRequest {
                model,
                backend,
                model_file,
                external,
                single_active,
                per_call,
                hold,
            };
            run_load(config, request)
        }
    }
}

/// Print the greedy candidate order
fn list_backends(config: &LoaderConfig) -> Result<()> {
    let candidates = greedy_candidates(
        &config.asset_dir(),
        &config.external_backends(),
        CpuFeatures::detect(),
    )?;

    if candidates.is_empty() {
        eprintln!("No backends found under {}", config.asset_dir().display());
    }
    for candidate in candidates {
        println!("{}", candidate);
    }
    Ok(())
}

/// Arguments of the `load` command
struct LoadRequest {
    model: String,
    backend: Option<String>,
    model_file: Option<String>,
    external: Vec<String>,
    single_active: bool,
    per_call: bool,
    hold: bool,
}

fn run_load(config: LoaderConfig, request: LoadRequest) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("modelport")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_load(config, request))
}

async fn async_load(config: LoaderConfig, request: LoadRequest) -> Result<()> {
    let mut externals = config.external_backends();
    for entry in &request.external {
        let parsed = ExternalBackend::parse(entry)?;
        externals.insert(parsed.name, parsed.uri);
    }

    // Ctrl+C cancels a load in progress and ends --hold
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let mut builder = config
        .load_options(&request.model)
        .external_backends(externals)
        .cancel(cancel.clone());
    if request.single_active {
        builder = builder.single_active_backend(true);
    }
    if request.per_call {
        builder = builder.isolation(ClientIsolation::PerCall);
    }
    if let Some(ref file) = request.model_file {
        builder = builder.model_file(file);
    }
    if let Some(ref backend) = request.backend {
        builder = builder.backend(backend);
    }
    let options = builder.build()?;

    let model_dir: PathBuf = config.model_dir();
    let loader = ModelLoader::new(model_dir, Arc::new(config.client_factory()));

    let result = if options.backend().is_empty() {
        loader.greedy_loader(&options).await
    } else {
        loader.backend_loader(&options).await
    };

    let client = match result {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e.format_for_log(), "Load failed");
            if let Err(stop_err) = loader.shutdown().await {
                warn!(error = %stop_err, "Failed to stop backends");
            }
            return Err(e);
        }
    };

    println!("{}", client.address());
    info!(
        model = %options.model(),
        address = %client.address(),
        pid = ?loader.registry().tracked_pid(options.model()),
        "Model ready"
    );

    if request.hold {
        info!("Holding backends, press Ctrl+C to stop");
        cancel.cancelled().await;
    }

    loader.shutdown().await?;
    info!(models = ?loader.registry().loaded_models(), "Backends stopped");
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = LoaderConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            LoaderConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
