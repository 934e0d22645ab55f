//! Anchor Deployer - Entry Point
//!
//! HTTP service that deploys Anchor programs from a git repository to a
//! Solana cluster.

use std::collections::HashMap;
use std::env;

use anchor_deployer::app::options::AppOptions;
use anchor_deployer::app::run::run;
use anchor_deployer::deploy::process::ProcessExecutor;
use anchor_deployer::filesys::file::File;
use anchor_deployer::logs::{init_logging, LogOptions};
use anchor_deployer::storage::settings::Settings;
use anchor_deployer::utils::{run_diagnostic, version_info};

use tracing::{error, info};

const DEFAULT_CONFIG_FILE: &str = "deployer.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize version info: {e}"),
        }
        return;
    }

    // Check the external toolchain
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        if !run_diagnostic(&ProcessExecutor::new()).await {
            std::process::exit(1);
        }
        return;
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let settings = match Settings::load(&File::new(config_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging; the guard flushes the file writer on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        stdout: true,
        file: settings.log_to_file,
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from(settings);
    info!(
        "Running Anchor Deployer {} on {}:{}",
        version.version, options.server.host, options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the deployer: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
