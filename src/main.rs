use chrono::Utc;
use clap::Parser;
use git_hook_dispatch::config::{FileConfig, load_config};
use git_hook_dispatch::logging::{LogConfig, setup_logging};
use git_hook_dispatch::{ALL_HOOKS_REF, ConfigError, Event, GitHook, HookConfig, SPAWN_EVENT};
use std::path::PathBuf;
use tracing::{self, error, info, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8888;

/// Runs a shell command whenever a webhook for the watched ref arrives.
#[derive(Parser, Debug)]
#[command(name = "git_hook_dispatch", version)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, env = "HOOK_PORT")]
    port: Option<u16>,

    /// Address to bind.
    #[arg(long, env = "HOOK_HOST")]
    host: Option<String>,

    /// Ref to watch, e.g. refs/heads/main. Every delivery when omitted.
    #[arg(short = 'r', long = "ref", env = "HOOK_REF")]
    github_ref: Option<String>,

    /// Shell command to run.
    #[arg(short, long, env = "HOOK_ACTION")]
    action: Option<String>,

    /// Shell command to run (positional form of --action).
    #[arg(value_name = "ACTION")]
    positional_action: Option<String>,

    /// Shared secret for X-Hub-Signature validation.
    #[arg(short, long, env = "HOOK_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Maximum body size, e.g. 1mb.
    #[arg(long, env = "HOOK_JSON_LIMIT")]
    json_limit: Option<String>,

    /// Working directory for the action.
    #[arg(long, env = "HOOK_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// TOML config file; flags take precedence over its values.
    #[arg(short, long, env = "HOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory.
    #[arg(long, env = "HOOK_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

/// Resolved server settings
struct Settings {
    hook: HookConfig,
    bind_address: String,
    log_dir: Option<PathBuf>,
}

fn resolve(args: Args, file: FileConfig) -> Option<Settings> {
    let action = args
        .action
        .or(args.positional_action)
        .or(file.action)?;
    let github_ref = args
        .github_ref
        .or(file.github_ref)
        .unwrap_or_else(|| ALL_HOOKS_REF.to_string());

    let mut hook = HookConfig::new(github_ref, action);
    if let Some(secret) = args.secret.or(file.secret) {
        hook = hook.with_secret(secret);
    }
    if let Some(limit) = args.json_limit.or(file.json_limit) {
        hook = hook.with_json_limit(limit);
    }
    if let Some(dir) = args.working_dir.or(file.working_dir) {
        hook = hook.with_working_dir(dir);
    }

    let host = args
        .host
        .or(file.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);

    Some(Settings {
        hook,
        bind_address: format!("{}:{}", host, port),
        log_dir: args.log_dir.or(file.log_dir),
    })
}

/// Waits on every spawned action so its exit status ends up in the log.
fn watch_spawned(hook: &GitHook) {
    hook.on(SPAWN_EVENT, |event: &Event| {
        let Some(handle) = event.process() else {
            return Ok(());
        };
        let Some(mut child) = handle.take() else {
            return Ok(());
        };
        let pid = handle.id();
        let command = handle.command().to_string();
        let started_at = handle.started_at();

        tokio::spawn(async move {
            let result = child.wait().await;
            let elapsed = (Utc::now() - started_at).num_milliseconds();
            match result {
                Ok(status) if status.success() => info!(
                    "Action '{}' (pid {:?}) finished in {}ms: {}",
                    command, pid, elapsed, status
                ),
                Ok(status) => warn!(
                    "Action '{}' (pid {:?}) failed after {}ms: {}",
                    command, pid, elapsed, status
                ),
                Err(e) => error!("Waiting on action '{}' (pid {:?}) failed: {}", command, pid, e),
            }
        });
        Ok(())
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => match load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    let config_path = args.config.clone();

    let Some(settings) = resolve(args, file) else {
        eprintln!("Configuration error: {}", ConfigError::MissingAction);
        eprintln!("Usage: git_hook_dispatch [--ref <REF>] <ACTION>   (see --help)");
        std::process::exit(1);
    };

    let log_config = match &settings.log_dir {
        Some(dir) => LogConfig::default().with_directory(dir),
        None => LogConfig::default(),
    };
    let _log_guard = match setup_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let hook = match GitHook::new(settings.hook) {
        Ok(hook) => hook,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    watch_spawned(&hook);

    if let Some(path) = config_path {
        info!("Using config at {:?}", path);
    }

    let listener = match tokio::net::TcpListener::bind(&settings.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", settings.bind_address, e);
            std::process::exit(1);
        }
    };

    info!("git_hook_dispatch server started on {}", settings.bind_address);
    if let Err(e) = axum::serve(listener, hook.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
