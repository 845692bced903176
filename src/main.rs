use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use dynamic_localizer_core::config::{
    LocalizerConfig, config_file_path, init_config_toml, load_config, localizer_home_dir,
};
use dynamic_localizer_core::server::{AppState, ResourceWatcher, router, spawn_periodic_reload};
use dynamic_localizer_core::{Culture, DynamicLocalizer};

#[derive(Parser, Debug)]
#[command(name = "dynamic-localizer")]
#[command(about = "Hot-reloadable text lookup with culture fallback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub enum CliError {
    /// Errors in config.toml / config.json
    Config(String),
    /// The resource loader failed
    Resources(String),
    /// Generic fallback for other failures
    Other(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Config error: {}", msg),
            CliError::Resources(msg) => write!(f, "Resource error: {}", msg),
            CliError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Other(format!("{e:#}"))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default)
    Serve {
        /// Listen port (config `server.port`, 3300 by default)
        #[arg(long)]
        port: Option<u16>,
        /// Listen host (config `server.host`, 127.0.0.1 by default)
        #[arg(long)]
        host: Option<String>,
    },
    /// Resolve one key from the configured resources
    Lookup {
        key: String,
        /// Culture tag; defaults to the system locale
        #[arg(long)]
        culture: Option<String>,
        /// Positional argument for `{0}`, `{1}`, ... (repeatable)
        #[arg(long = "arg")]
        args: Vec<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the resources once and report what was found
    Check,
    /// Write a commented config.toml and sample resources
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

async fn real_main() -> CliResult<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve {
        port: None,
        host: None,
    });

    match command {
        Command::Init { force } => {
            let path = init_config_toml(force)
                .await
                .map_err(|e| CliError::Config(format!("{e:#}")))?;
            println!("Wrote {}", path.display());
        }
        Command::Serve { port, host } => {
            let (cfg, _log_guard) = prepare().await?;
            let host = host.unwrap_or_else(|| cfg.server.host.clone());
            let port = port.unwrap_or(cfg.server.port);
            run_server(cfg, &host, port).await?;
        }
        Command::Lookup {
            key,
            culture,
            args,
            json,
        } => {
            let (cfg, _log_guard) = prepare().await?;
            let localizer = build_localizer(&cfg);
            localizer
                .initialize()
                .map_err(|e| CliError::Resources(e.to_string()))?;
            let culture = match culture {
                Some(tag) => Culture::parse(&tag).map_err(|e| CliError::Other(e.to_string()))?,
                None => match system_culture() {
                    Some(culture) => culture,
                    None => cfg
                        .negotiation
                        .default_request_culture()
                        .map_err(|e| CliError::Config(format!("{e:#}")))?
                        .culture,
                },
            };
            let resolved = if args.is_empty() {
                localizer.lookup(&culture, &key)
            } else {
                let args: Vec<&dyn std::fmt::Display> =
                    args.iter().map(|a| a as &dyn std::fmt::Display).collect();
                localizer.lookup_formatted(&culture, &key, &args)
            };
            if json {
                let out = serde_json::to_string_pretty(&resolved)
                    .map_err(|e| CliError::Other(e.to_string()))?;
                println!("{out}");
            } else if resolved.found {
                println!("{}", resolved.text);
            } else {
                println!("{}", resolved.text.yellow());
            }
        }
        Command::Check => {
            let (cfg, _log_guard) = prepare().await?;
            let localizer = build_localizer(&cfg);
            println!("Config: {}", config_file_path().display());
            localizer
                .initialize()
                .map_err(|e| CliError::Resources(e.to_string()))?;
            let status = localizer.status();
            println!("Loader: {}", status.loader);
            println!("Entries: {}", status.entries);
            if status.duplicates > 0 {
                println!(
                    "{}",
                    format!("Duplicates: {} (later entries win)", status.duplicates).yellow()
                );
            }
            println!("Cultures: {}", status.cultures.join(", "));
            println!("{}", "Resources OK".green());
        }
    }

    Ok(())
}

/// Load and validate the config, then start logging as it describes.
async fn prepare() -> CliResult<(LocalizerConfig, Option<WorkerGuard>)> {
    let cfg = load_config()
        .await
        .map_err(|e| CliError::Config(format!("{e:#}")))?;
    cfg.validate()
        .map_err(|e| CliError::Config(format!("{e:#}")))?;
    let guard = init_tracing(&cfg);
    Ok((cfg, guard))
}

fn build_localizer(cfg: &LocalizerConfig) -> DynamicLocalizer {
    DynamicLocalizer::new(cfg.localizer_options(&localizer_home_dir()))
}

/// Culture from the usual POSIX locale variables, first usable one wins.
fn culture_from_locale_vars<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<Culture> {
    values
        .into_iter()
        .flat_map(|v| v.split(':'))
        .find_map(|v| Culture::from_posix_locale(v).ok())
}

fn system_culture() -> Option<Culture> {
    let values: Vec<String> = ["LC_ALL", "LC_MESSAGES", "LANGUAGE", "LANG"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .collect();
    culture_from_locale_vars(values.iter().map(String::as_str))
}

fn init_tracing(cfg: &LocalizerConfig) -> Option<WorkerGuard> {
    // Default to info logs unless the user sets RUST_LOG.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = cfg.logging.dir.as_ref().map(|dir| {
        if dir.is_absolute() {
            dir.clone()
        } else {
            localizer_home_dir().join(dir)
        }
    });

    if let Some(log_dir) = log_dir {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::never(&log_dir, "runtime.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        None
    }
}

async fn run_server(cfg: LocalizerConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let home = localizer_home_dir();
    let localizer = Arc::new(DynamicLocalizer::new(cfg.localizer_options(&home)));
    {
        let localizer = Arc::clone(&localizer);
        match tokio::task::spawn_blocking(move || localizer.initialize()).await? {
            Ok(outcome) => tracing::info!(
                generation = outcome.generation(),
                "resources loaded"
            ),
            Err(err) => tracing::warn!(
                "Initial resource load failed, serving raw keys until the next reload: {}",
                err
            ),
        }
    }

    let negotiator = Arc::new(cfg.negotiation.build_negotiator()?);

    if cfg.resources.watch
        && let Some(path) = cfg.resources.resolved_path(&home)
    {
        let watcher =
            ResourceWatcher::new(Arc::clone(&localizer), path, cfg.resources.poll_interval()?).await;
        watcher.spawn();
    }
    if let Some(every) = cfg.resources.reload_interval()? {
        spawn_periodic_reload(Arc::clone(&localizer), every);
    }

    let app: Router = router(AppState {
        localizer,
        negotiator,
    });

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = bind_listener_or_explain(addr).await?;
    tracing::info!(
        "dynamic-localizer listening on http://{} (config: {})",
        addr,
        config_file_path().display()
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;
    Ok(())
}

async fn bind_listener_or_explain(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        let help = listener_bind_help(addr, &err);
        anyhow::Error::new(err).context(help)
    })
}

fn listener_bind_help(addr: SocketAddr, err: &std::io::Error) -> String {
    let example_cmd = format!(
        "dynamic-localizer serve --port {}",
        addr.port().saturating_add(1)
    );
    let os_code = err.raw_os_error();
    let kind = err.kind();

    if kind == ErrorKind::AddrInUse || os_code == Some(10048) {
        return format!(
            "Cannot listen on http://{addr}: port {} is probably in use.\n- Stop the other process or pick another port, e.g. `{example_cmd}`",
            addr.port()
        );
    }
    if kind == ErrorKind::PermissionDenied || os_code == Some(10013) {
        return format!(
            "Cannot listen on http://{addr}: permission denied for port {}.\n- Try a port above 1024, e.g. `{example_cmd}`",
            addr.port()
        );
    }
    format!("Cannot listen on http://{addr}.\n- Try another port, e.g. `{example_cmd}`")
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            _ => {
                // Fallback: at least handle Ctrl+C.
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr() -> SocketAddr {
        "127.0.0.1:3300".parse().expect("addr")
    }

    #[test]
    fn bind_help_for_addr_in_use_suggests_next_port() {
        let err = std::io::Error::from(ErrorKind::AddrInUse);
        let help = listener_bind_help(addr(), &err);
        assert!(help.contains("in use"));
        assert!(help.contains("--port 3301"));
    }

    #[test]
    fn bind_help_for_permission_denied() {
        let err = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(listener_bind_help(addr(), &err).contains("permission denied"));
    }

    #[test]
    fn locale_vars_pick_first_usable_value() {
        let got = culture_from_locale_vars(["", "C", "de_DE.UTF-8:en_US", "fr_FR"]);
        assert_eq!(got.map(|c| c.to_string()), Some("de-DE".to_string()));
        assert_eq!(culture_from_locale_vars(["C.UTF-8", "POSIX"]), None);
    }
}
