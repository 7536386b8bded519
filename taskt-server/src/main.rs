use std::process;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use taskt::{DEFAULT_BIND, ServerConfig, TaskServer};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: taskt [--port <addr>] [--max-line-length <bytes>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --port <addr>              Address to bind to [default: {DEFAULT_BIND}]");
            eprintln!("  --max-line-length <bytes>  Longest accepted request line [default: 65536]");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config) {
        error!("{e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "--bind" => {
                i += 1;
                let bind = args.get(i).ok_or("--port requires a value")?;
                config = config.with_bind(bind.as_str());
            }
            "--max-line-length" => {
                i += 1;
                let value = args.get(i).ok_or("--max-line-length requires a value")?;
                let max = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid --max-line-length '{value}'"))?;
                config = config.with_max_line_length(max);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(config)
}

/// Initialize tracing with TASKT_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("TASKT_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("taskt={level},taskt_server={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("taskt {}", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = TaskServer::bind(config).await?;
        let shutdown = server.shutdown_handle();
        let accept_loop = tokio::spawn(server.run());

        shutdown_signal().await;
        shutdown.shutdown();

        if let Err(e) = accept_loop.await {
            error!(error = %e, "Accept loop panicked");
        }
        Ok(())
    })
}

/// Wait for SIGINT or SIGTERM.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// runtime is misconfigured. That should fail fast at startup.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(rest: &[&str]) -> Vec<String> {
        std::iter::once("taskt")
            .chain(rest.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let config = parse_args(&args(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn port_flag_sets_bind() {
        let config = parse_args(&args(&["--port", "127.0.0.1:9000"])).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");

        let config = parse_args(&args(&["--bind", ":4000"])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:4000");
    }

    #[test]
    fn max_line_length_flag() {
        let config = parse_args(&args(&["--max-line-length", "1024"])).unwrap();
        assert_eq!(config.max_line_length, 1024);

        assert!(parse_args(&args(&["--max-line-length", "0"])).is_err());
        assert!(parse_args(&args(&["--max-line-length", "lots"])).is_err());
    }

    #[test]
    fn missing_value_and_unknown_flags_are_errors() {
        assert_eq!(
            parse_args(&args(&["--port"])).unwrap_err(),
            "--port requires a value"
        );
        assert!(
            parse_args(&args(&["--verbose"]))
                .unwrap_err()
                .contains("--verbose")
        );
    }

    #[test]
    fn help_is_an_empty_error() {
        assert_eq!(parse_args(&args(&["-h"])).unwrap_err(), "");
    }
}
