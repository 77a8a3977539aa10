use std::env;

use anyhow::Context;
use tollgate_server::config::AppConfig;
use tollgate_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use tollgate_server::{Tollgate, shutdown_tracing};

#[tokio::main]
async fn main() {
    // `.env` is optional; TOLLGATE__* overrides may live there.
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => eprintln!("Warning: ignoring unreadable .env: {e}"),
        _ => {}
    }

    if env::args().skip(1).any(|arg| arg == "--print-config") {
        match toml::to_string_pretty(&AppConfig::default()) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Failed to render default configuration: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Initialize tracing early with the default level
    tollgate_server::observability::init_tracing();

    let config_path = config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %config_path, backend = ?cfg.store.backend, "Configuration loaded");

    tollgate_server::observability::apply_logging_config(&cfg.logging);

    if let Err(err) = run(cfg).await {
        tracing::error!(error = ?err, "tollgate-server failed");
        eprintln!("Error: {err:#}");
        shutdown_tracing();
        std::process::exit(1);
    }

    shutdown_tracing();
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    if let Some(listen) = cfg.metrics.prometheus_addr() {
        tollgate_server::metrics::install_prometheus_exporter(listen)
            .map_err(anyhow::Error::msg)?;
    }

    let service = Tollgate::init(cfg)
        .await
        .context("service initialization failed")?;

    tracing::info!("tollgate-server running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    let summary = service.metrics_summary().await;
    tracing::info!(
        operations = summary.counters.total_operations,
        errors = summary.counters.errors,
        hit_rate = summary.counters.hit_rate,
        "Final metrics"
    );
    service.shutdown().await;
    Ok(())
}

/// `--config <path>`, else `TOLLGATE_CONFIG`, else `tollgate.toml`. A
/// missing file is fine: defaults and environment overrides still apply.
fn config_path() -> String {
    pick_config_path(env::args(), env::var("TOLLGATE_CONFIG").ok())
}

fn pick_config_path(args: impl IntoIterator<Item = String>, from_env: Option<String>) -> String {
    args.into_iter()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .or_else(|| from_env.filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
}
