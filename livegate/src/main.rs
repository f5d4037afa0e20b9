// livegate/src/main.rs
//
// Livegate: license-gated face liveness HTTP service
//
// Startup:
//   1. probe the license once so the first request sees a real status
//   2. create the shared engine pipeline (fatal on failure)
//   3. spawn the license monitor, serve HTTP until Ctrl+C / SIGTERM
//
// Usage:
//   livegate --license-file /etc/livegate/license.json
//   livegate --bind 127.0.0.1:9000 --engine-config engine.json --log-json
//   livegate --skip-license-gate                      # development only

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http_api;
mod license;
mod metrics;
mod pipeline;
mod status;

use config::{ConfigError, EngineSettings, ServiceConfig};
use engine::fixture::FixtureBackend;
use engine::EngineHandle;
use http_api::AppState;
use license::{FileLicenseProbe, LicenseMonitor, LicenseStore, DEFAULT_PRODUCT};
use metrics::ServiceMetrics;
use pipeline::{RequestPipeline, StagingArea, DEFAULT_MAX_BODY};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "livegate",
    about   = "License-gated face liveness detection service",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0:8080", help = "HTTP listen address")]
    bind: SocketAddr,

    #[arg(long, default_value = "license.json", help = "License file polled by the monitor")]
    license_file: PathBuf,

    #[arg(long, help = "Hex HMAC-SHA256 key; when set, license files must be signed")]
    license_key: Option<String>,

    #[arg(long, default_value = DEFAULT_PRODUCT, help = "Product the license must be issued for")]
    product: String,

    #[arg(long, default_value_t = 10, help = "License polling interval in seconds")]
    poll_interval_secs: u64,

    #[arg(long, help = "Directory for per-request image files [default: <tmp>/livegate]")]
    staging_dir: Option<PathBuf>,

    #[arg(long, default_value = "default", help = "Engine pipeline name")]
    pipeline: String,

    #[arg(long, help = "Engine settings JSON (calibration, threads, model dir)")]
    engine_config: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_MAX_BODY, help = "Maximum request body size")]
    max_body_bytes: usize,

    #[arg(long, help = "Serve requests without a license (development builds)")]
    skip_license_gate: bool,

    #[arg(long, help = "Emit JSON log lines")]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Result<ServiceConfig, ConfigError> {
        let engine = match &self.engine_config {
            Some(path) => EngineSettings::load(path)?,
            None       => EngineSettings::default(),
        };
        Ok(ServiceConfig {
            bind:               self.bind,
            license_file:       self.license_file,
            license_key:        self.license_key,
            product:            self.product,
            poll_interval_secs: self.poll_interval_secs,
            staging_dir:        self.staging_dir.unwrap_or_else(config::default_staging_dir),
            pipeline:           self.pipeline,
            engine,
            max_body_bytes:     self.max_body_bytes,
            license_gate:       !self.skip_license_gate,
        })
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn banner_lines(config: &ServiceConfig, engine: &str) -> Vec<String> {
    let mut lines = vec![
        format!("  Listen  : {}", config.bind),
        format!("  License : \x1b[90m{}\x1b[0m", config.license_file.display()),
        format!("  Staging : \x1b[90m{}\x1b[0m", config.staging_dir.display()),
        format!("  Engine  : \x1b[93m{}\x1b[0m", engine),
    ];
    if !config.license_gate {
        lines.push("  \x1b[93;1mLicense gate disabled\x1b[0m".to_string());
    }
    lines
}

fn print_banner(config: &ServiceConfig, engine: &str) {
    println!("\x1b[1m");
    println!("  livegate {}", status::VERSION);
    println!("\x1b[0m");
    println!("  \x1b[90mFace liveness detection | license-gated HTTP service\x1b[0m\n");
    for line in banner_lines(config, engine) {
        println!("{line}");
    }
    println!("\n  Press Ctrl+C to stop.\n");
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("livegate=info".parse()?);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c    => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;
    let config = cli.into_config().context("invalid configuration")?;

    print_banner(&config, FixtureBackend::DESCRIPTION);

    // License: one synchronous probe before anything can serve.
    let store = LicenseStore::new();
    let mut probe = FileLicenseProbe::new(&config.license_file, &config.product);
    if let Some(key) = config.license_key_bytes()? {
        probe = probe.with_key(key);
    }
    let monitor = Arc::new(
        LicenseMonitor::new(Arc::new(probe), store.clone())
            .with_interval(config.poll_interval()?),
    );
    if !monitor.refresh() {
        warn!(
            path = %config.license_file.display(),
            "no valid license at startup; requests are refused until one is installed"
        );
    }

    // Engine: the one shared pipeline instance.
    warn!(
        backend = FixtureBackend::DESCRIPTION,
        "engine backend is the built-in fixture; liveness verdicts are synthetic"
    );
    let mut backend = FixtureBackend::new(config.engine.fixture);
    if config.license_gate {
        backend = backend.with_license_file(&config.license_file);
    }
    let engine = EngineHandle::create(Arc::new(backend), config.pipeline.clone(), config.engine.engine.clone())
        .with_context(|| format!("failed to create engine pipeline {:?}", config.pipeline))?;

    let staging = StagingArea::new(&config.staging_dir);
    staging.prepare().await
        .with_context(|| format!("failed to create staging dir {}", config.staging_dir.display()))?;

    if !config.license_gate {
        warn!("license gate disabled; every request reaches the engine");
    }

    let pipeline = RequestPipeline::new(store, Arc::new(engine), staging, ServiceMetrics::new())
        .with_meta(config.engine.meta())
        .with_license_gate(config.license_gate)
        .with_max_body(config.max_body_bytes);
    let app = http_api::router(AppState::new(Arc::new(pipeline)));

    // Background license refresh, stopped with the server.
    let shutdown = CancellationToken::new();
    let monitor_task = tokio::spawn(Arc::clone(&monitor).run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind).await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, pipeline = %config.pipeline, "livegate listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "license monitor ended abnormally");
    }
    info!("livegate stopped");
    Ok(())
}
