//! Rota Runner - Entry Point
//!
//! Loads the proxy pool, runs the cycle orchestrator until the daily target is met or a
//! shutdown signal arrives, and maps the run outcome to the process exit code.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_runner::config::{Config, LogConfig};
use rota_runner::error::RunnerError;
use rota_runner::orchestrator::{CycleOrchestrator, DelayPolicy, OrchestratorConfig};
use rota_runner::pool::ProxyStore;
use rota_runner::proxy::{create_selector, HealthProber, HealthProberConfig};
use rota_runner::sink::{FanoutSink, JsonlSink, OutcomeSink, TracingSink};
use rota_runner::work::HttpFetchRunner;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration; logging falls back to defaults when it is unusable
    let config = Config::from_env();
    match &config {
        Ok(config) => init_tracing(&config.log),
        Err(_) => init_tracing(&LogConfig::default()),
    }

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<RunnerError>() {
                Some(err) if err.is_fatal() => error!("Run aborted: {}", err),
                _ => error!("Runner failed unexpectedly: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting Rota Runner");

    // Load proxy lists
    let user_list = read_list(&config.pool.proxy_file).await?;
    let fallback_list = match &config.pool.fallback_file {
        Some(path) => read_list(path).await?,
        None => String::new(),
    };

    let store = Arc::new(ProxyStore::new(config.pool.min_size));
    // An empty pool is reported by the orchestrator's validation, with a summary
    match store.load(&user_list, &fallback_list) {
        Ok(loaded) => info!("Loaded {} proxies", loaded),
        Err(e) => warn!("No proxies loaded: {}", e),
    }

    let selector = create_selector(config.pool.selection_strategy, config.pool_cooldown());
    info!("Using selection strategy: {}", selector.strategy_name());

    let prober = Arc::new(HealthProber::new(HealthProberConfig {
        targets: config.probe.targets.clone(),
        attempt_timeout: Duration::from_secs(config.probe.timeout_secs),
        retries: config.probe.retries,
        retry_delay: Duration::from_millis(config.probe.retry_delay_ms),
        concurrency: config.probe.concurrency,
        overall_timeout: Duration::from_secs(config.probe.overall_timeout_secs),
        ..Default::default()
    }));

    let runner = Arc::new(HttpFetchRunner::new(
        config.runner.work_url.clone(),
        config.work_timeout(),
    ));

    let sinks: Vec<Arc<dyn OutcomeSink>> = vec![
        Arc::new(JsonlSink::new(&config.runner.output_dir)),
        Arc::new(TracingSink),
    ];
    let sink = Arc::new(FanoutSink::new(sinks));

    // Shutdown flag flipped by Ctrl+C / SIGTERM
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    let orchestrator_config = OrchestratorConfig {
        daily_target: config.runner.daily_target,
        max_consecutive_failures: config.runner.max_consecutive_failures,
        stats_flush_every: config.runner.stats_flush_every,
        probe_every: config.runner.probe_every,
        probe_sample_size: config.probe.sample_size,
        max_proxy_failures: config.pool.max_failures,
        work_timeout: config.work_timeout(),
        jit_probe: true,
        selection_attempts: 3,
        snapshot_dir: Some(config.runner.output_dir.clone()),
        delay: DelayPolicy::default(),
    };

    let mut orchestrator = CycleOrchestrator::new(
        orchestrator_config,
        store,
        selector,
        prober,
        runner,
        sink,
        shutdown_rx,
    );

    let result = orchestrator.run().await;
    signal_task.abort();

    let summary = result?;
    info!(
        outcome = summary.outcome.as_str(),
        successes = summary.successes_total,
        attempts = summary.attempts_total,
        "Rota Runner stopped"
    );
    Ok(())
}

async fn read_list(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read proxy list {}", path.display()))
}

/// Initialize tracing from the log config; `RUST_LOG` wins when set
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_runner={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match log.format.as_str() {
        "pretty" => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
