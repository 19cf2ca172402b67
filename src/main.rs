mod backoff;
mod ble;
mod config;
mod report;
mod scheduler;
mod sensor;
mod shutdown;
mod store;

use std::process::ExitCode;
use tracing::{debug, error, info, info_span};
use tracing_subscriber::EnvFilter;

use ble::miflora::MifloraReader;
use config::Config;
use report::Reporter;
use scheduler::{refresh_loop, Scheduler};
use store::SensorStore;

const DEFAULT_CONFIG_PATH: &str = "flowercare.yaml";

fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&path).await {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("error in configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level);

    // validated while loading the config
    let policy = match config.retry.policy() {
        Ok(policy) => policy,
        Err(e) => {
            error!("invalid retry config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(adapter = %config.adapter, "starting");
    let reader = match MifloraReader::new(
        &config.adapter,
        config.scan_timeout(),
        info_span!("ble", adapter = %config.adapter),
    )
    .await
    {
        Ok(reader) => reader,
        Err(e) => {
            error!("error opening bluetooth adapter: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = SensorStore::new(info_span!("store"));
    for sensor in &config.sensors {
        info!(%sensor, "sensor");
        store.register(sensor.clone()).await;
    }

    let (stop_tx, stop_rx) = shutdown::channel();

    let scheduler = Scheduler::new(
        reader,
        store.clone(),
        policy,
        config.drain_interval(),
        info_span!("scheduler"),
    );
    let (scheduler_task, handle) = scheduler.spawn(stop_rx.clone());

    let refresh_task = tokio::spawn(refresh_loop(handle, config.refresh_interval(), stop_rx.clone()));

    let reporter = Reporter::new(store, config.stale_after(), info_span!("report"));
    let report_task = tokio::spawn(reporter.run(config.refresh_interval(), stop_rx));

    info!("poller is started");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("can not listen for shutdown signal: {}", e);
    }
    debug!("got shutdown signal");
    let _ = stop_tx.send(true);

    for (name, task) in [
        ("scheduler", scheduler_task),
        ("refresh", refresh_task),
        ("report", report_task),
    ] {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }

    info!("shutdown complete");
    ExitCode::SUCCESS
}
