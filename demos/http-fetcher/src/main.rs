//! # HTTP Fetcher Demo
//!
//! Registers a `fetch-url` task backed by `reqwest` directly — no adapter,
//! no ceremony — then drives a couple of jobs through the scheduler while
//! its GraphQL dashboard listens alongside it.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use taskqueue_core::{Handler, Outcome, Scheduler, SchedulerConfig};
use taskqueue_dashboard::router;
use taskqueue_testing::MemoryStore;

struct FetchHandler {
    client: reqwest::Client,
}

#[async_trait]
impl Handler for FetchHandler {
    async fn handle(&self, arguments: &[u8]) -> Outcome {
        let url = String::from_utf8_lossy(arguments).into_owned();
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Outcome::Done,
            Ok(response) => Outcome::fatal(format!("HTTP {}", response.status())),
            Err(e) if e.is_timeout() || e.is_connect() => {
                Outcome::retry(Duration::from_secs(2), e.to_string())
            }
            Err(e) => Outcome::fatal(e.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = SchedulerConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(store, &config);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    scheduler.register_task("fetch-url", Arc::new(FetchHandler { client }), 10);
    scheduler.hydrate().await?;

    for url in [
        "https://example.com",
        "https://httpbin.org/status/200",
        "https://httpbin.org/status/404",
    ] {
        scheduler.add_job("fetch-url", 3, url.as_bytes().to_vec()).await?;
        tracing::info!(url, "enqueued fetch");
    }

    let dashboard = router(scheduler.clone(), config.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.dashboard_port)).await?;
    tracing::info!(port = config.dashboard_port, "dashboard listening");

    tokio::select! {
        _ = scheduler.run() => {}
        result = axum::serve(listener, dashboard) => { result?; }
        _ = tokio::signal::ctrl_c() => {
            scheduler.shutdown();
        }
    }

    Ok(())
}
