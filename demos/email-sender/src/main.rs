//! # Email Sender Demo
//!
//! Registers a `send-email` task whose arguments are a small JSON envelope.
//! No mail adapter: the handler decides success/retry/fatal itself and
//! hands the scheduler an [`Outcome`] directly — no adapter needed for a
//! plain async closure that does its own thing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use taskqueue_core::{Handler, Outcome, Scheduler, SchedulerConfig};
use taskqueue_dashboard::router;
use taskqueue_testing::MemoryStore;

#[derive(Debug, Serialize, Deserialize)]
struct EmailEnvelope {
    to: String,
    subject: String,
    body: String,
}

/// Stands in for an SMTP client: fails transiently about a third of the
/// time so the demo actually exercises the retry path.
struct SendEmailHandler;

#[async_trait]
impl Handler for SendEmailHandler {
    async fn handle(&self, arguments: &[u8]) -> Outcome {
        let envelope: EmailEnvelope = match serde_json::from_slice(arguments) {
            Ok(envelope) => envelope,
            Err(e) => return Outcome::fatal(format!("malformed envelope: {e}")),
        };

        if envelope.to.is_empty() || !envelope.to.contains('@') {
            return Outcome::fatal(format!("invalid recipient: {}", envelope.to));
        }

        if fastrand::u8(0..3) == 0 {
            return Outcome::retry(Duration::from_millis(500), "smtp relay busy");
        }

        tracing::info!(to = %envelope.to, subject = %envelope.subject, "email sent");
        Outcome::Done
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = SchedulerConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(store, &config);

    scheduler.register_task("send-email", Arc::new(SendEmailHandler), 10);
    scheduler.hydrate().await?;

    let recipients = [
        ("ops@example.com", "Deploy finished", "The nightly build shipped cleanly."),
        ("billing@example.com", "Invoice overdue", "Invoice #4821 is three days past due."),
        ("not-an-email", "Will be rejected", "Demonstrates the fatal, non-retried path."),
    ];
    for (to, subject, body) in recipients {
        let envelope = EmailEnvelope {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let arguments = serde_json::to_vec(&envelope).context("encode envelope")?;
        scheduler.add_job("send-email", 3, arguments).await?;
        tracing::info!(to, "enqueued email");
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
