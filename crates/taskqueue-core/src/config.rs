//! `SchedulerConfig::from_env()` (§1.1, §6), gathering the original
//! `config/env/environment.go` variables into a single typed struct read
//! once at startup.

use std::env;

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).as_deref() {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub dashboard_port: u16,
    pub dashboard_max_client: usize,
    pub max_goroutines: usize,
    pub use_consul: bool,
    pub consul_agent_host: Option<String>,
    pub consul_max_job_rebalance: u64,
    pub jaeger_tracing_host: Option<String>,
    pub jaeger_tracing_dashboard: Option<String>,
    /// Gates the GraphQL playground/voyager route (§6): served only when
    /// this is `"development"`.
    pub environment: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dashboard_port: 8080,
            dashboard_max_client: 10,
            max_goroutines: 10,
            use_consul: false,
            consul_agent_host: None,
            consul_max_job_rebalance: 10,
            jaeger_tracing_host: None,
            jaeger_tracing_dashboard: None,
            environment: "production".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Read configuration from the process environment, falling back to the
    /// documented defaults for anything absent or unparsable. Call
    /// `dotenvy::dotenv()` before this in binaries that want `.env` support
    /// (§1.1); this function itself never touches the filesystem.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dashboard_port: env_parsed("TASK_QUEUE_DASHBOARD_PORT", defaults.dashboard_port),
            dashboard_max_client: env_parsed(
                "TASK_QUEUE_DASHBOARD_MAX_CLIENT",
                defaults.dashboard_max_client,
            )
            .min(10),
            max_goroutines: env_parsed("MAX_GOROUTINES", defaults.max_goroutines),
            use_consul: env_bool("USE_CONSUL", defaults.use_consul),
            consul_agent_host: env_string("CONSUL_AGENT_HOST"),
            consul_max_job_rebalance: env_parsed(
                "CONSUL_MAX_JOB_REBALANCE",
                defaults.consul_max_job_rebalance,
            ),
            jaeger_tracing_host: env_string("JAEGER_TRACING_HOST"),
            jaeger_tracing_dashboard: env_string("JAEGER_TRACING_DASHBOARD"),
            environment: env_string("TASKQUEUE_ENV").unwrap_or(defaults.environment),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
