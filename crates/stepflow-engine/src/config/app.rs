//! Application configuration for the stepflow engine.

use serde::Deserialize;

/// How handlers write execution state back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateWriteMode {
    /// Conditional write on the state version; a lost race is rejected.
    Optimistic,
    /// Full-record overwrite; concurrent handlers may clobber each other.
    LastWriteWins,
}

/// Leader election backend for scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionMode {
    /// Lease row in Postgres shared by all replicas.
    Postgres,
    /// Single replica, always leader.
    Standalone,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `STEPFLOW_`:
/// - `STEPFLOW_HOST` / `STEPFLOW_PORT`: HTTP bind address (default: 0.0.0.0:8090)
/// - `STEPFLOW_NATS_URL`: NATS server URL
/// - `STEPFLOW_STREAM_NAME`: JetStream stream holding engine subjects
/// - `STEPFLOW_SUBMISSIONS_SUBJECT` / `STEPFLOW_STEPS_SUBJECT`: inbound subjects
/// - `STEPFLOW_STATE_WRITE_MODE`: `optimistic` or `last_write_wins`
/// - `STEPFLOW_ELECTION_MODE`: `postgres` or `standalone`
/// - `STEPFLOW_SERVICES_FILE`: path to the worker service registry
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name for identification, also used as the telemetry service name
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// NATS URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream for submissions and step messages
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Subject carrying workflow submissions
    #[serde(default = "default_submissions_subject")]
    pub submissions_subject: String,

    /// Subject carrying steps ready for dispatch
    #[serde(default = "default_steps_subject")]
    pub steps_subject: String,

    /// Prefix for durable consumer names
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,

    /// Maximum handler tasks in flight per subject
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,

    #[serde(default = "default_state_write_mode")]
    pub state_write_mode: StateWriteMode,

    #[serde(default = "default_election_mode")]
    pub election_mode: ElectionMode,

    /// Name of the election all replicas campaign in
    #[serde(default = "default_election_name")]
    pub election_name: String,

    /// Leader lease duration in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Leader lease renewal interval in seconds
    #[serde(default = "default_lease_renew")]
    pub lease_renew_secs: u64,

    /// Worker service registry (YAML)
    #[serde(default = "default_services_file")]
    pub services_file: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_server_name() -> String {
    "stepflow-engine".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "stepflow".to_string()
}

fn default_submissions_subject() -> String {
    "stepflow.submissions".to_string()
}

fn default_steps_subject() -> String {
    "stepflow.steps".to_string()
}

fn default_consumer_prefix() -> String {
    "stepflow-engine".to_string()
}

fn default_max_concurrent_handlers() -> usize {
    16
}

fn default_state_write_mode() -> StateWriteMode {
    StateWriteMode::Optimistic
}

fn default_election_mode() -> ElectionMode {
    ElectionMode::Postgres
}

fn default_election_name() -> String {
    "stepflow-scheduler".to_string()
}

fn default_lease_ttl() -> u64 {
    60
}

fn default_lease_renew() -> u64 {
    20
}

fn default_services_file() -> String {
    "services.yaml".to_string()
}

impl AppConfig {
    /// Load configuration from environment variables prefixed with `STEPFLOW_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STEPFLOW_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Durable consumer name for a subject.
    pub fn consumer_name(&self, role: &str) -> String {
        format!("{}-{}", self.consumer_prefix, role)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            nats_url: default_nats_url(),
            stream_name: default_stream_name(),
            submissions_subject: default_submissions_subject(),
            steps_subject: default_steps_subject(),
            consumer_prefix: default_consumer_prefix(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
            state_write_mode: default_state_write_mode(),
            election_mode: default_election_mode(),
            election_name: default_election_name(),
            lease_ttl_secs: default_lease_ttl(),
            lease_renew_secs: default_lease_renew(),
            services_file: default_services_file(),
        }
    }
}
