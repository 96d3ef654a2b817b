/// Configuration management for the flowmill engine
///
/// Handles server binding, database and bus connections, and the worker
/// identity used for workflow assignment.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Message bus configuration
    pub bus: BusConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// PostgreSQL configuration for the workflow version store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URI for the workflow database
    pub postgres_uri: String,
}

/// NATS bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus server URL
    pub nats_url: String,
    /// Identity of this worker process. Workflows are assigned to exactly
    /// one worker name at a time.
    pub worker_name: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWMILL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("FLOWMILL_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                postgres_uri: std::env::var("FLOWMILL_POSTGRESQL_URI")
                    .unwrap_or_else(|_| "postgres://localhost/flowmill".to_string()),
            },
            bus: BusConfig {
                nats_url: std::env::var("FLOWMILL_NATS_URL")
                    .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
                worker_name: std::env::var("FLOWMILL_WORKER_NAME")
                    .unwrap_or_else(|_| "workflow-engine0".to_string()),
            },
        }
    }
}
