// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub coordinator: CoordinatorSettings,
    pub workflow: WorkflowSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Run the scheduler loop inside the API process
    pub embedded_scheduler: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            embedded_scheduler: true,
        }
    }
}

/// PostgreSQL settings. Without a URL the engine keeps everything in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval_ms: u64,
    pub max_tasks_per_poll: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_tasks_per_poll: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub max_concurrent_executions: usize,
    pub progress_flush_interval_ms: u64,
    pub termination_grace_seconds: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 16,
            progress_flush_interval_ms: 1000,
            termination_grace_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub max_parallel_children: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel_children: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if let Some(url) = &self.database.url {
            if url.is_empty() {
                return Err("Database URL cannot be empty when set".to_string());
            }
            if self.database.max_connections == 0 {
                return Err("Database max_connections must be greater than 0".to_string());
            }
            if self.database.min_connections > self.database.max_connections {
                return Err("Database min_connections cannot exceed max_connections".to_string());
            }
        }

        if self.scheduler.poll_interval_ms == 0 {
            return Err("Scheduler poll_interval_ms must be greater than 0".to_string());
        }
        if self.scheduler.max_tasks_per_poll == 0 {
            return Err("Scheduler max_tasks_per_poll must be greater than 0".to_string());
        }

        if self.coordinator.max_concurrent_executions == 0 {
            return Err("Coordinator max_concurrent_executions must be greater than 0".to_string());
        }
        if self.coordinator.progress_flush_interval_ms == 0 {
            return Err("Coordinator progress_flush_interval_ms must be greater than 0".to_string());
        }

        if self.workflow.max_parallel_children == 0 {
            return Err("Workflow max_parallel_children must be greater than 0".to_string());
        }

        Ok(())
    }
}
