//! Environment-driven configuration for HVAC client and server processes.
//!
//! Nothing here hot-reloads: every value is read once at process start from
//! the environment SLURM sets up for the job, so a `OnceLock` rather than a
//! `RwLock<Config>` is enough.

pub mod logging;
pub mod path;
pub mod rendezvous;

use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("environment variable {0} has invalid value: {1}")]
    InvalidEnv(&'static str, String),
}

/// Process-wide configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of server ranks the client shards requests across.
    pub server_count: u32,
    /// Optional alternate root a file must live under to be tracked.
    pub data_dir: Option<std::path::PathBuf>,
    /// SLURM job id, used to name the rendezvous file.
    pub job_id: String,
    /// This process's rank, when acting as a server (`SLURM_PROCID`).
    pub proc_id: Option<u32>,
}

impl Config {
    /// Reads `HVAC_SERVER_COUNT` (required), `HVAC_DATA_DIR` (optional),
    /// `SLURM_JOBID` (defaults to `"0"` so a single-node manual run still
    /// works), and `SLURM_PROCID` (optional, servers only).
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_count = std::env::var("HVAC_SERVER_COUNT")
            .map_err(|_| ConfigError::MissingEnv("HVAC_SERVER_COUNT"))?
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidEnv("HVAC_SERVER_COUNT", e.to_string()))?;

        let data_dir = std::env::var_os("HVAC_DATA_DIR").map(std::path::PathBuf::from);

        let job_id = std::env::var("SLURM_JOBID").unwrap_or_else(|_| "0".to_string());

        let proc_id = match std::env::var("SLURM_PROCID") {
            Ok(v) => Some(
                v.parse::<u32>()
                    .map_err(|e| ConfigError::InvalidEnv("SLURM_PROCID", e.to_string()))?,
            ),
            Err(_) => None,
        };

        Ok(Config {
            server_count,
            data_dir,
            job_id,
            proc_id,
        })
    }

    /// Global config, loaded from the environment on first access.
    pub fn global() -> Result<&'static Config, ConfigError> {
        if let Some(c) = CONFIG.get() {
            return Ok(c);
        }
        let c = Config::from_env()?;
        Ok(CONFIG.get_or_init(|| c))
    }
}
