// ⚙️ Ledger configuration
//
// Resolution: explicit path → COURSE_LEDGER_CONFIG → ./course-ledger.toml → defaults.

use crate::error::{LedgerError, Result};
use crate::notice::PaymentDetails;
use crate::reconciliation::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_ENV_VAR: &str = "COURSE_LEDGER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "course-ledger.toml";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_path: PathBuf,
    pub roster_path: PathBuf,
    pub batch_size: usize,
    /// Deadline for one import run, in seconds
    pub timeout_secs: u64,
    pub payment: PaymentDetails,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("course_ledger.db"),
            roster_path: PathBuf::from("roster.csv"),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            payment: PaymentDetails::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LedgerConfig =
            toml::from_str(text).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: LedgerConfig = toml::from_str(&text)
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load using the resolution order; a missing default file is not an error
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        Self::resolve(explicit, env_path.as_deref(), Path::new(DEFAULT_CONFIG_FILE))
    }

    fn resolve(explicit: Option<&Path>, env_path: Option<&Path>, fallback: &Path) -> Result<Self> {
        if let Some(path) = explicit.or(env_path) {
            info!(path = %path.display(), "loading configuration");
            return Self::from_file(path);
        }
        if fallback.exists() {
            info!(path = %fallback.display(), "loading configuration");
            return Self::from_file(fallback);
        }
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LedgerError::Config("batch_size must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(LedgerError::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
