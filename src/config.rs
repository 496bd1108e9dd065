use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{mlog_debug, Error, Result};

pub const DEFAULT_ORACLE_COMMAND: &str = "claude";
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CODE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_CHAT_TURNS: usize = 30;
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// User configuration, read from `~/.mmflow/mmflow.toml`.
///
/// Every field is optional in the file; CLI flags override what is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle_command: Option<String>,
    pub oracle_timeout_secs: u64,
    pub interpreter: Option<String>,
    pub code_timeout_secs: u64,
    pub run_timeout_secs: Option<u64>,
    pub work_dir: Option<String>,
    pub max_chat_turns: usize,
    pub max_retries: usize,
    pub render_closing_sections: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracle_command: None,
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            interpreter: None,
            code_timeout_secs: DEFAULT_CODE_TIMEOUT_SECS,
            run_timeout_secs: None,
            work_dir: None,
            max_chat_turns: DEFAULT_MAX_CHAT_TURNS,
            max_retries: DEFAULT_MAX_RETRIES,
            render_closing_sections: true,
        }
    }
}

impl Config {
    pub fn mmflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".mmflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::mmflow_dir()?.join("mmflow.toml"))
    }

    pub fn effective_oracle_command(&self) -> &str {
        self.oracle_command
            .as_deref()
            .unwrap_or(DEFAULT_ORACLE_COMMAND)
    }

    pub fn effective_interpreter(&self) -> &str {
        self.interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn code_timeout(&self) -> Duration {
        Duration::from_secs(self.code_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Root directory under which each run gets its own work directory.
    pub fn runs_dir(&self) -> Result<PathBuf> {
        match &self.work_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::mmflow_dir()?.join("runs")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("[config] load path={}", path.display());
        if !path.exists() {
            mlog_debug!("[config] file not found, using defaults");
            return Ok(Self::default());
        }
        Self::parse(&fs::read_to_string(&path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        mlog_debug!(
            "[config] loaded: oracle={:?}, interpreter={:?}, max_retries={}, max_chat_turns={}",
            config.oracle_command,
            config.interpreter,
            config.max_retries,
            config.max_chat_turns
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chat_turns == 0 {
            return Err(Error::Validation(
                "max_chat_turns must be at least 1".to_string(),
            ));
        }
        if self.oracle_timeout_secs == 0 || self.code_timeout_secs == 0 {
            return Err(Error::Validation("timeouts must be non-zero".to_string()));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(Error::Validation(
                "run_timeout_secs must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
