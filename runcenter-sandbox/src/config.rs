//! Sandbox configuration

use anyhow::{bail, Context};
use runcenter_common::{Language, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file to load
pub const CONFIG_ENV: &str = "RUNCENTER_CONFIG";

/// Environment variable overriding the default interpreter program
pub const NODE_ENV: &str = "RUNCENTER_NODE";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Timeout used when a request does not carry `controls.timeoutMs`
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Longest wire line accepted from an isolated context
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Host variables copied into the (otherwise empty) context environment
    #[serde(default = "default_passthrough_env")]
    pub passthrough_env: Vec<String>,

    #[serde(default)]
    pub interpreters: Interpreters,
}

/// Interpreter used for each source dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpreters {
    #[serde(default = "InterpreterConfig::node")]
    pub javascript: InterpreterConfig,

    #[serde(default = "InterpreterConfig::node")]
    pub typescript: InterpreterConfig,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            javascript: InterpreterConfig::node(),
            typescript: InterpreterConfig::node(),
        }
    }
}

/// How to start the process hosting an isolated context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Append the bundled bootstrap harness (`-e <harness>`) to `args`.
    /// Disable for programs that speak the frame protocol on their own.
    #[serde(default = "default_true")]
    pub harness: bool,
}

impl InterpreterConfig {
    pub fn node() -> Self {
        Self {
            program: std::env::var(NODE_ENV).unwrap_or_else(|_| "node".to_string()),
            args: Vec::new(),
            harness: true,
        }
    }

    /// A program that reads the request on stdin and writes frames itself
    pub fn raw(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            harness: false,
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

fn default_passthrough_env() -> Vec<String> {
    vec!["PATH".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            passthrough_env: default_passthrough_env(),
            interpreters: Interpreters::default(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `$RUNCENTER_CONFIG` is
    /// consulted, and the built-in defaults are used when it is unset.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let path: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        };

        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: SandboxConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be greater than zero");
        }
        if self.max_frame_bytes < 1024 {
            bail!("max_frame_bytes must be at least 1024");
        }
        for (language, interpreter) in [
            (Language::JavaScript, &self.interpreters.javascript),
            (Language::TypeScript, &self.interpreters.typescript),
        ] {
            if interpreter.program.trim().is_empty() {
                bail!("interpreter program for {} is empty", language);
            }
        }
        Ok(())
    }

    pub fn interpreter(&self, language: Language) -> &InterpreterConfig {
        match language {
            Language::JavaScript => &self.interpreters.javascript,
            Language::TypeScript => &self.interpreters.typescript,
        }
    }

    /// Use the same interpreter for every dialect
    pub fn with_interpreter(mut self, interpreter: InterpreterConfig) -> Self {
        self.interpreters.javascript = interpreter.clone();
        self.interpreters.typescript = interpreter;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}
