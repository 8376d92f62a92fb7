//! MUSH Server Configuration Management
//!
//! Loads the evaluator limits and server options from a `key = value`
//! options file (`mush.cnf`).

use mush_core::{MushError, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default options file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "game/mush.cnf";

/// Complete server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    // ========== Identity ==========
    /// Server name (from "name" option)
    pub name: String,

    // ========== Evaluator limits ==========
    /// Function invocations allowed per evaluation chain (from "function_invocation_limit")
    pub function_invocation_limit: usize,
    /// Nested function calls allowed per chain (from "function_recursion_limit")
    pub function_recursion_limit: usize,
    /// Recursive parser calls allowed per chain (from "call_limit")
    pub call_limit: usize,
    /// Distinct named registers per chain (from "max_named_qregs")
    pub max_named_qregs: usize,
    /// Output buffer capacity in bytes (from "buffer_len")
    pub buffer_len: usize,
    /// Headroom below which output moves to an extension buffer (from "safety_margin")
    pub safety_margin: usize,
    /// Highest iteration/switch nesting level copied between contexts (from "max_iters")
    pub max_iters: usize,
    /// Longest allowed register name (from "register_key_len")
    pub register_key_len: usize,
    /// CPU budget per top-level command, milliseconds (from "cpu_time_limit_ms")
    pub cpu_time_limit_ms: u64,

    // ========== World ==========
    /// JSON world fixture loaded at startup (from "world_file")
    pub world_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Softcode Server".into(),
            function_invocation_limit: 25_000,
            function_recursion_limit: 50,
            call_limit: 10_000,
            max_named_qregs: 100,
            buffer_len: 8192,
            safety_margin: 32,
            max_iters: 100,
            register_key_len: 64,
            cpu_time_limit_ms: 1000,
            world_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an options file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        tracing::debug!("Loaded {} bytes of options from {}", content.len(), path.display());
        Self::parse(&content)
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(MushError::Config(format!(
                    "line {}: expected `key = value`, got `{}`",
                    line_num + 1,
                    line
                )));
            };
            let key = line[..eq_pos].trim();
            let value = line[eq_pos + 1..].trim();

            config.parse_option(key, value);
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key.to_ascii_lowercase().as_str() {
            "name" => self.name = value.into(),
            "function_invocation_limit" => {
                self.function_invocation_limit = value.parse().unwrap_or(25_000);
            }
            "function_recursion_limit" => {
                self.function_recursion_limit = value.parse().unwrap_or(50);
            }
            "call_limit" => {
                self.call_limit = value.parse().unwrap_or(10_000);
            }
            "max_named_qregs" => {
                self.max_named_qregs = value.parse().unwrap_or(100);
            }
            "buffer_len" => {
                self.buffer_len = value.parse().unwrap_or(8192);
            }
            "safety_margin" => {
                self.safety_margin = value.parse().unwrap_or(32);
            }
            "max_iters" => {
                self.max_iters = value.parse().unwrap_or(100);
            }
            "register_key_len" => {
                self.register_key_len = value.parse().unwrap_or(64);
            }
            "cpu_time_limit_ms" => {
                self.cpu_time_limit_ms = value.parse().unwrap_or(1000);
            }
            "world_file" => {
                self.world_file = if value.is_empty() {
                    None
                } else {
                    Some(value.into())
                };
            }
            _ => {
                tracing::debug!("Unknown config option: {} = {}", key, value);
            }
        }
    }

    /// Reject combinations the evaluator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.safety_margin >= self.buffer_len {
            return Err(MushError::Config(format!(
                "safety_margin ({}) must be smaller than buffer_len ({})",
                self.safety_margin, self.buffer_len
            )));
        }
        if self.function_recursion_limit == 0 {
            return Err(MushError::Config(
                "function_recursion_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// CPU budget for one top-level command
    pub fn cpu_time_limit(&self) -> Duration {
        Duration::from_millis(self.cpu_time_limit_ms)
    }

    /// Display configuration summary
    pub fn display(&self) {
        tracing::info!("Server Configuration:");
        tracing::info!("  Name: {}", self.name);
        tracing::info!("  Function invocation limit: {}", self.function_invocation_limit);
        tracing::info!("  Function recursion limit: {}", self.function_recursion_limit);
        tracing::info!("  Call limit: {}", self.call_limit);
        tracing::info!("  Named registers: {}", self.max_named_qregs);
        tracing::info!("  Buffer: {} bytes (margin {})", self.buffer_len, self.safety_margin);
        tracing::info!("  CPU budget: {} ms", self.cpu_time_limit_ms);
        match self.world_file {
            Some(ref file) => tracing::info!("  World: {}", file),
            None => tracing::info!("  World: (built-in)"),
        }
    }
}
