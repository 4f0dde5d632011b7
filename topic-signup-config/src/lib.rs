use core::fmt::{Debug, Display};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

const fn default_pool_size() -> usize {
    8
}

const fn default_ansi() -> bool {
    true
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            ansi: default_ansi(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_pool_size")]
    pub database_pool_size: usize,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] figment::Error),
}

impl Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Config {
    /// `signup.toml` overlaid by `SIGNUP_*` variables; `__` separates nested
    /// keys, as in `SIGNUP_LOG__FILTER`.
    #[must_use]
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file("signup.toml"))
            .merge(Env::prefixed("SIGNUP_").split("__"))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }
}

pub fn get_config() -> Result<Config, ConfigError> {
    Config::from_figment(&Config::figment())
}
