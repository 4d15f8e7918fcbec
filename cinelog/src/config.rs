//! Configuration loading and validation.
//!
//! Settings come from a YAML file layered under `CINELOG_`-prefixed
//! environment variables (nested keys separated by `__`, e.g.
//! `CINELOG_DATABASE__MAX_OPEN_CONNS`). The bare `DATABASE_URL`
//! variable is also honored since that is what most Postgres tooling
//! exports.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::errors::Error;

#[derive(Parser, Debug, Clone)]
#[command(name = "cinelog", about = "JSON API for the Cinelog movie database")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CINELOG_CONFIG", default_value = "cinelog.yaml")]
    pub config: PathBuf,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub env: Environment,
    /// Top-level landing slot for the bare `DATABASE_URL` variable;
    /// moved into `database.url` during load.
    database_url: Option<String>,
    pub database: DatabaseConfig,
    pub limiter: LimiterConfig,
    pub mail: MailConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_open_conns: u32,
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterConfig {
    pub enabled: bool,
    pub rps: f64,
    pub burst: u32,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailConfig {
    /// SMTP relay host. When unset, messages are written to `file_dir`.
    pub host: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub file_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub trusted_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// HMAC secret for JWT verification. JWTs are rejected outright
    /// when this is unset.
    pub jwt_secret: Option<String>,
    #[serde(with = "humantime_serde")]
    pub jwt_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            env: Environment::Development,
            database_url: None,
            database: DatabaseConfig::default(),
            limiter: LimiterConfig::default(),
            mail: MailConfig::default(),
            cors: CorsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_open_conns: 25,
            max_idle_time: Duration::from_secs(15 * 60),
            query_timeout: Duration::from_secs(3),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(3 * 60),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            username: String::new(),
            password: String::new(),
            sender: "Cinelog <no-reply@cinelog.example.com>".to_string(),
            file_dir: "./emails".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            trusted_origins: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("CINELOG_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn load(args: &Args) -> Result<Self, Error> {
        let mut config: Config = Self::figment(args)
            .extract()
            .map_err(|e| Error::Internal {
                operation: format!("load configuration: {e}"),
            })?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.database.url.is_empty() {
            return Err(Error::Internal {
                operation: "validate configuration: database.url must be set".to_string(),
            });
        }
        if self.limiter.enabled && self.limiter.rps <= 0.0 {
            return Err(Error::Internal {
                operation: "validate configuration: limiter.rps must be positive".to_string(),
            });
        }
        if let Some(secret) = &self.auth.jwt_secret {
            if secret.len() < 32 {
                return Err(Error::Internal {
                    operation: "validate configuration: auth.jwt_secret must be at least 32 bytes".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
