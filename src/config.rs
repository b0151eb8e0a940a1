// src/config.rs - Configuration: defaults -> optional TOML file -> env overrides
use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportingConfig {
    /// Directory the rendering collaborator writes generated documents into.
    pub reports_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:esp.db".to_string(),
            max_connections: 10,
        }
    }
}

// Dummy secret for tests only; load_config replaces or rejects it
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 24,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            reports_dir: "generated-reports".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    // .env is optional
    dotenvy::dotenv().ok();

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config);

    config.validate().context("Configuration validation failed")?;

    Ok(config)
}

fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Ok(port) = env::var("ESP_PORT").map(|s| s.parse::<u16>()) {
        if let Ok(port) = port {
            config.server.port = port;
        }
    }
    if let Ok(workers) = env::var("ESP_WORKERS").map(|s| s.parse::<usize>()) {
        if let Ok(workers) = workers {
            config.server.workers = Some(workers);
        }
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(max_conn) = env::var("DATABASE_MAX_CONNECTIONS").map(|s| s.parse::<u32>()) {
        if let Ok(max_conn) = max_conn {
            config.database.max_connections = max_conn;
        }
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Ok(hours) = env::var("AUTH_TOKEN_EXPIRATION_HOURS").map(|s| s.parse::<i64>()) {
        if let Ok(hours) = hours {
            config.auth.token_expiration_hours = hours;
        }
    }
    if let Ok(origins) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("ESP_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(dir) = env::var("REPORTS_DIR") {
        config.reporting.reports_dir = dir;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            anyhow::bail!("JWT secret must be at least 32 characters");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be positive");
        }
        if self.reporting.reports_dir.is_empty() {
            anyhow::bail!("reporting.reports_dir must not be empty");
        }
        Ok(())
    }
}
