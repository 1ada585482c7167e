// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Quote skew between best bid and best ask, strictly in (0, 1).
    pub aggression: Decimal,
    /// Wall-clock cap on a single chase session, in seconds.
    pub max_session_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_secret: String,
    pub subaccount: Option<String>,
    pub ws_url: String,
    /// Path of the JSON file holding unprocessed target positions.
    pub targets_file: String,
    /// Path of the JSONL file execution reports are appended to.
    pub reports_file: String,
    pub execution: ExecutionConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("ws_url", "wss://ftx.com/ws/")?
            .set_default("targets_file", "targets.json")?
            .set_default("reports_file", "reports.jsonl")?
            .set_default("execution.aggression", "0.5")?
            .set_default("execution.max_session_secs", 300i64)?
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}
