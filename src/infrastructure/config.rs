use std::collections::HashMap;

use secrecy::SecretString;
use serde::Deserialize;

use crate::domain::entity::BulkOperation;
use crate::infrastructure::database::DatabaseConfig;

/// Config はアプリケーション全体の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub folk: Option<FolkConfig>,
    /// 一括操作名（enrich, email, ...）ごとの送信先。
    #[serde(default)]
    pub operations: HashMap<String, OperationEndpointConfig>,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AppConfig はアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// ServerConfig はサーバー設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// FolkConfig は Folk API への接続設定。
#[derive(Debug, Clone, Deserialize)]
pub struct FolkConfig {
    #[serde(default = "default_folk_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_folk_base_url() -> String {
    "https://api.folk.app".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

/// OperationEndpointConfig は一括操作の送信先エンドポイント。
#[derive(Debug, Clone, Deserialize)]
pub struct OperationEndpointConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// ImportConfig はインポート実行の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// LoggingConfig はログ出力設定。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Config {
    /// YAML ファイルから設定を読み込み、環境変数の上書きを適用する。
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path, e))?;
        let mut cfg: Config = serde_yaml::from_str(&content)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// FOLK_API_KEY は folk.api_key を上書きする。folk セクションがなければ既定値で作成する。
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FOLK_API_KEY").filter(|k| !k.is_empty()) {
            let folk = self.folk.get_or_insert_with(|| FolkConfig {
                base_url: default_folk_base_url(),
                api_key: None,
                page_size: default_page_size(),
                timeout_secs: default_timeout_secs(),
            });
            folk.api_key = Some(SecretString::new(key));
        }
    }

    /// 未知の操作名や 0 の同時実行数を拒否する。
    pub fn validate(&self) -> anyhow::Result<()> {
        for name in self.operations.keys() {
            let operation = BulkOperation::from_str_value(name)?;
            if operation == BulkOperation::Import {
                anyhow::bail!("operation 'import' writes to the contact store and takes no endpoint");
            }
        }
        if self.import.max_concurrent_runs == 0 {
            anyhow::bail!("import.max_concurrent_runs must be at least 1");
        }
        Ok(())
    }

    /// 送信先が設定されている一括操作を返す。
    pub fn operation_endpoints(&self) -> Vec<(BulkOperation, OperationEndpointConfig)> {
        self.operations
            .iter()
            .filter_map(|(name, endpoint)| {
                BulkOperation::from_str_value(name)
                    .ok()
                    .map(|op| (op, endpoint.clone()))
            })
            .collect()
    }
}
