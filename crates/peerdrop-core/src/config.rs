//! 应用配置和持久化
//!
//! 提供中继地址、块大小、下载目录等设置的存储和读取。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::TransferError;

/// 默认中继地址
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/ws";

/// 默认块大小 (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 块大小上限
///
/// 编码后约为 4/3 倍，需要低于中继的单条消息上限。
pub const MAX_CHUNK_SIZE: usize = 512 * 1024;

/// 覆盖中继地址的环境变量
pub const RELAY_URL_ENV: &str = "PEERDROP_RELAY_URL";

/// 协议核心需要的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub relay_url: String,
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransferConfig {
    /// 检查块大小
    pub fn validate(&self) -> Result<(), TransferError> {
        validate_chunk_size(self.chunk_size)
    }
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<(), TransferError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(TransferError::Config(format!(
            "chunk size must be between 1 and {} bytes, got {}",
            MAX_CHUNK_SIZE, chunk_size
        )));
    }
    Ok(())
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 中继服务器地址
    pub relay_url: String,
    /// 每个块的原始字节数
    pub chunk_size: usize,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("peerdrop");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值），再应用环境变量覆盖
    pub fn load() -> Self {
        let mut settings = Self::load_file();
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            settings.apply_relay_override(&url);
        }
        settings
    }

    fn load_file() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match Self::from_toml(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 非空时覆盖中继地址
    pub fn apply_relay_override(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            debug!("Relay URL overridden: {}", url);
            self.relay_url = url.to_string();
        }
    }

    /// 保存设置
    pub fn save(&self) -> Result<(), TransferError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TransferError::Config(e.to_string()))?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 协议核心使用的子集
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            relay_url: self.relay_url.clone(),
            chunk_size: self.chunk_size,
        }
    }
}
