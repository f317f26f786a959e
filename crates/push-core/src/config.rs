use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a loaded [`RawConfig`] into a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("`addr` and `admin_addr` must differ (got {addr:?})")]
    AddrCollision { addr: String },

    #[error("`channel_bucket` must be a power of two, got {0}")]
    InvalidBucketCount(usize),

    #[error("`channel_type` must be 1 (memory) or 2 (external), got {0}")]
    InvalidChannelType(u8),

    #[error("`protocol` must be 0 (websocket) or 1 (tcp), got {0}")]
    InvalidProtocol(u8),

    #[error("channel_type is external but no redis nodes were configured")]
    MissingBackendNodes,
}

/// One entry of the `redis` config map: a named backend node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisNodeConfig {
    pub network: String,
    pub addr: String,
    pub timeout_ms: u64,
    pub idle: u32,
    pub active: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Memory,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    WebSocket,
    Tcp,
}

/// The validated, effective configuration every component is built from.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub admin_addr: String,
    pub node: String,
    pub log: String,
    pub message_expire_sec: i64,
    pub channel_expire_sec: i64,
    pub max_stored_message: usize,
    pub max_subscriber_per_key: usize,
    pub tcp_keepalive: bool,
    pub channel_bucket: usize,
    pub channel_type: ChannelType,
    pub heartbeat_sec: u64,
    pub auth: bool,
    pub protocol: Protocol,
    pub read_buf_byte: usize,
    pub write_buf_byte: usize,
    pub write_buf_num: usize,
    pub redis: HashMap<String, RedisNodeConfig>,
    pub debug: bool,
}

/// The all-`Option` JSON document shape, deserialized directly, then
/// defaulted and validated into a [`Config`]. Mirrors the reference
/// service's raw-then-validated config loading pattern.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub addr: Option<String>,
    pub admin_addr: Option<String>,
    pub node: Option<String>,
    pub log: Option<String>,
    pub message_expire_sec: Option<i64>,
    pub channel_expire_sec: Option<i64>,
    pub max_stored_message: Option<usize>,
    pub max_subscriber_per_key: Option<usize>,
    pub tcp_keepalive: Option<u8>,
    pub channel_bucket: Option<usize>,
    pub channel_type: Option<u8>,
    pub heartbeat_sec: Option<u64>,
    pub auth: Option<u8>,
    pub protocol: Option<u8>,
    pub read_buf_byte: Option<usize>,
    pub write_buf_byte: Option<usize>,
    pub write_buf_num: Option<usize>,
    pub redis: Option<HashMap<String, RedisNodeConfig>>,
    pub debug: Option<u8>,
}

impl RawConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn validate(self) -> Result<Config, ConfigError> {
        let addr = self.addr.unwrap_or_else(|| "0.0.0.0:7070".to_owned());
        let admin_addr = self.admin_addr.unwrap_or_else(|| "127.0.0.1:7071".to_owned());
        if addr == admin_addr {
            return Err(ConfigError::AddrCollision { addr });
        }

        let channel_bucket = self.channel_bucket.unwrap_or(16);
        if !channel_bucket.is_power_of_two() {
            return Err(ConfigError::InvalidBucketCount(channel_bucket));
        }

        let channel_type_raw = self.channel_type.unwrap_or(1);
        let channel_type = match channel_type_raw {
            1 => ChannelType::Memory,
            2 => ChannelType::External,
            other => return Err(ConfigError::InvalidChannelType(other)),
        };

        let protocol_raw = self.protocol.unwrap_or(0);
        let protocol = match protocol_raw {
            0 => Protocol::WebSocket,
            1 => Protocol::Tcp,
            other => return Err(ConfigError::InvalidProtocol(other)),
        };

        let redis = self.redis.unwrap_or_default();
        if channel_type == ChannelType::External && redis.is_empty() {
            return Err(ConfigError::MissingBackendNodes);
        }

        Ok(Config {
            addr,
            admin_addr,
            node: self.node.unwrap_or_else(|| "pushgate-1".to_owned()),
            log: self.log.unwrap_or_default(),
            message_expire_sec: self.message_expire_sec.unwrap_or(10_800),
            channel_expire_sec: self.channel_expire_sec.unwrap_or(604_800),
            max_stored_message: self.max_stored_message.unwrap_or(20),
            max_subscriber_per_key: self.max_subscriber_per_key.unwrap_or(usize::MAX),
            tcp_keepalive: self.tcp_keepalive.unwrap_or(1) != 0,
            channel_bucket,
            channel_type,
            heartbeat_sec: self.heartbeat_sec.unwrap_or(30),
            auth: self.auth.unwrap_or(1) != 0,
            protocol,
            read_buf_byte: self.read_buf_byte.unwrap_or(8192),
            write_buf_byte: self.write_buf_byte.unwrap_or(8192),
            write_buf_num: self.write_buf_num.unwrap_or(64),
            redis,
            debug: self.debug.unwrap_or(0) != 0,
        })
    }
}
