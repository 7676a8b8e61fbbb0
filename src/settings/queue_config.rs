use crate::db::Database;
use crate::error::{ConfigError, StorageResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 6;
/// 下载要和本地磁盘 IO 争用，默认并发比上传低。
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;
pub const DEFAULT_BATCH_SIZE: usize = 10;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 16;
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;

/// 队列管理器配置，构造管理器时校验。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    pub max_concurrent: usize,
    pub batch_size: usize,
}

impl QueueManagerConfig {
    pub fn new(max_concurrent: usize, batch_size: usize) -> Result<Self, ConfigError> {
        let config = Self {
            max_concurrent,
            batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn upload_default() -> Self {
        Self {
            max_concurrent: DEFAULT_UPLOAD_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn download_default() -> Self {
        Self {
            max_concurrent: DEFAULT_DOWNLOAD_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Upload,
    Download,
}

impl QueueKind {
    fn concurrency_key(self) -> &'static str {
        match self {
            QueueKind::Upload => "upload_max_concurrency",
            QueueKind::Download => "download_max_concurrency",
        }
    }

    fn batch_size_key(self) -> &'static str {
        match self {
            QueueKind::Upload => "upload_batch_size",
            QueueKind::Download => "download_batch_size",
        }
    }

    pub fn default_config(self) -> QueueManagerConfig {
        match self {
            QueueKind::Upload => QueueManagerConfig::upload_default(),
            QueueKind::Download => QueueManagerConfig::download_default(),
        }
    }
}

/// 读取持久化的队列配置；缺失的项使用默认值，越界的值截断到允许区间。
pub fn load_queue_config(db: &Database, kind: QueueKind) -> StorageResult<QueueManagerConfig> {
    let defaults = kind.default_config();
    let max_concurrent = match db.get_setting(kind.concurrency_key())? {
        Some(raw) => parse_and_clamp(
            kind.concurrency_key(),
            &raw,
            MIN_CONCURRENCY,
            MAX_CONCURRENCY,
        )?,
        None => defaults.max_concurrent,
    };
    let batch_size = match db.get_setting(kind.batch_size_key())? {
        Some(raw) => parse_and_clamp(kind.batch_size_key(), &raw, MIN_BATCH_SIZE, MAX_BATCH_SIZE)?,
        None => defaults.batch_size,
    };
    Ok(QueueManagerConfig {
        max_concurrent,
        batch_size,
    })
}

/// 校验后写入；超出允许区间直接拒绝。
pub fn save_queue_config(
    db: &Database,
    kind: QueueKind,
    config: QueueManagerConfig,
) -> StorageResult<QueueManagerConfig> {
    check_range(
        kind.concurrency_key(),
        config.max_concurrent,
        MIN_CONCURRENCY,
        MAX_CONCURRENCY,
    )?;
    check_range(
        kind.batch_size_key(),
        config.batch_size,
        MIN_BATCH_SIZE,
        MAX_BATCH_SIZE,
    )?;
    db.set_setting(kind.concurrency_key(), &config.max_concurrent.to_string())?;
    db.set_setting(kind.batch_size_key(), &config.batch_size.to_string())?;
    Ok(config)
}

fn check_range(key: &str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be between {min} and {max}"),
        });
    }
    Ok(())
}

fn parse_and_clamp(key: &str, raw: &str, min: usize, max: usize) -> Result<usize, ConfigError> {
    let parsed = raw
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    Ok(parsed.clamp(min, max))
}
