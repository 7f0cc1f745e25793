use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::core::Result;

/// 调度模式。由调用方显式选择，二者不混用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// 串行：按入队顺序逐个派发，前一个任务到达终态后才派发下一个。
    /// 完成顺序与入队顺序一致。
    Sequential,
    /// 有界并发：最多 limit 个任务同时在传，完成顺序不保证。
    Concurrent { limit: usize },
}

impl DispatchMode {
    /// 同时在传任务数的上限，至少为 1，从不无界
    pub fn limit(&self) -> usize {
        match self {
            DispatchMode::Sequential => 1,
            DispatchMode::Concurrent { limit } => (*limit).max(1),
        }
    }
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Concurrent { limit: 3 }
    }
}

/// 上传队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 接受的 MIME 模式，逗号分隔，子类型可用通配符，例如 `image/*,video/mp4`。
    /// None 表示接受所有类型。
    pub accept: Option<String>,
    /// 单文件大小上限（字节），None 表示不限制
    pub max_size: Option<u64>,
    /// 是否允许一次提交多个文件
    pub multiple: bool,
    /// 单批文件数量上限
    pub max_files: usize,
    /// 显式重试次数上限
    pub max_retries: u32,
    /// 调度模式
    pub dispatch: DispatchMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            accept: None,
            max_size: None,
            multiple: true,
            max_files: 100,
            max_retries: 3,
            dispatch: DispatchMode::default(),
        }
    }
}

impl QueueConfig {
    /// 从 TOML 文件加载配置
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert!(config.accept.is_none());
        assert!(config.multiple);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dispatch.limit(), 3);
    }

    #[test]
    fn test_parse_toml() {
        let config = QueueConfig::from_toml(
            r#"
            accept = "image/*,video/mp4"
            max_size = 104857600
            multiple = true
            max_files = 10
            max_retries = 2

            [dispatch.concurrent]
            limit = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.accept.as_deref(), Some("image/*,video/mp4"));
        assert_eq!(config.max_size, Some(104857600));
        assert_eq!(config.max_files, 10);
        assert_eq!(config.dispatch, DispatchMode::Concurrent { limit: 4 });
    }

    #[test]
    fn test_sequential_mode() {
        let config = QueueConfig::from_toml(r#"dispatch = "sequential""#).unwrap();
        assert_eq!(config.dispatch, DispatchMode::Sequential);
        assert_eq!(config.dispatch.limit(), 1);
    }

    #[test]
    fn test_concurrency_never_zero() {
        assert_eq!(DispatchMode::Concurrent { limit: 0 }.limit(), 1);
    }
}
