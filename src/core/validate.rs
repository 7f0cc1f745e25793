use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::utils::format_bytes;
use super::types::FileSource;

/// 文件被拒绝的原因。校验结果是数据而不是异常，从不作为 Err 抛给调用方。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// multiple = false 时提交了多个文件，整批拒绝
    TooManyFiles { submitted: usize },
    /// 批量超出 max_files，整批拒绝
    QuotaExceeded { submitted: usize, max_files: usize },
    /// 单文件超出 max_size
    FileTooLarge { size: u64, max_size: u64 },
    /// MIME 类型不在 accept 列表内
    UnsupportedType { mime: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooManyFiles { submitted } => {
                write!(f, "only one file allowed, got {submitted}")
            }
            RejectReason::QuotaExceeded { submitted, max_files } => {
                write!(f, "batch of {submitted} exceeds limit of {max_files} files")
            }
            RejectReason::FileTooLarge { size, max_size } => {
                write!(
                    f,
                    "file is {} which exceeds the {} limit",
                    format_bytes(*size),
                    format_bytes(*max_size)
                )
            }
            RejectReason::UnsupportedType { mime } => {
                write!(f, "type {mime} is not accepted")
            }
        }
    }
}

/// 单个被拒绝的文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFile {
    pub name: String,
    pub reason: RejectReason,
}

/// 校验结果：接受与拒绝的划分
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: Vec<FileSource>,
    pub rejected: Vec<RejectedFile>,
}

/// 校验一批候选文件。纯函数，无副作用，相同输入给出相同划分。
///
/// 批量级检查优先于单文件检查：multiple/max_files 任一不满足时整批拒绝。
/// 单文件检查先查大小再查类型，一个文件被拒不影响其余文件。
pub fn validate(files: Vec<FileSource>, config: &QueueConfig) -> ValidationReport {
    let submitted = files.len();

    if !config.multiple && submitted > 1 {
        return reject_all(files, RejectReason::TooManyFiles { submitted });
    }

    if submitted > config.max_files {
        return reject_all(
            files,
            RejectReason::QuotaExceeded {
                submitted,
                max_files: config.max_files,
            },
        );
    }

    let patterns = parse_accept(config.accept.as_deref());
    let mut report = ValidationReport::default();

    for file in files {
        if let Some(max_size) = config.max_size {
            if file.size > max_size {
                report.rejected.push(RejectedFile {
                    name: file.name,
                    reason: RejectReason::FileTooLarge {
                        size: file.size,
                        max_size,
                    },
                });
                continue;
            }
        }

        if let Some(patterns) = &patterns {
            if !patterns.iter().any(|p| mime_matches(p, &file.mime)) {
                report.rejected.push(RejectedFile {
                    name: file.name,
                    reason: RejectReason::UnsupportedType {
                        mime: file.mime,
                    },
                });
                continue;
            }
        }

        report.accepted.push(file);
    }

    report
}

fn reject_all(files: Vec<FileSource>, reason: RejectReason) -> ValidationReport {
    ValidationReport {
        accepted: Vec::new(),
        rejected: files
            .into_iter()
            .map(|file| RejectedFile {
                name: file.name,
                reason: reason.clone(),
            })
            .collect(),
    }
}

/// 解析 accept 字符串。None 或空串表示接受所有类型。
fn parse_accept(accept: Option<&str>) -> Option<Vec<String>> {
    let raw = accept?.trim();
    if raw.is_empty() {
        return None;
    }

    let patterns: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    if patterns.is_empty() { None } else { Some(patterns) }
}

/// 匹配 MIME 模式：精确匹配，或 `type/*` 形式的子类型通配
fn mime_matches(pattern: &str, mime: &str) -> bool {
    let mime = mime.to_ascii_lowercase();
    if pattern == "*/*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return mime
            .split('/')
            .next()
            .is_some_and(|main_type| main_type == prefix);
    }

    pattern == mime
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64, mime: &str) -> FileSource {
        FileSource {
            name: name.into(),
            size,
            mime: mime.into(),
            payload: Default::default(),
        }
    }

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_accepts_within_limits() {
        let config = QueueConfig {
            accept: Some("image/*".into()),
            max_size: Some(100 * MB),
            ..Default::default()
        };
        let report = validate(vec![file("a.png", 2 * MB, "image/png")], &config);
        assert_eq!(report.accepted.len(), 1);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_oversize_rejected_siblings_pass() {
        let config = QueueConfig {
            max_size: Some(100 * MB),
            max_files: 10,
            ..Default::default()
        };
        let report = validate(
            vec![
                file("img1.png", 2 * MB, "image/png"),
                file("img2.png", 150 * MB, "image/png"),
            ],
            &config,
        );
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].name, "img1.png");
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].reason,
            RejectReason::FileTooLarge { size, max_size }
                if size == 150 * MB && max_size == 100 * MB
        ));
    }

    #[test]
    fn test_single_mode_rejects_whole_batch() {
        let config = QueueConfig {
            multiple: false,
            ..Default::default()
        };
        // 两个文件各自都合法，但批量级拒绝优先
        let report = validate(
            vec![
                file("a.png", 1 * MB, "image/png"),
                file("b.png", 1 * MB, "image/png"),
            ],
            &config,
        );
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|r| matches!(r.reason, RejectReason::TooManyFiles { submitted: 2 })));
    }

    #[test]
    fn test_quota_exceeded() {
        let config = QueueConfig {
            max_files: 2,
            ..Default::default()
        };
        let report = validate(
            vec![
                file("a.png", 1, "image/png"),
                file("b.png", 1, "image/png"),
                file("c.png", 1, "image/png"),
            ],
            &config,
        );
        assert!(report.accepted.is_empty());
        assert!(matches!(
            report.rejected[0].reason,
            RejectReason::QuotaExceeded { submitted: 3, max_files: 2 }
        ));
    }

    #[test]
    fn test_unsupported_type() {
        let config = QueueConfig {
            accept: Some("image/*,video/mp4".into()),
            ..Default::default()
        };
        let report = validate(
            vec![
                file("a.gif", 1, "image/gif"),
                file("b.mp4", 1, "video/mp4"),
                file("c.pdf", 1, "application/pdf"),
            ],
            &config,
        );
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            &report.rejected[0].reason,
            RejectReason::UnsupportedType { mime } if mime == "application/pdf"
        ));
    }

    #[test]
    fn test_size_checked_before_type() {
        // 同时超大且类型不符的文件报告 FileTooLarge
        let config = QueueConfig {
            accept: Some("image/*".into()),
            max_size: Some(MB),
            ..Default::default()
        };
        let report = validate(vec![file("big.pdf", 10 * MB, "application/pdf")], &config);
        assert!(matches!(
            report.rejected[0].reason,
            RejectReason::FileTooLarge { .. }
        ));
    }

    #[test]
    fn test_mime_wildcard() {
        assert!(mime_matches("image/*", "image/png"));
        assert!(mime_matches("image/*", "IMAGE/JPEG"));
        assert!(!mime_matches("image/*", "video/mp4"));
        assert!(mime_matches("video/mp4", "video/mp4"));
        assert!(!mime_matches("video/mp4", "video/webm"));
        assert!(mime_matches("*/*", "application/pdf"));
    }

    #[test]
    fn test_deterministic() {
        let config = QueueConfig {
            max_size: Some(MB),
            ..Default::default()
        };
        let inputs = || vec![file("a.png", 2 * MB, "image/png"), file("b.png", 1, "image/png")];
        let first = validate(inputs(), &config);
        let second = validate(inputs(), &config);
        assert_eq!(first.accepted.len(), second.accepted.len());
        assert_eq!(first.rejected.len(), second.rejected.len());
    }
}
