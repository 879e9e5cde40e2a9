//! 错误类型定义
//!
//! 只覆盖可恢复的情况（重试耗尽的 I/O 失败、配置错误、分区表损坏）。
//! 不变量被破坏（重复释放、空闲链表损坏、未知主设备号）不会变成错误值，
//! 而是直接 `panic!` 停机。

use core::fmt;

/// 块 I/O 操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（重试次数耗尽）
    Io,
    /// 无效参数
    InvalidInput,
    /// 磁盘上的数据损坏（如分区表签名错误）
    Corrupted,
    /// 已存在
    AlreadyExists,
    /// 无效状态
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
