//! 错误类型定义
//!
//! 提供 NAND FTL 操作的错误类型，对应固件的 `NAND_FTL_ERROR` 错误码。

use core::fmt;

/// FTL 操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 无效参数（LSN/LBN 越界、缓冲区过小等）
    InvalidInput,
    /// 扇区所在的逻辑块从未写入
    NotFound,
    /// ECC 无法纠正页数据
    UncorrectedEcc,
    /// 页编程失败（闪存状态报告）
    ProgramFailed,
    /// 块擦除校验失败（闪存状态报告）
    EraseFailed,
    /// 访问了已标记为坏块的块
    BadBlock,
    /// 就绪队列耗尽，无法分配块
    Allocation,
    /// 块号超出范围
    OutOfRange,
    /// 介质未格式化
    Unformatted,
    /// 设备未初始化
    NotInitialized,
    /// 介质内容损坏（错误的 LBN、非法映射项）
    Corrupted,
    /// NAND 硬件超时
    HardwareTimeout,
    /// DMA 超时
    DmaTimeout,
    /// 不支持的操作
    Unsupported,
    /// 未定义的致命错误
    Fatal,
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

    /// 是否为设备级致命错误
    ///
    /// 这类错误需要重新格式化或更换设备，FTL 不会自行恢复。
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Unformatted
                | ErrorKind::NotInitialized
                | ErrorKind::HardwareTimeout
                | ErrorKind::DmaTimeout
                | ErrorKind::Allocation
                | ErrorKind::Fatal
        )
    }

    /// 是否为介质失效（编程/擦除失败）
    ///
    /// 介质失效只对当前操作致命：块被标记为坏块，换块重试。
    pub const fn is_media_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::ProgramFailed | ErrorKind::EraseFailed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
