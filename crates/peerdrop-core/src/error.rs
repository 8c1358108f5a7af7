//! 错误类型
//!
//! 传输过程中所有可观察的失败都归入 [`TransferError`]。

use thiserror::Error;

/// 二进制/文本编解码失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 去掉填充后的长度不可能来自合法编码 (len % 4 == 1)
    #[error("invalid encoded length {0}")]
    InvalidLength(usize),

    /// 非法字符或错误的尾部位
    #[error("malformed chunk payload: {0}")]
    Malformed(String),
}

/// 传输错误
#[derive(Debug, Error)]
pub enum TransferError {
    /// 连接从未就绪，或意外断开
    #[error("connection error: {0}")]
    Connection(String),

    /// 服务器拒绝加入房间
    #[error("failed to join room: {0}")]
    JoinRejected(String),

    #[error("failed to decode chunk: {0}")]
    Decode(#[from] DecodeError),

    /// 块序号越界、不连续，或帧字段互相矛盾
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// 重组后的大小与元数据声明的不一致
    #[error("reassembled size mismatch: declared {declared} bytes, got {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    /// 房主断开，房间已关闭
    #[error("room closed by host")]
    RoomClosed,

    /// 在已关闭的通道上操作
    #[error("channel is closed")]
    ChannelClosed,

    /// 当前状态下不允许该操作
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// 配置值不合法
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid room id {0:?}: expected 6 alphanumeric characters")]
    InvalidRoomId(String),

    /// 服务器返回了意料之外的错误消息
    #[error("relay error: {0}")]
    Relay(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransferError {
    /// 是否属于「当前传输必须放弃」的一类错误
    ///
    /// 协议违规与房主断开都会使接收端进入 `Error` 状态并丢弃已收数据。
    pub fn is_fatal_to_transfer(&self) -> bool {
        matches!(
            self,
            TransferError::Decode(_)
                | TransferError::ProtocolViolation(_)
                | TransferError::SizeMismatch { .. }
                | TransferError::RoomClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
