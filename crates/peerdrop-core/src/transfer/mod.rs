//! 传输层
//!
//! 包含:
//! - 块数据编解码
//! - 中继协议消息格式
//! - 房间通道客户端 (WebSocket)

pub mod channel;
pub mod codec;
pub mod protocol;

pub use channel::{
    ChannelEvent, ChannelState, CloseReason, MessageSink, Role, RoomChannel,
};
pub use protocol::{ChunkFrame, FileMetadata, RelayMessage, RoomId};
