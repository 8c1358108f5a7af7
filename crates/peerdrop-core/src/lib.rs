//! PeerDrop Core Library
//!
//! 经由中继服务器在两个客户端之间分块传输单个文件的协议实现
//!
//! # 模块
//!
//! - **transfer**: 块数据编解码、中继消息格式、房间通道客户端
//! - **workflow**: 发送端切块引擎与接收端重组状态机
//! - **progress**: 传输进度视图
//! - **config**: 设置的加载与保存
//!
//! # 使用示例
//!
//! ## 发送文件
//!
//! ```ignore
//! use peerdrop_core::{SendSession, SimpleSendCallback, TransferConfig};
//!
//! let (callback, _events) = SimpleSendCallback::new();
//! let mut session = SendSession::open(&TransferConfig::default(), &callback).await?;
//! println!("房间号: {}", session.room_id());
//!
//! session.wait_for_guest(&callback).await?;
//! session.send_file(Path::new("photo.jpg"), &callback).await?;
//! ```
//!
//! ## 接收文件
//!
//! ```ignore
//! use peerdrop_core::{ReceiveSession, RoomId, SimpleReceiveCallback, TransferConfig};
//!
//! let (callback, _events) = SimpleReceiveCallback::new();
//! let room_id = RoomId::parse("042137")?;
//! let mut session = ReceiveSession::join(&TransferConfig::default(), room_id, &callback).await?;
//!
//! let file = session.next_file(&callback).await?;
//! file.save_to(Path::new("Downloads")).await?;
//! ```

pub mod config;
pub mod error;
pub mod progress;
pub mod transfer;
pub mod workflow;

// Config re-exports
pub use config::{AppSettings, DEFAULT_CHUNK_SIZE, DEFAULT_RELAY_URL, TransferConfig};

// Error re-exports
pub use error::{DecodeError, TransferError};

// Progress re-exports
pub use progress::{ProgressTracker, TransferProgress, format_size};

// Transfer re-exports
pub use transfer::{
    ChannelEvent, ChannelState, ChunkFrame, CloseReason, FileMetadata, MessageSink, RelayMessage,
    Role, RoomChannel, RoomId,
};

// Workflow re-exports
pub use workflow::{
    FileDescriptor, FileReceiver, FileSender, ReceiveEvent, ReceiveProgressCallback,
    ReceiveSession, ReceiveStatus, ReceivedFile, SendEvent, SendProgressCallback, SendSession,
    SendState, SendSummary, SimpleReceiveCallback, SimpleSendCallback,
};
