//! 工作流模块
//!
//! 提供发送端/接收端两个状态机以及封装完整流程的会话 API

pub mod receiver;
pub mod sender;

pub use receiver::{
    FileReceiver, ReceiveEvent, ReceiveProgressCallback, ReceiveSession, ReceiveStatus,
    ReceivedFile, SimpleReceiveCallback,
};
pub use sender::{
    FileDescriptor, FileSender, SendEvent, SendProgressCallback, SendSession, SendState,
    SendSummary, SimpleSendCallback, total_chunks,
};
