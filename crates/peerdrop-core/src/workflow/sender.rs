//! 发送端工作流
//!
//! 高层 API 封装完整的发送流程:
//! 1. 连接中继并创建房间
//! 2. 等待接收端加入
//! 3. 按顺序切块、编码、发送，同一时刻只有一个块在处理
//!
//! 切块引擎 [`FileSender`] 只依赖 [`MessageSink`]，不直接接触连接。

use log::{debug, error, info, warn};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::config::{TransferConfig, validate_chunk_size};
use crate::error::{Result, TransferError};
use crate::progress::{ProgressTracker, TransferProgress};
use crate::transfer::codec;
use crate::transfer::{
    ChannelEvent, ChunkFrame, FileMetadata, MessageSink, RelayMessage, RoomChannel, RoomId,
};

/// 发送进度回调
pub trait SendProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 房间内访客数量变化
    fn on_participants(&self, count: u32);
    /// 进度更新
    fn on_progress(&self, progress: &TransferProgress);
    /// 发送完成
    fn on_complete(&self);
    /// 发送失败
    fn on_error(&self, error: &str);
}

/// 待发送文件的描述，在传输开始时读取一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

impl FileDescriptor {
    pub fn new(name: &str, mime_type: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size,
        }
    }

    /// 从文件系统读取名称和大小，并猜测 MIME 类型
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        // 猜测 MIME 类型
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| crate::transfer::protocol::DEFAULT_MIME_TYPE.to_string());

        Ok(Self {
            name,
            mime_type,
            size: metadata.len(),
        })
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }
}

/// 总块数：`max(1, ceil(size / chunk_size))`
///
/// 空文件也发送一个块，它同时是首块和尾块。
pub fn total_chunks(file_size: u64, chunk_size: usize) -> u64 {
    file_size.div_ceil(chunk_size as u64).max(1)
}

/// 发送引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    Completed,
    Failed,
}

/// 一次发送的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSummary {
    pub chunks: u32,
    pub bytes: u64,
}

/// 切块发送引擎
pub struct FileSender<S: MessageSink> {
    sink: S,
    room_id: RoomId,
    chunk_size: usize,
    state: SendState,
    progress: ProgressTracker,
}

impl<S: MessageSink> FileSender<S> {
    pub fn new(sink: S, room_id: RoomId, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            sink,
            room_id,
            chunk_size,
            state: SendState::Idle,
            progress: ProgressTracker::new(),
        })
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.progress.current()
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    /// 发送一个文件
    pub async fn send_file<C: SendProgressCallback>(
        &mut self,
        path: &Path,
        callback: &C,
    ) -> Result<SendSummary> {
        let descriptor = match FileDescriptor::from_path(path).await {
            Ok(d) => d,
            Err(e) => {
                callback.on_error(&e.to_string());
                return Err(e);
            }
        };
        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) => {
                callback.on_error(&e.to_string());
                return Err(e.into());
            }
        };
        self.send_reader(&descriptor, file, callback).await
    }

    /// 从任意异步读取源发送，源中的字节数必须与 `file.size` 一致
    ///
    /// 读取或发送失败时停止发送后续块，不会重试。
    pub async fn send_reader<R, C>(
        &mut self,
        file: &FileDescriptor,
        reader: R,
        callback: &C,
    ) -> Result<SendSummary>
    where
        R: AsyncRead + Unpin + Send,
        C: SendProgressCallback,
    {
        if self.state == SendState::Sending {
            return Err(TransferError::InvalidState("a transfer is already running"));
        }
        self.state = SendState::Sending;

        info!(
            "Sending {} ({}, {} bytes) to room {}",
            file.name, file.mime_type, file.size, self.room_id
        );
        callback.on_status(&format!("Sending {}", file.name));

        match self.stream_chunks(file, reader, callback).await {
            Ok(summary) => {
                self.state = SendState::Completed;
                info!(
                    "Sent {} in {} chunks ({} bytes)",
                    file.name, summary.chunks, summary.bytes
                );
                callback.on_complete();
                Ok(summary)
            }
            Err(e) => {
                self.state = SendState::Failed;
                error!("Sending {} failed: {}", file.name, e);
                callback.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn stream_chunks<R, C>(
        &mut self,
        file: &FileDescriptor,
        mut reader: R,
        callback: &C,
    ) -> Result<SendSummary>
    where
        R: AsyncRead + Unpin + Send,
        C: SendProgressCallback,
    {
        let total = u32::try_from(total_chunks(file.size, self.chunk_size)).map_err(|_| {
            TransferError::Config(format!(
                "file of {} bytes needs too many chunks of {} bytes",
                file.size, self.chunk_size
            ))
        })?;
        callback.on_progress(&self.progress.start(total, file.size));

        let metadata = file.metadata();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut remaining = file.size;
        let mut sent_bytes = 0u64;

        for index in 0..total {
            let len = remaining.min(self.chunk_size as u64) as usize;
            let slice = &mut buffer[..len];
            reader.read_exact(slice).await?;

            let frame = ChunkFrame::new(
                &self.room_id,
                codec::encode(slice),
                index,
                total,
                (index == 0).then_some(&metadata),
            );
            debug!("Sending chunk {}/{} ({} bytes)", index + 1, total, len);
            self.sink
                .send_message(RelayMessage::FileChunk(frame))
                .await?;

            remaining -= len as u64;
            sent_bytes += len as u64;
            if let Some(progress) = self.progress.advance(len) {
                callback.on_progress(&progress);
            }
        }

        Ok(SendSummary {
            chunks: total,
            bytes: sent_bytes,
        })
    }
}

/// 发送会话：一条中继连接 + 一个房间
pub struct SendSession {
    channel: RoomChannel,
    room_id: RoomId,
    chunk_size: usize,
    participants: u32,
}

impl SendSession {
    /// 连接中继并创建房间
    pub async fn open<C: SendProgressCallback>(
        config: &TransferConfig,
        callback: &C,
    ) -> Result<Self> {
        config.validate()?;
        callback.on_status("Connecting to relay...");

        let result = async {
            let mut channel = RoomChannel::connect_to(&config.relay_url).await?;
            let room_id = channel.create_room().await?;
            Ok::<_, TransferError>((channel, room_id))
        }
        .await;

        match result {
            Ok((channel, room_id)) => {
                callback.on_status(&format!("Room created: {}", room_id));
                Ok(Self {
                    channel,
                    room_id,
                    chunk_size: config.chunk_size,
                    participants: 0,
                })
            }
            Err(e) => {
                callback.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn participants(&self) -> u32 {
        self.participants
    }

    pub fn channel(&self) -> &RoomChannel {
        &self.channel
    }

    /// 等待至少一个接收端加入
    pub async fn wait_for_guest<C: SendProgressCallback>(&mut self, callback: &C) -> Result<u32> {
        callback.on_status("Waiting for receiver to join...");

        while self.participants == 0 {
            match self.channel.recv().await {
                Some(ChannelEvent::Message(RelayMessage::ParticipantsCount { participants })) => {
                    info!("Participants in room {}: {}", self.room_id, participants);
                    self.participants = participants;
                    callback.on_participants(participants);
                }
                Some(ChannelEvent::Message(RelayMessage::Error { message })) => {
                    callback.on_error(&message);
                    return Err(TransferError::Relay(message));
                }
                Some(ChannelEvent::Message(other)) => {
                    debug!("Ignoring {} while waiting for receiver", other.kind());
                }
                Some(ChannelEvent::Invalid(text)) => {
                    warn!("Invalid relay message: {}", text);
                }
                Some(ChannelEvent::Closed(reason)) => {
                    let e = reason.to_error();
                    callback.on_error(&e.to_string());
                    return Err(e);
                }
                None => {
                    callback.on_error("connection closed");
                    return Err(TransferError::ChannelClosed);
                }
            }
        }

        Ok(self.participants)
    }

    /// 发送文件
    pub async fn send_file<C: SendProgressCallback>(
        &mut self,
        path: &Path,
        callback: &C,
    ) -> Result<SendSummary> {
        let mut sender = FileSender::new(&mut self.channel, self.room_id.clone(), self.chunk_size)?;
        sender.send_file(path, callback).await
    }

    /// 关闭连接，房间随之关闭
    pub async fn close(mut self) {
        self.channel.close().await;
    }
}

/// 简化的发送回调实现
pub struct SimpleSendCallback {
    tx: mpsc::UnboundedSender<SendEvent>,
}

#[derive(Debug, Clone)]
pub enum SendEvent {
    Status(String),
    Participants(u32),
    Progress(TransferProgress),
    Complete,
    Error(String),
}

impl SimpleSendCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SendProgressCallback for SimpleSendCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.send(SendEvent::Status(status.to_string()));
    }

    fn on_participants(&self, count: u32) {
        let _ = self.tx.send(SendEvent::Participants(count));
    }

    fn on_progress(&self, progress: &TransferProgress) {
        let _ = self.tx.send(SendEvent::Progress(*progress));
    }

    fn on_complete(&self) {
        let _ = self.tx.send(SendEvent::Complete);
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.send(SendEvent::Error(error.to_string()));
    }
}
