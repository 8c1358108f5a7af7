//! 接收端工作流
//!
//! 高层 API 封装完整的接收流程:
//! 1. 连接中继并加入房间
//! 2. 按到达顺序接收块帧并重组
//! 3. 最后一个块到达后校验大小，产出完整文件
//!
//! 状态机 `Waiting → Receiving → Completed`，前三个状态都可以进入 `Error`。
//! 每次传输使用独立的缓冲区，以首块生成的 UUID 标识，完成或出错时丢弃。

use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::progress::{ProgressTracker, TransferProgress};
use crate::transfer::codec;
use crate::transfer::{
    ChannelEvent, ChunkFrame, CloseReason, FileMetadata, RelayMessage, RoomChannel, RoomId,
};

/// 接收状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    Waiting,
    Receiving,
    Completed,
    Error,
}

/// 接收进度回调
pub trait ReceiveProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: ReceiveStatus);
    /// 新传输的首块到达
    fn on_file_info(&self, transfer_id: Uuid, metadata: &FileMetadata, total_chunks: u32);
    /// 进度更新
    fn on_progress(&self, progress: &TransferProgress);
    /// 接收完成
    fn on_complete(&self, file: &ReceivedFile);
    /// 接收失败
    fn on_error(&self, error: &str);
}

/// 重组完成的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub transfer_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ReceivedFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 用于保存的文件名：只保留最后一段路径
    pub fn safe_file_name(&self) -> String {
        let candidate = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        match candidate {
            "" | "." | ".." => "received.bin".to_string(),
            name => name.to_string(),
        }
    }

    /// 保存到目录，不覆盖已有文件
    ///
    /// 以 `create_new` 打开目标，名字被占用时换下一个候选名。
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let file_name = self.safe_file_name();
        let (path, mut file) = create_unique(dir, &file_name).await?;
        file.write_all(&self.data).await?;
        file.flush().await?;

        info!("Saved {} bytes to {:?}", self.data.len(), path);
        Ok(path)
    }
}

/// 第 `n` 个候选名，`n > 0` 时追加 ` (n)`
fn candidate_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", file_name, n),
    }
}

async fn create_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, tokio::fs::File)> {
    for n in 0u32.. {
        let path = dir.join(candidate_name(file_name, n));
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{:?} already exists", path);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(TransferError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free file name for {}", file_name),
    )))
}

/// 单次传输的缓冲区
struct TransferArena {
    id: Uuid,
    metadata: FileMetadata,
    total_chunks: u32,
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
}

impl TransferArena {
    fn new(metadata: FileMetadata, total_chunks: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
            total_chunks,
            chunks: Vec::with_capacity(total_chunks.min(1024) as usize),
            received_bytes: 0,
        }
    }

    fn next_index(&self) -> u32 {
        self.chunks.len() as u32
    }

    fn assemble(self) -> Result<ReceivedFile> {
        let data = self.chunks.concat();
        let actual = data.len() as u64;
        if actual != self.metadata.size {
            return Err(TransferError::SizeMismatch {
                declared: self.metadata.size,
                actual,
            });
        }

        Ok(ReceivedFile {
            transfer_id: self.id,
            name: self.metadata.name,
            mime_type: self.metadata.mime_type,
            data,
        })
    }
}

/// 接收状态机
///
/// 只由入站事件驱动，不持有连接。
pub struct FileReceiver {
    status: ReceiveStatus,
    room_id: Option<RoomId>,
    joined: bool,
    arena: Option<TransferArena>,
    progress: ProgressTracker,
    completed: Option<ReceivedFile>,
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReceiver {
    pub fn new() -> Self {
        Self {
            status: ReceiveStatus::Waiting,
            room_id: None,
            joined: false,
            arena: None,
            progress: ProgressTracker::new(),
            completed: None,
        }
    }

    pub fn status(&self) -> ReceiveStatus {
        self.status
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    /// 是否有未完成的传输数据
    pub fn has_partial_transfer(&self) -> bool {
        self.arena.is_some()
    }

    /// 当前传输已接收的块数
    pub fn received_chunks(&self) -> u32 {
        self.arena.as_ref().map_or(0, TransferArena::next_index)
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.progress.current()
    }

    pub fn completed(&self) -> Option<&ReceivedFile> {
        self.completed.as_ref()
    }

    pub fn take_completed(&mut self) -> Option<ReceivedFile> {
        self.completed.take()
    }

    /// 已发出加入请求
    pub fn begin_join(&mut self, room_id: RoomId) {
        self.joined = true;
        self.room_id = Some(room_id);
        self.status = ReceiveStatus::Waiting;
        self.arena = None;
        self.progress.reset();
    }

    /// 处理一个通道事件，返回处理后的状态
    pub fn handle_event<C: ReceiveProgressCallback>(
        &mut self,
        event: ChannelEvent,
        callback: &C,
    ) -> Result<ReceiveStatus> {
        match event {
            ChannelEvent::Message(message) => self.handle_message(&message, callback),
            ChannelEvent::Invalid(text) => {
                if self.status == ReceiveStatus::Receiving {
                    Err(self.fail(
                        TransferError::ProtocolViolation(format!("unparseable frame: {}", text)),
                        callback,
                    ))
                } else {
                    warn!("Ignoring unparseable message: {}", text);
                    Ok(self.status)
                }
            }
            ChannelEvent::Closed(reason) => self.handle_close(&reason, callback),
        }
    }

    pub fn handle_message<C: ReceiveProgressCallback>(
        &mut self,
        message: &RelayMessage,
        callback: &C,
    ) -> Result<ReceiveStatus> {
        match message {
            RelayMessage::FileChunk(frame) => self.handle_chunk(frame, callback),
            RelayMessage::Error { message } => Err(self.reject_join(message, callback)),
            RelayMessage::RoomClosed => self.handle_close(&CloseReason::RoomClosed, callback),
            other => {
                debug!("Receiver ignoring {}", other.kind());
                Ok(self.status)
            }
        }
    }

    /// 服务器拒绝加入：回到输入房间号的状态，连接保留以便重试
    fn reject_join<C: ReceiveProgressCallback>(
        &mut self,
        message: &str,
        callback: &C,
    ) -> TransferError {
        warn!("Join rejected: {}", message);
        self.joined = false;
        self.room_id = None;
        self.arena = None;
        self.progress.reset();
        self.status = ReceiveStatus::Waiting;
        callback.on_status(self.status);
        callback.on_error(message);
        TransferError::JoinRejected(message.to_string())
    }

    /// 处理一个块帧
    pub fn handle_chunk<C: ReceiveProgressCallback>(
        &mut self,
        frame: &ChunkFrame,
        callback: &C,
    ) -> Result<ReceiveStatus> {
        if !self.joined {
            warn!("Dropping chunk {} received outside a room", frame.chunk_index);
            return Ok(self.status);
        }

        if let Some(room_id) = &self.room_id
            && frame.room_id != room_id.as_str()
        {
            let err = TransferError::ProtocolViolation(format!(
                "chunk for room {} received in room {}",
                frame.room_id, room_id
            ));
            return Err(self.fail(err, callback));
        }

        if frame.is_first() {
            self.start_transfer(frame, callback)?;
        } else if self.status == ReceiveStatus::Error {
            // 当前传输已失败，等待下一次传输的首块
            debug!("Dropping chunk {} of a failed transfer", frame.chunk_index);
            return Ok(self.status);
        }

        let Some(arena) = self.arena.as_mut() else {
            let err = TransferError::ProtocolViolation(format!(
                "chunk {} arrived before the first chunk",
                frame.chunk_index
            ));
            return Err(self.fail(err, callback));
        };

        if frame.total_chunks != arena.total_chunks {
            let err = TransferError::ProtocolViolation(format!(
                "total chunk count changed from {} to {}",
                arena.total_chunks, frame.total_chunks
            ));
            return Err(self.fail(err, callback));
        }

        let expected = arena.next_index();
        if frame.chunk_index != expected || frame.chunk_index >= arena.total_chunks {
            let err = TransferError::ProtocolViolation(format!(
                "expected chunk {} of {}, got {}",
                expected, arena.total_chunks, frame.chunk_index
            ));
            return Err(self.fail(err, callback));
        }

        let expects_last = frame.chunk_index + 1 == arena.total_chunks;
        if frame.is_last_chunk != expects_last {
            let err = TransferError::ProtocolViolation(format!(
                "last-chunk flag {} on chunk {} of {}",
                frame.is_last_chunk, frame.chunk_index, arena.total_chunks
            ));
            return Err(self.fail(err, callback));
        }

        let payload = match codec::decode(&frame.file_data) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(e.into(), callback)),
        };

        let received = arena.received_bytes + payload.len() as u64;
        if received > arena.metadata.size {
            let err = TransferError::SizeMismatch {
                declared: arena.metadata.size,
                actual: received,
            };
            return Err(self.fail(err, callback));
        }

        let len = payload.len();
        arena.received_bytes = received;
        arena.chunks.push(payload);
        debug!(
            "Received chunk {}/{} ({} bytes)",
            frame.chunk_index + 1,
            arena.total_chunks,
            len
        );

        if let Some(progress) = self.progress.advance(len) {
            callback.on_progress(&progress);
        }

        if expects_last {
            self.finish(callback)
        } else {
            Ok(self.status)
        }
    }

    fn start_transfer<C: ReceiveProgressCallback>(
        &mut self,
        frame: &ChunkFrame,
        callback: &C,
    ) -> Result<()> {
        if let Some(previous) = self.arena.take() {
            warn!(
                "New transfer started, discarding {} chunks of transfer {}",
                previous.chunks.len(),
                previous.id
            );
        }
        self.completed = None;

        if frame.total_chunks == 0 {
            return Err(self.fail(
                TransferError::ProtocolViolation("first chunk declares zero chunks".to_string()),
                callback,
            ));
        }

        let metadata = frame.metadata().unwrap_or_else(|| FileMetadata {
            name: String::new(),
            mime_type: crate::transfer::protocol::DEFAULT_MIME_TYPE.to_string(),
            size: 0,
        });
        let arena = TransferArena::new(metadata, frame.total_chunks);

        info!(
            "Receiving {} ({}, {} bytes, {} chunks), transfer {}",
            arena.metadata.name,
            arena.metadata.mime_type,
            arena.metadata.size,
            arena.total_chunks,
            arena.id
        );

        self.status = ReceiveStatus::Receiving;
        callback.on_status(self.status);
        callback.on_file_info(arena.id, &arena.metadata, arena.total_chunks);
        callback.on_progress(&self.progress.start(arena.total_chunks, arena.metadata.size));
        self.arena = Some(arena);
        Ok(())
    }

    fn finish<C: ReceiveProgressCallback>(&mut self, callback: &C) -> Result<ReceiveStatus> {
        let Some(arena) = self.arena.take() else {
            return Err(TransferError::InvalidState("no transfer in progress"));
        };

        match arena.assemble() {
            Ok(file) => {
                info!(
                    "Transfer {} completed: {} ({} bytes)",
                    file.transfer_id,
                    file.name,
                    file.len()
                );
                self.status = ReceiveStatus::Completed;
                callback.on_status(self.status);
                callback.on_complete(&file);
                self.completed = Some(file);
                Ok(self.status)
            }
            Err(e) => Err(self.fail(e, callback)),
        }
    }

    /// 通道关闭：完成之前的任何时刻都视为传输失败
    pub fn handle_close<C: ReceiveProgressCallback>(
        &mut self,
        reason: &CloseReason,
        callback: &C,
    ) -> Result<ReceiveStatus> {
        self.joined = false;

        if self.status == ReceiveStatus::Completed {
            debug!("Channel closed after completion: {:?}", reason);
            return Ok(self.status);
        }

        let err = match reason {
            CloseReason::RoomClosed => TransferError::RoomClosed,
            other => {
                let inner = other.to_error();
                TransferError::Connection(format!("transfer cannot complete: {}", inner))
            }
        };
        Err(self.fail(err, callback))
    }

    /// 进入 Error 状态并丢弃已接收的数据
    fn fail<C: ReceiveProgressCallback>(
        &mut self,
        err: TransferError,
        callback: &C,
    ) -> TransferError {
        if let Some(arena) = self.arena.take() {
            error!(
                "Transfer {} failed after {} chunks: {}",
                arena.id,
                arena.chunks.len(),
                err
            );
        } else {
            error!("Transfer failed: {}", err);
        }
        self.status = ReceiveStatus::Error;
        callback.on_status(self.status);
        callback.on_error(&err.to_string());
        err
    }
}

/// 接收会话：一条中继连接 + 一个接收状态机
pub struct ReceiveSession {
    channel: RoomChannel,
    receiver: FileReceiver,
}

impl ReceiveSession {
    /// 连接中继并加入房间
    pub async fn join<C: ReceiveProgressCallback>(
        config: &TransferConfig,
        room_id: RoomId,
        callback: &C,
    ) -> Result<Self> {
        let channel = match RoomChannel::connect_to(&config.relay_url).await {
            Ok(channel) => channel,
            Err(e) => {
                callback.on_error(&e.to_string());
                return Err(e);
            }
        };

        let mut session = Self {
            channel,
            receiver: FileReceiver::new(),
        };
        session.rejoin(room_id, callback).await?;
        Ok(session)
    }

    /// 在同一连接上 (重新) 加入房间，用于加入被拒绝后重试
    pub async fn rejoin<C: ReceiveProgressCallback>(
        &mut self,
        room_id: RoomId,
        callback: &C,
    ) -> Result<()> {
        if let Err(e) = self.channel.join_room(&room_id).await {
            callback.on_error(&e.to_string());
            return Err(e);
        }
        self.receiver.begin_join(room_id);
        callback.on_status(self.receiver.status());
        Ok(())
    }

    pub fn receiver(&self) -> &FileReceiver {
        &self.receiver
    }

    pub fn channel(&self) -> &RoomChannel {
        &self.channel
    }

    /// 等待下一个完整文件
    pub async fn next_file<C: ReceiveProgressCallback>(
        &mut self,
        callback: &C,
    ) -> Result<ReceivedFile> {
        loop {
            let event = match self.channel.recv().await {
                Some(event) => event,
                None => ChannelEvent::Closed(CloseReason::Remote),
            };

            if self.receiver.handle_event(event, callback)? == ReceiveStatus::Completed
                && let Some(file) = self.receiver.take_completed()
            {
                return Ok(file);
            }

            if !self.channel.is_open() {
                return Err(TransferError::ChannelClosed);
            }
        }
    }

    pub async fn close(mut self) {
        self.channel.close().await;
    }
}

/// 简化的接收回调实现
pub struct SimpleReceiveCallback {
    tx: mpsc::UnboundedSender<ReceiveEvent>,
}

#[derive(Debug, Clone)]
pub enum ReceiveEvent {
    Status(ReceiveStatus),
    FileInfo {
        transfer_id: Uuid,
        metadata: FileMetadata,
        total_chunks: u32,
    },
    Progress(TransferProgress),
    Complete {
        transfer_id: Uuid,
        name: String,
        size: usize,
    },
    Error(String),
}

impl SimpleReceiveCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReceiveProgressCallback for SimpleReceiveCallback {
    fn on_status(&self, status: ReceiveStatus) {
        let _ = self.tx.send(ReceiveEvent::Status(status));
    }

    fn on_file_info(&self, transfer_id: Uuid, metadata: &FileMetadata, total_chunks: u32) {
        let _ = self.tx.send(ReceiveEvent::FileInfo {
            transfer_id,
            metadata: metadata.clone(),
            total_chunks,
        });
    }

    fn on_progress(&self, progress: &TransferProgress) {
        let _ = self.tx.send(ReceiveEvent::Progress(*progress));
    }

    fn on_complete(&self, file: &ReceivedFile) {
        let _ = self.tx.send(ReceiveEvent::Complete {
            transfer_id: file.transfer_id,
            name: file.name.clone(),
            size: file.len(),
        });
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.send(ReceiveEvent::Error(error.to_string()));
    }
}
