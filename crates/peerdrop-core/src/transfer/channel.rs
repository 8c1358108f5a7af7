//! 房间通道客户端
//!
//! 独占一条到中继服务器的 WebSocket 连接，状态流转:
//! `Idle → Connecting → Open → Closed`。
//!
//! 读半边在后台任务中运行，把解析好的消息按到达顺序放进队列；
//! 上层通过 [`RoomChannel::recv`] 逐条取出。连接状态只由本结构体修改。

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{Result, TransferError};
use crate::transfer::protocol::{RelayMessage, RoomId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// 入站消息观察者
pub type MessageHandler = Box<dyn FnMut(&RelayMessage) + Send>;
/// 关闭观察者
pub type CloseHandler = Box<dyn FnMut(&CloseReason) + Send>;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// 本端在房间中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 创建房间的一方 (发送端)
    Host,
    /// 加入房间的一方 (接收端)
    Guest,
}

/// 通道关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 本地主动关闭
    Local,
    /// 服务器正常关闭连接
    Remote,
    /// 房主断开，服务器发来 `room_closed`
    RoomClosed,
    /// 传输层错误
    Error(String),
}

impl CloseReason {
    /// 对应的错误
    pub fn to_error(&self) -> TransferError {
        match self {
            CloseReason::RoomClosed => TransferError::RoomClosed,
            CloseReason::Error(e) => TransferError::Connection(e.clone()),
            CloseReason::Local | CloseReason::Remote => TransferError::ChannelClosed,
        }
    }
}

/// 通道事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(RelayMessage),
    /// 收到无法解析的文本帧
    Invalid(String),
    /// 终止事件，之后不会再有任何事件
    Closed(CloseReason),
}

/// 出站消息接口
///
/// 发送引擎只依赖这一点能力，便于在测试中替换为内存实现。
#[async_trait]
pub trait MessageSink: Send {
    async fn send_message(&mut self, message: RelayMessage) -> Result<()>;
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for &mut T {
    async fn send_message(&mut self, message: RelayMessage) -> Result<()> {
        (**self).send_message(message).await
    }
}

/// 房间通道客户端
pub struct RoomChannel {
    url: String,
    state: ChannelState,
    role: Option<Role>,
    room_id: Option<RoomId>,
    sink: Option<WsSink>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    reader: Option<JoinHandle<()>>,
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
}

impl RoomChannel {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: ChannelState::Idle,
            role: None,
            room_id: None,
            sink: None,
            events: None,
            reader: None,
            on_message: None,
            on_close: None,
        }
    }

    /// 创建并立即连接
    pub async fn connect_to(url: &str) -> Result<Self> {
        let mut channel = Self::new(url);
        channel.connect().await?;
        Ok(channel)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// 注册入站消息观察者，替换之前注册的
    pub fn on_message(&mut self, handler: impl FnMut(&RelayMessage) + Send + 'static) {
        self.on_message = Some(Box::new(handler));
    }

    /// 注册关闭观察者，替换之前注册的
    pub fn on_close(&mut self, handler: impl FnMut(&CloseReason) + Send + 'static) {
        self.on_close = Some(Box::new(handler));
    }

    /// 建立连接
    ///
    /// 只能从 `Idle` 或 `Closed` 发起；传输层报错时进入 `Closed` 并返回
    /// [`TransferError::Connection`]，不会自动重试。
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Idle | ChannelState::Closed => {}
            ChannelState::Connecting => {
                return Err(TransferError::InvalidState("connect already in progress"));
            }
            ChannelState::Open => return Err(TransferError::InvalidState("already connected")),
        }

        self.state = ChannelState::Connecting;
        self.role = None;
        self.room_id = None;
        info!("Connecting to relay: {}", self.url);

        let ws_stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                self.state = ChannelState::Closed;
                warn!("Failed to connect to relay {}: {}", self.url, e);
                return Err(TransferError::Connection(e.to_string()));
            }
        };

        let (sink, stream) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        self.sink = Some(sink);
        self.events = Some(rx);
        self.reader = Some(tokio::spawn(read_loop(stream, tx)));
        self.state = ChannelState::Open;

        info!("Connected to relay");
        Ok(())
    }

    /// 请求创建房间，等待服务器分配房间号
    pub async fn create_room(&mut self) -> Result<RoomId> {
        self.ensure_open()?;
        self.send(&RelayMessage::Create).await?;

        loop {
            match self.recv().await {
                Some(ChannelEvent::Message(RelayMessage::RoomCreated { room_id })) => {
                    let room_id = RoomId::parse(&room_id)?;
                    info!("Room created: {}", room_id);
                    self.role = Some(Role::Host);
                    self.room_id = Some(room_id.clone());
                    return Ok(room_id);
                }
                Some(ChannelEvent::Message(RelayMessage::Error { message })) => {
                    return Err(TransferError::Relay(message));
                }
                Some(ChannelEvent::Message(other)) => {
                    debug!("Ignoring {} while waiting for room_created", other.kind());
                }
                Some(ChannelEvent::Invalid(text)) => {
                    warn!("Invalid relay message while creating room: {}", text);
                }
                Some(ChannelEvent::Closed(reason)) => return Err(reason.to_error()),
                None => return Err(TransferError::ChannelClosed),
            }
        }
    }

    /// 请求加入房间
    ///
    /// 加入成功时服务器不回复；失败时稍后会收到 `error` 消息，
    /// 由接收端引擎回滚加入状态。
    pub async fn join_room(&mut self, room_id: &RoomId) -> Result<()> {
        self.ensure_open()?;
        self.send(&RelayMessage::Join {
            room_id: room_id.to_string(),
        })
        .await?;

        info!("Join requested for room {}", room_id);
        self.role = Some(Role::Guest);
        self.room_id = Some(room_id.clone());
        Ok(())
    }

    /// 发送一条消息，不等待确认
    ///
    /// 写入失败时关闭通道并返回 [`TransferError::Connection`]。
    pub async fn send(&mut self, message: &RelayMessage) -> Result<()> {
        self.ensure_open()?;
        let text = message.to_json()?;

        let Some(sink) = self.sink.as_mut() else {
            return Err(TransferError::ChannelClosed);
        };

        let result = sink.send(Message::Text(text)).await;
        if let Err(e) = result {
            warn!("Send failed, closing channel: {}", e);
            self.shutdown(CloseReason::Error(e.to_string())).await;
            return Err(TransferError::Connection(e.to_string()));
        }

        Ok(())
    }

    /// 取下一条事件
    ///
    /// 收到 `room_closed` 时关闭通道并返回 `Closed(RoomClosed)`。
    /// 通道关闭后返回 `None`。
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        let events = self.events.as_mut()?;

        let event = match events.recv().await {
            Some(event) => event,
            None => ChannelEvent::Closed(CloseReason::Remote),
        };

        match event {
            ChannelEvent::Message(RelayMessage::RoomClosed) => {
                self.notify_message(&RelayMessage::RoomClosed);
                info!("Relay reported room closed");
                self.shutdown(CloseReason::RoomClosed).await;
                Some(ChannelEvent::Closed(CloseReason::RoomClosed))
            }
            ChannelEvent::Message(message) => {
                debug!("Relay message: {}", message.kind());
                self.notify_message(&message);
                Some(ChannelEvent::Message(message))
            }
            ChannelEvent::Closed(reason) => {
                self.shutdown(reason.clone()).await;
                Some(ChannelEvent::Closed(reason))
            }
            invalid @ ChannelEvent::Invalid(_) => Some(invalid),
        }
    }

    /// 关闭通道，重复调用无效果
    pub async fn close(&mut self) {
        self.shutdown(CloseReason::Local).await;
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(TransferError::ChannelClosed),
            ChannelState::Idle | ChannelState::Connecting => {
                Err(TransferError::InvalidState("channel is not open"))
            }
        }
    }

    fn notify_message(&mut self, message: &RelayMessage) {
        if let Some(handler) = self.on_message.as_mut() {
            handler(message);
        }
    }

    /// 释放连接资源，只执行一次
    async fn shutdown(&mut self, reason: CloseReason) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;

        if let Some(mut sink) = self.sink.take() {
            if reason == CloseReason::Local {
                let _ = sink.send(Message::Close(None)).await;
            }
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;

        debug!("Channel closed: {:?}", reason);
        if let Some(handler) = self.on_close.as_mut() {
            handler(&reason);
        }
    }
}

impl Drop for RoomChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl MessageSink for RoomChannel {
    async fn send_message(&mut self, message: RelayMessage) -> Result<()> {
        self.send(&message).await
    }
}

/// 读半边循环：按到达顺序转发，遇到关闭或错误时发出终止事件后退出
async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                let _ = tx.send(ChannelEvent::Closed(CloseReason::Remote));
                return;
            }
            Err(e) => {
                let _ = tx.send(ChannelEvent::Closed(CloseReason::Error(e.to_string())));
                return;
            }
            _ => continue,
        };

        let event = match RelayMessage::parse(&text) {
            Ok(message) => ChannelEvent::Message(message),
            Err(e) => {
                warn!("Invalid relay message ({}): {}", e, text);
                ChannelEvent::Invalid(text)
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }

    let _ = tx.send(ChannelEvent::Closed(CloseReason::Remote));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_open_channel() {
        let mut channel = RoomChannel::new("ws://127.0.0.1:9/ws");
        assert_eq!(channel.state(), ChannelState::Idle);

        assert!(matches!(
            channel.send(&RelayMessage::Create).await,
            Err(TransferError::InvalidState(_))
        ));
        assert!(matches!(
            channel.create_room().await,
            Err(TransferError::InvalidState(_))
        ));
        let room = RoomId::parse("123456").unwrap();
        assert!(matches!(
            channel.join_room(&room).await,
            Err(TransferError::InvalidState(_))
        ));
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_closes_channel() {
        // 端口 9 (discard) 在测试环境中不会有 WebSocket 服务
        let mut channel = RoomChannel::new("ws://127.0.0.1:9/ws");
        let result = channel.connect().await;

        assert!(matches!(result, Err(TransferError::Connection(_))));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.send(&RelayMessage::Create).await,
            Err(TransferError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut channel = RoomChannel::new("ws://127.0.0.1:9/ws");
        let closes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = closes.clone();
        channel.on_close(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        channel.close().await;
        channel.close().await;

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_reports_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let mut channel = RoomChannel::connect_to(&format!("ws://{}/ws", addr))
            .await
            .unwrap();
        server.await.unwrap();

        let mut failure = None;
        for _ in 0..200 {
            if let Err(e) = channel.send(&RelayMessage::Create).await {
                failure = Some(e);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(matches!(failure, Some(TransferError::Connection(_))));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.send(&RelayMessage::Create).await,
            Err(TransferError::ChannelClosed)
        ));
    }
}
