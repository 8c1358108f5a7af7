//! WebSocket 中继服务器
//!
//! 路由：`/ws` 升级为中继连接，`/health` 与 `/hello` 返回运行状态。
//!
//! 每个连接一个读任务和一个写任务。写任务从无界通道取消息，
//! 这样房间内的其他连接可以直接向它投递，而不需要持有对方的 sink。

use crate::health::HealthStatus;
use crate::room::{Departure, ForwardOutcome, JoinOutcome, PeerId, RoomRegistry};
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use peerdrop_core::RelayMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub const ROOM_NOT_FOUND: &str = "Room not found";
pub const ROOM_FULL: &str = "Room is full";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// 单条消息上限，超出则断开该连接
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// 房间表与连接表共用一把锁
#[derive(Default)]
struct RelayState {
    rooms: RoomRegistry,
    peers: HashMap<PeerId, mpsc::UnboundedSender<Message>>,
    next_peer: PeerId,
}

impl RelayState {
    fn register(&mut self, tx: mpsc::UnboundedSender<Message>) -> PeerId {
        let peer = self.next_peer;
        self.next_peer += 1;
        self.peers.insert(peer, tx);
        peer
    }

    fn send_raw(&self, peer: PeerId, message: Message) {
        if let Some(tx) = self.peers.get(&peer)
            && tx.send(message).is_err()
        {
            debug!("Peer {} writer already gone", peer);
        }
    }

    fn send(&self, peer: PeerId, message: &RelayMessage) {
        match message.to_json() {
            Ok(json) => self.send_raw(peer, Message::Text(json)),
            Err(e) => error!("Failed to encode {} message: {}", message.kind(), e),
        }
    }
}

type SharedState = Arc<Mutex<RelayState>>;

/// 路由共享状态
#[derive(Clone)]
struct AppState {
    relay: SharedState,
    max_message_size: usize,
    started: Instant,
}

pub struct RelayServer {
    listener: TcpListener,
    state: AppState,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            state: AppState {
                relay: Arc::new(Mutex::new(RelayState::default())),
                max_message_size: config.max_message_size,
                started: Instant::now(),
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 当前房间数
    pub async fn room_count(&self) -> usize {
        self.state.relay.lock().await.rooms.len()
    }

    /// 提供服务直到监听出错
    pub async fn run(self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/hello", get(health_handler))
            .with_state(self.state);

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// 在后台运行，测试和嵌入场景使用
    pub fn spawn(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    let (rooms, connections) = {
        let relay = state.relay.lock().await;
        (relay.rooms.len(), relay.peers.len())
    };
    Json(HealthStatus::collect(rooms, connections, state.started.elapsed()).await)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, addr, state.relay))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: SharedState) {
    let (mut write, mut read) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let peer = state.lock().await.register(tx);
    debug!("Peer {} connected from {}", peer, addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(peer, &text, &state).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Peer {} ({}) read failed: {}", peer, addr, e);
                break;
            }
        }
    }

    disconnect(peer, &state).await;
    // 连接表中的发送端已移除，写任务会在排空后退出
    let _ = writer.await;
    debug!("Peer {} disconnected", peer);
}

async fn handle_text(peer: PeerId, text: &str, state: &SharedState) {
    let message = match RelayMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Peer {} sent malformed message: {}", peer, e);
            return;
        }
    };

    let mut state = state.lock().await;
    match message {
        RelayMessage::Create => {
            let room_id = state.rooms.create_room(peer);
            info!("Room {} created by peer {}", room_id, peer);
            state.send(peer, &RelayMessage::RoomCreated { room_id });
        }
        RelayMessage::Join { room_id } => match state.rooms.join(&room_id, peer) {
            JoinOutcome::Joined { host, participants } => {
                info!("Peer {} joined room {}", peer, room_id);
                state.send(host, &RelayMessage::ParticipantsCount { participants });
            }
            JoinOutcome::NotFound => {
                debug!("Peer {} asked for unknown room {}", peer, room_id);
                state.send(
                    peer,
                    &RelayMessage::Error {
                        message: ROOM_NOT_FOUND.to_string(),
                    },
                );
            }
            JoinOutcome::Full => {
                debug!("Peer {} rejected from full room {}", peer, room_id);
                state.send(
                    peer,
                    &RelayMessage::Error {
                        message: ROOM_FULL.to_string(),
                    },
                );
            }
        },
        RelayMessage::FileChunk(frame) => match state.rooms.forward_target(&frame.room_id, peer) {
            // 原文转发，不重新序列化
            ForwardOutcome::Deliver(guest) => state.send_raw(guest, Message::Text(text.to_string())),
            ForwardOutcome::NoGuest => {
                debug!("Dropping chunk {} for empty room {}", frame.chunk_index, frame.room_id);
            }
            ForwardOutcome::Rejected => {
                warn!("Peer {} is not host of room {}", peer, frame.room_id);
            }
        },
        other => debug!("Ignoring {} message from peer {}", other.kind(), peer),
    }
}

async fn disconnect(peer: PeerId, state: &SharedState) {
    let mut state = state.lock().await;
    state.peers.remove(&peer);

    for departure in state.rooms.disconnect(peer) {
        match departure {
            Departure::HostLeft { room_id, guest } => {
                info!("Room {} closed", room_id);
                if let Some(guest) = guest {
                    state.send(guest, &RelayMessage::RoomClosed);
                    state.send_raw(guest, Message::Close(None));
                }
            }
            Departure::GuestLeft {
                room_id,
                host,
                participants,
            } => {
                info!("Guest left room {}", room_id);
                state.send(host, &RelayMessage::ParticipantsCount { participants });
            }
        }
    }
}
