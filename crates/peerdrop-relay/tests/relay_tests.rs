//! 集成测试 - 真实 WebSocket 连接上的中继行为

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use peerdrop_core::{
    ChannelEvent, CloseReason, ReceiveSession, RelayMessage, RoomChannel, RoomId, SendSession,
    SimpleReceiveCallback, SimpleSendCallback, TransferConfig, TransferError,
};
use peerdrop_relay::{HealthStatus, RelayConfig, RelayServer};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

async fn spawn_relay(max_message_size: usize) -> SocketAddr {
    let server = RelayServer::bind(RelayConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        max_message_size,
    })
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn();
    addr
}

async fn start_relay_with(max_message_size: usize) -> String {
    format!("ws://{}/ws", spawn_relay(max_message_size).await)
}

async fn start_relay() -> String {
    start_relay_with(RelayConfig::default().max_message_size).await
}

fn temp_file(name: &str, content: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("peerdrop-relay-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

async fn next_message(channel: &mut RoomChannel) -> RelayMessage {
    match timeout(WAIT, channel.recv()).await.unwrap() {
        Some(ChannelEvent::Message(message)) => message,
        other => panic!("expected message, got {:?}", other),
    }
}

async fn next_text<S>(stream: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match timeout(WAIT, stream.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_create_room_assigns_numeric_id() {
    let url = start_relay().await;
    let mut host = RoomChannel::connect_to(&url).await.unwrap();

    let room_id = timeout(WAIT, host.create_room()).await.unwrap().unwrap();
    assert_eq!(room_id.as_str().len(), 6);
    assert!(room_id.as_str().chars().all(|c| c.is_ascii_digit()));

    let mut other = RoomChannel::connect_to(&url).await.unwrap();
    let second = timeout(WAIT, other.create_room()).await.unwrap().unwrap();
    assert_ne!(room_id, second);
}

#[tokio::test]
async fn test_end_to_end_transfer() {
    let url = start_relay().await;
    let content: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let path = temp_file("payload.bin", &content);

    let config = TransferConfig {
        relay_url: url,
        chunk_size: 65_536,
    };

    let (send_cb, _send_events) = SimpleSendCallback::new();
    let mut host = SendSession::open(&config, &send_cb).await.unwrap();
    let room_id = host.room_id().clone();

    let receive_config = config.clone();
    let receiver = tokio::spawn(async move {
        let (cb, _events) = SimpleReceiveCallback::new();
        let mut session = ReceiveSession::join(&receive_config, room_id, &cb).await?;
        session.next_file(&cb).await
    });

    let participants = timeout(WAIT, host.wait_for_guest(&send_cb))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participants, 1);

    let summary = host.send_file(&path, &send_cb).await.unwrap();
    assert_eq!(summary.chunks, 4);
    assert_eq!(summary.bytes, 200_000);

    let file = timeout(WAIT, receiver).await.unwrap().unwrap().unwrap();
    assert_eq!(file.name, "payload.bin");
    assert_eq!(file.data, content);

    host.close().await;
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_join_unknown_room_then_retry() {
    let url = start_relay().await;
    let config = TransferConfig {
        relay_url: url.clone(),
        chunk_size: 1024,
    };

    let (cb, _events) = SimpleReceiveCallback::new();
    // 中继只分配数字房间号
    let missing = RoomId::parse("ZZZZZZ").unwrap();
    let mut session = ReceiveSession::join(&config, missing, &cb).await.unwrap();

    let err = timeout(WAIT, session.next_file(&cb)).await.unwrap().unwrap_err();
    match err {
        TransferError::JoinRejected(message) => assert_eq!(message, "Room not found"),
        other => panic!("expected JoinRejected, got {:?}", other),
    }
    assert!(!session.receiver().is_joined());

    // 同一连接上重试加入真实房间
    let path = temp_file("retry.txt", b"second attempt");
    let (send_cb, _send_events) = SimpleSendCallback::new();
    let mut host = SendSession::open(&config, &send_cb).await.unwrap();

    session.rejoin(host.room_id().clone(), &cb).await.unwrap();
    timeout(WAIT, host.wait_for_guest(&send_cb))
        .await
        .unwrap()
        .unwrap();
    host.send_file(&path, &send_cb).await.unwrap();

    let file = timeout(WAIT, session.next_file(&cb)).await.unwrap().unwrap();
    assert_eq!(file.data, b"second attempt");
    assert_eq!(file.mime_type, "text/plain");

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_room_is_full() {
    let url = start_relay().await;
    let mut host = RoomChannel::connect_to(&url).await.unwrap();
    let room_id = host.create_room().await.unwrap();

    let mut first = RoomChannel::connect_to(&url).await.unwrap();
    first.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut host).await,
        RelayMessage::ParticipantsCount { participants: 1 }
    );

    let mut second = RoomChannel::connect_to(&url).await.unwrap();
    second.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut second).await,
        RelayMessage::Error {
            message: "Room is full".to_string()
        }
    );
}

#[tokio::test]
async fn test_guest_leaving_updates_host() {
    let url = start_relay().await;
    let mut host = RoomChannel::connect_to(&url).await.unwrap();
    let room_id = host.create_room().await.unwrap();

    let mut guest = RoomChannel::connect_to(&url).await.unwrap();
    guest.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut host).await,
        RelayMessage::ParticipantsCount { participants: 1 }
    );

    guest.close().await;
    assert_eq!(
        next_message(&mut host).await,
        RelayMessage::ParticipantsCount { participants: 0 }
    );
}

#[tokio::test]
async fn test_host_leaving_closes_room() {
    let url = start_relay().await;
    let config = TransferConfig {
        relay_url: url.clone(),
        chunk_size: 1024,
    };

    let (send_cb, _send_events) = SimpleSendCallback::new();
    let mut host = SendSession::open(&config, &send_cb).await.unwrap();
    let room_id = host.room_id().clone();

    let (cb, _events) = SimpleReceiveCallback::new();
    let mut session = ReceiveSession::join(&config, room_id.clone(), &cb)
        .await
        .unwrap();
    timeout(WAIT, host.wait_for_guest(&send_cb))
        .await
        .unwrap()
        .unwrap();

    host.close().await;

    let err = timeout(WAIT, session.next_file(&cb)).await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::RoomClosed));

    // 房间已被移除
    let mut late = RoomChannel::connect_to(&url).await.unwrap();
    late.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut late).await,
        RelayMessage::Error {
            message: "Room not found".to_string()
        }
    );
}

#[tokio::test]
async fn test_chunks_forwarded_verbatim() {
    let url = start_relay().await;

    let (host_ws, _) = connect_async(url.as_str()).await.unwrap();
    let (mut host_tx, mut host_rx) = host_ws.split();
    host_tx
        .send(Message::Text(r#"{"type":"create"}"#.to_string()))
        .await
        .unwrap();
    let room_id = match RelayMessage::parse(&next_text(&mut host_rx).await).unwrap() {
        RelayMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };

    let (guest_ws, _) = connect_async(url.as_str()).await.unwrap();
    let (mut guest_tx, mut guest_rx) = guest_ws.split();
    guest_tx
        .send(Message::Text(format!(
            r#"{{"type":"join","roomId":"{}"}}"#,
            room_id
        )))
        .await
        .unwrap();
    let count = RelayMessage::parse(&next_text(&mut host_rx).await).unwrap();
    assert_eq!(count, RelayMessage::ParticipantsCount { participants: 1 });

    // 省略了零值字段，且带有未知字段
    let frame = format!(
        r#"{{"type":"file_chunk","roomId":"{}","fileData":"aGk","totalChunks":1,"isLastChunk":true,"fileName":"hi.txt","fileType":"text/plain","fileSize":2,"extra":"kept"}}"#,
        room_id
    );
    host_tx.send(Message::Text(frame.clone())).await.unwrap();

    assert_eq!(next_text(&mut guest_rx).await, frame);
}

#[tokio::test]
async fn test_guest_chunks_are_not_forwarded() {
    let url = start_relay().await;
    let mut host = RoomChannel::connect_to(&url).await.unwrap();
    let room_id = host.create_room().await.unwrap();

    let mut guest = RoomChannel::connect_to(&url).await.unwrap();
    guest.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut host).await,
        RelayMessage::ParticipantsCount { participants: 1 }
    );

    let frame = peerdrop_core::ChunkFrame::new(&room_id, String::new(), 0, 1, None);
    guest.send(&RelayMessage::FileChunk(frame)).await.unwrap();
    guest.close().await;

    // 主机只会看到访客离开，而不是块
    assert_eq!(
        next_message(&mut host).await,
        RelayMessage::ParticipantsCount { participants: 0 }
    );
}

#[tokio::test]
async fn test_oversized_message_drops_connection() {
    let url = start_relay_with(1024).await;
    let mut host = RoomChannel::connect_to(&url).await.unwrap();
    let room_id = host.create_room().await.unwrap();

    let frame = peerdrop_core::ChunkFrame::new(&room_id, "A".repeat(4096), 0, 1, None);
    // 发送本身可能成功，服务器读取时才会拒绝
    let _ = host.send(&RelayMessage::FileChunk(frame)).await;

    match timeout(WAIT, host.recv()).await.unwrap() {
        Some(ChannelEvent::Closed(reason)) => assert_ne!(reason, CloseReason::Local),
        None => {}
        other => panic!("expected closed channel, got {:?}", other),
    }

    let mut late = RoomChannel::connect_to(&url).await.unwrap();
    late.join_room(&room_id).await.unwrap();
    assert_eq!(
        next_message(&mut late).await,
        RelayMessage::Error {
            message: "Room not found".to_string()
        }
    );
}

#[tokio::test]
async fn test_health_reports_rooms_and_connections() {
    let addr = spawn_relay(RelayConfig::default().max_message_size).await;

    let idle: HealthStatus = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(idle.status, "ok");
    assert_eq!(idle.rooms, 0);
    assert_eq!(idle.connections, 0);
    assert!(!idle.message.is_empty());

    let mut host = RoomChannel::connect_to(&format!("ws://{}/ws", addr))
        .await
        .unwrap();
    timeout(WAIT, host.create_room()).await.unwrap().unwrap();

    let response = reqwest::get(format!("http://{}/hello", addr)).await.unwrap();
    assert!(response.status().is_success());
    let busy: HealthStatus = response.json().await.unwrap();
    assert_eq!(busy.rooms, 1);
    assert_eq!(busy.connections, 1);
}

#[tokio::test]
async fn test_websocket_only_on_ws_path() {
    let addr = spawn_relay(RelayConfig::default().max_message_size).await;

    assert!(connect_async(format!("ws://{}/other", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/ws", addr)).await.is_ok());
}
