//! PeerDrop Relay
//!
//! 房间制 WebSocket 中继：房主创建房间，访客凭房间号加入，
//! 房主发出的文件块原样转发给访客。

pub mod health;
pub mod room;
pub mod server;

pub use health::HealthStatus;
pub use room::{Departure, ForwardOutcome, JoinOutcome, PeerId, Room, RoomRegistry};
pub use server::{DEFAULT_LISTEN_ADDR, DEFAULT_MAX_MESSAGE_SIZE, RelayConfig, RelayServer};
