//! 房间注册表
//!
//! 纯内存结构，不做任何 I/O。每个房间一个房主，最多一个访客。

use rand::Rng;
use std::collections::HashMap;

/// 连接编号
pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub host: PeerId,
    pub guest: Option<PeerId>,
}

impl Room {
    pub fn participants(&self) -> u32 {
        u32::from(self.guest.is_some())
    }
}

/// 加入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { host: PeerId, participants: u32 },
    NotFound,
    Full,
}

/// 块转发目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Deliver(PeerId),
    /// 房间里还没有访客
    NoGuest,
    /// 发送者不是该房间的房主，或房间不存在
    Rejected,
}

/// 连接断开后需要通知的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    HostLeft {
        room_id: String,
        guest: Option<PeerId>,
    },
    GuestLeft {
        room_id: String,
        host: PeerId,
        participants: u32,
    },
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// 创建房间，返回 6 位数字房间号
    pub fn create_room(&mut self, host: PeerId) -> String {
        let mut rng = rand::thread_rng();
        let room_id = loop {
            let candidate = format!("{:06}", rng.gen_range(0..1_000_000u32));
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        self.rooms.insert(
            room_id.clone(),
            Room {
                id: room_id.clone(),
                host,
                guest: None,
            },
        );
        room_id
    }

    pub fn join(&mut self, room_id: &str, guest: PeerId) -> JoinOutcome {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return JoinOutcome::NotFound;
        };

        match room.guest {
            Some(existing) if existing != guest => JoinOutcome::Full,
            _ if room.host == guest => JoinOutcome::Full,
            _ => {
                room.guest = Some(guest);
                JoinOutcome::Joined {
                    host: room.host,
                    participants: room.participants(),
                }
            }
        }
    }

    /// 只有房主发出的块才会转发给访客
    pub fn forward_target(&self, room_id: &str, from: PeerId) -> ForwardOutcome {
        match self.rooms.get(room_id) {
            Some(room) if room.host == from => match room.guest {
                Some(guest) => ForwardOutcome::Deliver(guest),
                None => ForwardOutcome::NoGuest,
            },
            _ => ForwardOutcome::Rejected,
        }
    }

    /// 移除一个连接：房主离开则关闭房间，访客离开则腾出位置
    pub fn disconnect(&mut self, peer: PeerId) -> Vec<Departure> {
        let mut departures = Vec::new();

        let hosted: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.host == peer)
            .map(|room| room.id.clone())
            .collect();
        for room_id in hosted {
            if let Some(room) = self.rooms.remove(&room_id) {
                departures.push(Departure::HostLeft {
                    room_id,
                    guest: room.guest,
                });
            }
        }

        for room in self.rooms.values_mut() {
            if room.guest == Some(peer) {
                room.guest = None;
                departures.push(Departure::GuestLeft {
                    room_id: room.id.clone(),
                    host: room.host,
                    participants: room.participants(),
                });
            }
        }

        departures
    }
}
