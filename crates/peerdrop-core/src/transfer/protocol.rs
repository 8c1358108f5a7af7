//! 中继协议消息格式
//!
//! 每条消息是一个 JSON 对象，`type` 字段区分种类:
//!
//! | type | 方向 |
//! |---|---|
//! | `create` / `join` | 客户端 → 服务器 |
//! | `room_created` / `error` / `participants_count` / `room_closed` | 服务器 → 客户端 |
//! | `file_chunk` | 客户端 → 服务器 → 对端 (原样转发) |
//!
//! 原版中继序列化时会省略零值字段 (`chunkIndex: 0`、`isLastChunk: false`、
//! 空的 `fileData` 等)，所以这些字段在解析时都有默认值。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransferError;

/// 房间号长度
pub const ROOM_ID_LEN: usize = 6;

/// 默认的 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 房间号 (服务器分配，6 位字母数字)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// 解析用户输入或服务器下发的房间号
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let trimmed = raw.trim();
        if trimmed.len() == ROOM_ID_LEN && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(TransferError::InvalidRoomId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoomId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 文件元数据，只出现在第一个块中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// 一个文件块帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrame {
    pub room_id: String,
    /// 编码后的块数据
    #[serde(default)]
    pub file_data: String,
    #[serde(default)]
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(default)]
    pub is_last_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_first_chunk: bool,
}

impl ChunkFrame {
    /// 构造第 `index` 个块；`metadata` 只应在 `index == 0` 时给出
    pub fn new(
        room_id: &RoomId,
        file_data: String,
        index: u32,
        total_chunks: u32,
        metadata: Option<&FileMetadata>,
    ) -> Self {
        let mut frame = Self {
            room_id: room_id.to_string(),
            file_data,
            chunk_index: index,
            total_chunks,
            is_last_chunk: index + 1 == total_chunks,
            file_name: None,
            file_type: None,
            file_size: None,
            is_first_chunk: false,
        };

        if let Some(meta) = metadata {
            frame.file_name = Some(meta.name.clone());
            frame.file_type = Some(meta.mime_type.clone());
            frame.file_size = Some(meta.size);
            frame.is_first_chunk = true;
        }

        frame
    }

    /// 是否为一次传输的第一个块
    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    /// 取出元数据 (只有第一个块才有)
    ///
    /// 空文件的 `fileSize` 会被原版中继省略，此时按 0 处理。
    pub fn metadata(&self) -> Option<FileMetadata> {
        if !self.is_first() {
            return None;
        }

        Some(FileMetadata {
            name: self.file_name.clone().unwrap_or_default(),
            mime_type: self
                .file_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size: self.file_size.unwrap_or(0),
        })
    }
}

/// 中继消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// 请求创建房间
    Create,

    /// 房间已创建
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: String },

    /// 请求加入房间
    #[serde(rename_all = "camelCase")]
    Join { room_id: String },

    /// 服务器错误 (旧版中继把错误文本放在 `fileData` 中)
    Error {
        #[serde(alias = "fileData", default)]
        message: String,
    },

    /// 房间内访客数量 (只推送给房主)
    ParticipantsCount {
        #[serde(alias = "Participants", default)]
        participants: u32,
    },

    /// 文件块
    FileChunk(ChunkFrame),

    /// 房主已断开
    RoomClosed,

    /// 无法识别的消息类型
    #[serde(other)]
    Unknown,
}

impl RelayMessage {
    /// 解析一条文本消息
    pub fn parse(text: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(text)?)
    }

    /// 序列化为 JSON 文本
    pub fn to_json(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 消息类型名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Create => "create",
            RelayMessage::RoomCreated { .. } => "room_created",
            RelayMessage::Join { .. } => "join",
            RelayMessage::Error { .. } => "error",
            RelayMessage::ParticipantsCount { .. } => "participants_count",
            RelayMessage::FileChunk(_) => "file_chunk",
            RelayMessage::RoomClosed => "room_closed",
            RelayMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::parse("123456").unwrap()
    }

    #[test]
    fn test_room_id_parse() {
        assert_eq!(RoomId::parse(" 04a9Zz ").unwrap().as_str(), "04a9Zz");
        assert!(RoomId::parse("12345").is_err());
        assert!(RoomId::parse("1234567").is_err());
        assert!(RoomId::parse("12-456").is_err());
        assert!(RoomId::parse("").is_err());
    }

    #[test]
    fn test_control_messages_serialize() {
        assert_eq!(
            RelayMessage::Create.to_json().unwrap(),
            r#"{"type":"create"}"#
        );
        assert_eq!(
            RelayMessage::Join {
                room_id: "654321".into()
            }
            .to_json()
            .unwrap(),
            r#"{"type":"join","roomId":"654321"}"#
        );
    }

    #[test]
    fn test_parse_server_messages() {
        let msg = RelayMessage::parse(r#"{"type":"room_created","roomId":"042137"}"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::RoomCreated {
                room_id: "042137".into()
            }
        );

        let msg = RelayMessage::parse(r#"{"type":"room_closed"}"#).unwrap();
        assert_eq!(msg, RelayMessage::RoomClosed);
    }

    #[test]
    fn test_parse_error_variants() {
        let msg = RelayMessage::parse(r#"{"type":"error","message":"Room not found"}"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Error {
                message: "Room not found".into()
            }
        );

        // 旧版中继把错误文本放在 fileData
        let msg = RelayMessage::parse(r#"{"type":"error","fileData":"Room not found"}"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Error {
                message: "Room not found".into()
            }
        );
    }

    #[test]
    fn test_parse_participants_both_spellings() {
        for json in [
            r#"{"type":"participants_count","participants":2}"#,
            r#"{"type":"participants_count","Participants":2}"#,
        ] {
            assert_eq!(
                RelayMessage::parse(json).unwrap(),
                RelayMessage::ParticipantsCount { participants: 2 }
            );
        }
        // 0 被省略
        assert_eq!(
            RelayMessage::parse(r#"{"type":"participants_count"}"#).unwrap(),
            RelayMessage::ParticipantsCount { participants: 0 }
        );
    }

    #[test]
    fn test_unknown_type() {
        let msg = RelayMessage::parse(r#"{"type":"file_info","fileName":"a"}"#).unwrap();
        assert_eq!(msg, RelayMessage::Unknown);
    }

    #[test]
    fn test_first_chunk_wire_format() {
        let meta = FileMetadata {
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size: 5,
        };
        let frame = ChunkFrame::new(&room(), "aGVsbG8".into(), 0, 1, Some(&meta));
        let json = RelayMessage::FileChunk(frame).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "file_chunk");
        assert_eq!(value["roomId"], "123456");
        assert_eq!(value["fileData"], "aGVsbG8");
        assert_eq!(value["chunkIndex"], 0);
        assert_eq!(value["totalChunks"], 1);
        assert_eq!(value["isLastChunk"], true);
        assert_eq!(value["isFirstChunk"], true);
        assert_eq!(value["fileName"], "a.txt");
        assert_eq!(value["fileType"], "text/plain");
        assert_eq!(value["fileSize"], 5);
    }

    #[test]
    fn test_middle_chunk_has_no_metadata() {
        let frame = ChunkFrame::new(&room(), "AA".into(), 1, 3, None);
        let json = RelayMessage::FileChunk(frame.clone()).to_json().unwrap();

        assert!(!json.contains("fileName"));
        assert!(!json.contains("isFirstChunk"));
        assert!(json.contains("\"isLastChunk\":false"));
        assert!(frame.metadata().is_none());
    }

    #[test]
    fn test_parse_chunk_with_omitted_zero_fields() {
        // 原版中继会省略 chunkIndex=0、空 fileData、fileSize=0
        let json = r#"{"type":"file_chunk","roomId":"123456","totalChunks":1,
            "isLastChunk":true,"fileName":"empty","isFirstChunk":true}"#;
        let RelayMessage::FileChunk(frame) = RelayMessage::parse(json).unwrap() else {
            panic!("expected file_chunk");
        };

        assert_eq!(frame.chunk_index, 0);
        assert!(frame.file_data.is_empty());
        let meta = frame.metadata().unwrap();
        assert_eq!(meta.name, "empty");
        assert_eq!(meta.size, 0);
        assert_eq!(meta.mime_type, DEFAULT_MIME_TYPE);
    }
}
