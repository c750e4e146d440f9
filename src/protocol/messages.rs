//! 클라이언트-서버 실시간 메시지 프로토콜 정의

use serde::{Deserialize, Serialize};

/// 대화방 식별자 (1:1 대화는 상대 사용자 ID, 그룹은 그룹 ID)
pub type RoomId = String;

/// 사용자 식별자
pub type UserId = String;

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    // Room Management
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },

    // Typing
    #[serde(rename_all = "camelCase")]
    Typing { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    StopTyping { room_id: RoomId },

    // Messaging
    SendMessage(OutgoingMessage),
}

impl ClientMessage {
    /// 메시지가 대상으로 하는 방 (있는 경우)
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::Typing { room_id }
            | Self::StopTyping { room_id } => Some(room_id),
            Self::SendMessage(message) => Some(message.target.room_id()),
        }
    }
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    // Connection
    #[serde(rename_all = "camelCase")]
    Connected { socket_id: String },
    Error { code: String, message: String },

    // Typing Events
    Typing(TypingNotice),
    StopTyping(TypingNotice),

    // Presence
    OnlineUsers { users: Vec<OnlineUser> },
}

/// 타이핑 이벤트 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub sender_socket_id: String,
    pub user_id: UserId,
}

/// 온라인 사용자 명단 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub socket_id: String,
}

/// 실시간 채널로 보내는 메시지 본문
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub target: MessageTarget,
}

/// 메시지 수신 대상
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageTarget {
    #[serde(rename_all = "camelCase")]
    Direct { receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    Group { group_id: String },
}

impl MessageTarget {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Direct { receiver_id } => receiver_id,
            Self::Group { group_id } => group_id,
        }
    }
}
