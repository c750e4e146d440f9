//! 방 참여 관리

use crate::protocol::{ClientMessage, RoomId};

/// 참여 중인 방을 항상 활성 방 하나와 일치시킨다
///
/// `joined` 는 현재 연결에서 실제로 joinRoom 을 보낸 방이다. 연결이 없으면
/// 활성 방만 기록해 두고 연결이 생길 때 참여한다.
#[derive(Debug, Default)]
pub struct MembershipTracker {
    active: Option<RoomId>,
    joined: Option<RoomId>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn joined(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    /// 활성 방 변경 처리
    pub fn set_active_room(&mut self, room_id: Option<&str>, connected: bool) -> Vec<ClientMessage> {
        let room_id = room_id.filter(|r| !r.is_empty());
        if self.active.as_deref() == room_id {
            return Vec::new();
        }

        self.active = room_id.map(str::to_string);

        if connected {
            self.sync()
        } else {
            tracing::debug!(room_id = ?self.active, "No connection, room join pending");
            Vec::new()
        }
    }

    /// 새 연결 수립 시 처리 (서버 측 참여 상태는 비어 있음)
    pub fn on_connected(&mut self) -> Vec<ClientMessage> {
        self.joined = None;
        self.sync()
    }

    /// 연결 종료 시 처리
    pub fn on_disconnected(&mut self) {
        if let Some(room_id) = self.joined.take() {
            tracing::debug!(room_id = %room_id, "Membership dropped with connection");
        }
    }

    /// 대화 화면 종료 시 처리 (연결은 유지)
    pub fn teardown(&mut self, connected: bool) -> Vec<ClientMessage> {
        self.active = None;
        if connected {
            self.sync()
        } else {
            self.joined = None;
            Vec::new()
        }
    }

    fn sync(&mut self) -> Vec<ClientMessage> {
        if self.joined == self.active {
            return Vec::new();
        }

        let mut messages = Vec::with_capacity(2);

        if let Some(previous) = self.joined.take() {
            tracing::info!(room_id = %previous, "Leaving room");
            messages.push(ClientMessage::LeaveRoom { room_id: previous });
        }

        if let Some(next) = &self.active {
            tracing::info!(room_id = %next, "Joining room");
            messages.push(ClientMessage::JoinRoom {
                room_id: next.clone(),
            });
            self.joined = Some(next.clone());
        }

        messages
    }
}
