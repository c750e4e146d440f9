//! 수신 타이핑 상태 동기화

use crate::protocol::{RoomId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;

/// 방별 타이핑 중인 사용자 집합
///
/// 빈 집합은 보관하지 않는다. 타이핑하는 사람이 없는 방과 한 번도 본 적 없는 방은
/// 읽는 쪽에서 구분되지 않는다.
#[derive(Debug, Default)]
pub struct TypingTracker {
    rooms: DashMap<RoomId, HashSet<UserId>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// typing 이벤트 처리
    pub fn on_typing(&self, room_id: &str, user_id: &str) {
        let added = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());

        if added {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "User started typing");
        }
    }

    /// stopTyping 이벤트 처리
    pub fn on_stop_typing(&self, room_id: &str, user_id: &str) {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut typists) => typists.remove(user_id),
            None => false,
        }; // 여기서 RefMut 이 드롭되어 락이 해제됨

        self.rooms.remove_if(room_id, |_, typists| typists.is_empty());

        if removed {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "User stopped typing");
        }
    }

    /// 방의 타이핑 중인 사용자 (복사본)
    pub fn typists(&self, room_id: &str) -> HashSet<UserId> {
        self.rooms
            .get(room_id)
            .map(|typists| typists.clone())
            .unwrap_or_default()
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// 연결 종료 시 전체 초기화
    pub fn clear(&self) {
        self.rooms.clear();
    }
}
