//! 공유 상태 (읽기 전용 뷰)

use crate::api::{MessageQuery, User};
use crate::handlers::{ConnectionStatus, PresenceTracker, Thread, TypingTracker};
use crate::protocol::{MessageTarget, RoomId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

/// 대화 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
}

/// 사용자가 보고 있는 대화 (방 ID 는 대화 상대 또는 그룹 ID)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub id: RoomId,
    pub kind: ChatKind,
    pub name: String,
}

impl ChatTarget {
    pub fn new(id: impl Into<RoomId>, kind: ChatKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn message_target(&self) -> MessageTarget {
        match self.kind {
            ChatKind::Direct => MessageTarget::Direct {
                receiver_id: self.id.clone(),
            },
            ChatKind::Group => MessageTarget::Group {
                group_id: self.id.clone(),
            },
        }
    }

    pub fn history_query(&self, sender_id: &str) -> MessageQuery {
        let (receiver_id, group_id) = match self.kind {
            ChatKind::Direct => (Some(self.id.clone()), None),
            ChatKind::Group => (None, Some(self.id.clone())),
        };
        MessageQuery {
            sender_id: sender_id.to_string(),
            receiver_id,
            group_id,
        }
    }
}

/// 사용자 ID → 표시 이름
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: HashMap<UserId, String>,
}

impl UserDirectory {
    pub fn from_users(users: &[User]) -> Self {
        Self {
            names: users.iter().map(|u| (u.id.clone(), u.name.clone())).collect(),
        }
    }

    pub fn name_of(&self, user_id: &str) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// UI 가 읽는 동기화 상태
///
/// 변경은 세션 루프만 한다. 이 뷰로는 읽기만 가능하다.
#[derive(Clone)]
pub struct SyncState {
    local_user: UserId,
    typing: Arc<TypingTracker>,
    presence: PresenceTracker,
    thread: watch::Receiver<Thread>,
    active: watch::Receiver<Option<ChatTarget>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl SyncState {
    pub(crate) fn new(
        local_user: UserId,
        typing: Arc<TypingTracker>,
        presence: PresenceTracker,
        thread: watch::Receiver<Thread>,
        active: watch::Receiver<Option<ChatTarget>>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            local_user,
            typing,
            presence,
            thread,
            active,
            status,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn typists(&self, room_id: &str) -> HashSet<UserId> {
        self.typing.typists(room_id)
    }

    /// 활성 방의 타이핑 중인 사용자 (자기 자신 제외)
    pub fn active_typists(&self) -> HashSet<UserId> {
        let Some(room_id) = self.active_room().map(|t| t.id) else {
            return HashSet::new();
        };
        let mut typists = self.typing.typists(&room_id);
        typists.remove(&self.local_user);
        typists
    }

    /// 타이핑 중인 사용자 이름 (정렬, 모르는 사용자는 ID 그대로)
    pub fn typist_names(&self, room_id: &str, directory: &UserDirectory) -> Vec<String> {
        let mut names: Vec<String> = self
            .typing
            .typists(room_id)
            .into_iter()
            .filter(|user_id| *user_id != self.local_user)
            .map(|user_id| {
                directory
                    .name_of(&user_id)
                    .map(str::to_string)
                    .unwrap_or(user_id)
            })
            .collect();
        names.sort();
        names
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.presence.online_users()
    }

    /// 1:1 대화 상대가 온라인인지 (그룹은 항상 false)
    pub fn is_target_online(&self, target: &ChatTarget) -> bool {
        target.kind == ChatKind::Direct && self.presence.is_online(&target.id)
    }

    pub fn active_room(&self) -> Option<ChatTarget> {
        self.active.borrow().clone()
    }

    pub fn thread(&self) -> Thread {
        self.thread.borrow().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_thread(&self) -> watch::Receiver<Thread> {
        self.thread.clone()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<HashSet<UserId>> {
        self.presence.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OnlineUser;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
            email: format!("{id}@example.com"),
            avatar_url: None,
            status: Some("offline".into()),
        }
    }

    fn state_with(
        typing: Arc<TypingTracker>,
        presence: PresenceTracker,
        active: Option<ChatTarget>,
    ) -> SyncState {
        let (_thread_tx, thread) = watch::channel(Thread::default());
        let (_active_tx, active) = watch::channel(active);
        let (_status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        SyncState::new("me".into(), typing, presence, thread, active, status)
    }

    #[test]
    fn chat_target_builds_queries_per_kind() {
        let direct = ChatTarget::new("bob", ChatKind::Direct, "Bob");
        let query = direct.history_query("me");
        assert_eq!(query.receiver_id.as_deref(), Some("bob"));
        assert_eq!(query.group_id, None);
        assert_eq!(direct.message_target().room_id(), "bob");

        let group = ChatTarget::new("g1", ChatKind::Group, "Team");
        let query = group.history_query("me");
        assert_eq!(query.receiver_id, None);
        assert_eq!(query.group_id.as_deref(), Some("g1"));
    }

    #[test]
    fn typist_names_resolve_and_skip_self() {
        let typing = Arc::new(TypingTracker::new());
        typing.on_typing("r1", "me");
        typing.on_typing("r1", "u2");
        typing.on_typing("r1", "u1");
        typing.on_typing("r1", "stranger");

        let state = state_with(typing, PresenceTracker::new(), None);
        let directory = UserDirectory::from_users(&[user("u1", "Alice"), user("u2", "Bob")]);

        assert_eq!(
            state.typist_names("r1", &directory),
            vec!["Alice".to_string(), "Bob".to_string(), "stranger".to_string()]
        );
    }

    #[test]
    fn active_typists_filter_by_active_room() {
        let typing = Arc::new(TypingTracker::new());
        typing.on_typing("r1", "u1");
        typing.on_typing("r2", "u2");

        let state = state_with(
            typing.clone(),
            PresenceTracker::new(),
            Some(ChatTarget::new("r2", ChatKind::Group, "two")),
        );
        assert_eq!(state.active_typists(), HashSet::from(["u2".to_string()]));

        let idle = state_with(typing, PresenceTracker::new(), None);
        assert!(idle.active_typists().is_empty());
    }

    #[test]
    fn roster_decides_online_not_profile_status() {
        let presence = PresenceTracker::new();
        presence.on_roster_snapshot(&[OnlineUser {
            user_id: "bob".into(),
            socket_id: "s1".into(),
        }]);
        let state = state_with(Arc::new(TypingTracker::new()), presence, None);

        assert!(state.is_target_online(&ChatTarget::new("bob", ChatKind::Direct, "Bob")));
        assert!(!state.is_target_online(&ChatTarget::new("bob", ChatKind::Group, "Bob")));
        assert!(!state.is_target_online(&ChatTarget::new("carol", ChatKind::Direct, "Carol")));
    }
}
