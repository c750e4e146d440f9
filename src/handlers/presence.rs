//! 온라인 사용자 추적

use crate::protocol::{OnlineUser, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// 전역 온라인 사용자 집합
///
/// 명단 스냅샷마다 통째로 교체된다. 부분 병합은 하지 않는다.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    online: Arc<watch::Sender<HashSet<UserId>>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (online, _) = watch::channel(HashSet::new());
        Self {
            online: Arc::new(online),
        }
    }

    /// 명단 스냅샷 적용
    pub fn on_roster_snapshot(&self, users: &[OnlineUser]) {
        let snapshot: HashSet<UserId> = users.iter().map(|u| u.user_id.clone()).collect();
        let count = snapshot.len();
        self.online.send_replace(snapshot);
        tracing::debug!(online = count, "Roster snapshot applied");
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.borrow().contains(user_id)
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.online.borrow().clone()
    }

    /// 변경 알림 구독
    pub fn subscribe(&self) -> watch::Receiver<HashSet<UserId>> {
        self.online.subscribe()
    }

    pub fn clear(&self) {
        self.online.send_if_modified(|online| {
            let changed = !online.is_empty();
            online.clear();
            changed
        });
    }
}
