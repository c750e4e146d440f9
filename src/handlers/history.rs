//! 메시지 이력 동기화

use crate::api::{ChatApi, Message, MessageQuery};
use crate::error::ApiError;
use crate::protocol::{OutgoingMessage, RoomId, UserId};
use crate::state::ChatTarget;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// 스레드 로딩 상태
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ThreadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// 활성 방의 메시지 목록
///
/// 순서는 마지막 전체 조회 결과 그대로다.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub room_id: Option<RoomId>,
    pub messages: Vec<Message>,
    pub status: ThreadStatus,
    target: Option<ChatTarget>,
    applied_seq: u64,
}

/// 폴링으로 받은 이력과 로컬 표시 상태를 맞춘다
pub struct HistoryReconciler<A> {
    api: Arc<A>,
    user_id: UserId,
    thread: Arc<watch::Sender<Thread>>,
    next_seq: Arc<AtomicU64>,
}

impl<A> Clone for HistoryReconciler<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            user_id: self.user_id.clone(),
            thread: self.thread.clone(),
            next_seq: self.next_seq.clone(),
        }
    }
}

impl<A: ChatApi> HistoryReconciler<A> {
    pub fn new(api: Arc<A>, user_id: impl Into<UserId>) -> Self {
        let (thread, _) = watch::channel(Thread::default());
        Self {
            api,
            user_id: user_id.into(),
            thread: Arc::new(thread),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn query_for(&self, target: &ChatTarget) -> MessageQuery {
        target.history_query(&self.user_id)
    }

    /// 활성 대화 전환 (이전 대화의 목록은 즉시 비움)
    pub fn select(&self, target: Option<&ChatTarget>) {
        self.thread.send_if_modified(|thread| {
            if thread.target.as_ref() == target {
                return false;
            }
            *thread = Thread {
                room_id: target.map(|t| t.id.clone()),
                messages: Vec::new(),
                status: if target.is_some() {
                    ThreadStatus::Loading
                } else {
                    ThreadStatus::Idle
                },
                target: target.cloned(),
                applied_seq: thread.applied_seq,
            };
            true
        });
    }

    /// 전체 이력을 다시 받아 통째로 교체
    ///
    /// 응답이 도착했을 때 대화가 바뀌었거나 더 최신 응답이 이미 적용됐다면 버린다.
    /// 반환값은 적용 여부.
    pub async fn refresh(&self, target: &ChatTarget) -> Result<bool, ApiError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let query = self.query_for(target);

        match self.api.fetch_messages(&query).await {
            Ok(messages) => {
                let count = messages.len();
                let applied = self.thread.send_if_modified(|thread| {
                    if thread.target.as_ref() != Some(target) || seq <= thread.applied_seq {
                        return false;
                    }
                    thread.messages = messages;
                    thread.status = ThreadStatus::Ready;
                    thread.applied_seq = seq;
                    true
                });

                if applied {
                    tracing::debug!(room_id = %target.id, count = count, "Thread refreshed");
                } else {
                    tracing::debug!(room_id = %target.id, seq = seq, "Stale history response discarded");
                }
                Ok(applied)
            }
            Err(e) => {
                tracing::warn!(room_id = %target.id, error = %e, "History refresh failed");
                let reason = e.to_string();
                self.thread.send_if_modified(|thread| {
                    if thread.target.as_ref() != Some(target) || seq <= thread.applied_seq {
                        return false;
                    }
                    // 기존 목록은 유지하고 상태만 표시
                    thread.status = ThreadStatus::Failed(reason);
                    true
                });
                Err(e)
            }
        }
    }

    /// 보낸 메시지를 확인 전까지 임시로 표시
    pub fn push_pending(&self, message: &OutgoingMessage) -> Option<String> {
        let room_id = message.target.room_id().to_string();
        let local_id = format!("local-{}", uuid::Uuid::new_v4());

        let (receiver_id, group_id) = match &message.target {
            crate::protocol::MessageTarget::Direct { receiver_id } => (Some(receiver_id.clone()), None),
            crate::protocol::MessageTarget::Group { group_id } => (None, Some(group_id.clone())),
        };

        let pending = Message {
            id: local_id.clone(),
            text: message.text.clone(),
            file_url: None,
            photo_url: message.photo_url.clone(),
            audio_url: None,
            sender_id: message.sender_id.clone(),
            receiver_id,
            group_id,
            seen: false,
            created_at: Utc::now(),
            sender: None,
            pending: true,
        };

        let pushed = self.thread.send_if_modified(|thread| {
            if thread.room_id.as_deref() != Some(room_id.as_str()) {
                return false;
            }
            thread.messages.push(pending);
            true
        });

        pushed.then_some(local_id)
    }

    pub fn thread(&self) -> Thread {
        self.thread.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Thread> {
        self.thread.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ImageUpload;
    use crate::protocol::MessageTarget;
    use crate::state::ChatKind;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// 방별 응답을 돌려주거나, 게이트가 열릴 때까지 응답을 붙잡는 API
    #[derive(Default)]
    struct FakeApi {
        messages: Mutex<HashMap<String, Vec<Message>>>,
        gates: Mutex<Vec<oneshot::Receiver<()>>>,
        fail: Mutex<bool>,
        queries: Mutex<Vec<MessageQuery>>,
    }

    impl ChatApi for FakeApi {
        async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ApiError> {
            self.queries.lock().unwrap().push(query.clone());
            let gate = {
                let mut gates = self.gates.lock().unwrap();
                if gates.is_empty() {
                    None
                } else {
                    Some(gates.remove(0))
                }
            };
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if *self.fail.lock().unwrap() {
                return Err(ApiError::Status {
                    status: 500,
                    message: "boom".into(),
                });
            }
            let room = query
                .receiver_id
                .clone()
                .or_else(|| query.group_id.clone())
                .unwrap_or_default();
            Ok(self.messages.lock().unwrap().get(&room).cloned().unwrap_or_default())
        }

        async fn upload_image(&self, _image: ImageUpload) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn edit_message(&self, _id: &str, _text: &str) -> Result<Message, ApiError> {
            Err(ApiError::Unauthorized)
        }

        async fn delete_message(&self, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn message(id: &str, sender: &str) -> Message {
        Message {
            id: id.into(),
            text: Some(format!("text {id}")),
            file_url: None,
            photo_url: None,
            audio_url: None,
            sender_id: sender.into(),
            receiver_id: None,
            group_id: None,
            seen: false,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            sender: None,
            pending: false,
        }
    }

    fn direct(id: &str) -> ChatTarget {
        ChatTarget::new(id, ChatKind::Direct, id)
    }

    fn ids(thread: &Thread) -> Vec<String> {
        thread.messages.iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn refresh_replaces_thread_wholesale() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob"), message("m2", "me")]);
        let history = HistoryReconciler::new(api.clone(), "me");
        let bob = direct("bob");

        history.select(Some(&direct("bob")));
        assert_eq!(history.thread().status, ThreadStatus::Loading);

        assert!(history.refresh(&bob).await.unwrap());
        assert_eq!(ids(&history.thread()), vec!["m1", "m2"]);
        assert_eq!(history.thread().status, ThreadStatus::Ready);

        let query = api.queries.lock().unwrap()[0].clone();
        assert_eq!(query.sender_id, "me");
        assert_eq!(query.receiver_id.as_deref(), Some("bob"));
        assert_eq!(query.group_id, None);

        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m3", "bob")]);
        history.refresh(&bob).await.unwrap();
        assert_eq!(ids(&history.thread()), vec!["m3"]);
    }

    #[tokio::test]
    async fn pending_echo_is_replaced_by_next_refresh() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("g1".into(), vec![message("m1", "me")]);
        let history = HistoryReconciler::new(api, "me");
        let group = ChatTarget::new("g1", ChatKind::Group, "team");
        history.select(Some(&group));

        let outgoing = OutgoingMessage {
            text: Some("hi".into()),
            photo_url: None,
            sender_id: "me".into(),
            target: MessageTarget::Group { group_id: "g1".into() },
        };
        let local_id = history.push_pending(&outgoing).unwrap();
        assert!(local_id.starts_with("local-"));
        assert!(history.thread().messages[0].pending);

        history.refresh(&group).await.unwrap();
        let thread = history.thread();
        assert_eq!(ids(&thread), vec!["m1"]);
        assert!(thread.messages.iter().all(|m| !m.pending));
    }

    #[tokio::test]
    async fn response_for_previous_room_is_discarded() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob")]);
        let (open, gate) = oneshot::channel();
        api.gates.lock().unwrap().push(gate);

        let history = HistoryReconciler::new(api, "me");
        history.select(Some(&direct("bob")));

        let in_flight = {
            let history = history.clone();
            tokio::spawn(async move { history.refresh(&direct("bob")).await })
        };
        tokio::task::yield_now().await;

        history.select(Some(&direct("carol")));
        open.send(()).unwrap();

        assert!(!in_flight.await.unwrap().unwrap());
        let thread = history.thread();
        assert_eq!(thread.room_id.as_deref(), Some("carol"));
        assert!(thread.messages.is_empty());
    }

    #[tokio::test]
    async fn same_id_with_other_kind_drops_previous_response() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob")]);
        let (open, gate) = oneshot::channel();
        api.gates.lock().unwrap().push(gate);

        let history = HistoryReconciler::new(api.clone(), "me");
        history.select(Some(&direct("bob")));

        let in_flight = {
            let history = history.clone();
            tokio::spawn(async move { history.refresh(&direct("bob")).await })
        };
        tokio::task::yield_now().await;

        let as_group = ChatTarget::new("bob", ChatKind::Group, "bob");
        history.select(Some(&as_group));
        assert_eq!(history.thread().status, ThreadStatus::Loading);
        open.send(()).unwrap();

        assert!(!in_flight.await.unwrap().unwrap());
        assert!(history.thread().messages.is_empty());

        assert!(history.refresh(&as_group).await.unwrap());
        let queries = api.queries.lock().unwrap().clone();
        assert_eq!(queries[1].group_id.as_deref(), Some("bob"));
        assert_eq!(queries[1].receiver_id, None);
    }

    #[tokio::test]
    async fn older_response_never_overwrites_newer() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob")]);
        let (open_first, gate) = oneshot::channel();
        api.gates.lock().unwrap().push(gate);

        let history = HistoryReconciler::new(api.clone(), "me");
        history.select(Some(&direct("bob")));

        let slow = {
            let history = history.clone();
            tokio::spawn(async move { history.refresh(&direct("bob")).await })
        };
        tokio::task::yield_now().await;

        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob"), message("m2", "bob")]);
        assert!(history.refresh(&direct("bob")).await.unwrap());

        open_first.send(()).unwrap();
        assert!(!slow.await.unwrap().unwrap());
        assert_eq!(ids(&history.thread()), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn failure_keeps_messages_and_marks_status() {
        let api = Arc::new(FakeApi::default());
        api.messages
            .lock()
            .unwrap()
            .insert("bob".into(), vec![message("m1", "bob")]);
        let history = HistoryReconciler::new(api.clone(), "me");
        history.select(Some(&direct("bob")));
        history.refresh(&direct("bob")).await.unwrap();

        *api.fail.lock().unwrap() = true;
        assert!(history.refresh(&direct("bob")).await.is_err());

        let thread = history.thread();
        assert_eq!(ids(&thread), vec!["m1"]);
        assert!(matches!(thread.status, ThreadStatus::Failed(_)));
    }
}
