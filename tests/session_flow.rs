use chat_sync_client::api::{ChatApi, ImageUpload, Message, MessageQuery};
use chat_sync_client::handlers::{
    Connection, ConnectionStatus, Connector, Credential, TransportEvent,
};
use chat_sync_client::protocol::{ClientMessage, OnlineUser, ServerMessage, TypingNotice};
use chat_sync_client::{
    ApiError, ChatKind, ChatTarget, ClientError, MessageDraft, Session, SyncConfig,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 세션이 연 연결의 반대편
struct Peer {
    token: String,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl Peer {
    async fn next(&mut self) -> ClientMessage {
        self.outbound.recv().await.expect("connection closed")
    }
}

struct ChannelConnector {
    peers: mpsc::UnboundedSender<Peer>,
}

impl Connector for ChannelConnector {
    fn open(&self, credential: &Credential) -> Connection {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer {
            token: credential.token().to_string(),
            outbound: out_rx,
            inbound: in_tx,
        });
        Connection::new(credential.clone(), out_tx, in_rx)
    }
}

/// 조회 시각을 기록하고 고정 이력을 돌려주는 API
#[derive(Default)]
struct RecordingApi {
    fetches: Mutex<Vec<(Instant, MessageQuery)>>,
    uploads: Mutex<Vec<String>>,
}

impl ChatApi for RecordingApi {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ApiError> {
        self.fetches.lock().unwrap().push((Instant::now(), query.clone()));
        Ok(vec![Message {
            id: "m1".into(),
            text: Some("hello".into()),
            file_url: None,
            photo_url: None,
            audio_url: None,
            sender_id: "bob".into(),
            receiver_id: Some("me".into()),
            group_id: None,
            seen: true,
            created_at: Utc::now(),
            sender: None,
            pending: false,
        }])
    }

    async fn upload_image(&self, image: ImageUpload) -> Result<String, ApiError> {
        self.uploads.lock().unwrap().push(image.file_name().to_string());
        Ok(format!("https://cdn.example.com/{}", image.file_name()))
    }

    async fn edit_message(&self, _id: &str, _text: &str) -> Result<Message, ApiError> {
        Err(ApiError::Unauthorized)
    }

    async fn delete_message(&self, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

struct Harness {
    client: chat_sync_client::ChatClient<RecordingApi>,
    api: Arc<RecordingApi>,
    peers: mpsc::UnboundedReceiver<Peer>,
    task: tokio::task::JoinHandle<()>,
}

fn start(config: SyncConfig) -> Harness {
    let (peers_tx, peers) = mpsc::unbounded_channel();
    let api = Arc::new(RecordingApi::default());
    let (session, client) = Session::new(
        config,
        "me",
        ChannelConnector { peers: peers_tx },
        api.clone(),
    );
    let task = tokio::spawn(session.run());
    Harness {
        client,
        api,
        peers,
        task,
    }
}

fn bob() -> ChatTarget {
    ChatTarget::new("bob", ChatKind::Direct, "Bob")
}

fn join(room: &str) -> ClientMessage {
    ClientMessage::JoinRoom { room_id: room.into() }
}

fn typing(room: &str) -> ClientMessage {
    ClientMessage::Typing { room_id: room.into() }
}

fn stop(room: &str) -> ClientMessage {
    ClientMessage::StopTyping { room_id: room.into() }
}

#[tokio::test(start_paused = true)]
async fn stop_typing_follows_quiet_interval() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    assert_eq!(peer.token, "token-1");

    h.client.open_chat(bob()).unwrap();
    assert_eq!(peer.next().await, join("bob"));

    let started = Instant::now();
    h.client.input_changed("h").unwrap();
    assert_eq!(peer.next().await, typing("bob"));

    // 1.5초 뒤 다시 입력하면 타이머가 다시 시작된다
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.client.input_changed("he").unwrap();

    assert_eq!(peer.next().await, stop("bob"));
    assert!(started.elapsed() >= Duration::from_millis(3500));

    // 같은 세션에서 typing 은 한 번만 나갔다
    assert!(peer.outbound.try_recv().is_err());

    h.client.shutdown().unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn clearing_input_stops_immediately() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    h.client.open_chat(bob()).unwrap();
    peer.next().await;

    h.client.input_changed("x").unwrap();
    assert_eq!(peer.next().await, typing("bob"));

    let started = Instant::now();
    h.client.input_changed("").unwrap();
    assert_eq!(peer.next().await, stop("bob"));
    assert!(started.elapsed() < Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn active_room_is_polled_every_interval() {
    let h = start(SyncConfig::default());
    let opened = Instant::now();
    h.client.open_chat(bob()).unwrap();

    let mut thread = h.client.state().subscribe_thread();
    thread
        .wait_for(|t| !t.messages.is_empty())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(9100)).await;

    let fetches = h.api.fetches.lock().unwrap().clone();
    let offsets: Vec<u128> = fetches
        .iter()
        .map(|(at, _)| at.duration_since(opened).as_millis() / 100 * 100)
        .collect();
    assert_eq!(offsets, vec![0, 3000, 6000, 9000]);

    let query = &fetches[0].1;
    assert_eq!(query.sender_id, "me");
    assert_eq!(query.receiver_id.as_deref(), Some("bob"));
    assert_eq!(query.group_id, None);

    // 대화를 닫으면 폴링이 멈춘다
    h.client.close_chat().unwrap();
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(h.api.fetches.lock().unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn image_is_uploaded_before_send() {
    let mut h = start(SyncConfig {
        local_echo: true,
        ..SyncConfig::default()
    });
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    let group = ChatTarget::new("g1", ChatKind::Group, "Team");
    h.client.open_chat(group).unwrap();
    assert_eq!(peer.next().await, join("g1"));

    let mut thread = h.client.state().subscribe_thread();
    thread.wait_for(|t| !t.messages.is_empty()).await.unwrap();

    let image = ImageUpload::new("cat.png", "image/png", vec![1, 2, 3]).unwrap();
    h.client
        .send_message(MessageDraft::text("  look  ").with_image(image))
        .await
        .unwrap();

    match peer.next().await {
        ClientMessage::SendMessage(outgoing) => {
            assert_eq!(outgoing.text.as_deref(), Some("look"));
            assert_eq!(
                outgoing.photo_url.as_deref(),
                Some("https://cdn.example.com/cat.png")
            );
            assert_eq!(outgoing.sender_id, "me");
            assert_eq!(outgoing.target.room_id(), "g1");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert_eq!(h.api.uploads.lock().unwrap().as_slice(), ["cat.png"]);

    thread
        .wait_for(|t| t.messages.iter().any(|m| m.pending))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn offline_send_fails_before_upload() {
    let h = start(SyncConfig::default());
    h.client.open_chat(bob()).unwrap();

    let image = ImageUpload::new("cat.png", "image/png", vec![1, 2, 3]).unwrap();
    let result = h
        .client
        .send_message(MessageDraft::text("hi").with_image(image))
        .await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(h.api.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_after_transport_loss_reports_not_connected() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    h.client.open_chat(bob()).unwrap();
    assert_eq!(peer.next().await, join("bob"));

    let mut status = h.client.state().subscribe_status();
    drop(peer);
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    let result = h.client.send_message(MessageDraft::text("hi")).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn reopening_same_id_as_group_requeries_history() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();

    h.client.open_chat(bob()).unwrap();
    assert_eq!(peer.next().await, join("bob"));
    let mut thread = h.client.state().subscribe_thread();
    thread.wait_for(|t| !t.messages.is_empty()).await.unwrap();

    h.client
        .open_chat(ChatTarget::new("bob", ChatKind::Group, "Bob's group"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.client.state().active_room().map(|t| t.kind),
        Some(ChatKind::Group)
    );

    let fetches = h.api.fetches.lock().unwrap().clone();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[1].1.group_id.as_deref(), Some("bob"));
    assert_eq!(fetches[1].1.receiver_id, None);

    // 방 ID 가 같으므로 추가 leave/join 은 없다
    assert!(peer.outbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn roster_and_typing_events_reach_shared_state() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let peer = h.peers.recv().await.unwrap();
    h.client.open_chat(bob()).unwrap();

    let mut presence = h.client.state().subscribe_presence();
    peer.inbound.send(TransportEvent::Connected).unwrap();
    peer.inbound
        .send(TransportEvent::Message(ServerMessage::OnlineUsers {
            users: vec![OnlineUser {
                user_id: "bob".into(),
                socket_id: "s-bob".into(),
            }],
        }))
        .unwrap();
    peer.inbound
        .send(TransportEvent::Message(ServerMessage::Typing(TypingNotice {
            room_id: "bob".into(),
            sender_socket_id: "s-bob".into(),
            user_id: "bob".into(),
        })))
        .unwrap();

    presence.wait_for(|online| online.contains("bob")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = h.client.state();
    assert!(state.is_target_online(&bob()));
    assert!(state.active_typists().contains("bob"));

    // 연결이 끊기면 명단과 타이핑 상태는 비워진다
    drop(peer);
    presence.wait_for(|online| online.is_empty()).await.unwrap();
    assert!(state.typists("bob").is_empty());
}

#[tokio::test(start_paused = true)]
async fn new_credential_replaces_connection_and_rejoins() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut first = h.peers.recv().await.unwrap();
    h.client.open_chat(bob()).unwrap();
    assert_eq!(first.next().await, join("bob"));

    h.client.set_credential(Some("token-2")).unwrap();
    let mut second = h.peers.recv().await.unwrap();
    assert_eq!(second.token, "token-2");
    assert_eq!(second.next().await, join("bob"));

    // 이전 연결은 닫혔다
    assert!(first.outbound.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_active_room() {
    let mut h = start(SyncConfig::default());
    h.client.set_credential(Some("token-1")).unwrap();
    let mut peer = h.peers.recv().await.unwrap();
    h.client.open_chat(bob()).unwrap();
    assert_eq!(peer.next().await, join("bob"));
    h.client.input_changed("typing").unwrap();
    assert_eq!(peer.next().await, typing("bob"));

    h.client.shutdown().unwrap();
    h.task.await.unwrap();

    assert_eq!(peer.next().await, stop("bob"));
    assert_eq!(
        peer.next().await,
        ClientMessage::LeaveRoom { room_id: "bob".into() }
    );
    assert!(peer.outbound.recv().await.is_none());
    assert!(h.client.open_chat(bob()).is_err());
}
