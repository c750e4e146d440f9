//! 동기화 세션 루프와 클라이언트 핸들

use crate::api::{ChatApi, ImageUpload, Message};
use crate::config::SyncConfig;
use crate::error::ClientError;
use crate::handlers::{
    ConnectionChange, ConnectionManager, ConnectionStatus, Connector, Credential, HistoryReconciler,
    MembershipTracker, PresenceTracker, TransportEvent, TypingDebouncer, TypingTracker,
};
use crate::protocol::{ClientMessage, OutgoingMessage, ServerMessage, UserId};
use crate::state::{ChatTarget, SyncState};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// UI → 세션 명령
#[derive(Debug)]
pub enum Command {
    SetCredential(Option<Credential>),
    SetActiveRoom(Option<ChatTarget>),
    InputChanged(String),
    SendMessage {
        target: ChatTarget,
        text: Option<String>,
        photo_url: Option<String>,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Refresh,
    Reconnect,
    Teardown,
    Shutdown,
}

/// 모든 추적기를 소유하고 변경을 한 태스크에서 직렬화한다
pub struct Session<C, A> {
    user_id: UserId,
    config: SyncConfig,
    credential: Option<Credential>,
    connections: ConnectionManager<C>,
    membership: MembershipTracker,
    debouncer: TypingDebouncer,
    typing: Arc<TypingTracker>,
    presence: PresenceTracker,
    history: HistoryReconciler<A>,
    active: watch::Sender<Option<ChatTarget>>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<C: Connector, A: ChatApi> Session<C, A> {
    pub fn new(
        config: SyncConfig,
        user_id: impl Into<UserId>,
        connector: C,
        api: Arc<A>,
    ) -> (Self, ChatClient<A>) {
        let user_id = user_id.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (active, active_rx) = watch::channel(None);

        let connections = ConnectionManager::new(connector);
        let typing = Arc::new(TypingTracker::new());
        let presence = PresenceTracker::new();
        let history = HistoryReconciler::new(api.clone(), user_id.clone());

        let state = SyncState::new(
            user_id.clone(),
            typing.clone(),
            presence.clone(),
            history.subscribe(),
            active_rx,
            connections.subscribe_status(),
        );

        let session = Self {
            user_id,
            config,
            credential: None,
            connections,
            membership: MembershipTracker::new(),
            debouncer: TypingDebouncer::new(config.typing_quiet()),
            typing,
            presence,
            history,
            active,
            commands: commands_rx,
        };

        let client = ChatClient {
            commands: commands_tx,
            state,
            api,
        };

        (session, client)
    }

    /// 세션 루프 실행 (Shutdown 또는 모든 핸들이 드롭될 때까지)
    pub async fn run(mut self) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(user_id = %self.user_id, "Sync session started");

        loop {
            let deadline = self.debouncer.deadline();
            let polling = self.membership.active().is_some();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, &mut poll) {
                        break;
                    }
                }
                event = self.connections.next_event() => self.handle_transport_event(event),
                _ = typing_deadline(deadline) => self.on_typing_deadline(),
                _ = poll.tick(), if polling => self.refresh(),
            }
        }

        self.teardown();
        self.connections.close();
        tracing::info!(user_id = %self.user_id, "Sync session stopped");
    }

    /// 명령 처리 (false 면 루프 종료)
    fn handle_command(&mut self, command: Command, poll: &mut Interval) -> bool {
        match command {
            Command::SetCredential(credential) => self.set_credential(credential),
            Command::SetActiveRoom(target) => {
                if self.set_active_room(target) {
                    // 방 전환 시 즉시 조회했으므로 다음 폴링은 한 주기 뒤
                    poll.reset();
                }
            }
            Command::InputChanged(text) => self.on_input_changed(&text),
            Command::SendMessage {
                target,
                text,
                photo_url,
                reply,
            } => {
                let result = self.send_message(&target, text, photo_url);
                // 호출자가 이미 기다리지 않으면 결과는 버린다
                let _ = reply.send(result);
            }
            Command::Refresh => self.refresh(),
            Command::Reconnect => self.reconnect(),
            Command::Teardown => self.teardown(),
            Command::Shutdown => return false,
        }
        true
    }

    fn emit_all(&self, messages: impl IntoIterator<Item = ClientMessage>) {
        for message in messages {
            self.connections.emit(message);
        }
    }

    /// 인증 토큰 재평가
    pub fn set_credential(&mut self, credential: Option<Credential>) {
        self.credential = credential;
        let change = self.connections.ensure_connected(self.credential.as_ref());
        self.on_connection_change(change);
    }

    /// 같은 토큰으로 연결을 새로 연다
    pub fn reconnect(&mut self) {
        if self.connections.close() {
            self.reset_connection_state();
        }
        let change = self.connections.ensure_connected(self.credential.as_ref());
        self.on_connection_change(change);
    }

    fn on_connection_change(&mut self, change: ConnectionChange) {
        match change {
            ConnectionChange::Unchanged => {}
            ConnectionChange::Opened => {
                self.reset_connection_state();
                let joins = self.membership.on_connected();
                self.emit_all(joins);
            }
            ConnectionChange::Closed => self.reset_connection_state(),
        }
    }

    /// 이전 연결에서 받은 일시 상태는 더 이상 유효하지 않음
    fn reset_connection_state(&mut self) {
        self.membership.on_disconnected();
        self.debouncer.reset();
        self.typing.clear();
        self.presence.clear();
    }

    /// 활성 대화 전환 (변경이 있었으면 true)
    ///
    /// 방이 바뀌면 남은 stopTyping 을 먼저 보내고, 그 다음 leave/join 을 보낸다.
    /// 같은 방 ID 라도 대화 종류나 이름이 바뀌면 이력은 새로 받는다.
    pub fn set_active_room(&mut self, target: Option<ChatTarget>) -> bool {
        let target = target.filter(|t| !t.id.is_empty());
        if *self.active.borrow() == target {
            return false;
        }

        let next = target.as_ref().map(|t| t.id.as_str());
        if self.membership.active() != next {
            if let Some(stop) = self.debouncer.flush() {
                self.connections.emit(stop);
            }

            let membership = self
                .membership
                .set_active_room(next, self.connections.is_open());
            self.emit_all(membership);
        }

        self.history.select(target.as_ref());
        self.active.send_replace(target.clone());

        if let Some(target) = target {
            tracing::info!(room_id = %target.id, "Active room changed");
            self.spawn_refresh(target);
        }
        true
    }

    pub fn on_input_changed(&mut self, text: &str) {
        let Some(room_id) = self.membership.active().map(str::to_string) else {
            return;
        };
        if !self.connections.is_open() {
            return;
        }

        if let Some(message) = self.debouncer.on_input_changed(&room_id, text, Instant::now()) {
            self.connections.emit(message);
        }
    }

    fn on_typing_deadline(&mut self) {
        if let Some(stop) = self.debouncer.poll_expired(Instant::now()) {
            self.connections.emit(stop);
        }
    }

    /// 실시간 채널로 메시지 전송 (전달 여부는 다음 새로고침에서 확인)
    pub fn send_message(
        &mut self,
        target: &ChatTarget,
        text: Option<String>,
        photo_url: Option<String>,
    ) -> Result<(), ClientError> {
        if !self.connections.is_open() {
            tracing::warn!(room_id = %target.id, "Not connected, message not sent");
            return Err(ClientError::NotConnected);
        }

        let outgoing = OutgoingMessage {
            text,
            photo_url,
            sender_id: self.user_id.clone(),
            target: target.message_target(),
        };

        if !self
            .connections
            .emit(ClientMessage::SendMessage(outgoing.clone()))
        {
            return Err(ClientError::NotConnected);
        }
        tracing::debug!(room_id = %target.id, "Message sent");

        if let Some(stop) = self.debouncer.flush() {
            self.connections.emit(stop);
        }

        if self.config.local_echo {
            self.history.push_pending(&outgoing);
        }
        Ok(())
    }

    /// 대화 화면 종료 (연결은 세션 범위이므로 유지)
    pub fn teardown(&mut self) {
        if let Some(stop) = self.debouncer.flush() {
            self.connections.emit(stop);
        }
        let leaves = self.membership.teardown(self.connections.is_open());
        self.emit_all(leaves);
        self.history.select(None);
        self.active.send_replace(None);
    }

    pub fn refresh(&self) {
        let target = self.active.borrow().clone();
        if let Some(target) = target {
            self.spawn_refresh(target);
        }
    }

    fn spawn_refresh(&self, target: ChatTarget) {
        let history = self.history.clone();
        tokio::spawn(async move {
            // 실패는 refresh 안에서 기록되고 스레드 상태에 반영됨
            let _ = history.refresh(&target).await;
        });
    }

    pub fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        let Some(event) = event else {
            tracing::warn!("Transport ended, holding disconnected");
            self.connections.close();
            self.reset_connection_state();
            return;
        };

        self.connections.observe(&event);
        if let TransportEvent::Message(message) = event {
            self.handle_server_message(message);
        }
    }

    /// 수신 이벤트는 도착 순서대로 적용 (활성 방 필터링 없음)
    fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { socket_id } => {
                tracing::info!(socket_id = %socket_id, "Socket session assigned");
            }
            ServerMessage::Typing(notice) => {
                self.typing.on_typing(&notice.room_id, &notice.user_id);
            }
            ServerMessage::StopTyping(notice) => {
                self.typing.on_stop_typing(&notice.room_id, &notice.user_id);
            }
            ServerMessage::OnlineUsers { users } => {
                self.presence.on_roster_snapshot(&users);
            }
            ServerMessage::Error { code, message } => {
                tracing::warn!(code = %code, message = %message, "Server reported error");
            }
        }
    }
}

async fn typing_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// 보낼 메시지 초안
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub text: String,
    pub image: Option<ImageUpload>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageUpload) -> Self {
        self.image = Some(image);
        self
    }
}

/// UI 쪽에서 쓰는 세션 핸들
pub struct ChatClient<A> {
    commands: mpsc::UnboundedSender<Command>,
    state: SyncState,
    api: Arc<A>,
}

impl<A> Clone for ChatClient<A> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
            api: self.api.clone(),
        }
    }
}

impl<A: ChatApi> ChatClient<A> {
    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::SessionClosed)
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// 세션 제공자가 토큰을 바꿀 때마다 호출 (없거나 공백이면 연결 해제)
    pub fn set_credential(&self, token: Option<&str>) -> Result<(), ClientError> {
        self.command(Command::SetCredential(token.and_then(Credential::new)))
    }

    pub fn open_chat(&self, target: ChatTarget) -> Result<(), ClientError> {
        self.command(Command::SetActiveRoom(Some(target)))
    }

    pub fn close_chat(&self) -> Result<(), ClientError> {
        self.command(Command::SetActiveRoom(None))
    }

    /// 대화 화면을 완전히 떠날 때
    pub fn leave_view(&self) -> Result<(), ClientError> {
        self.command(Command::Teardown)
    }

    pub fn input_changed(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::InputChanged(text.into()))
    }

    /// 이미지가 있으면 먼저 업로드한 뒤 전송
    ///
    /// 연결이 없으면 업로드 전에 `NotConnected` 로 실패한다.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<(), ClientError> {
        let text = draft.text.trim().to_string();
        let text = (!text.is_empty()).then_some(text);
        if text.is_none() && draft.image.is_none() {
            return Err(ClientError::EmptyMessage);
        }

        // 업로드 중 방이 바뀌어도 원래 대화로 보낸다
        let target = self.state.active_room().ok_or(ClientError::NoActiveRoom)?;

        if self.state.connection_status() == ConnectionStatus::Disconnected {
            return Err(ClientError::NotConnected);
        }

        let photo_url = match draft.image {
            Some(image) => Some(self.api.upload_image(image).await?),
            None => None,
        };

        let (reply, result) = oneshot::channel();
        self.command(Command::SendMessage {
            target,
            text,
            photo_url,
            reply,
        })?;
        result.await.map_err(|_| ClientError::SessionClosed)?
    }

    pub async fn edit_message(&self, id: &str, text: &str) -> Result<Message, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let message = self.api.edit_message(id, text).await?;
        self.refresh()?;
        Ok(message)
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), ClientError> {
        self.api.delete_message(id).await?;
        self.refresh()
    }

    pub fn refresh(&self) -> Result<(), ClientError> {
        self.command(Command::Refresh)
    }

    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.command(Command::Shutdown)
    }
}
