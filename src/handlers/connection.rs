//! 실시간 연결 관리

use crate::protocol::{ClientMessage, ServerMessage};
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// 연결에 붙는 인증 토큰 (베어러)
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// 공백뿐인 토큰은 유효하지 않음
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// 전송 계층에서 올라오는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    Message(ServerMessage),
}

/// 살아있는 실시간 채널 하나
///
/// 드롭되면 전송 태스크도 함께 종료된다.
pub struct Connection {
    credential: Credential,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        credential: Credential,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            credential,
            outbound,
            inbound,
            task: None,
        }
    }

    /// 연결 수명에 묶을 전송 태스크 지정
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// 메시지 전송 (fire-and-forget)
    pub fn emit(&self, message: ClientMessage) -> bool {
        if let Err(e) = self.outbound.send(message) {
            tracing::warn!(dropped = ?e.0, "Transport closed, message dropped");
            return false;
        }
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("credential", &self.credential)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

/// 인증 토큰으로 새 연결을 여는 전송 구현
pub trait Connector: Send {
    fn open(&self, credential: &Credential) -> Connection;
}

/// `ensure_connected` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    Unchanged,
    Opened,
    Closed,
}

/// 세션당 하나의 연결만 소유
pub struct ConnectionManager<C> {
    connector: C,
    current: Option<Connection>,
    status: watch::Sender<ConnectionStatus>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            current: None,
            status,
        }
    }

    /// 인증 토큰 기준으로 연결 보장
    ///
    /// 토큰이 바뀌면 기존 연결을 먼저 끊고 새로 연다. 두 연결이 동시에 존재하지 않는다.
    pub fn ensure_connected(&mut self, credential: Option<&Credential>) -> ConnectionChange {
        let Some(credential) = credential else {
            tracing::info!("No credential, holding disconnected");
            return if self.close() {
                ConnectionChange::Closed
            } else {
                ConnectionChange::Unchanged
            };
        };

        if let Some(current) = &self.current {
            if current.credential() == credential {
                return ConnectionChange::Unchanged;
            }
            tracing::info!("Credential changed, replacing connection");
        }

        // 새 연결을 열기 전에 기존 연결 해제
        self.close();
        self.current = Some(self.connector.open(credential));
        self.status.send_replace(ConnectionStatus::Connecting);
        tracing::info!("Connection opening");
        ConnectionChange::Opened
    }

    /// 현재 연결 해제 (연결이 있었으면 true)
    pub fn close(&mut self) -> bool {
        let closed = self.current.take().is_some();
        if closed {
            tracing::info!("Connection closed");
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
        closed
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.current.as_ref().map(Connection::credential)
    }

    pub fn emit(&self, message: ClientMessage) -> bool {
        match &self.current {
            Some(connection) => connection.emit(message),
            None => {
                tracing::debug!(dropped = ?message, "No connection, message dropped");
                false
            }
        }
    }

    /// 다음 전송 이벤트 대기 (연결이 없으면 영원히 대기)
    ///
    /// `None` 은 전송 태스크가 끝났다는 뜻이다.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.current.as_mut() {
            Some(connection) => connection.inbound.recv().await,
            None => std::future::pending().await,
        }
    }

    /// 수명 주기 이벤트 기록 (관찰용)
    pub fn observe(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Connected => {
                tracing::info!("Socket connected");
                self.status.send_replace(ConnectionStatus::Connected);
            }
            TransportEvent::Disconnected => {
                tracing::info!("Socket disconnected");
                self.status.send_replace(ConnectionStatus::Disconnected);
            }
            TransportEvent::Error(error) => {
                tracing::error!(error = %error, "Socket connection error");
            }
            TransportEvent::Message(_) => {}
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}
