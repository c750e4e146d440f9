//! 채팅 클라이언트 실시간 동기화 (접속 상태, 타이핑, 방 참여, 메시지 이력)

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

pub use api::{ApiClient, ChatApi, TokenCache};
pub use config::{Config, SyncConfig};
pub use error::{ApiError, ClientError, TransportError};
pub use session::{ChatClient, Command, MessageDraft, Session};
pub use state::{ChatKind, ChatTarget, SyncState, UserDirectory};
pub use transport::WsConnector;
