//! 에러 타입 정의

use thiserror::Error;

/// REST API 호출 에러
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unauthorized: bearer token rejected")]
    Unauthorized,

    #[error("invalid API url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not an image: {content_type}")]
    NotAnImage { content_type: String },
}

/// 실시간 전송 계층 에러
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid credential header: {0}")]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 클라이언트 핸들 에러
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session loop is no longer running")]
    SessionClosed,

    #[error("nothing to send")]
    EmptyMessage,

    #[error("no conversation is active")]
    NoActiveRoom,

    #[error("realtime connection is not available")]
    NotConnected,

    #[error(transparent)]
    Api(#[from] ApiError),
}
