//! 환경 변수 기반 설정 관리

use std::env;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// 클라이언트 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub socket_url: String,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub sync: SyncConfig,
    pub request_timeout_ms: u64,
    pub log_level: String,
}

/// 동기화 타이밍 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// 마지막 입력 후 stopTyping 을 보내기까지의 대기 시간
    pub typing_quiet_ms: u64,
    /// 활성 대화방 메시지 이력 폴링 주기
    pub poll_interval_ms: u64,
    /// 보낸 메시지를 서버 확인 전에 임시로 표시할지
    pub local_echo: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_quiet_ms: 2000,
            poll_interval_ms: 3000,
            local_echo: false,
        }
    }
}

impl SyncConfig {
    pub fn typing_quiet(&self) -> Duration {
        Duration::from_millis(self.typing_quiet_ms)
    }

    /// 0 은 interval 이 허용하지 않으므로 최소 1ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_url = env::var("API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let socket_url = env::var("SOCKET_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| derive_socket_url(&api_url));

        Self {
            socket_url,
            api_url,
            auth_token: non_blank(env::var("AUTH_TOKEN").ok()),
            user_id: non_blank(env::var("USER_ID").ok()),
            sync: SyncConfig {
                typing_quiet_ms: env::var("TYPING_QUIET_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
                poll_interval_ms: env::var("POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
                local_echo: env::var("LOCAL_ECHO")
                    .map(|v| v == "true")
                    .unwrap_or(false),
            },
            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10000),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// REST 주소에서 실시간 채널 주소 유도 (`/api` 접미사 제거, ws 스킴, `/ws` 경로)
pub fn derive_socket_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    let base = trimmed.strip_suffix("/api").unwrap_or(trimmed);

    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };

    format!("{base}/ws")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
