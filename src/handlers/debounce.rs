//! 송신 타이핑 디바운서

use crate::protocol::{ClientMessage, RoomId};
use std::time::Duration;
use tokio::time::Instant;

/// 진행 중인 타이핑 세션
///
/// 플래그와 타이머를 하나의 값으로 묶어 둘이 어긋날 수 없게 한다.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypingSession {
    room_id: RoomId,
    deadline: Instant,
}

/// 로컬 입력을 typing/stopTyping 알림으로 변환
///
/// 타이핑 세션 하나당 stopTyping 은 정확히 한 번 나간다. 입력을 비우거나,
/// 조용한 구간이 지나거나, 방을 바꾸거나, 메시지를 보낼 때 중 먼저 오는 쪽이다.
#[derive(Debug)]
pub struct TypingDebouncer {
    quiet: Duration,
    session: Option<TypingSession>,
}

impl TypingDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            session: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.session.is_some()
    }

    /// 대기 중인 stopTyping 타이머 만료 시각
    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.deadline)
    }

    /// 로컬 입력 변경 처리
    pub fn on_input_changed(
        &mut self,
        room_id: &str,
        text: &str,
        now: Instant,
    ) -> Option<ClientMessage> {
        if text.is_empty() {
            return self.flush();
        }

        let deadline = now + self.quiet;
        match &mut self.session {
            Some(session) => {
                // 기존 타이머 취소 후 재설정
                session.deadline = deadline;
                None
            }
            None => {
                self.session = Some(TypingSession {
                    room_id: room_id.to_string(),
                    deadline,
                });
                Some(ClientMessage::Typing {
                    room_id: room_id.to_string(),
                })
            }
        }
    }

    /// 타이머 만료 확인
    pub fn poll_expired(&mut self, now: Instant) -> Option<ClientMessage> {
        let expired = matches!(&self.session, Some(session) if session.deadline <= now);
        if !expired {
            return None;
        }

        let message = self.flush();
        tracing::debug!(emitted = ?message, "Typing quiet interval elapsed");
        message
    }

    /// 남은 stopTyping 의무를 즉시 처리 (방 전환, 메시지 전송)
    pub fn flush(&mut self) -> Option<ClientMessage> {
        self.session
            .take()
            .map(|session| ClientMessage::StopTyping {
                room_id: session.room_id,
            })
    }

    /// 알림 없이 상태만 초기화 (연결이 교체되어 서버가 이전 상태를 잊은 경우)
    pub fn reset(&mut self) {
        self.session = None;
    }
}
