//! WebSocket 전송 계층

use crate::error::TransportError;
use crate::handlers::{Connection, Connector, Credential, TransportEvent};
use crate::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

/// JSON 텍스트 프레임을 주고받는 WebSocket 커넥터
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn open(&self, credential: &Credential) -> Connection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // 연결 전에 보낸 메시지는 채널에 쌓였다가 연결 후 전송됨
        let task = tokio::spawn(run_socket(
            self.url.clone(),
            credential.clone(),
            outbound_rx,
            inbound_tx,
        ));

        Connection::new(credential.clone(), outbound_tx, inbound_rx).with_task(task)
    }
}

async fn run_socket(
    url: String,
    credential: Credential,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    if let Err(e) = drive_socket(&url, &credential, outbound, &inbound).await {
        let _ = inbound.send(TransportEvent::Error(e.to_string()));
    }
    let _ = inbound.send(TransportEvent::Disconnected);
}

async fn drive_socket(
    url: &str,
    credential: &Credential,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportError> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", credential.token()))?,
    );

    let (socket, _) = connect_async(request).await?;
    let _ = inbound.send(TransportEvent::Connected);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    let json = serde_json::to_string(&message)?;
                    ws_sender.send(Message::Text(json)).await?;
                }
                None => {
                    // 연결 핸들이 드롭됨
                    let _ = ws_sender.close().await;
                    return Ok(());
                }
            },
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        if inbound.send(TransportEvent::Message(message)).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropped malformed server frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
