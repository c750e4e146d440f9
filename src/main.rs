//! 채팅 동기화 터미널 클라이언트

use anyhow::{bail, Context};
use chat_sync_client::api::{ImageUpload, Message, MessageKind};
use chat_sync_client::handlers::ThreadStatus;
use chat_sync_client::{
    ApiClient, ChatClient, ChatKind, ChatTarget, Config, MessageDraft, Session, TokenCache,
    UserDirectory, WsConnector,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(token) = config.auth_token.clone() else {
        bail!("AUTH_TOKEN is not set");
    };

    let tokens = TokenCache::new(Some(token.clone()));
    let api = ApiClient::new(&config.api_url, config.request_timeout(), tokens)
        .context("invalid API_URL")?;

    let user_id = match config.user_id.clone() {
        Some(user_id) => user_id,
        None => api.profile().await.context("failed to load profile")?.id,
    };

    let directory = match api.users().await {
        Ok(users) => UserDirectory::from_users(&users),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load user directory, showing raw ids");
            UserDirectory::default()
        }
    };

    tracing::info!("Chat sync client started");
    tracing::info!("API: {}", config.api_url);
    tracing::info!("Socket: {}", config.socket_url);

    let connector = WsConnector::new(config.socket_url.clone());
    let (session, client) = Session::new(config.sync, user_id, connector, Arc::new(api));
    let session_task = tokio::spawn(session.run());

    client.set_credential(Some(&token))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_command(&client, &directory, line.trim_end()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }

    client.shutdown()?;
    session_task.await?;
    Ok(())
}

/// 한 줄 입력 처리 (false 면 종료)
async fn run_command(
    client: &ChatClient<ApiClient>,
    directory: &UserDirectory,
    line: &str,
) -> anyhow::Result<bool> {
    let mut parts = line.splitn(2, ' ');
    let head = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match head {
        "/open" => {
            let target = parse_target(rest, directory)?;
            println!("opened {}", target.name);
            client.open_chat(target)?;
        }
        "/close" => client.close_chat()?,
        "/leave" => client.leave_view()?,
        "/type" => client.input_changed(rest)?,
        "/image" => {
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            let image = read_image(Path::new(path)).await?;
            client
                .send_message(MessageDraft::text(caption).with_image(image))
                .await?;
        }
        "/edit" => {
            let (id, text) = rest.split_once(' ').context("usage: /edit <id> <text>")?;
            client.edit_message(id, text).await?;
        }
        "/delete" => client.delete_message(rest).await?,
        "/who" => print_presence(client, directory),
        "/history" => print_thread(client, directory),
        "/refresh" => client.refresh()?,
        "/reconnect" => client.reconnect()?,
        "/token" => {
            client.api().tokens().set(rest);
            client.set_credential(Some(rest))?;
        }
        "/logout" => {
            client.api().tokens().clear();
            client.set_credential(None)?;
        }
        "/quit" => return Ok(false),
        "" => {}
        _ => client.send_message(MessageDraft::text(line)).await?,
    }

    Ok(true)
}

/// `user|group <id> [name]`
fn parse_target(args: &str, directory: &UserDirectory) -> anyhow::Result<ChatTarget> {
    let mut parts = args.splitn(3, ' ');
    let kind = match parts.next() {
        Some("user") => ChatKind::Direct,
        Some("group") => ChatKind::Group,
        _ => bail!("usage: /open user|group <id> [name]"),
    };
    let id = parts
        .next()
        .filter(|id| !id.is_empty())
        .context("missing conversation id")?;
    let name = parts
        .next()
        .map(str::to_string)
        .or_else(|| directory.name_of(id).map(str::to_string))
        .unwrap_or_else(|| id.to_string());

    Ok(ChatTarget::new(id, kind, name))
}

async fn read_image(path: &Path) -> anyhow::Result<ImageUpload> {
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    Ok(ImageUpload::new(file_name, content_type, bytes)?)
}

fn print_presence(client: &ChatClient<ApiClient>, directory: &UserDirectory) {
    let state = client.state();
    println!("connection: {:?}", state.connection_status());

    let mut online: Vec<String> = state
        .online_users()
        .into_iter()
        .map(|id| directory.name_of(&id).map(str::to_string).unwrap_or(id))
        .collect();
    online.sort();
    println!("online: {}", online.join(", "));

    if let Some(target) = state.active_room() {
        if target.kind == ChatKind::Direct {
            let label = if state.is_target_online(&target) { "online" } else { "offline" };
            println!("{}: {label}", target.name);
        }
        let typing = state.typist_names(&target.id, directory);
        if !typing.is_empty() {
            println!("typing: {}", typing.join(", "));
        }
    }
}

fn print_thread(client: &ChatClient<ApiClient>, directory: &UserDirectory) {
    let thread = client.state().thread();
    match &thread.status {
        ThreadStatus::Idle => println!("no conversation open"),
        ThreadStatus::Loading => println!("loading..."),
        ThreadStatus::Failed(reason) => println!("last refresh failed: {reason}"),
        ThreadStatus::Ready => {}
    }

    for message in &thread.messages {
        let sender = directory.name_of(&message.sender_id).unwrap_or(&message.sender_id);
        let body = message_body(message);
        let marker = if message.pending { " (sending)" } else { "" };
        println!(
            "[{}] {sender}: {body}{marker}",
            message.created_at.format("%H:%M")
        );
    }
}

/// 첨부가 있으면 종류를 앞에 붙이고 본문은 캡션으로 뒤에 둔다
fn message_body(message: &Message) -> String {
    let (label, url) = match message.kind() {
        MessageKind::Text => return message.text.clone().unwrap_or_default(),
        MessageKind::Image => ("image", message.photo_url.as_deref()),
        MessageKind::File => ("file", message.file_url.as_deref()),
        MessageKind::Audio => ("audio", message.audio_url.as_deref()),
    };
    let url = url.unwrap_or_default();
    match message.text.as_deref() {
        Some(caption) if !caption.is_empty() => format!("[{label}] {url} {caption}"),
        _ => format!("[{label}] {url}"),
    }
}
