//! REST API 클라이언트

use super::types::{
    AddGroupMemberRequest, CreateGroupRequest, CreateMessageRequest, EditMessageRequest, Envelope,
    Group, GroupMember, ImageUpload, LoginRequest, LoginResponse, Message, MessageQuery,
    RegisterRequest, UpdateGroupMemberRequest, UpdateGroupRequest, UpdateProfileRequest,
    UploadResponse, User,
};
use crate::error::ApiError;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use url::Url;

/// 요청에 붙일 베어러 토큰 캐시 (메모리 전용)
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenCache {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// 채팅 백엔드 REST 클라이언트
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    tokens: TokenCache,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, tokens: TokenCache) -> Result<Self, ApiError> {
        // join() 이 마지막 경로 조각을 덮어쓰지 않도록 슬래시로 끝나게 맞춤
        let mut base = Url::parse(base_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, base, tokens })
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.tokens.get() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let bytes = self.execute(builder).await?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.execute(builder).await.map(|_| ())
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            // 거부된 토큰은 더 이상 쓰지 않는다
            self.tokens.clear();
            tracing::warn!("API rejected bearer token, cache cleared");
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), message = %message, "API request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    // Auth & Users

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        let url = self.url("auth/register")?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    /// 로그인 후 받은 토큰을 캐시에 저장
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let url = self.url("auth/login")?;
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self
            .send(self.request(Method::POST, url).json(&request))
            .await?;
        self.tokens.set(response.token.clone());
        tracing::info!(user_id = %response.user.id, "Logged in");
        Ok(response)
    }

    pub async fn profile(&self) -> Result<User, ApiError> {
        let url = self.url("auth/profile")?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> Result<User, ApiError> {
        let url = self.url("auth/profile")?;
        self.send(self.request(Method::PUT, url).json(request)).await
    }

    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        let url = self.url("auth/users")?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn search(&self, name: &str, kind: &str) -> Result<Vec<User>, ApiError> {
        let mut url = self.url("search")?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("type", kind);
        self.send(self.request(Method::GET, url)).await
    }

    // Messages

    pub async fn create_message(&self, request: &CreateMessageRequest) -> Result<Message, ApiError> {
        let url = self.url("messages")?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    pub async fn messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ApiError> {
        let mut url = self.url("messages")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("senderId", &query.sender_id);
            if let Some(receiver_id) = &query.receiver_id {
                pairs.append_pair("receiverId", receiver_id);
            }
            if let Some(group_id) = &query.group_id {
                pairs.append_pair("groupId", group_id);
            }
        }
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn message(&self, id: &str) -> Result<Message, ApiError> {
        let url = self.url(&format!("messages/{id}"))?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn edit_message(&self, id: &str, text: &str) -> Result<Message, ApiError> {
        let url = self.url(&format!("messages/{id}"))?;
        let request = EditMessageRequest {
            text: text.to_string(),
        };
        self.send(self.request(Method::PUT, url).json(&request)).await
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("messages/{id}"))?;
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    // Groups

    pub async fn create_group(&self, request: &CreateGroupRequest) -> Result<Group, ApiError> {
        let url = self.url("groups")?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    pub async fn groups(&self) -> Result<Vec<Group>, ApiError> {
        let url = self.url("groups")?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn group(&self, id: &str) -> Result<Group, ApiError> {
        let url = self.url(&format!("groups/{id}"))?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn update_group(&self, id: &str, request: &UpdateGroupRequest) -> Result<Group, ApiError> {
        let url = self.url(&format!("groups/{id}"))?;
        self.send(self.request(Method::PUT, url).json(request)).await
    }

    pub async fn delete_group(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("groups/{id}"))?;
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    // Group Members

    pub async fn add_group_member(&self, request: &AddGroupMemberRequest) -> Result<GroupMember, ApiError> {
        let url = self.url("groupmembers")?;
        self.send(self.request(Method::POST, url).json(request)).await
    }

    pub async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        let mut url = self.url("groupmembers")?;
        url.query_pairs_mut().append_pair("groupId", group_id);
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn group_member(&self, id: &str) -> Result<GroupMember, ApiError> {
        let url = self.url(&format!("groupmembers/{id}"))?;
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn update_group_member(
        &self,
        id: &str,
        request: &UpdateGroupMemberRequest,
    ) -> Result<GroupMember, ApiError> {
        let url = self.url(&format!("groupmembers/{id}"))?;
        self.send(self.request(Method::PUT, url).json(request)).await
    }

    pub async fn delete_group_member(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("groupmembers/{id}"))?;
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    // Uploads

    /// 이미지 업로드 후 URL 반환
    pub async fn upload_image(&self, image: ImageUpload) -> Result<String, ApiError> {
        let url = self.url("upload/image")?;
        let file_name = image.file_name().to_string();
        let content_type = image.content_type().to_string();
        let part = reqwest::multipart::Part::bytes(image.into_bytes())
            .file_name(file_name)
            .mime_str(&content_type)?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response: UploadResponse = self
            .send(self.request(Method::POST, url).multipart(form))
            .await?;
        Ok(response.url)
    }
}
