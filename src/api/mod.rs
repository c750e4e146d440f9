//! REST API 연동

pub mod client;
pub mod types;

pub use client::{ApiClient, TokenCache};
pub use types::*;

use crate::error::ApiError;
use std::future::Future;

/// 동기화 세션이 사용하는 REST 호출
pub trait ChatApi: Send + Sync + 'static {
    fn fetch_messages(
        &self,
        query: &MessageQuery,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn upload_image(
        &self,
        image: ImageUpload,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn edit_message(
        &self,
        id: &str,
        text: &str,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn delete_message(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl ChatApi for ApiClient {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ApiError> {
        self.messages(query).await
    }

    async fn upload_image(&self, image: ImageUpload) -> Result<String, ApiError> {
        ApiClient::upload_image(self, image).await
    }

    async fn edit_message(&self, id: &str, text: &str) -> Result<Message, ApiError> {
        ApiClient::edit_message(self, id, text).await
    }

    async fn delete_message(&self, id: &str) -> Result<(), ApiError> {
        ApiClient::delete_message(self, id).await
    }
}
