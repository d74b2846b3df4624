use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::config::client::ClientConfig;
use crate::modules::session::{
    model::{sort_messages, Message, Session},
    schema::{AuthUser, CreateSessionRequest, NewMessage, RenameSessionRequest},
};
use crate::services::store::{ChatStore, StoreError};

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(alias = "msg", alias = "error_description")]
    message: Option<String>,
}

/// GoTrue + PostgREST client for the `sessions` and `messages` tables.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

impl SupabaseStore {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
            access_token: RwLock::new(None),
        }
    }

    fn bearer(&self) -> String {
        let token = self.access_token.read().clone();
        format!("Bearer {}", token.unwrap_or_else(|| self.anon_key.clone()))
    }

    fn rest(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", self.bearer())
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&text)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(text);

        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(%message, "store rejected credentials");
            return Err(StoreError::Unauthenticated);
        }
        Err(StoreError::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    async fn authenticate(&self, url: String, email: &str, password: &str) -> Result<AuthUser, StoreError> {
        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&Credentials { email, password })
            .send()
            .await?;

        let token: TokenResponse = Self::check(response).await?.json().await?;
        let user = token
            .user
            .ok_or_else(|| StoreError::InvalidResponse("No user in auth response".to_string()))?;

        // Sign-up with email confirmation returns a user but no session.
        *self.access_token.write() = token.access_token;
        Ok(user)
    }

    fn owner_filter(session_id: &str, user_id: &str) -> [(&'static str, String); 2] {
        [("id", format!("eq.{}", session_id)), ("user_id", format!("eq.{}", user_id))]
    }
}

#[async_trait]
impl ChatStore for SupabaseStore {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, StoreError> {
        self.authenticate(format!("{}/auth/v1/signup", self.base_url), email, password)
            .await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, StoreError> {
        self.authenticate(
            format!("{}/auth/v1/token?grant_type=password", self.base_url),
            email,
            password,
        )
        .await
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        if self.access_token.read().is_none() {
            return Ok(());
        }

        let response = self
            .rest(self.client.post(format!("{}/auth/v1/logout", self.base_url)))
            .send()
            .await?;
        *self.access_token.write() = None;
        Self::check(response).await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>, StoreError> {
        if self.access_token.read().is_none() {
            return Ok(None);
        }

        let response = self
            .rest(self.client.get(format!("{}/auth/v1/user", self.base_url)))
            .send()
            .await?;

        match Self::check(response).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(StoreError::Unauthenticated) => {
                *self.access_token.write() = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let response = self
            .rest(self.client.get(self.table_url("sessions")))
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_session(&self, request: CreateSessionRequest) -> Result<Session, StoreError> {
        let response = self
            .rest(self.client.post(self.table_url("sessions")))
            .header("Prefer", "return=representation")
            .json(&[request])
            .send()
            .await?;

        let rows: Vec<Session> = Self::check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidResponse("Insert returned no session".to_string()))
    }

    async fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> Result<(), StoreError> {
        let response = self
            .rest(self.client.patch(self.table_url("sessions")))
            .header("Prefer", "return=representation")
            .query(&Self::owner_filter(session_id, user_id))
            .json(&RenameSessionRequest {
                title: title.to_string(),
            })
            .send()
            .await?;

        let rows: Vec<Session> = Self::check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let response = self
            .rest(self.client.delete(self.table_url("sessions")))
            .header("Prefer", "return=representation")
            .query(&Self::owner_filter(session_id, user_id))
            .send()
            .await?;

        let rows: Vec<Session> = Self::check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let response = self
            .rest(self.client.get(self.table_url("messages")))
            .query(&[
                ("select", "*".to_string()),
                ("session_id", format!("eq.{}", session_id)),
                ("order", "created_at.asc,id.asc".to_string()),
            ])
            .send()
            .await?;

        let mut messages: Vec<Message> = Self::check(response).await?.json().await?;
        sort_messages(&mut messages);
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let response = self
            .rest(self.client.post(self.table_url("messages")))
            .header("Prefer", "return=representation")
            .json(&[message])
            .send()
            .await?;

        let rows: Vec<Message> = Self::check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidResponse("Insert returned no message".to_string()))
    }
}
