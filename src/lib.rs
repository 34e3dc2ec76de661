pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod profiles;
pub mod rooms;
pub mod session;

use std::{sync::Arc, time::Duration};

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, Json, Router};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use config::Config;
pub use error::ChatError;

use cache::TtlCache;
use hub::Hub;
use rooms::{MediaClient, MessageStore, Previews, TypingFlags};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub clients: auth::Clients,
    pub hub: Arc<Hub>,
    pub messages: MessageStore,
    pub typing: TypingFlags,
    pub previews: Previews,
    pub media: MediaClient,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, clients: auth::Clients, config: Config) -> AppState {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let hub = Arc::new(Hub::new());
        let preview_cache = Arc::new(TtlCache::new(ttl));
        preview_cache.spawn_purge(ttl);

        let messages = MessageStore::new(db_pool.clone(), hub.clone(), ttl, preview_cache.clone());
        let typing = TypingFlags::new(db_pool.clone(), hub.clone());
        let previews = Previews::new(db_pool.clone(), messages.clone(), typing.clone(), preview_cache);
        let media = MediaClient::new(config.media_upload_url.clone(), config.media_upload_preset.clone());

        AppState {
            db_pool,
            clients,
            hub,
            messages,
            typing,
            previews,
            media,
            config: Arc::new(config),
        }
    }
}

/// Every route plus the session, trace and CORS layers.
pub fn app(state: AppState, sessions: MemoryStore) -> Router {
    let session_layer = SessionManagerLayer::new(sessions)
        .with_secure(state.config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(state.config.session_idle_minutes)));

    Router::new()
        .merge(auth::router())
        .merge(profiles::router())
        .merge(rooms::router())
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(format!("expected {field} in {self}").into())
    }
}


pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.0
            .downcast_ref::<ChatError>()
            .map(ChatError::status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{:#}", self.0);
        } else {
            tracing::debug!("{status}: {}", self.0);
        }

        (
            status,
            Json(json!({ "error": { "message": self.0.to_string() } })),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(sqlx::migrate::MigrateError);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(axum::Error);
apperr_impl!(axum::extract::multipart::MultipartError);
apperr_impl!(reqwest::Error);
apperr_impl!(std::io::Error);
apperr_impl!(uuid::Error);
apperr_impl!(oauth2::url::ParseError);

impl<E: core::error::Error + Send + Sync + 'static, R: oauth2::ErrorResponse + Send + Sync + 'static> From<oauth2::RequestTokenError<E, R>> for AppError {
    fn from(err: oauth2::RequestTokenError<E, R>) -> Self {
        Self(anyhow::Error::from(err))
    }
}
