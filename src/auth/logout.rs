use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::info;

use crate::{hub::Hub, profiles::store, session::USER_ID, AppResult};

use super::login::is_local;

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    session: Session
) -> AppResult<Redirect> {
    if let Some(user_id) = session.get::<String>(USER_ID).await? {
        store::set_online(&db_pool, &hub, &user_id, false).await?;
        info!("goodbye {user_id}");
    }
    session.clear().await;

    let return_url = return_url.filter(|url| is_local(url)).unwrap_or("/".to_string());
    Ok(Redirect::to(return_url.as_str()))
}
