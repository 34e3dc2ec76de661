use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect}};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::warn;

use crate::{
    hub::Hub,
    profiles::store,
    session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, USER_ID},
    AppResult, AppState, ChatError,
};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code, error }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    if let Some(error) = error {
        warn!("{provider} sign-in refused: {error}");
        return Err(ChatError::SignIn(error).into());
    }
    let state = CsrfToken::new(state.ok_or(ChatError::SignIn("OAuth: without state".to_owned()))?);
    let code = AuthorizationCode::new(code.ok_or(ChatError::SignIn("OAuth: without code".to_owned()))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(ChatError::SignIn("no csrf_state".to_owned()).into());
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err(ChatError::SignIn("csrf tokens don't match".to_owned()).into());
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(ChatError::SignIn("no pkce_verifier".to_owned()).into());
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await
        .map_err(|e| {
            warn!("{provider} token exchange: {e}");
            ChatError::SignIn(format!("{provider} token exchange failed"))
        })?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.get(provider.userinfo_url())
        .bearer_auth(access_token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let profile = store::upsert_signed_in(&db_pool, &hub, provider.parse_userinfo(&body)?).await?;
    session.cycle_id().await?;
    session.insert(USER_ID, profile.id).await?;

    let return_url: String = session.remove(RETURN_URL).await?.unwrap_or("/".to_string());
    Ok(Redirect::to(return_url.as_str()))
}
