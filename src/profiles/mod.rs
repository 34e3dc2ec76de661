pub mod prefs;
mod roster;
pub mod store;

use axum::{routing::get, Router};

use crate::AppState;

pub use prefs::Preferences;
pub use store::{Profile, SignedIn};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/me", get(roster::me))
        .route("/api/users", get(roster::users))
        .route("/api/prefs", get(prefs::get_prefs).put(prefs::put_prefs))
}
