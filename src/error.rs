use axum::http::StatusCode;
use uuid::Uuid;

/// Failures a client can cause or observe. Anything else surfaces as a 500.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("sign-in failed: {0}")]
    SignIn(String),
    #[error("a conversation needs two participants")]
    MissingParticipant,
    #[error("message has neither text nor an image")]
    EmptyMessage,
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("unknown {kind} {value:?}")]
    UnknownPreference { kind: &'static str, value: String },
    #[error("image upload failed: {0}")]
    Upload(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self {
            Unauthenticated | SignIn(_) => StatusCode::UNAUTHORIZED,
            MissingParticipant | EmptyMessage | UnknownPreference { .. } => StatusCode::BAD_REQUEST,
            MessageNotFound(_) | UserNotFound(_) => StatusCode::NOT_FOUND,
            Upload(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
