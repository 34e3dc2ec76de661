use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{info, warn};

use crate::{ChatError, GetField};

/// Client for the hosted image API: one multipart POST per image, answered
/// with the image's public URL.
#[derive(Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    upload_url: String,
    upload_preset: String,
}

impl MediaClient {
    pub fn new(upload_url: String, upload_preset: String) -> MediaClient {
        MediaClient {
            http: reqwest::Client::new(),
            upload_url,
            upload_preset,
        }
    }

    pub async fn upload(&self, file_name: String, content_type: Option<String>, bytes: Vec<u8>) -> Result<String, ChatError> {
        let size = bytes.len();
        let mut part = Part::bytes(bytes).file_name(file_name.clone());
        if let Some(content_type) = content_type {
            part = part.mime_str(&content_type).map_err(upload_failed)?;
        }
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone());

        let response = self.http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(upload_failed)?;
        if !response.status().is_success() {
            warn!("media host rejected {file_name}: {}", response.status());
            return Err(ChatError::Upload(format!("media host answered {}", response.status())));
        }

        let body: Value = response.json().await.map_err(upload_failed)?;
        let url = secure_url(&body)?;
        info!("uploaded {file_name} ({size} bytes) to {url}");
        Ok(url)
    }
}

fn upload_failed(err: reqwest::Error) -> ChatError {
    warn!("image upload: {err}");
    ChatError::Upload(err.to_string())
}

pub fn secure_url(body: &Value) -> Result<String, ChatError> {
    body.get_str_field("secure_url")
        .map_err(|e| ChatError::Upload(e.0.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_secure_url() {
        let body = json!({ "secure_url": "https://res.example/img.png", "url": "http://res.example/img.png" });
        assert_eq!(secure_url(&body).unwrap(), "https://res.example/img.png");
    }

    #[test]
    fn missing_url_is_an_upload_error() {
        let body = json!({ "error": { "message": "Upload preset not found" } });
        assert!(matches!(secure_url(&body), Err(ChatError::Upload(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_upload_error() {
        let media = MediaClient::new("http://127.0.0.1:9/upload".to_owned(), "profilepic".to_owned());
        let result = media.upload("cat.png".to_owned(), Some("image/png".to_owned()), vec![1, 2, 3]).await;
        assert!(matches!(result, Err(ChatError::Upload(_))));
    }
}
