use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transcript::SECONDARY_DELIMITER;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    /// What the user sees for a failed upload: the raw response body when the
    /// backend answered, otherwise the error itself.
    pub fn user_facing_text(&self) -> String {
        match self {
            ClientError::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InterpreterOutput {
    #[serde(default)]
    pub result: Value,
}

/// Reply to `/send_message`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageReply {
    #[serde(default, alias = "gpt_response")]
    pub response: Option<String>,
    /// Follow-up written after the interpreter ran, when the backend split it off
    #[serde(default, alias = "gpt_response2")]
    pub response2: Option<String>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub interpreter_output: Option<InterpreterOutput>,
}

impl MessageReply {
    /// Reply text as the transcript should receive it. A split-off follow-up
    /// is joined back with the delimiter so the renderer styles both halves.
    pub fn text(&self) -> String {
        let first = self.response.as_deref().unwrap_or_default();
        match self.response2.as_deref() {
            Some(second) => format!("{first}{SECONDARY_DELIMITER}{second}"),
            None => first.to_string(),
        }
    }

    pub fn output(&self) -> Option<String> {
        self.interpreter_output
            .as_ref()
            .filter(|output| !output.result.is_null())
            .map(|output| display_value(&output.result))
    }
}

/// Reply to `/send_file`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadReply {
    #[serde(default, alias = "system")]
    pub result: Value,
    #[serde(default)]
    pub completion: Option<Value>,
}

impl UploadReply {
    pub fn result_text(&self) -> String {
        display_value(&self.result)
    }
}

/// Strings verbatim, everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Serialize)]
struct SaveSessionRequest<'a> {
    uuid: &'a str,
    #[serde(rename = "apiKey")]
    api_key: &'a str,
}

#[derive(Serialize)]
struct DeleteChatRequest<'a> {
    uuid: &'a str,
}

/// HTTP client for the GPT-X backend. Every request carries the session id
/// the backend keys its assistants by.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    session_id: String,
}

impl BackendClient {
    pub fn new(base_url: &str, session_id: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    pub async fn send_message(&self, message: &str) -> Result<MessageReply, ClientError> {
        let response = self
            .client
            .post(self.url("send_message"))
            .form(&[("message", message), ("uuid", self.session_id.as_str())])
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    pub async fn send_file(&self, path: &Path) -> Result<UploadReply, ClientError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.essence_str())?;
        let form = Form::new()
            .text("uuid", self.session_id.clone())
            .part("file", part);

        let response = self
            .client
            .post(self.url("send_file"))
            .multipart(form)
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Register this session (and the OpenAI key the backend should use).
    pub async fn register_session(&self, api_key: &str) -> Result<(), ClientError> {
        let request = SaveSessionRequest {
            uuid: &self.session_id,
            api_key,
        };
        let response = self
            .client
            .post(self.url("save_uuid"))
            .json(&request)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Drop the backend's conversation for this session.
    pub async fn delete_chat(&self) -> Result<(), ClientError> {
        let request = DeleteChatRequest {
            uuid: &self.session_id,
        };
        let response = self
            .client
            .post(self.url("delete_chat"))
            .json(&request)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_message_reply_accepts_backend_spelling() {
        let reply: MessageReply = serde_json::from_value(json!({
            "gpt_response": "Sure.",
            "gpt_response2": "It printed 3.",
            "code_snippet": "print(1 + 2)",
            "interpreter_output": {"result": "3"}
        }))
        .unwrap();

        assert_eq!(reply.text(), "Sure.RES2:It printed 3.");
        assert_eq!(reply.code_snippet.as_deref(), Some("print(1 + 2)"));
        assert_eq!(reply.output().as_deref(), Some("3"));
    }

    #[test]
    fn test_message_reply_with_nulls() {
        let reply: MessageReply = serde_json::from_value(json!({
            "response": "Hello",
            "code_snippet": null,
            "interpreter_output": null
        }))
        .unwrap();

        assert_eq!(reply.text(), "Hello");
        assert_eq!(reply.code_snippet, None);
        assert_eq!(reply.output(), None);
    }

    #[test]
    fn test_upload_result_display() {
        let reply: UploadReply =
            serde_json::from_value(json!({"system": "File data.csv saved to disk successfully!"}))
                .unwrap();
        assert_eq!(reply.result_text(), "File data.csv saved to disk successfully!");

        let reply: UploadReply = serde_json::from_value(json!({"result": {"rows": 3}})).unwrap();
        assert_eq!(reply.result_text(), r#"{"rows":3}"#);
    }

    #[tokio::test]
    async fn test_send_message_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send_message"))
            .and(body_string_contains("message=hi+there"))
            .and(body_string_contains("uuid=session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Hello!",
                "code_snippet": "print('hello')",
                "interpreter_output": {"result": "hello"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri(), "session-1");
        let reply = client.send_message("hi there").await.expect("send message");

        assert_eq!(reply.text(), "Hello!");
        assert_eq!(reply.output().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_file_uploads_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("numbers.csv");
        std::fs::write(&file, "1,2,3\n").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send_file"))
            .and(body_string_contains("name=\"file\"; filename=\"numbers.csv\""))
            .and(body_string_contains("1,2,3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "File numbers.csv saved to disk successfully!",
                "completion": "I see three numbers."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri(), "session-1");
        let reply = client.send_file(&file).await.expect("upload");
        assert_eq!(reply.result_text(), "File numbers.csv saved to disk successfully!");
        assert!(reply.completion.is_some());
    }

    #[tokio::test]
    async fn test_send_file_error_keeps_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, "").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send_file"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error": "No file provided. Please attach a file to the request."}"#,
            ))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri(), "session-1");
        let err = client.send_file(&file).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Status { status, .. } if status == StatusCode::BAD_REQUEST
        ));
        assert_eq!(
            err.user_facing_text(),
            r#"{"error": "No file provided. Please attach a file to the request."}"#
        );
    }

    #[tokio::test]
    async fn test_send_file_missing_path() {
        let client = BackendClient::new("http://127.0.0.1:9", "session-1");
        let err = client
            .send_file(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io { .. }));
    }

    #[tokio::test]
    async fn test_session_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save_uuid"))
            .and(body_string_contains("\"apiKey\":\"sk-test\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/delete_chat"))
            .and(body_string_contains("\"uuid\":\"session-1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(&format!("{}/", server.uri()), "session-1");
        client.register_session("sk-test").await.expect("register");
        client.delete_chat().await.expect("delete");
    }
}
