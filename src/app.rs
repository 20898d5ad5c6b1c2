use std::path::{Path, PathBuf};

use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{BackendClient, ClientError, MessageReply, UploadReply};
use crate::config::Config;
use crate::snippets::SnippetHistory;
use crate::transcript::{Sender, Transcript};
use crate::tui::AppEvent;
use crate::watcher::{self, FileChange, FolderWatcher, WatchError, WatchHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Results that background tasks hand back to the UI loop
#[derive(Debug)]
pub enum BackendEvent {
    MessageReply(Result<MessageReply, ClientError>),
    UploadReply(Result<UploadReply, ClientError>),
    ChatDeleted(Result<(), ClientError>),
    FolderChange(FileChange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    UploadFile,
    WatchFolder,
}

impl PromptKind {
    pub fn title(&self) -> &'static str {
        match self {
            PromptKind::UploadFile => "Upload File",
            PromptKind::WatchFolder => "Watch Uploads Folder",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            PromptKind::UploadFile => "Path of the file to send. Enter to upload, Esc to cancel.",
            PromptKind::WatchFolder => "Grant access to a folder named \"uploads\". Enter to watch, Esc to cancel.",
        }
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line text field with a cursor counted in characters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInput {
    pub value: String,
    pub cursor: usize,
}

impl TextInput {
    pub fn with_value(value: impl Into<String>) -> Self {
        let value = value.into();
        let cursor = value.chars().count();
        Self { value, cursor }
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.value, self.cursor);
        self.value.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.value.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }
}

#[derive(Debug, Clone)]
pub struct PathPrompt {
    pub kind: PromptKind,
    pub input: TextInput,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub input: TextInput,

    // Chat state
    pub transcript: Transcript,
    pub snippets: SnippetHistory,
    pub pending_replies: usize,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Transcript scrolling
    pub transcript_scroll: u16,
    pub transcript_height: u16, // Inner height of the transcript pane
    pub transcript_width: u16,  // Inner width the transcript wraps at
    pub follow_transcript: bool,

    // Popups
    pub prompt: Option<PathPrompt>,
    pub notice: Option<String>,

    // Panel area for mouse hit-testing (updated during render)
    pub transcript_area: Option<Rect>,

    pub client: BackendClient,
    pub config: Config,
    pub watch: Option<WatchHandle>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(config: Config, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        let client = BackendClient::new(&config.server_url, config.session_id());

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            input: TextInput::default(),

            transcript: Transcript::new(),
            snippets: SnippetHistory::new(),
            pending_replies: 0,
            animation_frame: 0,

            transcript_scroll: 0,
            transcript_height: 0,
            transcript_width: 0,
            follow_transcript: true,

            prompt: None,
            notice: None,

            transcript_area: None,

            client,
            config,
            watch: None,
            events,
        }
    }

    /// Tell the backend about this session so it creates an assistant for it.
    /// Only done when an API key is available; failures are logged.
    pub fn register_session(&self) -> Option<JoinHandle<()>> {
        self.register_session_with(self.config.resolved_api_key())
    }

    fn register_session_with(&self, api_key: Option<String>) -> Option<JoinHandle<()>> {
        let Some(api_key) = api_key else {
            tracing::info!("no API key configured; skipping session registration");
            return None;
        };
        let client = self.client.clone();
        Some(tokio::spawn(async move {
            match client.register_session(&api_key).await {
                Ok(()) => tracing::info!(session = client.session_id(), "session registered"),
                Err(e) => tracing::warn!(error = %e, "session registration failed"),
            }
        }))
    }

    /// Submit the input box. Returns false (and leaves the input alone) when
    /// the trimmed input is empty.
    pub fn submit_input(&mut self) -> bool {
        let message = self.input.value.trim().to_string();
        if message.is_empty() {
            return false;
        }

        self.append_message(Sender::User, &message);
        self.input.clear();
        self.pending_replies += 1;

        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.send_message(&message).await;
            let _ = tx.send(AppEvent::Backend(BackendEvent::MessageReply(result)));
        });
        true
    }

    pub fn append_message(&mut self, sender: Sender, text: &str) {
        self.transcript.append(sender, text);
        self.follow_transcript = true;
        self.scroll_transcript_to_bottom();
    }

    pub fn apply_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::MessageReply(result) => {
                self.pending_replies = self.pending_replies.saturating_sub(1);
                match result {
                    Ok(reply) => self.apply_message_reply(reply),
                    // No transcript entry for failed sends, the reply is dropped
                    Err(e) => tracing::warn!(error = %e, "send_message failed"),
                }
            }
            BackendEvent::UploadReply(result) => self.apply_upload_reply(result),
            BackendEvent::ChatDeleted(Ok(())) => tracing::info!("backend conversation deleted"),
            BackendEvent::ChatDeleted(Err(e)) => {
                tracing::warn!(error = %e, "delete_chat failed");
                self.notice = Some(format!("Could not clear the backend conversation:\n{e}"));
            }
            BackendEvent::FolderChange(change) => {
                self.transcript.append_with_preview(
                    Sender::System,
                    &change.message(),
                    change.entry.preview(),
                );
                self.follow_transcript = true;
                self.scroll_transcript_to_bottom();
            }
        }
    }

    fn apply_message_reply(&mut self, reply: MessageReply) {
        let parsed = self.transcript.append(Sender::Assistant, &reply.text()).parsed.clone();
        self.follow_transcript = true;
        self.scroll_transcript_to_bottom();

        let code = reply
            .code_snippet
            .clone()
            .filter(|code| !code.trim().is_empty())
            .or(parsed.code_block);
        let output = reply.output().or(parsed.interpreter_output);

        match (code, output) {
            (Some(code), output) => self.snippets.record(code, output),
            (None, Some(output)) => self.snippets.record_output(output),
            (None, None) => {}
        }
    }

    fn apply_upload_reply(&mut self, result: Result<UploadReply, ClientError>) {
        match result {
            Ok(reply) => {
                if let Some(completion) = &reply.completion {
                    tracing::debug!(%completion, "upload completion not rendered");
                }
                self.append_message(Sender::Interpreter, &reply.result_text());
            }
            Err(e) => {
                tracing::warn!(error = %e, "send_file failed");
                let text = format!("Error: {}", e.user_facing_text());
                self.append_message(Sender::Interpreter, &text);
            }
        }
    }

    /// Post a local file to the backend in the background.
    pub fn upload_file(&mut self, path: PathBuf) {
        if path.as_os_str().is_empty() {
            return;
        }
        tracing::info!(path = %path.display(), "uploading file");
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.send_file(&path).await;
            let _ = tx.send(AppEvent::Backend(BackendEvent::UploadReply(result)));
        });
    }

    /// Start polling `dir` for new files, replacing any running watch.
    pub fn monitor_uploads_folder(&mut self, dir: PathBuf) {
        match watcher::check_folder(&dir) {
            Ok(()) => {
                if let Some(previous) = self.watch.take() {
                    previous.stop();
                }
                tracing::info!(dir = %dir.display(), "watching uploads folder");
                let watcher = FolderWatcher::new(dir, self.config.poll_interval());
                self.watch = Some(watcher.spawn(self.events.clone()));
            }
            Err(e @ WatchError::Unavailable(_)) => {
                tracing::warn!(error = %e, "folder access unavailable");
                self.notice = Some(format!("Folder access is not available.\n{e}"));
            }
            Err(e @ WatchError::WrongName(_)) => {
                tracing::warn!(error = %e, "refusing to watch folder");
                self.notice = Some(e.to_string());
            }
        }
    }

    pub fn watched_folder(&self) -> Option<&Path> {
        self.watch.as_ref().map(|handle| handle.dir())
    }

    /// Clear the local chat and ask the backend to forget the conversation.
    pub fn delete_chat(&mut self) {
        self.transcript.clear();
        self.snippets.clear();
        self.transcript_scroll = 0;
        self.follow_transcript = true;

        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.delete_chat().await;
            let _ = tx.send(AppEvent::Backend(BackendEvent::ChatDeleted(result)));
        });
    }

    pub fn previous_snippet(&mut self) {
        self.snippets.go_previous();
    }

    pub fn next_snippet(&mut self) {
        self.snippets.go_next();
    }

    // Popups
    pub fn open_prompt(&mut self, kind: PromptKind) {
        let input = match kind {
            PromptKind::UploadFile => TextInput::default(),
            PromptKind::WatchFolder => {
                TextInput::with_value(self.config.uploads_dir.display().to_string())
            }
        };
        self.prompt = Some(PathPrompt { kind, input });
    }

    pub fn cancel_prompt(&mut self) {
        self.prompt = None;
    }

    pub fn confirm_prompt(&mut self) {
        let Some(prompt) = self.prompt.take() else {
            return;
        };
        let path = PathBuf::from(prompt.input.value.trim());
        match prompt.kind {
            PromptKind::UploadFile => self.upload_file(path),
            PromptKind::WatchFolder => self.monitor_uploads_folder(path),
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.pending_replies > 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Transcript scrolling
    fn wrap_width(&self) -> u16 {
        // Use actual pane width for wrap calculation, default to 50 if not set
        if self.transcript_width > 0 {
            self.transcript_width
        } else {
            50
        }
    }

    fn visible_height(&self) -> u16 {
        if self.transcript_height > 0 {
            self.transcript_height
        } else {
            20
        }
    }

    /// Number of lines the transcript takes once word-wrapped to the pane width
    pub fn transcript_line_count(&self) -> u16 {
        let lines = crate::ui::transcript_line_count(self, self.wrap_width());
        u16::try_from(lines).unwrap_or(u16::MAX)
    }

    fn max_scroll(&self) -> u16 {
        self.transcript_line_count().saturating_sub(self.visible_height())
    }

    /// Scroll the transcript so the newest message is visible
    pub fn scroll_transcript_to_bottom(&mut self) {
        self.transcript_scroll = self.max_scroll();
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_transcript = false;
        self.transcript_scroll = self.transcript_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.transcript_scroll = self.transcript_scroll.saturating_add(lines).min(max);
        self.follow_transcript = self.transcript_scroll == max;
    }

    pub fn scroll_to_top(&mut self) {
        self.follow_transcript = false;
        self.transcript_scroll = 0;
    }

    pub fn follow_bottom(&mut self) {
        self.follow_transcript = true;
        self.scroll_transcript_to_bottom();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::PreviewKind;
    use crate::watcher::{ChangeKind, FileEntry};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::{Duration, SystemTime};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_app(server_url: &str) -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = Config::new();
        config.server_url = server_url.to_string();
        config.session_id = Some("test-session".to_string());
        (App::new(config, tx), rx)
    }

    fn reply(value: serde_json::Value) -> BackendEvent {
        BackendEvent::MessageReply(Ok(serde_json::from_value(value).unwrap()))
    }

    fn senders(app: &App) -> Vec<Sender> {
        app.transcript.messages().iter().map(|m| m.sender).collect()
    }

    #[test]
    fn test_whitespace_input_appends_nothing() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.input = TextInput::with_value("   \t ");

        assert!(!app.submit_input());
        assert!(app.transcript.is_empty());
        assert_eq!(app.pending_replies, 0);
    }

    #[tokio::test]
    async fn test_submit_round_trip_records_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send_message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Computing it now.",
                "code_snippet": "print(6 * 7)",
                "interpreter_output": {"result": "42"}
            })))
            .mount(&server)
            .await;

        let (mut app, mut rx) = test_app(&server.uri());
        app.input = TextInput::with_value("  what is six times seven?  ");

        assert!(app.submit_input());
        assert_eq!(senders(&app), vec![Sender::User]);
        assert_eq!(app.transcript.messages()[0].parsed.main_text, "what is six times seven?");
        assert_eq!(app.input, TextInput::default());
        assert_eq!(app.pending_replies, 1);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reply in time")
            .expect("channel open");
        let AppEvent::Backend(backend_event) = event else {
            panic!("expected a backend event");
        };
        app.apply_backend_event(backend_event);

        assert_eq!(senders(&app), vec![Sender::User, Sender::Assistant]);
        assert_eq!(app.pending_replies, 0);
        assert_eq!(app.snippets.len(), 1);
        assert_eq!(app.snippets.code_panel(), Some("print(6 * 7)"));
        assert_eq!(app.snippets.output_panel(), Some("42"));
    }

    #[test]
    fn test_output_only_reply_updates_current_snippet() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.apply_backend_event(reply(json!({"response": "x", "code_snippet": "x = 1"})));
        app.apply_backend_event(reply(json!({
            "response": "done",
            "interpreter_output": {"result": "1"}
        })));

        assert_eq!(app.snippets.len(), 1);
        assert_eq!(app.snippets.entries()[0].output.as_deref(), Some("1"));
    }

    #[test]
    fn test_fenced_code_in_text_is_recorded() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.apply_backend_event(reply(json!({
            "response": "Try this:\n```python\nimport math\nprint(math.pi)\n```\nThe interpreter's output is: 3.14159"
        })));

        let message = &app.transcript.messages()[0];
        assert_eq!(message.parsed.main_text, "Try this:");
        assert_eq!(app.snippets.code_panel(), Some("import math\nprint(math.pi)"));
        assert_eq!(app.snippets.output_panel(), Some("3.14159"));
    }

    #[test]
    fn test_failed_send_is_not_shown() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.pending_replies = 1;
        app.apply_backend_event(BackendEvent::MessageReply(Err(ClientError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        })));

        assert!(app.transcript.is_empty());
        assert_eq!(app.pending_replies, 0);
    }

    #[test]
    fn test_upload_replies_render_as_interpreter_messages() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.apply_backend_event(BackendEvent::UploadReply(Ok(serde_json::from_value(json!({
            "result": "File a.csv saved to disk successfully!",
            "completion": "ignored"
        }))
        .unwrap())));
        app.apply_backend_event(BackendEvent::UploadReply(Err(ClientError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "{\"error\": \"No file provided.\"}".to_string(),
        })));

        let texts: Vec<String> = app
            .transcript
            .messages()
            .iter()
            .map(|m| m.parsed.main_text.clone())
            .collect();
        assert_eq!(
            texts,
            vec![
                "File a.csv saved to disk successfully!".to_string(),
                "Error: {\"error\": \"No file provided.\"}".to_string(),
            ]
        );
        assert_eq!(senders(&app), vec![Sender::Interpreter, Sender::Interpreter]);
    }

    #[test]
    fn test_folder_change_emits_one_system_message() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.apply_backend_event(BackendEvent::FolderChange(FileChange {
            kind: ChangeKind::Added,
            entry: FileEntry {
                name: "scan.pdf".to_string(),
                path: PathBuf::from("uploads/scan.pdf"),
                modified: SystemTime::UNIX_EPOCH,
                size: 10,
            },
        }));

        assert_eq!(senders(&app), vec![Sender::System]);
        let preview = app.transcript.messages()[0].preview.as_ref().expect("preview");
        assert_eq!(preview.kind, PreviewKind::Pdf);
    }

    #[test]
    fn test_watching_missing_folder_shows_notice() {
        let root = tempfile::tempdir().unwrap();
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.open_prompt(PromptKind::WatchFolder);
        app.prompt.as_mut().unwrap().input = TextInput::with_value(
            root.path().join("uploads").display().to_string(),
        );
        app.confirm_prompt();

        assert!(app.prompt.is_none());
        assert!(app.watch.is_none());
        assert!(app.notice.is_some());
    }

    #[tokio::test]
    async fn test_watching_uploads_folder_starts_task() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");
        std::fs::create_dir(&uploads).unwrap();

        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.monitor_uploads_folder(uploads.clone());

        assert!(app.notice.is_none());
        assert_eq!(app.watched_folder(), Some(uploads.as_path()));
    }

    #[test]
    fn test_text_input_handles_multibyte_chars() {
        let mut input = TextInput::default();
        for c in "héllo".chars() {
            input.insert(c);
        }
        input.left();
        input.left();
        input.backspace();
        assert_eq!(input.value, "hélo");
        input.home();
        input.delete();
        assert_eq!(input.value, "élo");
        input.end();
        input.right();
        assert_eq!(input.cursor, 3);
    }

    #[tokio::test]
    async fn test_ctrl_d_clears_local_chat_and_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delete_chat"))
            .and(body_string_contains("\"uuid\":\"test-session\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let (mut app, mut rx) = test_app(&server.uri());
        app.append_message(Sender::User, "plot something");
        app.apply_backend_event(reply(json!({
            "response": "Here it is.",
            "code_snippet": "plot()",
            "interpreter_output": {"result": "ok"}
        })));
        assert_eq!(app.snippets.current_index(), Some(0));

        let ctrl_d = KeyEvent::new(KeyCode::Char('d'), KeyModifiers::CONTROL);
        crate::handler::handle_event(&mut app, AppEvent::Key(ctrl_d)).unwrap();

        assert!(app.transcript.is_empty());
        assert!(app.snippets.is_empty());
        assert_eq!(app.snippets.current_index(), None);
        assert_eq!(app.snippets.code_panel(), None);
        assert_eq!(app.transcript_scroll, 0);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delete reply in time")
            .expect("channel open");
        let AppEvent::Backend(backend_event) = event else {
            panic!("expected a backend event");
        };
        assert!(matches!(backend_event, BackendEvent::ChatDeleted(Ok(()))));
        app.apply_backend_event(backend_event);
        assert!(app.notice.is_none());
    }

    #[tokio::test]
    async fn test_session_registration_posts_configured_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save_uuid"))
            .and(body_string_contains("\"uuid\":\"test-session\""))
            .and(body_string_contains("\"apiKey\":\"sk-configured\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let (mut app, _rx) = test_app(&server.uri());
        app.config.api_key = Some("sk-configured".to_string());

        let task = app
            .register_session_with(app.config.api_key.clone())
            .expect("registration task");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_registration_skipped_without_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save_uuid"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (app, _rx) = test_app(&server.uri());
        assert_eq!(app.config.api_key, None);
        assert!(app.register_session_with(app.config.api_key.clone()).is_none());
    }

    #[test]
    fn test_scroll_follows_new_messages() {
        let (mut app, _rx) = test_app("http://127.0.0.1:9");
        app.transcript_height = 4;
        app.transcript_width = 40;
        for i in 0..5 {
            app.append_message(Sender::User, &format!("message {i}"));
        }
        // 5 messages x 3 lines, 4 visible
        assert_eq!(app.transcript_line_count(), 15);
        assert_eq!(app.transcript_scroll, 11);

        app.scroll_up(5);
        assert!(!app.follow_transcript);
        app.scroll_down(100);
        assert_eq!(app.transcript_scroll, 11);
        assert!(app.follow_transcript);
    }
}
