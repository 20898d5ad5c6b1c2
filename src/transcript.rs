//! Chat transcript state, independent of the terminal UI.
//!
//! Raw message text is run through [`parse_message`], which pulls the
//! interpreter-output marker and the first fenced python block out of the text
//! and splits assistant replies on the `RES2:` delimiter. The UI only ever sees
//! the resulting [`ParsedMessage`].

use std::ops::Range;

/// Prefix the backend uses when it inlines interpreter output into a reply.
pub const INTERPRETER_MARKER: &str = "The interpreter's output is: ";
/// Opening fence of a code block the backend can execute.
pub const CODE_FENCE_OPEN: &str = "```python";
pub const CODE_FENCE_CLOSE: &str = "```";
/// Separates the first answer from the follow-up written after the code ran.
pub const SECONDARY_DELIMITER: &str = "RES2:";

/// Who a transcript message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
    Interpreter,
    System,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Assistant => "Assistant",
            Sender::Interpreter => "Interpreter",
            Sender::System => "System",
        }
    }
}

/// The two halves of an assistant reply that contained `RES2:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondarySplit {
    pub before: String,
    pub after: String,
}

/// Raw message text broken into the pieces the renderer treats differently
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Text shown in the transcript, with the marker and code block removed
    pub main_text: String,
    pub code_block: Option<String>,
    pub interpreter_output: Option<String>,
    pub secondary_split: Option<SecondarySplit>,
}

impl ParsedMessage {
    /// Displayed text with the secondary delimiter removed
    pub fn display_text(&self) -> String {
        match &self.secondary_split {
            Some(split) => format!("{}{}", split.before, split.after),
            None => self.main_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Image,
    Pdf,
}

impl PreviewKind {
    /// Classify a file by its guessed MIME type; only images and PDFs get a preview.
    pub fn for_path(path: &std::path::Path) -> Option<Self> {
        let mime = mime_guess::from_path(path).first()?;
        if mime.type_() == mime_guess::mime::IMAGE {
            Some(PreviewKind::Image)
        } else if mime.essence_str() == "application/pdf" {
            Some(PreviewKind::Pdf)
        } else {
            None
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PreviewKind::Image => "image",
            PreviewKind::Pdf => "pdf",
        }
    }
}

/// Inline preview attached to a system message about a watched file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePreview {
    pub name: String,
    pub kind: PreviewKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    pub parsed: ParsedMessage,
    pub preview: Option<FilePreview>,
}

/// Ordered, in-memory log of rendered chat messages
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `raw` and append it. Returns the stored message so callers can
    /// act on the extracted code or interpreter output.
    pub fn append(&mut self, sender: Sender, raw: &str) -> &Message {
        self.push(Message {
            sender,
            parsed: parse_message(sender, raw),
            preview: None,
        })
    }

    pub fn append_with_preview(
        &mut self,
        sender: Sender,
        raw: &str,
        preview: Option<FilePreview>,
    ) -> &Message {
        self.push(Message {
            sender,
            parsed: parse_message(sender, raw),
            preview,
        })
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Split raw message text into display text, code block, interpreter output
/// and (for assistant replies) the `RES2:` halves.
pub fn parse_message(sender: Sender, raw: &str) -> ParsedMessage {
    let interpreter = find_interpreter_output(raw);
    let code_block = find_code_block(raw).map(|(_, inner)| inner.trim().to_string());

    let mut text = raw.to_string();
    let mut stripped = false;

    if let Some((range, _)) = &interpreter {
        text.replace_range(range.clone(), "");
        stripped = true;
    }
    if let Some((range, _)) = find_code_block(&text) {
        text.replace_range(range, "");
        stripped = true;
    }
    if stripped {
        text = text.trim().to_string();
    }

    let secondary_split = if sender == Sender::Assistant {
        text.split_once(SECONDARY_DELIMITER)
            .map(|(before, after)| SecondarySplit {
                before: before.to_string(),
                after: after.to_string(),
            })
    } else {
        None
    };

    ParsedMessage {
        main_text: text,
        code_block,
        interpreter_output: interpreter.map(|(_, output)| output.to_string()),
        secondary_split,
    }
}

/// Locate the interpreter marker; the output runs to the end of its line.
/// Returns the byte range of marker plus output, and the output itself.
fn find_interpreter_output(text: &str) -> Option<(Range<usize>, &str)> {
    let start = text.find(INTERPRETER_MARKER)?;
    let output_start = start + INTERPRETER_MARKER.len();
    let output_len = text[output_start..]
        .find(['\n', '\r'])
        .unwrap_or(text.len() - output_start);
    let end = output_start + output_len;
    Some((start..end, &text[output_start..end]))
}

/// Locate the first complete python fence, shortest match.
/// Returns the byte range of the whole block and its inner text.
fn find_code_block(text: &str) -> Option<(Range<usize>, &str)> {
    let start = text.find(CODE_FENCE_OPEN)?;
    let inner_start = start + CODE_FENCE_OPEN.len();
    let inner_len = text[inner_start..].find(CODE_FENCE_CLOSE)?;
    let inner_end = inner_start + inner_len;
    Some((
        start..inner_end + CODE_FENCE_CLOSE.len(),
        &text[inner_start..inner_end],
    ))
}
