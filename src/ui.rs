use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use crate::app::{App, InputMode};
use crate::transcript::{Message, Sender};

/// Prompt line shown above interpreter output
const SHELL_PROMPT: &str = "user@gpt-x:~$";

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str, base: Style) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        if close == 0 {
            // "****" is not bold, keep it literal
            spans.push(Span::styled(rest[..open + 4].to_string(), base));
            rest = &after_open[2..];
            continue;
        }
        if open > 0 {
            spans.push(Span::styled(rest[..open].to_string(), base));
        }
        spans.push(Span::styled(
            after_open[..close].to_string(),
            base.add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::styled(rest.to_string(), base));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn sender_style(sender: Sender) -> Style {
    match sender {
        Sender::User => Style::default().fg(Color::Cyan),
        Sender::Assistant => Style::default().fg(Color::Yellow),
        Sender::Interpreter => Style::default().fg(Color::Green),
        Sender::System => Style::default().fg(Color::Magenta),
    }
}

/// Style of the assistant's answer before the `RES2:` delimiter
fn before_secondary_style() -> Style {
    Style::default().fg(Color::Yellow)
}

/// Style of the follow-up after the `RES2:` delimiter
fn after_secondary_style() -> Style {
    Style::default().fg(Color::LightBlue).add_modifier(Modifier::ITALIC)
}

/// Accumulates styled segments that may contain newlines into lines
#[derive(Default)]
struct SegmentLines {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
}

impl SegmentLines {
    fn push(&mut self, text: &str, style: Style) {
        for (i, part) in text.split('\n').enumerate() {
            if i > 0 {
                self.lines.push(Line::from(std::mem::take(&mut self.current)));
            }
            if !part.is_empty() {
                self.current.push(Span::styled(part.to_string(), style));
            }
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.lines.push(Line::from(self.current));
        self.lines
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Body lines of one message, without the sender label
fn message_body(message: &Message) -> Vec<Line<'static>> {
    let style = sender_style(message.sender);
    let parsed = &message.parsed;

    let mut lines = match &parsed.secondary_split {
        Some(split) => {
            let mut segments = SegmentLines::default();
            segments.push(&split.before, before_secondary_style());
            segments.push(&split.after, after_secondary_style());
            segments.finish()
        }
        None if message.sender == Sender::Assistant => parsed
            .main_text
            .lines()
            .map(|line| parse_markdown_line(line, style))
            .collect(),
        None => parsed
            .main_text
            .lines()
            .map(|line| Line::from(Span::styled(line.to_string(), style)))
            .collect(),
    };

    if let Some(preview) = &message.preview {
        lines.push(Line::from(Span::styled(
            format!("[{}] {} ({})", preview.kind.tag(), preview.name, format_size(preview.size)),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

fn message_lines(message: &Message) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        format!("{}:", message.sender.label()),
        sender_style(message.sender).add_modifier(Modifier::BOLD),
    ))];
    lines.extend(message_body(message));
    lines.push(Line::default());
    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    // Chat on the left, code and output on the right
    let [chat_area, snippet_area] = Layout::horizontal([
        Constraint::Percentage(60),
        Constraint::Percentage(40),
    ])
    .areas(body_area);

    render_chat(app, frame, chat_area);
    render_snippets(app, frame, snippet_area);
    render_footer(app, frame, footer_area);

    // Popups (notice wins over prompt)
    if app.notice.is_some() {
        render_notice(app, frame, area);
    } else if app.prompt.is_some() {
        render_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let watch_indicator = match app.watched_folder() {
        Some(dir) => format!(" [watching {}]", dir.display()),
        None => String::new(),
    };

    let title = Line::from(vec![
        Span::styled(" GPT-X ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.client.base_url().to_string(), Style::default().fg(Color::White)),
        Span::styled(watch_indicator, Style::default().fg(Color::Magenta)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let pairs: &[(&str, &str)] = if app.prompt.is_some() {
        &[(" Enter ", " confirm "), (" Esc ", " cancel ")]
    } else {
        match app.input_mode {
            InputMode::Editing => &[
                (" Enter ", " send "),
                (" Esc ", " commands "),
                (" ^D ", " clear chat "),
                (" ^C ", " quit "),
            ],
            InputMode::Normal => &[
                (" [/] ", " snippets "),
                (" j/k ", " scroll "),
                (" u ", " upload "),
                (" w ", " watch "),
                (" i ", " type "),
                (" q ", " quit "),
            ],
        }
    };

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::styled(" ", label_style),
    ];
    for (key, label) in pairs {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// Transcript lines as rendered, including the pending-reply indicator
fn transcript_text(app: &App) -> Text<'static> {
    if app.transcript.is_empty() && app.pending_replies == 0 {
        return Text::from(Span::styled(
            "Ask the assistant something...",
            Style::default().fg(Color::DarkGray),
        ));
    }

    let mut lines: Vec<Line<'static>> = app
        .transcript
        .messages()
        .iter()
        .flat_map(message_lines)
        .collect();

    if app.pending_replies > 0 {
        lines.push(Line::from(Span::styled(
            "Assistant:",
            sender_style(Sender::Assistant).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    Text::from(lines)
}

/// Rendered line count of the transcript when word-wrapped to `width` columns
pub fn transcript_line_count(app: &App, width: u16) -> usize {
    Paragraph::new(transcript_text(app))
        .wrap(Wrap { trim: false })
        .line_count(width)
}

/// Scroll offset that puts the last wrapped line of `paragraph` at the bottom of `inner`
fn bottom_scroll(paragraph: &Paragraph, inner: Rect) -> u16 {
    let total = paragraph.line_count(inner.width);
    u16::try_from(total.saturating_sub(inner.height as usize)).unwrap_or(u16::MAX)
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [transcript_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store inner dimensions for scroll calculations and mouse hit-testing
    app.transcript_area = Some(transcript_area);
    app.transcript_height = transcript_area.height.saturating_sub(2);
    app.transcript_width = transcript_area.width.saturating_sub(2);
    if app.follow_transcript {
        app.scroll_transcript_to_bottom();
    }

    let transcript_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let transcript = Paragraph::new(transcript_text(app))
        .block(transcript_block)
        .wrap(Wrap { trim: false })
        .scroll((app.transcript_scroll, 0));
    frame.render_widget(transcript, transcript_area);

    let editing = app.input_mode == InputMode::Editing && app.prompt.is_none();
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if editing { Color::Yellow } else { Color::DarkGray }))
        .title(" Message ");

    // Horizontal scrolling keeps the cursor visible (inner width excludes borders)
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input.cursor;
    let scroll_offset = if inner_width > 0 && cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input.value
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(sender_style(Sender::User))
        .block(input_block);
    frame.render_widget(input, input_area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

fn render_snippets(app: &App, frame: &mut Frame, area: Rect) {
    let [code_area, output_area] = Layout::vertical([
        Constraint::Percentage(60),
        Constraint::Percentage(40),
    ])
    .areas(area);

    let code_title = match app.snippets.current_index() {
        Some(i) => format!(" Code {}/{} ", i + 1, app.snippets.len()),
        None => " Code ".to_string(),
    };
    let code_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue))
        .title(code_title);

    let code_text = match app.snippets.code_panel() {
        Some(code) => Text::from(
            code.lines()
                .map(|line| {
                    Line::from(Span::styled(line.to_string(), Style::default().fg(Color::White)))
                })
                .collect::<Vec<_>>(),
        ),
        None => Text::from(Span::styled(
            "No code yet",
            Style::default().fg(Color::DarkGray),
        )),
    };
    let code = Paragraph::new(code_text).block(code_block);
    frame.render_widget(code, code_area);

    let output_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green))
        .title(" Output ");

    let mut output_lines = vec![Line::from(Span::styled(
        SHELL_PROMPT,
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    ))];
    if let Some(output) = app.snippets.output_panel() {
        output_lines.extend(output.lines().map(|line| Line::from(line.to_string())));
    }
    // Keep the latest output in view
    let output = Paragraph::new(output_lines).wrap(Wrap { trim: false });
    let scroll = bottom_scroll(&output, output_block.inner(output_area));
    let output = output.block(output_block).scroll((scroll, 0));
    frame.render_widget(output, output_area);
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height);
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, popup_height)
}

fn render_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let Some(prompt) = &app.prompt else {
        return;
    };

    let popup_area = centered_popup(area, 70, 6);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" {} ", prompt.kind.title()));

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new(prompt.kind.hint())
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let scroll_offset = if width > 0 && prompt.input.cursor >= width {
        prompt.input.cursor - width + 1
    } else {
        0
    };
    let visible: String = prompt.input.value.chars().skip(scroll_offset).take(width).collect();
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = (prompt.input.cursor - scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

fn render_notice(app: &App, frame: &mut Frame, area: Rect) {
    let Some(notice) = &app.notice else {
        return;
    };

    let popup_area = centered_popup(area, 60, 8);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Notice ")
        .title_bottom(Line::from(" Press any key ").right_aligned());

    let text = Paragraph::new(notice.as_str())
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(text, popup_area);
}
