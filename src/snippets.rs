//! Navigable history of code snippets and their interpreter output.

/// A code sample the assistant produced, paired with its execution output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetEntry {
    pub code: String,
    pub output: Option<String>,
}

/// Append-only log of snippets with a cursor into it.
///
/// The code and output panels are held here as the strings currently on
/// screen, so every operation that "re-renders" a panel is an observable
/// state change. The cursor is `None` while the history is empty and always a
/// valid index otherwise.
#[derive(Debug, Default)]
pub struct SnippetHistory {
    entries: Vec<SnippetEntry>,
    current: Option<usize>,
    code_panel: Option<String>,
    output_panel: Option<String>,
}

impl SnippetHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snippet and make it current.
    pub fn record(&mut self, code: impl Into<String>, output: Option<String>) {
        let code = code.into();
        self.code_panel = Some(code.clone());
        if output.is_some() {
            self.output_panel = output.clone();
        }
        self.entries.push(SnippetEntry { code, output });
        self.current = Some(self.entries.len() - 1);
    }

    /// Attach output to the current snippet. With no snippets recorded the
    /// output panel still shows it.
    pub fn record_output(&mut self, output: impl Into<String>) {
        let output = output.into();
        if let Some(entry) = self.current.and_then(|i| self.entries.get_mut(i)) {
            entry.output = Some(output.clone());
        }
        self.output_panel = Some(output);
    }

    /// Step back one snippet. Returns false at the first entry.
    pub fn go_previous(&mut self) -> bool {
        match self.current {
            Some(i) if i > 0 => {
                self.current = Some(i - 1);
                self.show_current();
                true
            }
            _ => false,
        }
    }

    /// Step forward one snippet. Returns false at the last entry.
    pub fn go_next(&mut self) -> bool {
        match self.current {
            Some(i) if i + 1 < self.entries.len() => {
                self.current = Some(i + 1);
                self.show_current();
                true
            }
            _ => false,
        }
    }

    fn show_current(&mut self) {
        if let Some(entry) = self.current() {
            let code = entry.code.clone();
            let output = entry.output.clone();
            self.code_panel = Some(code);
            self.output_panel = output;
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&SnippetEntry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn entries(&self) -> &[SnippetEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn code_panel(&self) -> Option<&str> {
        self.code_panel.as_deref()
    }

    pub fn output_panel(&self) -> Option<&str> {
        self.output_panel.as_deref()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn panels(history: &SnippetHistory) -> (Option<String>, Option<String>) {
        (
            history.code_panel().map(str::to_string),
            history.output_panel().map(str::to_string),
        )
    }

    #[test]
    fn test_empty_history_has_no_cursor() {
        let mut history = SnippetHistory::new();
        assert_eq!(history.current_index(), None);
        assert!(!history.go_previous());
        assert!(!history.go_next());
        assert_eq!(history.current_index(), None);
    }

    #[test]
    fn test_record_moves_cursor_to_last() {
        let mut history = SnippetHistory::new();
        history.record("a = 1", None);
        history.record("b = 2", Some("2".to_string()));

        assert_eq!(history.len(), 2);
        assert_eq!(history.current_index(), Some(1));
        assert_eq!(panels(&history), (Some("b = 2".into()), Some("2".into())));
    }

    #[test]
    fn test_record_without_output_keeps_output_panel() {
        let mut history = SnippetHistory::new();
        history.record_output("stale");
        history.record("x = 1", None);
        assert_eq!(panels(&history), (Some("x = 1".into()), Some("stale".into())));
    }

    #[test]
    fn test_previous_then_next_restores_display() {
        let mut history = SnippetHistory::new();
        history.record("first()", Some("one".to_string()));
        history.record("second()", Some("two".to_string()));
        let after_record = panels(&history);

        assert!(history.go_previous());
        assert_eq!(panels(&history), (Some("first()".into()), Some("one".into())));
        assert!(history.go_next());
        assert_eq!(panels(&history), after_record);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_navigation_is_noop_at_bounds() {
        let mut history = SnippetHistory::new();
        history.record("only()", Some("out".to_string()));
        let before = panels(&history);

        assert!(!history.go_next());
        assert!(!history.go_previous());
        assert_eq!(history.current_index(), Some(0));
        assert_eq!(panels(&history), before);

        history.record("later()", None);
        assert!(history.go_previous());
        assert!(!history.go_previous());
        assert_eq!(history.current_index(), Some(0));
    }

    #[test]
    fn test_record_output_updates_current_entry_only() {
        let mut history = SnippetHistory::new();
        history.record("a()", None);
        history.record("b()", None);
        history.go_previous();
        history.record_output("from a");

        assert_eq!(history.entries()[0].output.as_deref(), Some("from a"));
        assert_eq!(history.entries()[1].output, None);
        assert_eq!(history.output_panel(), Some("from a"));
    }

    #[test]
    fn test_record_output_on_empty_history_only_renders() {
        let mut history = SnippetHistory::new();
        history.record_output("orphan");
        assert!(history.is_empty());
        assert_eq!(history.output_panel(), Some("orphan"));
    }

    #[test]
    fn test_navigation_shows_missing_output_as_empty_panel() {
        let mut history = SnippetHistory::new();
        history.record("no_output()", None);
        history.record("with_output()", Some("ok".to_string()));
        history.go_previous();
        assert_eq!(panels(&history), (Some("no_output()".into()), None));
    }
}
