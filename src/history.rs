//! Natural-language action log fed back into every prompt.

use tracing::info;

use crate::action::Action;

/// Append-only, numbered log of executed actions for one session or branch.
#[derive(Clone, Debug, Default)]
pub struct History {
    lines: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one outcome, append it and return the line.
    pub fn record(
        &mut self,
        action: &Action,
        succeeded: bool,
        failure_reason: Option<&str>,
    ) -> String {
        let n = self.lines.len() + 1;
        let message = describe(action);
        let line = if succeeded {
            format!("Step {n} [OK]: {message}")
        } else {
            let reason = failure_reason.unwrap_or("unknown error");
            format!("Step {n} [FAILED]: {message}. Failure reason: {reason}")
        };
        info!(step = n, ok = succeeded, "{}", line);
        self.lines.push(line.clone());
        line
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All lines newline-joined in append order, injected verbatim into prompts.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// One human-readable sentence for an action.
pub fn describe(action: &Action) -> String {
    match action {
        Action::Goto { url } => format!("Navigated the browser to {url}"),
        Action::GoBack => "Went back to the previous page in browser history".into(),
        Action::GoForward => "Went forward to the next page in browser history".into(),
        Action::Reload => "Reloaded the current page".into(),

        Action::Click { selector } => format!("Clicked on the element '{selector}' on the page"),
        Action::DoubleClick { selector } => {
            format!("Double-clicked the element '{selector}' on the page")
        }
        Action::RightClick { selector } => {
            format!("Right-clicked on the element '{selector}' to open context menu")
        }
        Action::Hover { selector } => {
            format!("Hovered over the element '{selector}' without clicking")
        }

        Action::Fill { selector, value } => {
            format!("Cleared and filled the input field '{selector}' with the text '{value}'")
        }
        Action::Type { selector, text } => {
            format!("Typed '{text}' character by character into the input field '{selector}'")
        }
        Action::Dropdown { selector, value } => {
            format!("Selected the option '{value}' from the custom dropdown '{selector}'")
        }
        Action::Check { selector } => format!("Checked the checkbox '{selector}'"),
        Action::Uncheck { selector } => format!("Unchecked the checkbox '{selector}'"),
        Action::Select { selector, value } => {
            format!("Selected the option '{value}' from the native dropdown '{selector}'")
        }
        Action::Upload { selector, path } => {
            format!("Uploaded the file '{path}' using the file input '{selector}'")
        }

        Action::Press {
            selector: Some(selector),
            key,
        } => format!("Pressed the '{key}' key on the element '{selector}'"),
        Action::Press { selector: None, key } | Action::KeyboardPress { key } => {
            format!("Pressed the '{key}' key on the currently focused element")
        }
        Action::KeyboardType { text } => {
            format!("Typed the text '{text}' into the currently focused element")
        }
        Action::MouseMove { x, y } => {
            format!("Moved the mouse cursor to coordinates ({x}, {y}) on the page")
        }
        Action::MouseClick { x, y } => {
            format!("Performed a direct mouse click at coordinates ({x}, {y}) on the page")
        }
        Action::ScrollTo { x, y } => {
            format!("Scrolled the page to horizontal position {x} and vertical position {y}")
        }

        Action::NewTab { url } if url.is_empty() => {
            "Opened a new browser tab and navigated it to about:blank".into()
        }
        Action::NewTab { url } => format!("Opened a new browser tab and navigated it to {url}"),
        Action::CloseTab => "Closed the currently active browser tab".into(),
        Action::SwitchTab { index } => format!("Switched to browser tab number {index}"),

        Action::Evaluate { .. } => "Executed custom JavaScript on the page".into(),
        Action::WaitForSelector {
            selector,
            timeout_ms: Some(t),
        } => format!(
            "Waited for the element '{selector}' to appear on the page with a timeout of {t}ms"
        ),
        Action::WaitForSelector {
            selector,
            timeout_ms: None,
        } => format!("Waited for the element '{selector}' to appear on the page"),
        Action::Wait { ms } => format!("Paused execution for {ms} milliseconds"),
        Action::Screenshot { path } => {
            format!("Captured a screenshot of the page and saved it to '{path}'")
        }
        Action::Download { selector } => {
            format!("Initiated a file download by clicking on '{selector}'")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_fill_line() {
        let mut h = History::new();
        let line = h.record(
            &Action::Fill {
                selector: "#q".into(),
                value: "python".into(),
            },
            true,
            None,
        );
        assert_eq!(
            line,
            "Step 1 [OK]: Cleared and filled the input field '#q' with the text 'python'"
        );
    }

    #[test]
    fn failed_click_line_carries_reason() {
        let mut h = History::new();
        let line = h.record(
            &Action::Click {
                selector: "#submit".into(),
            },
            false,
            Some("element not found"),
        );
        assert_eq!(
            line,
            "Step 1 [FAILED]: Clicked on the element '#submit' on the page. Failure reason: element not found"
        );
    }

    #[test]
    fn numbering_is_one_based_and_monotonic_across_mixed_outcomes() {
        let mut h = History::new();
        h.record(&Action::Reload, true, None);
        h.record(&Action::GoBack, false, Some("no history"));
        h.record(&Action::Wait { ms: 250 }, true, None);

        let prefixes: Vec<&str> = h.lines().iter().map(|l| &l[..6]).collect();
        assert_eq!(prefixes, vec!["Step 1", "Step 2", "Step 3"]);
        assert_eq!(h.render(), h.lines().join("\n"));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn press_without_selector_targets_focus() {
        let a = describe(&Action::Press {
            selector: None,
            key: "Enter".into(),
        });
        let b = describe(&Action::KeyboardPress { key: "Enter".into() });
        assert_eq!(a, "Pressed the 'Enter' key on the currently focused element");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_history_renders_empty_string() {
        assert_eq!(History::new().render(), "");
    }
}
