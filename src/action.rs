//! The closed set of atomic browser operations.
//!
//! Providers fill a flat object of optional fields ([`WireAction`]). Before
//! anything else sees it, that object is decoded into exactly one [`Action`]
//! variant by scanning [`ActionKind::PRIORITY`]. The executor and the history
//! encoder both match on the variant, so the priority order lives only here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Goto { url: String },
    GoBack,
    GoForward,
    Reload,

    Click { selector: String },
    DoubleClick { selector: String },
    RightClick { selector: String },
    Hover { selector: String },

    Fill { selector: String, value: String },
    Type { selector: String, text: String },
    Dropdown { selector: String, value: String },
    Check { selector: String },
    Uncheck { selector: String },
    Select { selector: String, value: String },
    Upload { selector: String, path: String },

    Press { selector: Option<String>, key: String },
    KeyboardPress { key: String },
    KeyboardType { text: String },
    MouseMove { x: i64, y: i64 },
    MouseClick { x: i64, y: i64 },
    ScrollTo { x: i64, y: i64 },

    NewTab { url: String },
    CloseTab,
    SwitchTab { index: usize },

    Evaluate { script: String },
    WaitForSelector { selector: String, timeout_ms: Option<u64> },
    Wait { ms: u64 },
    Screenshot { path: String },
    Download { selector: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Goto,
    GoBack,
    GoForward,
    Reload,
    Click,
    DoubleClick,
    RightClick,
    Hover,
    Fill,
    Type,
    Dropdown,
    Check,
    Uncheck,
    Select,
    Upload,
    Press,
    KeyboardPress,
    KeyboardType,
    MouseMove,
    MouseClick,
    ScrollTo,
    NewTab,
    CloseTab,
    SwitchTab,
    Evaluate,
    WaitForSelector,
    Wait,
    Screenshot,
    Download,
}

impl ActionKind {
    /// Navigation, then clicks, then input, then keyboard/mouse, then page
    /// management, then evaluate/utility.
    pub const PRIORITY: [ActionKind; 29] = [
        ActionKind::Goto,
        ActionKind::GoBack,
        ActionKind::GoForward,
        ActionKind::Reload,
        ActionKind::Click,
        ActionKind::DoubleClick,
        ActionKind::RightClick,
        ActionKind::Hover,
        ActionKind::Fill,
        ActionKind::Type,
        ActionKind::Dropdown,
        ActionKind::Check,
        ActionKind::Uncheck,
        ActionKind::Select,
        ActionKind::Upload,
        ActionKind::Press,
        ActionKind::KeyboardPress,
        ActionKind::KeyboardType,
        ActionKind::MouseMove,
        ActionKind::MouseClick,
        ActionKind::ScrollTo,
        ActionKind::NewTab,
        ActionKind::CloseTab,
        ActionKind::SwitchTab,
        ActionKind::Evaluate,
        ActionKind::WaitForSelector,
        ActionKind::Wait,
        ActionKind::Screenshot,
        ActionKind::Download,
    ];

    fn slot(self, w: &WireAction) -> Slot {
        match self {
            ActionKind::Goto => single(&w.goto, |url| Action::Goto { url }),
            ActionKind::GoBack => flag(w.go_back, Action::GoBack),
            ActionKind::GoForward => flag(w.go_forward, Action::GoForward),
            ActionKind::Reload => flag(w.reload, Action::Reload),
            ActionKind::Click => single(&w.click, |selector| Action::Click { selector }),
            ActionKind::DoubleClick => {
                single(&w.dblclick, |selector| Action::DoubleClick { selector })
            }
            ActionKind::RightClick => {
                single(&w.right_click, |selector| Action::RightClick { selector })
            }
            ActionKind::Hover => single(&w.hover, |selector| Action::Hover { selector }),
            ActionKind::Fill => {
                // An empty fill value is legitimate: it clears the field.
                pair(&nonempty(&w.fill_selector), &w.fill_value, |selector, value| {
                    Action::Fill { selector, value }
                })
            }
            ActionKind::Type => pair(
                &nonempty(&w.type_selector),
                &nonempty(&w.type_text),
                |selector, text| Action::Type { selector, text },
            ),
            ActionKind::Dropdown => pair(
                &nonempty(&w.dropdown_field_id),
                &nonempty(&w.dropdown_field_value),
                |selector, value| Action::Dropdown { selector, value },
            ),
            ActionKind::Check => single(&w.check, |selector| Action::Check { selector }),
            ActionKind::Uncheck => single(&w.uncheck, |selector| Action::Uncheck { selector }),
            ActionKind::Select => pair(
                &nonempty(&w.select_selector),
                &nonempty(&w.select_value),
                |selector, value| Action::Select { selector, value },
            ),
            ActionKind::Upload => pair(
                &nonempty(&w.upload_selector),
                &nonempty(&w.upload_path),
                |selector, path| Action::Upload { selector, path },
            ),
            ActionKind::Press => match (nonempty(&w.press_selector), nonempty(&w.press_key)) {
                (selector, Some(key)) => Slot::Filled(Action::Press { selector, key }),
                (Some(_), None) => Slot::Partial,
                (None, None) => Slot::Empty,
            },
            ActionKind::KeyboardPress => {
                single(&w.keyboard_press, |key| Action::KeyboardPress { key })
            }
            ActionKind::KeyboardType => {
                single(&w.keyboard_type, |text| Action::KeyboardType { text })
            }
            ActionKind::MouseMove => coords(w.mouse_move_x, w.mouse_move_y, |x, y| {
                Action::MouseMove { x, y }
            }),
            ActionKind::MouseClick => coords(w.mouse_click_x, w.mouse_click_y, |x, y| {
                Action::MouseClick { x, y }
            }),
            ActionKind::ScrollTo => {
                coords(w.scroll_x, w.scroll_y, |x, y| Action::ScrollTo { x, y })
            }
            ActionKind::NewTab => match &w.new_page {
                Some(url) => Slot::Filled(Action::NewTab { url: url.clone() }),
                None => Slot::Empty,
            },
            ActionKind::CloseTab => flag(w.close_page, Action::CloseTab),
            ActionKind::SwitchTab => match w.switch_page_index {
                Some(index) => Slot::Filled(Action::SwitchTab { index }),
                None => Slot::Empty,
            },
            ActionKind::Evaluate => single(&w.evaluate_js, |script| Action::Evaluate { script }),
            ActionKind::WaitForSelector => match nonempty(&w.wait_selector) {
                Some(selector) => Slot::Filled(Action::WaitForSelector {
                    selector,
                    timeout_ms: w.wait_timeout,
                }),
                None => Slot::Empty,
            },
            ActionKind::Wait => match w.wait_ms {
                Some(ms) if ms > 0 => Slot::Filled(Action::Wait { ms }),
                _ => Slot::Empty,
            },
            ActionKind::Screenshot => {
                single(&w.screenshot_path, |path| Action::Screenshot { path })
            }
            ActionKind::Download => {
                single(&w.download_selector, |selector| Action::Download { selector })
            }
        }
    }
}

enum Slot {
    Empty,
    Partial,
    Filled(Action),
}

fn nonempty(v: &Option<String>) -> Option<String> {
    v.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn single(v: &Option<String>, make: impl FnOnce(String) -> Action) -> Slot {
    match nonempty(v) {
        Some(s) => Slot::Filled(make(s)),
        None => Slot::Empty,
    }
}

fn flag(v: Option<bool>, action: Action) -> Slot {
    if v == Some(true) {
        Slot::Filled(action)
    } else {
        Slot::Empty
    }
}

fn pair<A: Clone, B: Clone>(
    a: &Option<A>,
    b: &Option<B>,
    make: impl FnOnce(A, B) -> Action,
) -> Slot {
    match (a, b) {
        (Some(a), Some(b)) => Slot::Filled(make(a.clone(), b.clone())),
        (None, None) => Slot::Empty,
        _ => Slot::Partial,
    }
}

fn coords(x: Option<i64>, y: Option<i64>, make: impl FnOnce(i64, i64) -> Action) -> Slot {
    if x.is_none() && y.is_none() {
        Slot::Empty
    } else {
        Slot::Filled(make(x.unwrap_or(0), y.unwrap_or(0)))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("incomplete paired action {0:?}: both fields must be set")]
    IncompletePair(ActionKind),
}

/// The flat shape providers are asked to fill. Exactly one operation should be
/// populated; paired fields count as one operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WireAction {
    /// URL to navigate to. Provide a full URL including protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,
    /// Set true to go back one step in browser history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_back: Option<bool>,
    /// Set true to go forward one step in browser history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_forward: Option<bool>,
    /// Set true to reload the current page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload: Option<bool>,

    /// CSS selector of the element to single-click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
    /// CSS selector of the element to double-click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dblclick: Option<String>,
    /// CSS selector of the element to right-click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_click: Option<String>,
    /// CSS selector of the element to hover over without clicking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover: Option<String>,

    /// CSS selector of an input to clear and fill. Pair with fill_value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_selector: Option<String>,
    /// Text to put into the input named by fill_selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<String>,
    /// CSS selector of an input to type into key by key. Pair with type_text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_selector: Option<String>,
    /// Text to type into the input named by type_selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_text: Option<String>,
    /// CSS selector of a custom (non-native) dropdown. Pair with dropdown_field_value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropdown_field_id: Option<String>,
    /// Visible text of the option to choose from dropdown_field_id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropdown_field_value: Option<String>,
    /// CSS selector of a checkbox or radio button to check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    /// CSS selector of a checkbox to uncheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncheck: Option<String>,
    /// CSS selector of a native select element. Pair with select_value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_selector: Option<String>,
    /// Option value to pick from select_selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_value: Option<String>,
    /// CSS selector of a file input. Pair with upload_path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_selector: Option<String>,
    /// Absolute path of the file to upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_path: Option<String>,

    /// CSS selector of the element to send a key press to. Pair with press_key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub press_selector: Option<String>,
    /// Key name, e.g. Enter, Escape, Tab, ArrowDown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub press_key: Option<String>,
    /// Key to press on whatever is focused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard_press: Option<String>,
    /// Text to type into whatever is focused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard_type: Option<String>,
    /// X coordinate to move the mouse to. Pair with mouse_move_y.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse_move_x: Option<i64>,
    /// Y coordinate to move the mouse to. Pair with mouse_move_x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse_move_y: Option<i64>,
    /// X coordinate of a direct mouse click. Pair with mouse_click_y.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse_click_x: Option<i64>,
    /// Y coordinate of a direct mouse click. Pair with mouse_click_x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse_click_y: Option<i64>,
    /// Horizontal scroll position in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_x: Option<i64>,
    /// Vertical scroll position in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<i64>,

    /// URL to open in a new tab. Empty string opens a blank tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_page: Option<String>,
    /// Set true to close the current tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_page: Option<bool>,
    /// Zero-based index of the tab to switch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_page_index: Option<usize>,

    /// JavaScript to run in the page. Last resort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_js: Option<String>,
    /// CSS selector to wait for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_selector: Option<String>,
    /// Timeout in milliseconds for wait_selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout: Option<u64>,
    /// Fixed pause in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    /// File path to save a screenshot to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    /// CSS selector of a link or button that starts a download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_selector: Option<String>,
}

impl WireAction {
    /// Every field unset: the "task complete" sentinel.
    pub fn is_empty(&self) -> bool {
        *self == WireAction::default()
    }

    /// Decode into at most one [`Action`]. `Ok(None)` is the sentinel.
    pub fn decode(&self) -> Result<Option<Action>, DecodeError> {
        let mut chosen: Option<Action> = None;
        let mut partial: Option<ActionKind> = None;
        for kind in ActionKind::PRIORITY {
            match kind.slot(self) {
                Slot::Filled(action) => {
                    if chosen.is_none() {
                        chosen = Some(action);
                    } else {
                        debug!(
                            ignored = ?kind,
                            "multiple operations populated, keeping the first by priority"
                        );
                    }
                }
                Slot::Partial => {
                    partial.get_or_insert(kind);
                }
                Slot::Empty => {}
            }
        }
        match (chosen, partial) {
            (Some(action), _) => Ok(Some(action)),
            (None, Some(kind)) => Err(DecodeError::IncompletePair(kind)),
            (None, None) => Ok(None),
        }
    }
}

impl From<&Action> for WireAction {
    fn from(action: &Action) -> Self {
        let mut w = WireAction::default();
        match action.clone() {
            Action::Goto { url } => w.goto = Some(url),
            Action::GoBack => w.go_back = Some(true),
            Action::GoForward => w.go_forward = Some(true),
            Action::Reload => w.reload = Some(true),
            Action::Click { selector } => w.click = Some(selector),
            Action::DoubleClick { selector } => w.dblclick = Some(selector),
            Action::RightClick { selector } => w.right_click = Some(selector),
            Action::Hover { selector } => w.hover = Some(selector),
            Action::Fill { selector, value } => {
                w.fill_selector = Some(selector);
                w.fill_value = Some(value);
            }
            Action::Type { selector, text } => {
                w.type_selector = Some(selector);
                w.type_text = Some(text);
            }
            Action::Dropdown { selector, value } => {
                w.dropdown_field_id = Some(selector);
                w.dropdown_field_value = Some(value);
            }
            Action::Check { selector } => w.check = Some(selector),
            Action::Uncheck { selector } => w.uncheck = Some(selector),
            Action::Select { selector, value } => {
                w.select_selector = Some(selector);
                w.select_value = Some(value);
            }
            Action::Upload { selector, path } => {
                w.upload_selector = Some(selector);
                w.upload_path = Some(path);
            }
            Action::Press { selector, key } => {
                w.press_selector = selector;
                w.press_key = Some(key);
            }
            Action::KeyboardPress { key } => w.keyboard_press = Some(key),
            Action::KeyboardType { text } => w.keyboard_type = Some(text),
            Action::MouseMove { x, y } => {
                w.mouse_move_x = Some(x);
                w.mouse_move_y = Some(y);
            }
            Action::MouseClick { x, y } => {
                w.mouse_click_x = Some(x);
                w.mouse_click_y = Some(y);
            }
            Action::ScrollTo { x, y } => {
                w.scroll_x = Some(x);
                w.scroll_y = Some(y);
            }
            Action::NewTab { url } => w.new_page = Some(url),
            Action::CloseTab => w.close_page = Some(true),
            Action::SwitchTab { index } => w.switch_page_index = Some(index),
            Action::Evaluate { script } => w.evaluate_js = Some(script),
            Action::WaitForSelector {
                selector,
                timeout_ms,
            } => {
                w.wait_selector = Some(selector);
                w.wait_timeout = timeout_ms;
            }
            Action::Wait { ms } => w.wait_ms = Some(ms),
            Action::Screenshot { path } => w.screenshot_path = Some(path),
            Action::Download { selector } => w.download_selector = Some(selector),
        }
        w
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Goto { .. } => ActionKind::Goto,
            Action::GoBack => ActionKind::GoBack,
            Action::GoForward => ActionKind::GoForward,
            Action::Reload => ActionKind::Reload,
            Action::Click { .. } => ActionKind::Click,
            Action::DoubleClick { .. } => ActionKind::DoubleClick,
            Action::RightClick { .. } => ActionKind::RightClick,
            Action::Hover { .. } => ActionKind::Hover,
            Action::Fill { .. } => ActionKind::Fill,
            Action::Type { .. } => ActionKind::Type,
            Action::Dropdown { .. } => ActionKind::Dropdown,
            Action::Check { .. } => ActionKind::Check,
            Action::Uncheck { .. } => ActionKind::Uncheck,
            Action::Select { .. } => ActionKind::Select,
            Action::Upload { .. } => ActionKind::Upload,
            Action::Press { .. } => ActionKind::Press,
            Action::KeyboardPress { .. } => ActionKind::KeyboardPress,
            Action::KeyboardType { .. } => ActionKind::KeyboardType,
            Action::MouseMove { .. } => ActionKind::MouseMove,
            Action::MouseClick { .. } => ActionKind::MouseClick,
            Action::ScrollTo { .. } => ActionKind::ScrollTo,
            Action::NewTab { .. } => ActionKind::NewTab,
            Action::CloseTab => ActionKind::CloseTab,
            Action::SwitchTab { .. } => ActionKind::SwitchTab,
            Action::Evaluate { .. } => ActionKind::Evaluate,
            Action::WaitForSelector { .. } => ActionKind::WaitForSelector,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Screenshot { .. } => ActionKind::Screenshot,
            Action::Download { .. } => ActionKind::Download,
        }
    }

    /// Wire-shaped JSON with unset fields omitted, as persisted to the episodic log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&WireAction::from(self)).unwrap_or_else(|_| "{}".to_string())
    }
}
