//! System instructions and prompt templates.

use crate::dom::PageSnapshot;
use crate::provider::ProviderKind;

const ACTION_BASE: &str = r#"You are the decision core of an autonomous browser automation engine.

You observe a web page through a structured snapshot and pick the next single atomic action that moves toward the user's goal.

## Rules

### Atomicity
- Output exactly one action in the actions list.
- Each action has one active operation. Every other field stays null.
- Paired fields count as one operation:
  fill_selector + fill_value, type_selector + type_text, press_selector + press_key,
  select_selector + select_value, upload_selector + upload_path,
  dropdown_field_id + dropdown_field_value, mouse_move_x + mouse_move_y,
  mouse_click_x + mouse_click_y, scroll_x + scroll_y.
- Split compound intents: filling a form and pressing Enter are two steps.

### Selectors
- Use only selectors that appear verbatim in the snapshot.
- Never guess or generalize a selector.

### Progress
- Choose the smallest action that advances the goal.
- After filling an input the next step is usually pressing Enter on it.
- If content may be below the viewport, scroll before giving up.

### extract_info
- Set true when the current page visibly holds information the user asked for.
- Never extract or summarize page content yourself. Only signal.

### Completion
- Return an empty action (all fields null) when the goal is reached or nothing useful remains.

### Recovery
- If the previous action failed, do not repeat it unchanged.
- Look for another selector or approach, go back, or navigate to a known URL.
"#;

const STEP_BASE: &str = r#"You are the decision core of a browser automation engine running in step-by-step mode.

The user gives one instruction at a time. Carry out only the current instruction and nothing beyond it.

## Rules
- Output exactly one action in the actions list, with one active operation.
- Paired fields count as one operation (fill_selector + fill_value, press_selector + press_key, scroll_x + scroll_y and so on).
- Use only selectors that appear verbatim in the snapshot.
- Set extract_info true when the page holds information relevant to the instruction.
- Return an empty action as soon as the instruction is fulfilled.
- If the previous action failed, try an alternative selector or approach.
"#;

const STATELESS: &str = r#"
## Context
Each request is independent. The action history in the request is your only memory.
"#;

const STATEFUL: &str = r#"
## Context
You operate inside a persistent conversation. Use every earlier snapshot and action in it to track progress and avoid loops.
"#;

pub const OUTPUT_SYSTEM: &str = r#"You summarise the result of a finished browser automation task.

Answer the user's task in plain text using only what is present on the current page. Be concise. If the page does not contain the answer, say so.
"#;

pub const EXTRACTION_SYSTEM: &str = r#"You are a structured data extraction agent.

You receive the visible text of a web page, a user request and a target schema.

## Rules
1. Extract only information explicitly present in the text.
2. Never invent data that is not on the page.
3. Match the target schema exactly. Use "N/A" for required fields with no matching data.
4. Ignore navigation, footers, ads and cookie banners.
5. Include repeated information once. Extract table rows as separate records.
"#;

pub const PLANNER_DFS_SYSTEM: &str = r#"You are a depth-first planner for a browser automation engine.

You receive an exploratory task and possibly a previous plan. Produce one deeply sequential plan.

The engine can navigate, follow links, fill forms, click, press keys, scroll, wait and read visible text. It cannot solve CAPTCHAs, pass two-factor authentication, read images or PDFs, or work inside iframes.

1. Without a previous plan, create any valid depth-first plan.
2. With a previous plan, diverge meaningfully: another strategy, source or method.
3. Every step must be directly actionable.
4. The engine starts on a search engine. Do not include a step to open one.
"#;

pub const PLANNER_BFS_SYSTEM: &str = r#"You are a breadth-first planner for a browser automation engine.

You receive an exploratory task and a maximum number of plans. Produce diverse, independent plans that can run in parallel.

The engine can navigate, follow links, fill forms, click, press keys, scroll, wait and read visible text. It cannot solve CAPTCHAs, pass two-factor authentication, read images or PDFs, work inside iframes, or share a login across parallel sessions.

- Each plan must stand on its own.
- Each step must be specific ("Search for 'X'" rather than "Research X").
- Plans must differ in approach or source.
- The engine starts on a search engine. Do not include a step to open one.
"#;

/// System instruction for the autonomous action agent.
pub fn action_system(kind: ProviderKind) -> String {
    with_context(ACTION_BASE, kind)
}

/// System instruction for the step-by-step action agent.
pub fn step_system(kind: ProviderKind) -> String {
    with_context(STEP_BASE, kind)
}

fn with_context(base: &str, kind: ProviderKind) -> String {
    let ctx = if kind.is_stateful() { STATEFUL } else { STATELESS };
    format!("{base}{ctx}")
}

/// The outcome of the action that preceded a decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreviousAction {
    /// Wire JSON of the action.
    pub action: String,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
}

fn json_list<T: serde::Serialize>(items: &[T]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .filter_map(|i| serde_json::to_string(i).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join("\n")
    }
}

fn page_section(snapshot: &PageSnapshot) -> String {
    let mut out = format!(
        "## Current Page\n\nURL: {}\n\nHyperlinks:\n{}\n\nInput Fields:\n{}\n\nClickable Elements:\n{}\n\nVisible Text:\n{}\n",
        snapshot.current_url,
        plain_list(&snapshot.hyperlinks),
        json_list(&snapshot.input_fields),
        json_list(&snapshot.clickable_fields),
        plain_list(&snapshot.visible_text),
    );
    if !snapshot.site_links.is_empty() {
        out.push_str("\nSite Links:\n");
        for (i, l) in snapshot.site_links.iter().enumerate() {
            out.push_str(&format!("{}. {} ({})\n", i + 1, l.title, l.link));
        }
    }
    out
}

/// The per-step prompt for the action agent.
pub fn action_prompt(
    goal: &str,
    snapshot: &PageSnapshot,
    history: &str,
    previous: Option<&PreviousAction>,
) -> String {
    let mut out = format!("## Task\n{goal}\n\n{}", page_section(snapshot));
    out.push_str("\n## Full Action History\n\n");
    out.push_str(
        "Every action taken so far in this session, numbered, with its outcome. \
         Use it to avoid repeating failed approaches.\n\n",
    );
    out.push_str(if history.is_empty() { "(no actions yet)" } else { history });
    out.push('\n');
    if let Some(prev) = previous {
        out.push_str(&format!(
            "\n## Previous Action\n\nAction: {}\nSucceeded: {}\n",
            prev.action, prev.succeeded
        ));
        if let Some(reason) = &prev.failure_reason {
            out.push_str(&format!("Failure reason: {reason}\n"));
        }
    }
    out
}

pub fn output_prompt(goal: &str, snapshot: &PageSnapshot) -> String {
    format!("## Task\n{goal}\n\n{}", page_section(snapshot))
}

pub fn extraction_prompt(task: &str, page_text: &str) -> String {
    format!("User request:\n{task}\n\nPage text:\n{page_text}\n")
}

pub fn dfs_prompt(task: &str, old_plan: Option<&str>) -> String {
    format!(
        "Task:\n{task}\n\nPrevious plan:\n{}\n\nGenerate one deeply exploratory plan. \
         If a previous plan is given, take a meaningfully different approach.\n",
        old_plan.unwrap_or("(none)")
    )
}

pub fn bfs_prompt(task: &str, max_plans: usize) -> String {
    format!(
        "Task:\n{task}\n\nGenerate up to {max_plans} distinct plans. \
         Each plan should explore a different approach and be executable independently.\n"
    )
}
