//! The provider-agnostic call layer and the agents built on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::action::{Action, WireAction};
use crate::config::Credentials;
use crate::dom::PageSnapshot;
use crate::error::{AgentError, ProviderError};
use crate::prompts::{self, PreviousAction};
use crate::provider::{
    build_backend, http_client, AgentDescriptor, Backend, ProviderKind, ProviderSelection,
};
use crate::retry::{with_backoff, RetryLadder, RetryPolicy};

/// JSON schema for `T` with every subschema inlined, as the providers expect.
pub fn schema_of<T: JsonSchema>() -> Value {
    let root = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator()
        .into_root_schema_for::<T>();
    serde_json::to_value(root).unwrap_or_else(|_| json!({ "type": "object" }))
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ActionResponse {
    pub actions: Vec<WireAction>,
    /// True when the current page holds information the user asked for.
    #[serde(default)]
    pub extract_info: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct OutputResponse {
    pub output: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct PlanResponse {
    /// One sequential plan, step by step.
    pub plan: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct PlansResponse {
    /// Independent plans, one per parallel branch.
    pub plans: Vec<String>,
}

/// Fallback extraction shape when the caller supplies no schema.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GeneralExtraction {
    /// The visible text that matters for the request.
    pub imp_visible_text: String,
    /// Key facts as name/value pairs.
    #[serde(default)]
    pub general_dict: BTreeMap<String, String>,
}

/// What the action agent decided for this step.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    /// `None` is the sentinel: nothing left to do.
    pub action: Option<Action>,
    pub extract_info: bool,
}

impl ActionResponse {
    /// Only the first action is honoured.
    pub fn into_decision(self) -> Result<Decision, ProviderError> {
        if self.actions.len() > 1 {
            debug!(count = self.actions.len(), "ignoring extra actions");
        }
        let action = match self.actions.first() {
            Some(wire) => wire.decode().map_err(|e| ProviderError::Decode(e.to_string()))?,
            None => None,
        };
        Ok(Decision {
            action,
            extract_info: self.extract_info,
        })
    }
}

/// Sends prompts to one backend, retrying transient failures per context.
pub struct CallLayer {
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
    ladder: RetryLadder,
}

impl CallLayer {
    pub fn new(backend: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            ladder: RetryLadder::new(),
        }
    }

    /// Resolve credentials, then build the backend on a fresh HTTP client.
    pub fn from_credentials(
        creds: &Credentials,
        policy: RetryPolicy,
    ) -> Result<(Self, ProviderSelection), AgentError> {
        let selection = creds.resolve()?;
        let backend = build_backend(&selection, creds, http_client()?)?;
        info!(provider = %selection.kind, model = %selection.model, "provider selected");
        Ok((Self::new(backend, policy), selection))
    }

    pub fn kind(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn ladder(&self) -> &RetryLadder {
        &self.ladder
    }

    /// Forget the retry counter and any provider-side chat for `context_id`.
    pub async fn end_context(&self, context_id: Option<&str>) {
        self.ladder.forget(context_id).await;
        self.backend.end_context(context_id).await;
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        context_id: Option<&str>,
    ) -> Result<T, ProviderError> {
        let backend = &self.backend;
        let reply = with_backoff(&self.policy, &self.ladder, context_id, &agent.name, || {
            backend.send(agent, prompt, context_id)
        })
        .await?;
        reply.decode()
    }
}

/// Inputs for one action decision.
#[derive(Clone, Copy, Debug)]
pub struct DecideRequest<'a> {
    pub goal: &'a str,
    pub snapshot: &'a PageSnapshot,
    pub history: &'a str,
    pub previous: Option<&'a PreviousAction>,
    pub context_id: Option<&'a str>,
}

/// The decision seam between the run-loop and a model.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn decide(&self, req: DecideRequest<'_>) -> Result<Decision, ProviderError>;

    async fn output(
        &self,
        goal: &str,
        snapshot: &PageSnapshot,
        context_id: Option<&str>,
    ) -> Result<String, ProviderError>;

    /// Pull structured data out of page text. `schema` overrides the general shape.
    async fn extract(
        &self,
        task: &str,
        page_text: &str,
        schema: Option<&Value>,
        context_id: Option<&str>,
    ) -> Result<Value, ProviderError>;

    /// Drop per-context state once a run-loop instance ends.
    async fn end_context(&self, _context_id: Option<&str>) {}
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_dfs(&self, task: &str, old_plan: Option<&str>) -> Result<String, ProviderError>;
    async fn plan_bfs(&self, task: &str, max_plans: usize) -> Result<Vec<String>, ProviderError>;
}

pub struct LlmReasoner {
    call: Arc<CallLayer>,
    action_agent: AgentDescriptor,
    output_agent: AgentDescriptor,
    model: String,
}

impl LlmReasoner {
    /// Reasoner for the autonomous run-loop.
    pub fn new(call: Arc<CallLayer>, model: impl Into<String>) -> Self {
        let system = prompts::action_system(call.kind());
        Self::with_system(call, model.into(), system)
    }

    /// Reasoner that acts on one instruction at a time.
    pub fn stepwise(call: Arc<CallLayer>, model: impl Into<String>) -> Self {
        let system = prompts::step_system(call.kind());
        Self::with_system(call, model.into(), system)
    }

    fn with_system(call: Arc<CallLayer>, model: String, system: String) -> Self {
        let action_agent = AgentDescriptor {
            name: "action_agent".into(),
            model: model.clone(),
            system_instruction: system,
            response_schema: schema_of::<ActionResponse>(),
        };
        let output_agent = AgentDescriptor {
            name: "output_agent".into(),
            model: model.clone(),
            system_instruction: prompts::OUTPUT_SYSTEM.to_string(),
            response_schema: schema_of::<OutputResponse>(),
        };
        Self {
            call,
            action_agent,
            output_agent,
            model,
        }
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn decide(&self, req: DecideRequest<'_>) -> Result<Decision, ProviderError> {
        let prompt = prompts::action_prompt(req.goal, req.snapshot, req.history, req.previous);
        let resp: ActionResponse = self
            .call
            .call(&self.action_agent, &prompt, req.context_id)
            .await?;
        resp.into_decision()
    }

    async fn output(
        &self,
        goal: &str,
        snapshot: &PageSnapshot,
        context_id: Option<&str>,
    ) -> Result<String, ProviderError> {
        let prompt = prompts::output_prompt(goal, snapshot);
        let resp: OutputResponse = self.call.call(&self.output_agent, &prompt, context_id).await?;
        Ok(resp.output)
    }

    async fn extract(
        &self,
        task: &str,
        page_text: &str,
        schema: Option<&Value>,
        context_id: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let agent = AgentDescriptor {
            name: "extraction_agent".into(),
            model: self.model.clone(),
            system_instruction: prompts::EXTRACTION_SYSTEM.to_string(),
            response_schema: schema.cloned().unwrap_or_else(schema_of::<GeneralExtraction>),
        };
        let prompt = prompts::extraction_prompt(task, page_text);
        match schema {
            Some(_) => self.call.call::<Value>(&agent, &prompt, context_id).await,
            None => {
                let general: GeneralExtraction = self.call.call(&agent, &prompt, context_id).await?;
                serde_json::to_value(general).map_err(|e| ProviderError::Decode(e.to_string()))
            }
        }
    }

    async fn end_context(&self, context_id: Option<&str>) {
        self.call.end_context(context_id).await;
    }
}

pub struct LlmPlanner {
    call: Arc<CallLayer>,
    dfs_agent: AgentDescriptor,
    bfs_agent: AgentDescriptor,
}

impl LlmPlanner {
    pub fn new(call: Arc<CallLayer>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            call,
            dfs_agent: AgentDescriptor {
                name: "planner_dfs".into(),
                model: model.clone(),
                system_instruction: prompts::PLANNER_DFS_SYSTEM.to_string(),
                response_schema: schema_of::<PlanResponse>(),
            },
            bfs_agent: AgentDescriptor {
                name: "planner_bfs".into(),
                model,
                system_instruction: prompts::PLANNER_BFS_SYSTEM.to_string(),
                response_schema: schema_of::<PlansResponse>(),
            },
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan_dfs(&self, task: &str, old_plan: Option<&str>) -> Result<String, ProviderError> {
        let prompt = prompts::dfs_prompt(task, old_plan);
        let resp: PlanResponse = self.call.call(&self.dfs_agent, &prompt, None).await?;
        Ok(resp.plan)
    }

    async fn plan_bfs(&self, task: &str, max_plans: usize) -> Result<Vec<String>, ProviderError> {
        let prompt = prompts::bfs_prompt(task, max_plans);
        let resp: PlansResponse = self.call.call(&self.bfs_agent, &prompt, None).await?;
        let mut plans = resp.plans;
        plans.truncate(max_plans);
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderReply;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Fails `failures` times with a transport error, then replies with `reply`.
    struct FlakyBackend {
        failures: usize,
        calls: AtomicUsize,
        reply: ProviderReply,
        prompts: Mutex<Vec<String>>,
        ended: Mutex<Vec<Option<String>>>,
    }

    impl FlakyBackend {
        fn new(failures: usize, reply: ProviderReply) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                reply,
                prompts: Mutex::new(Vec::new()),
                ended: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        async fn send(
            &self,
            _agent: &AgentDescriptor,
            prompt: &str,
            _context_id: Option<&str>,
        ) -> Result<ProviderReply, ProviderError> {
            self.prompts.lock().await.push(prompt.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ProviderError::Status {
                    status: 429,
                    body: "slow down".into(),
                });
            }
            Ok(self.reply.clone())
        }

        async fn end_context(&self, context_id: Option<&str>) {
            self.ended.lock().await.push(context_id.map(str::to_owned));
        }
    }

    fn layer(backend: Arc<FlakyBackend>) -> Arc<CallLayer> {
        Arc::new(CallLayer::new(backend, RetryPolicy::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let backend = Arc::new(FlakyBackend::new(
            2,
            ProviderReply::Json(json!({"actions": [{"click": "#go"}], "extract_info": true})),
        ));
        let reasoner = LlmReasoner::new(layer(backend.clone()), "gpt-4o");
        let snap = PageSnapshot::initial("https://search.brave.com");
        let decision = reasoner
            .decide(DecideRequest {
                goal: "go",
                snapshot: &snap,
                history: "",
                previous: None,
                context_id: None,
            })
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            decision,
            Decision {
                action: Some(Action::Click {
                    selector: "#go".into()
                }),
                extract_info: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_gives_up() {
        let backend = Arc::new(FlakyBackend::new(10, ProviderReply::Json(json!({"output": "x"}))));
        let policy = RetryPolicy {
            max_attempts: Some(3),
            base_timeout: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let call = CallLayer::new(backend.clone(), policy);
        let agent = AgentDescriptor {
            name: "output_agent".into(),
            model: "gpt-4o".into(),
            system_instruction: String::new(),
            response_schema: json!({}),
        };
        let res = call.call::<OutputResponse>(&agent, "p", Some("ctx")).await;
        assert!(matches!(res, Err(ProviderError::RetriesExhausted(3))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn structural_failure_is_not_retried() {
        let backend = Arc::new(FlakyBackend::new(0, ProviderReply::Json(json!({"answer": "x"}))));
        let reasoner = LlmReasoner::new(layer(backend.clone()), "gpt-4o");
        let snap = PageSnapshot::default();
        let res = reasoner.output("goal", &snap, None).await;
        assert!(matches!(res, Err(ProviderError::Decode(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_action_list_is_the_sentinel() {
        let resp: ActionResponse = serde_json::from_value(json!({"actions": []})).unwrap();
        assert_eq!(
            resp.into_decision().unwrap(),
            Decision {
                action: None,
                extract_info: false
            }
        );
        let resp: ActionResponse = serde_json::from_value(json!({"actions": [{}]})).unwrap();
        assert_eq!(resp.into_decision().unwrap().action, None);
    }

    #[test]
    fn only_the_first_action_counts() {
        let resp: ActionResponse = serde_json::from_value(json!({
            "actions": [{"reload": true}, {"click": "#x"}]
        }))
        .unwrap();
        assert_eq!(resp.into_decision().unwrap().action, Some(Action::Reload));
    }

    #[test]
    fn half_a_pair_is_a_decode_error() {
        let resp: ActionResponse =
            serde_json::from_value(json!({"actions": [{"fill_selector": "#q"}]})).unwrap();
        assert!(matches!(resp.into_decision(), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn schemas_are_inlined() {
        let schema = schema_of::<ActionResponse>();
        let text = schema.to_string();
        assert!(!text.contains("$ref"));
        assert!(text.contains("fill_selector"));
        assert!(schema.get("$schema").is_none());
    }

    #[tokio::test]
    async fn general_extraction_is_validated_and_planner_output_truncated() {
        let backend = Arc::new(FlakyBackend::new(
            0,
            ProviderReply::Text(r#"{"imp_visible_text": "Price: 10", "general_dict": {"price": "10"}}"#.into()),
        ));
        let reasoner = LlmReasoner::new(layer(backend.clone()), "gpt-4o");
        let v = reasoner.extract("get price", "Price: 10", None, None).await.unwrap();
        assert_eq!(v["general_dict"]["price"], "10");
        assert!(backend.prompts.lock().await[0].contains("Page text:\nPrice: 10"));

        let backend = Arc::new(FlakyBackend::new(
            0,
            ProviderReply::Json(json!({"plans": ["a", "b", "c"]})),
        ));
        let planner = LlmPlanner::new(layer(backend), "gpt-4o");
        assert_eq!(planner.plan_bfs("t", 2).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ending_a_context_resets_ladder_and_backend_state() {
        let backend = Arc::new(FlakyBackend::new(1, ProviderReply::Json(json!({"output": "ok"}))));
        let call = layer(backend.clone());
        let reasoner = LlmReasoner::new(call.clone(), "gpt-4o");
        let snap = PageSnapshot::initial("https://search.brave.com");
        reasoner.output("go", &snap, Some("branch-1")).await.unwrap();

        reasoner.end_context(Some("branch-1")).await;
        assert_eq!(*backend.ended.lock().await, vec![Some("branch-1".to_string())]);
        assert_eq!(call.ladder().attempt(Some("branch-1")).await, 1);
    }
}
