//! Exploration on top of the run-loop.
//!
//! DFS runs one plan at a time and replans with a different approach when a
//! plan yields nothing. BFS runs every plan at once, each branch in its own
//! browser with its own history and retry counter.

use std::sync::Arc;

use futures::future::join_all;
use nanoid::nanoid;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::browser::ChromiumLauncher;
use crate::config::{Credentials, EngineConfig};
use crate::engine::{check_goal, Engine};
use crate::error::AgentError;
use crate::history::History;
use crate::llm::{CallLayer, LlmPlanner, LlmReasoner, Planner};
use crate::login::resolve_sites;

/// The result of one BFS branch.
#[derive(Clone, Debug)]
pub struct BranchResult {
    pub context_id: String,
    pub plan: String,
    pub output: Option<String>,
    pub history: History,
    /// Set when the branch could not run to completion.
    pub error: Option<String>,
}

pub struct Explorer {
    engine: Engine,
    planner: Arc<dyn Planner>,
}

impl Explorer {
    pub fn new(engine: Engine, planner: Arc<dyn Planner>) -> Self {
        Self { engine, planner }
    }

    /// Reasoner and planner share one call layer.
    pub fn connect(cfg: EngineConfig, creds: &Credentials) -> Result<Self, AgentError> {
        cfg.validate()?;
        let (call, selection) = CallLayer::from_credentials(creds, cfg.retry.clone())?;
        let call = Arc::new(call);
        let reasoner = Arc::new(LlmReasoner::new(call.clone(), selection.model.clone()));
        let planner = Arc::new(LlmPlanner::new(call, selection.model));
        let launcher = Arc::new(ChromiumLauncher::from_config(&cfg));
        Ok(Self::new(Engine::new(cfg, launcher, reasoner)?, planner))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Up to `max_replans` sequential plans; the first one that produces an
    /// output wins.
    pub async fn run_dfs<S: AsRef<str>>(
        &self,
        task: &str,
        login_sites: &[S],
        extraction_schema: Option<Value>,
    ) -> Result<Option<String>, AgentError> {
        let task = check_goal(task)?;
        let logins = resolve_sites(login_sites)?;
        let schema = extraction_schema.map(Arc::new);
        let mut old_plan: Option<String> = None;

        for round in 1..=self.engine.config().max_replans {
            let plan = match self.planner.plan_dfs(task, old_plan.as_deref()).await {
                Ok(p) => p,
                Err(e) => {
                    error!(round, error = %e, "planner gave no plan");
                    break;
                }
            };
            info!(round, plan = %plan, "running plan");
            let outcome = self
                .engine
                .run_goal(&plan, logins.clone(), schema.clone(), None)
                .await?;
            if outcome.output.is_some() {
                return Ok(outcome.output);
            }
            warn!(round, "plan finished without output, replanning");
            old_plan = Some(plan);
        }
        Ok(None)
    }

    /// Up to `max_breadth` plans, each on its own task and browser.
    pub async fn run_bfs<S: AsRef<str>>(
        &self,
        task: &str,
        login_sites: &[S],
        extraction_schema: Option<Value>,
    ) -> Result<Vec<BranchResult>, AgentError> {
        let task = check_goal(task)?;
        let logins = resolve_sites(login_sites)?;
        let schema = extraction_schema.map(Arc::new);
        let max = self.engine.config().max_breadth;

        let mut plans = self.planner.plan_bfs(task, max).await?;
        plans.truncate(max);
        info!(branches = plans.len(), "starting branches");

        let handles: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let engine = self.engine.clone();
                let logins = logins.clone();
                let schema = schema.clone();
                let context_id = nanoid!();
                let ctx = context_id.clone();
                let branch_plan = plan.clone();
                let handle = tokio::spawn(async move {
                    engine.run_goal(&branch_plan, logins, schema, Some(ctx)).await
                });
                (context_id, plan, handle)
            })
            .collect();

        let (meta, tasks): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(ctx, plan, handle)| ((ctx, plan), handle))
            .unzip();
        let joined = join_all(tasks).await;

        Ok(meta
            .into_iter()
            .zip(joined)
            .map(|((context_id, plan), res)| {
                let (output, history, error) = match res {
                    Ok(Ok(outcome)) => (outcome.output, outcome.history, None),
                    Ok(Err(e)) => (None, History::new(), Some(e.to_string())),
                    Err(e) => (None, History::new(), Some(format!("branch task failed: {e}"))),
                };
                if let Some(e) = &error {
                    error!(context_id = %context_id, error = %e, "branch failed");
                }
                BranchResult {
                    context_id,
                    plan,
                    output,
                    history,
                    error,
                }
            })
            .collect())
    }
}
