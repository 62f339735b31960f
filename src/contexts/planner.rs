use crate::config::EngineConfig;
use crate::contexts::entry_point::existing_routes;
use crate::contexts::plan_validator::{check_initial_route, validate};
use crate::contexts::project_state::ProjectStateStore;
use crate::contexts::response_parser::ResponseParser;
use crate::data::{TaskPlan, TextGenerator};
use crate::error::EngineError;
use crate::registries::PromptRegistry;
use serde::Serialize;

const EXPECTED_PLAN: &str =
    "a JSON object with the keys steps, entryPointUpdate and dependencies";

#[derive(Serialize)]
struct PlanInput<'a> {
    request: &'a str,
    files: String,
    routes: String,
    entry_file: &'a str,
    feedback: Option<String>,
}

#[derive(Serialize)]
struct ReviewInput<'a> {
    request: &'a str,
    plan: String,
}

/// Turns a free-text request into a validated [`TaskPlan`].
pub struct Planner<G: TextGenerator> {
    parser: ResponseParser<G>,
    prompts: PromptRegistry,
    entry_file: String,
    max_attempts: usize,
}

impl<G: TextGenerator> Planner<G> {
    pub fn new(generator: G, prompts: PromptRegistry, config: &EngineConfig) -> Self {
        Self {
            parser: ResponseParser::new(generator, prompts.clone()),
            prompts,
            entry_file: config.entry_file.clone(),
            max_attempts: config.max_plan_attempts.max(1),
        }
    }

    /// Requests a plan, retrying with the rejection reason as feedback.
    ///
    /// # Arguments
    /// * `request` - The task as the user phrased it
    /// * `store` - Current project state; supplies the file listing and existing routes
    ///
    /// # Returns
    /// The first plan that validates and whose initial route will exist, or
    /// `EngineError::PlanExhausted` once every attempt failed. Prompt errors are
    /// not retried.
    pub fn plan(&self, request: &str, store: &ProjectStateStore) -> Result<TaskPlan, EngineError> {
        let routes = existing_routes(store.get(&self.entry_file));
        let files = store.state().paths().collect::<Vec<_>>().join("\n");
        let route_list = if routes.is_empty() {
            "(none)".to_string()
        } else {
            routes.iter().cloned().collect::<Vec<_>>().join(", ")
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let feedback = (!last_error.is_empty()).then(|| {
                format!(
                    "\nYour previous plan was rejected: {}\nReturn a corrected plan.",
                    last_error
                )
            });
            let prompt = self.prompts.render(
                "task_plan",
                &PlanInput {
                    request,
                    files: files.clone(),
                    routes: route_list.clone(),
                    entry_file: &self.entry_file,
                    feedback,
                },
            )?;

            match self.attempt(&prompt, &routes) {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.steps.len(), "task plan accepted");
                    return Ok(plan);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "task plan rejected");
                    last_error = e.to_string();
                }
            }
        }

        Err(EngineError::PlanExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn attempt(
        &self,
        prompt: &str,
        routes: &std::collections::BTreeSet<String>,
    ) -> Result<TaskPlan, EngineError> {
        let completion = self.parser.generator().generate(prompt)?;
        let value = self.parser.parse_object(&completion.text, EXPECTED_PLAN)?;
        let plan = validate(&value)?;
        check_initial_route(&plan, routes)?;
        Ok(plan)
    }

    /// Asks for sharper step descriptions.
    ///
    /// The reviewed plan replaces `plan` only if it validates and keeps the
    /// same steps, entry point update and dependencies. Any failure keeps `plan`.
    pub fn review(&self, plan: &TaskPlan, request: &str) -> TaskPlan {
        match self.try_review(plan, request) {
            Ok(reviewed) if same_structure(plan, &reviewed) => {
                tracing::info!("plan review accepted");
                reviewed
            }
            Ok(_) => {
                tracing::warn!("plan review changed the plan structure, keeping original");
                plan.clone()
            }
            Err(e) => {
                tracing::warn!(error = %e, "plan review failed, keeping original");
                plan.clone()
            }
        }
    }

    fn try_review(&self, plan: &TaskPlan, request: &str) -> Result<TaskPlan, EngineError> {
        let prompt = self.prompts.render(
            "plan_review",
            &ReviewInput {
                request,
                plan: plan.to_json_pretty(),
            },
        )?;
        let completion = self.parser.generator().generate(&prompt)?;
        let value = self.parser.parse_object(&completion.text, EXPECTED_PLAN)?;
        Ok(validate(&value)?)
    }
}

fn same_structure(original: &TaskPlan, reviewed: &TaskPlan) -> bool {
    original.steps.len() == reviewed.steps.len()
        && original
            .steps
            .iter()
            .zip(&reviewed.steps)
            .all(|(a, b)| a.kind == b.kind && a.file_path == b.file_path)
        && original.entry_point_update == reviewed.entry_point_update
        && original.dependencies == reviewed.dependencies
}
