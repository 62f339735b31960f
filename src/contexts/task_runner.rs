use crate::config::EngineConfig;
use crate::contexts::entry_point::{EntryPointReconciler, MergeOutcome, DEFAULT_ENTRY_TEMPLATE};
use crate::contexts::manifest::{declared_packages, imported_packages, package_name, ManifestUpdater};
use crate::contexts::merge_strategy::MergeStrategy;
use crate::contexts::project_state::ProjectStateStore;
use crate::contexts::response_parser::extract_code;
use crate::contexts::structural_validator::{CheckState, DiagnosticClassifier, StructuralValidator};
use crate::data::{
    truncate_context, OperationType, StructuralChecker, TaskContext, TaskPlan, TextGenerator,
};
use crate::error::EngineError;
use crate::registries::PromptRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A failure the runner recovered from by keeping the last good state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    /// Critical diagnostics survived repair.
    StructuralFailure {
        path: String,
        reverted: bool,
        diagnostics: String,
    },
    /// No merge candidate passed the entry point gate.
    ReconciliationFailure { path: String, reason: String },
    /// The generator never produced content for a step.
    GenerationSkipped { path: String, reason: String },
    /// Packages imported by touched files but not declared in the manifest.
    MissingPackages(Vec<String>),
}

impl fmt::Display for Recovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovered::StructuralFailure { path, reverted: true, .. } => {
                write!(f, "{}: structural check failed, reverted to previous content", path)
            }
            Recovered::StructuralFailure { path, reverted: false, .. } => {
                write!(f, "{}: structural check failed, content kept as generated", path)
            }
            Recovered::ReconciliationFailure { path, reason } => {
                write!(f, "{}: entry point left unchanged ({})", path, reason)
            }
            Recovered::GenerationSkipped { path, reason } => {
                write!(f, "{}: no content generated ({})", path, reason)
            }
            Recovered::MissingPackages(packages) => {
                write!(f, "packages imported but not declared: {}", packages.join(", "))
            }
        }
    }
}

/// What one task run did to the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Number of plan steps that changed the tree.
    pub applied: usize,
    /// Paths written by the run, in write order.
    pub touched: Vec<String>,
    pub deleted: Vec<String>,
    pub entry_outcome: MergeOutcome,
    pub manifest_changed: bool,
    pub checks: Vec<(String, CheckState)>,
    pub warnings: Vec<Recovered>,
}

impl TaskReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Serialize)]
struct ContentInput<'a> {
    task: &'a str,
    path: &'a str,
    description: &'a str,
    existing: &'a str,
    context: String,
}

#[derive(Debug, Clone)]
struct RunnerOptions {
    entry_file: String,
    manifest_file: String,
    source_extension: String,
    reserved_packages: Vec<String>,
    max_generation_attempts: usize,
    max_context_length: usize,
    revert_on_structural_failure: bool,
}

/// Executes validated plans against a [`ProjectStateStore`].
///
/// Per run: file steps in plan order, entry point reconciliation, manifest
/// merge, missing package report, then structural validation of every
/// touched source file.
pub struct TaskRunner<G, C, S>
where
    G: TextGenerator + Clone,
    C: StructuralChecker,
    S: MergeStrategy,
{
    generator: G,
    prompts: PromptRegistry,
    reconciler: EntryPointReconciler<S>,
    validator: StructuralValidator<C, G>,
    manifest: ManifestUpdater,
    options: RunnerOptions,
}

impl<G, C, S> TaskRunner<G, C, S>
where
    G: TextGenerator + Clone,
    C: StructuralChecker,
    S: MergeStrategy,
{
    pub fn new(
        generator: G,
        checker: C,
        strategy: S,
        prompts: PromptRegistry,
        config: &EngineConfig,
    ) -> Self {
        let validator = StructuralValidator::new(
            checker,
            generator.clone(),
            prompts.clone(),
            DiagnosticClassifier::new(&config.critical_patterns),
        )
        .with_max_repair_attempts(config.max_repair_attempts)
        .with_max_context_length(config.max_context_length)
        .enabled(!config.skip_structural_check);

        Self {
            generator,
            prompts,
            reconciler: EntryPointReconciler::new(
                config.entry_file.clone(),
                strategy,
                config.max_merge_attempts,
            ),
            validator,
            manifest: ManifestUpdater::from_config(config),
            options: RunnerOptions {
                entry_file: config.entry_file.clone(),
                manifest_file: config.manifest_file.clone(),
                source_extension: config.checker.extension.clone(),
                reserved_packages: config.reserved_packages.clone(),
                max_generation_attempts: config.max_generation_attempts.max(1),
                max_context_length: config.max_context_length,
                revert_on_structural_failure: config.revert_on_structural_failure,
            },
        }
    }

    /// Applies `plan` for `request`.
    ///
    /// Only storage and prompt errors abort the run; everything else ends up
    /// in [`TaskReport::warnings`] with the affected file at its last good content.
    pub fn run(
        &self,
        plan: &TaskPlan,
        request: &str,
        store: &mut ProjectStateStore,
        context: &mut TaskContext,
    ) -> Result<TaskReport, EngineError> {
        context.begin_task(request);
        tracing::info!(steps = plan.steps.len(), "running task");

        let mut before: BTreeMap<String, Option<String>> = BTreeMap::new();
        let watched = plan
            .steps
            .iter()
            .map(|s| s.file_path.as_str())
            .chain([self.options.entry_file.as_str(), self.options.manifest_file.as_str()]);
        for path in watched {
            before
                .entry(path.to_string())
                .or_insert_with(|| store.contains(path).then(|| store.get(path).to_string()));
        }

        let mut report = TaskReport {
            applied: 0,
            touched: Vec::new(),
            deleted: Vec::new(),
            entry_outcome: MergeOutcome::Skipped,
            manifest_changed: false,
            checks: Vec::new(),
            warnings: Vec::new(),
        };

        for step in &plan.steps {
            let path = step.file_path.as_str();
            context.mark_affected(path);
            match step.kind {
                OperationType::DeleteFile => {
                    if store.delete(path)? {
                        context.forget_file(path);
                        report.deleted.push(path.to_string());
                        report.touched.retain(|p| p != path);
                        report.applied += 1;
                    }
                }
                OperationType::CreateFile | OperationType::UpdateFile => {
                    match self.generate_content(request, path, &step.description, store)? {
                        Ok(content) => {
                            store.update(path, &content)?;
                            self.record_ownership(context, path, &content);
                            touch(&mut report.touched, path);
                            report.deleted.retain(|p| p != path);
                            report.applied += 1;
                        }
                        Err(reason) => {
                            tracing::warn!(path = %path, reason = %reason, "step skipped, existing content kept");
                            report.warnings.push(Recovered::GenerationSkipped {
                                path: path.to_string(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        self.reconcile_entry(plan, store, context, &mut report)?;
        self.merge_manifest(plan, store, &mut report)?;
        self.report_missing_packages(store, &mut report);
        self.validate_touched(store, context, &before, &mut report)?;

        tracing::info!(
            applied = report.applied,
            touched = report.touched.len(),
            warnings = report.warnings.len(),
            "task finished"
        );
        Ok(report)
    }

    /// Classes in the entry file are never owned by it, so copies of
    /// components defined elsewhere stay removable.
    fn record_ownership(&self, context: &mut TaskContext, path: &str, content: &str) {
        if path != self.options.entry_file {
            context.record_file(path, content);
        }
    }

    /// Outer error: prompt failures. Inner error: why no content came back.
    fn generate_content(
        &self,
        request: &str,
        path: &str,
        description: &str,
        store: &ProjectStateStore,
    ) -> Result<Result<String, String>, EngineError> {
        let prompt = self.prompts.render(
            "file_content",
            &ContentInput {
                task: request,
                path,
                description,
                existing: store.get(path),
                context: truncate_context(&store.context_digest(), self.options.max_context_length),
            },
        )?;

        let mut reason = String::new();
        for attempt in 1..=self.options.max_generation_attempts {
            match self.generator.generate(&prompt) {
                Ok(completion) => {
                    let code = extract_code(&completion.text);
                    if code.content.trim().is_empty() {
                        tracing::warn!(path = %path, attempt, "generated content is empty");
                        reason = "empty response".to_string();
                        continue;
                    }
                    if !code.summary.is_empty() {
                        tracing::debug!(path = %path, summary = %code.summary, "content generated");
                    }
                    return Ok(Ok(format!("{}\n", code.content.trim_end())));
                }
                Err(e) => {
                    tracing::warn!(path = %path, attempt, error = %e, "content generation failed");
                    reason = e.to_string();
                }
            }
        }
        Ok(Err(reason))
    }

    fn reconcile_entry(
        &self,
        plan: &TaskPlan,
        store: &mut ProjectStateStore,
        context: &mut TaskContext,
        report: &mut TaskReport,
    ) -> Result<(), EngineError> {
        let entry_path = self.reconciler.entry_path().to_string();
        let update = &plan.entry_point_update;
        let current = store.get(&entry_path).to_string();

        let base = if current.trim().is_empty() {
            if update.is_empty() {
                return Ok(());
            }
            tracing::info!(path = %entry_path, "entry file empty, starting from default template");
            DEFAULT_ENTRY_TEMPLATE.to_string()
        } else {
            current.clone()
        };

        let reconciliation = self.reconciler.reconcile(&base, update, context);
        if reconciliation.changed_from(&current) {
            store.update(&entry_path, &reconciliation.content)?;
            touch(&mut report.touched, &entry_path);
        }

        match &reconciliation.outcome {
            MergeOutcome::Reverted { reason, .. } => {
                report.warnings.push(Recovered::ReconciliationFailure {
                    path: entry_path,
                    reason: reason.clone(),
                });
            }
            _ => context.absorb_routes(&update.routes_to_add),
        }
        report.entry_outcome = reconciliation.outcome;
        Ok(())
    }

    fn merge_manifest(
        &self,
        plan: &TaskPlan,
        store: &mut ProjectStateStore,
        report: &mut TaskReport,
    ) -> Result<(), EngineError> {
        let path = self.options.manifest_file.as_str();
        if plan.dependencies.is_empty() {
            return Ok(());
        }
        if !store.contains(path) {
            tracing::warn!(path = %path, "manifest not found, dependencies not recorded");
            return Ok(());
        }

        let current = store.get(path).to_string();
        let merged = self.manifest.merge(&current, &plan.dependencies);
        if merged != current {
            store.update(path, &merged)?;
            touch(&mut report.touched, path);
            report.manifest_changed = true;
        }
        Ok(())
    }

    fn report_missing_packages(&self, store: &ProjectStateStore, report: &mut TaskReport) {
        let manifest_path = self.options.manifest_file.as_str();
        if !store.contains(manifest_path) {
            return;
        }
        let manifest = store.get(manifest_path);
        let declared = declared_packages(manifest);
        let own = package_name(manifest);

        let missing: Vec<String> = report
            .touched
            .iter()
            .filter(|p| self.is_source(p))
            .flat_map(|p| imported_packages(store.get(p)))
            .filter(|pkg| {
                !declared.contains(pkg)
                    && own.as_deref() != Some(pkg.as_str())
                    && !self.options.reserved_packages.contains(pkg)
            })
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        if !missing.is_empty() {
            tracing::warn!(packages = %missing.join(", "), "imported packages missing from manifest");
            report.warnings.push(Recovered::MissingPackages(missing));
        }
    }

    fn validate_touched(
        &self,
        store: &mut ProjectStateStore,
        context: &mut TaskContext,
        before: &BTreeMap<String, Option<String>>,
        report: &mut TaskReport,
    ) -> Result<(), EngineError> {
        let sources: Vec<String> = report
            .touched
            .iter()
            .filter(|p| self.is_source(p))
            .cloned()
            .collect();

        for path in sources {
            let checked = self
                .validator
                .validate_and_fix(store.get(&path), &path, store.state());

            match checked.state {
                CheckState::Fixed => {
                    store.update(&path, &checked.content)?;
                    self.record_ownership(context, &path, &checked.content);
                }
                CheckState::FixFailed => {
                    let previous = before.get(&path).cloned().flatten();
                    let reverted = match previous {
                        Some(original) if self.options.revert_on_structural_failure => {
                            tracing::warn!(path = %path, "reverting to content from before the task");
                            store.update(&path, &original)?;
                            self.record_ownership(context, &path, &original);
                            true
                        }
                        _ => {
                            tracing::warn!(path = %path, "structural failure, keeping generated content");
                            false
                        }
                    };
                    report.warnings.push(Recovered::StructuralFailure {
                        path: path.clone(),
                        reverted,
                        diagnostics: checked.diagnostics,
                    });
                }
                CheckState::Unchecked | CheckState::Passed | CheckState::CriticalFailure => {}
            }
            report.checks.push((path, checked.state));
        }
        Ok(())
    }

    fn is_source(&self, path: &str) -> bool {
        path.rsplit_once('.')
            .is_some_and(|(_, ext)| ext == self.options.source_extension)
    }
}

fn touch(touched: &mut Vec<String>, path: &str) {
    if !touched.iter().any(|p| p == path) {
        touched.push(path.to_string());
    }
}
