use anyhow::{bail, Context, Result};
use reconcile::config::{EngineConfig, MergeStrategyKind};
use reconcile::contexts::entry_point::DEFAULT_ENTRY_TEMPLATE;
use reconcile::contexts::plan_validator::{
    check_initial_route, validate, validate_entry_point, ENTRY_POINT_KEY,
};
use reconcile::contexts::tolerant_json::parse_tolerant;
use reconcile::contexts::{
    simplify, CheckState, CollaboratorMerge, DiagnosticClassifier, EntryPointReconciler,
    HeuristicMerge, ManifestUpdater, MergeOutcome, MergeStrategy, Planner, ProjectStateStore,
    SimplifyPolicy, StructuralValidator, TaskReport, TaskRunner,
};
use reconcile::data::{DependencyDeclaration, TaskContext, TaskPlan, TextGenerator};
use reconcile::error::EngineError;
use reconcile::registries::{checker_from_config, generator_from_config, PromptRegistry};
use reconcile::task_history::TaskHistory;
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod dev_server;
mod progress;

use dev_server::{DevServer, RefreshSignal};
use progress::ProgressIndicator;

#[derive(Clone)]
pub struct Config {
    pub root: PathBuf,
    pub verbose: bool,
    pub dry_run: bool,
}

/// Everything a command needs about the project at hand.
struct Workspace {
    engine: EngineConfig,
    store: ProjectStateStore,
    prompts: PromptRegistry,
}

impl Workspace {
    fn open(config: &Config) -> Result<Self> {
        let engine = EngineConfig::load(&config.root)?;
        let store = ProjectStateStore::open(&config.root, &engine)
            .with_context(|| format!("Failed to scan project at {}", config.root.display()))?;
        let prompts = PromptRegistry::load(&config.root.join(&engine.prompts_dir))
            .context("Failed to load prompt overrides")?;
        if config.verbose {
            println!("Tracking {} file(s) in {}", store.state().len(), config.root.display());
        }
        Ok(Self {
            engine,
            store,
            prompts,
        })
    }

    fn generator(&self) -> Result<Box<dyn TextGenerator>> {
        generator_from_config(&self.engine, self.store.root())
            .context("Failed to set up the text generator")
    }

    fn strategy<'g>(&self, generator: &'g dyn TextGenerator) -> Box<dyn MergeStrategy + 'g> {
        match self.engine.merge_strategy {
            MergeStrategyKind::Heuristic => Box::new(HeuristicMerge),
            MergeStrategyKind::Collaborator => Box::new(CollaboratorMerge::new(
                generator,
                self.prompts.clone(),
                self.engine.entry_file.clone(),
            )),
        }
    }

    /// A task context that already knows the components defined on disk.
    fn seed_context(&self) -> TaskContext {
        let mut context = TaskContext::new();
        let suffix = format!(".{}", self.engine.checker.extension);
        for (path, content) in self.store.state().iter() {
            if path != self.engine.entry_file && path.ends_with(&suffix) {
                context.record_file(path, content);
            }
        }
        context
    }
}

pub fn digest(config: &Config) -> Result<()> {
    let ws = Workspace::open(config)?;
    println!("{}", ws.store.context_digest());
    Ok(())
}

fn load_plan(path: &Path, simplify_plan: bool, ws: &Workspace) -> Result<TaskPlan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let value = parse_tolerant(&text)
        .with_context(|| format!("{} does not contain a JSON object", path.display()))?;
    let mut plan = validate(&value).with_context(|| format!("Invalid plan {}", path.display()))?;

    let entry = ws.store.get(&ws.engine.entry_file);
    let routes = reconcile::contexts::entry_point::existing_routes(entry);
    if let Err(e) = check_initial_route(&plan, &routes) {
        tracing::warn!(error = %e, "plan initial route will be rejected by the entry point gate");
    }

    if simplify_plan {
        plan = simplify(&plan, &SimplifyPolicy::from_config(&ws.engine));
    }
    Ok(plan)
}

pub fn validate_plan(path: &Path, simplify_plan: bool, config: &Config) -> Result<()> {
    let ws = Workspace::open(config)?;
    let plan = load_plan(path, simplify_plan, &ws)?;
    println!("{}", plan.to_json_pretty());
    Ok(())
}

/// Runs one plan, prints the per-file summary and records the task.
fn execute(
    ws: &mut Workspace,
    generator: &dyn TextGenerator,
    plan: &TaskPlan,
    request: &str,
    context: &mut TaskContext,
) -> Result<TaskReport> {
    let checker = checker_from_config(&ws.engine, ws.store.root());
    let strategy = ws.strategy(generator);
    let runner = TaskRunner::new(generator, checker, strategy, ws.prompts.clone(), &ws.engine);

    println!("Executing task: {} ({} step(s))", request, plan.steps.len());
    let mut progress = ProgressIndicator::new(plan.steps.len());
    let report = runner
        .run(plan, request, &mut ws.store, context)
        .with_context(|| format!("Task failed: {}", request))?;
    progress.record_report(&report);
    progress.finish();

    let mut history = TaskHistory::load(ws.store.root())?;
    history.record(request, plan, &report, &ws.store);
    history.save()?;

    Ok(report)
}

pub fn apply(path: &Path, simplify_plan: bool, config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let plan = load_plan(path, simplify_plan, &ws)?;
    if config.dry_run {
        println!("[DRY RUN] Would apply:\n{}", plan.to_json_pretty());
        return Ok(());
    }

    let generator = ws.generator()?;
    let mut context = ws.seed_context();
    let request = format!("apply {}", path.display());
    execute(&mut ws, generator.as_ref(), &plan, &request, &mut context)?;
    Ok(())
}

/// Plans `request`, optionally reviewed and simplified.
fn plan_request(
    ws: &Workspace,
    planner: &Planner<&dyn TextGenerator>,
    request: &str,
    simplify_plan: bool,
    review: bool,
) -> Result<TaskPlan> {
    let mut plan = match planner.plan(request, &ws.store) {
        Ok(plan) => plan,
        Err(e @ EngineError::PlanExhausted { .. }) => {
            eprintln!("✗ {}", e);
            eprintln!("A plan that only updates the entry file would be:");
            eprintln!(
                "{}",
                TaskPlan::fallback(&ws.engine.entry_file, request).to_json_pretty()
            );
            eprintln!("Rephrase the request, or save the plan above and run it with `apply`.");
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Planning failed"),
    };
    if review {
        plan = planner.review(&plan, request);
    }
    if simplify_plan {
        plan = simplify(&plan, &SimplifyPolicy::from_config(&ws.engine));
    }
    Ok(plan)
}

pub fn task(request: &str, simplify_plan: bool, review: bool, config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let generator = ws.generator()?;
    let planner = Planner::new(generator.as_ref(), ws.prompts.clone(), &ws.engine);
    let plan = plan_request(&ws, &planner, request, simplify_plan, review)?;

    if config.dry_run {
        println!("[DRY RUN] Planned:\n{}", plan.to_json_pretty());
        return Ok(());
    }
    let mut context = ws.seed_context();
    execute(&mut ws, generator.as_ref(), &plan, request, &mut context)?;
    Ok(())
}

pub fn reconcile_entry(path: &Path, config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = parse_tolerant(&text)
        .with_context(|| format!("{} does not contain a JSON object", path.display()))?;
    let descriptor = match &value {
        Value::Object(map) => map.get(ENTRY_POINT_KEY).unwrap_or(&value),
        _ => &value,
    };
    let update = validate_entry_point(descriptor)
        .with_context(|| format!("Invalid entry point update {}", path.display()))?;

    let entry_path = ws.engine.entry_file.clone();
    let current = ws.store.get(&entry_path).to_string();
    let base = if current.trim().is_empty() {
        DEFAULT_ENTRY_TEMPLATE.to_string()
    } else {
        current.clone()
    };

    let generator = match ws.engine.merge_strategy {
        MergeStrategyKind::Collaborator => Some(ws.generator()?),
        MergeStrategyKind::Heuristic => None,
    };
    let strategy: Box<dyn MergeStrategy + '_> = match &generator {
        Some(generator) => ws.strategy(generator.as_ref()),
        None => Box::new(HeuristicMerge),
    };
    let reconciler =
        EntryPointReconciler::new(entry_path.clone(), strategy, ws.engine.max_merge_attempts);
    let reconciliation = reconciler.reconcile(&base, &update, &ws.seed_context());

    for name in &reconciliation.removed_definitions {
        println!("Removed duplicate definition of {}", name);
    }
    match &reconciliation.outcome {
        MergeOutcome::Skipped => println!("No routes, providers or initial route to merge"),
        MergeOutcome::Merged { attempts } => println!("✓ Merged in {} attempt(s)", attempts),
        MergeOutcome::Reverted { attempts, reason } => {
            println!("✗ Kept original after {} attempt(s): {}", attempts, reason)
        }
    }

    if !reconciliation.changed_from(&current) {
        println!("{} is up to date", entry_path);
    } else if config.dry_run {
        println!("[DRY RUN] Would write {}:\n{}", entry_path, reconciliation.content);
    } else {
        ws.store.update(&entry_path, &reconciliation.content)?;
        println!("✓ Updated {}", entry_path);
    }
    Ok(())
}

pub fn add_deps(packages: &[String], config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let declarations = packages
        .iter()
        .map(|spec| {
            DependencyDeclaration::parse(spec)
                .with_context(|| format!("Invalid dependency '{}'", spec))
        })
        .collect::<Result<Vec<_>>>()?;

    let manifest_path = ws.engine.manifest_file.clone();
    if !ws.store.contains(&manifest_path) {
        bail!("{} not found in {}", manifest_path, config.root.display());
    }
    let current = ws.store.get(&manifest_path).to_string();
    let merged = ManifestUpdater::from_config(&ws.engine).merge(&current, &declarations);

    if merged == current {
        println!("{} is up to date", manifest_path);
    } else if config.dry_run {
        println!("[DRY RUN] Would write {}:\n{}", manifest_path, merged);
    } else {
        ws.store.update(&manifest_path, &merged)?;
        println!("✓ Updated {}", manifest_path);
    }
    Ok(())
}

pub fn check(paths: &[String], config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let generator = ws.generator()?;
    let validator = StructuralValidator::new(
        checker_from_config(&ws.engine, ws.store.root()),
        generator.as_ref(),
        ws.prompts.clone(),
        DiagnosticClassifier::new(&ws.engine.critical_patterns),
    )
    .with_max_repair_attempts(ws.engine.max_repair_attempts)
    .with_max_context_length(ws.engine.max_context_length);

    let mut progress = ProgressIndicator::new(paths.len());
    for path in paths {
        progress.start_item(path);
        let file = ws.store.file(path);
        if !file.exists {
            progress.warn(format!("{}: not a tracked file", path));
            progress.complete_item(path, false);
            continue;
        }

        let report = validator.validate_and_fix(&file.content, &file.path, ws.store.state());
        if config.verbose && !report.diagnostics.is_empty() {
            println!("{}", report.diagnostics);
        }
        match report.state {
            CheckState::Fixed if config.dry_run => {
                progress.warn(format!("{}: fix available (dry run, not written)", file.path));
            }
            CheckState::Fixed => {
                ws.store.update(&file.path, &report.content)?;
                progress.warn(format!("{}: repaired", file.path));
            }
            CheckState::Unchecked => {
                progress.warn(format!("{}: checker unavailable", file.path));
            }
            _ => {}
        }
        let ok = !matches!(report.state, CheckState::FixFailed | CheckState::CriticalFailure);
        progress.complete_item(path, ok);
    }
    progress.finish();

    if progress.has_failures() {
        bail!("Structural check failed");
    }
    Ok(())
}

pub fn history(last: usize, config: &Config) -> Result<()> {
    let ws = Workspace::open(config)?;
    let history = TaskHistory::load(ws.store.root())?;
    println!("{}", history.summary(last));

    let modified = history.modified_since_recorded(&ws.store);
    if !modified.is_empty() {
        println!("\nChanged outside recorded tasks:");
        for path in modified {
            println!("  {}", path);
        }
    }
    Ok(())
}

/// Interactive loop: one task per stdin line, hot reload after each applied task.
pub fn session(device: Option<String>, config: &Config) -> Result<()> {
    let mut ws = Workspace::open(config)?;
    let generator = ws.generator()?;
    let planner = Planner::new(generator.as_ref(), ws.prompts.clone(), &ws.engine);
    let mut context = ws.seed_context();

    let mut server = if config.dry_run {
        None
    } else {
        let mut server_config = ws.engine.dev_server.clone();
        if device.is_some() {
            server_config.device = device;
        }
        let server = DevServer::start(&server_config, ws.store.root())?;
        println!("Waiting for {} to be ready...", server_config.program);
        if !server.wait_ready(Duration::from_secs(server_config.ready_timeout_secs)) {
            tracing::warn!("dev server readiness marker not seen, continuing");
        }
        Some(server)
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("task> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let request = line?;
        let request = request.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request, "exit" | "quit") {
            break;
        }

        let plan = match plan_request(&ws, &planner, request, false, false) {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("✗ {:#}", e);
                continue;
            }
        };
        if config.dry_run {
            println!("[DRY RUN] Planned:\n{}", plan.to_json_pretty());
            continue;
        }

        let report = match execute(&mut ws, generator.as_ref(), &plan, request, &mut context) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("✗ {:#}", e);
                continue;
            }
        };
        if let Some(server) = server.as_mut() {
            if report.touched.is_empty() && report.deleted.is_empty() {
                continue;
            }
            let signal = if report.manifest_changed {
                RefreshSignal::FullRestart
            } else {
                RefreshSignal::HotReload
            };
            if let Err(e) = server.send(signal) {
                eprintln!("✗ {:#}", e);
            }
        }
    }

    if let Some(mut server) = server {
        server.stop()?;
    }
    Ok(())
}
