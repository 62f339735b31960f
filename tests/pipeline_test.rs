//! Drives the whole engine over a temporary Flutter project with scripted collaborators.

use reconcile::config::EngineConfig;
use reconcile::contexts::{
    simplify, CheckState, HeuristicMerge, MergeOutcome, Planner, ProjectStateStore,
    SimplifyPolicy, TaskRunner,
};
use reconcile::data::{CheckReport, Completion, StructuralChecker, TaskContext, TextGenerator};
use reconcile::error::{CheckerError, EngineError, ServiceError};
use reconcile::registries::PromptRegistry;
use reconcile::task_history::TaskHistory;
use std::cell::RefCell;
use std::fs;
use std::path::Path;

const MAIN: &str = "import 'package:flutter/material.dart';

void main() {
  runApp(const MyApp());
}

class MyApp extends StatelessWidget {
  const MyApp({super.key});

  @override
  Widget build(BuildContext context) {
    return MaterialApp(
      title: 'Demo',
      initialRoute: '/',
      routes: {
        '/': (context) => const HomeScreen(),
      },
    );
  }
}

class HomeScreen extends StatelessWidget {
  const HomeScreen({super.key});

  @override
  Widget build(BuildContext context) => const Placeholder();
}

/// Counter screen drafted before the task split it into its own file.
class CounterScreen extends StatelessWidget {
  const CounterScreen({super.key});

  @override
  Widget build(BuildContext context) => const Text('old');
}
";

const PUBSPEC: &str = "name: demo
description: Demo app.

environment:
  sdk: '>=3.0.0 <4.0.0'

dependencies:
  flutter:
    sdk: flutter
  cupertino_icons: ^1.0.2

dev_dependencies:
  flutter_test:
    sdk: flutter

flutter:
  uses-material-design: true
";

// Single quotes, a bare key and trailing commas: the tolerant parser has to cope.
const PLAN_REPLY: &str = r#"Here is the plan:
```json
{
  'steps': [
    {"type": "create_file", "file_path": "lib/screens/counter_screen.dart", "description": "CounterScreen showing the CounterProvider value"},
    {"type": "create_file", "file_path": "lib/providers/counter_provider.dart", "description": "CounterProvider ChangeNotifier"},
    {"type": "create_file", "file_path": "test/counter_test.dart", "description": "widget test"},
  ],
  update_main_dart: {
    "imports_to_add": ["screens/counter_screen.dart", "providers/counter_provider.dart"],
    "routes_to_add": {"/counter": "const CounterScreen()"},
    "initial_route": "/counter",
    "providers_to_initialize": ["ChangeNotifierProvider(create: (_) => CounterProvider())"],
  },
  "dependencies": ["provider: ^6.1.2", {"package_name": "lottie", "version": "^3.0.0"}],
}
```"#;

const COUNTER_SCREEN: &str = "import 'package:flutter/material.dart';
import 'package:provider/provider.dart';

import '../providers/counter_provider.dart';

class CounterScreen extends StatelessWidget {
  const CounterScreen({super.key});

  @override
  Widget build(BuildContext context) {
    final counter = context.watch<CounterProvider>();
    return Scaffold(body: Center(child: Text('${counter.value}')));
  }
}";

const COUNTER_PROVIDER: &str = "import 'package:flutter/foundation.dart';

class CounterProvider extends ChangeNotifier {
  int value = 0;

  void increment() {
    value++;
    notifyListeners();
  }
}";

/// Answers planning prompts with the plan and file prompts with the matching file.
struct ScriptedModel {
    prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            prompts: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl TextGenerator for ScriptedModel {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        let reply = if prompt.contains("You are planning changes") {
            PLAN_REPLY.to_string()
        } else if prompt.contains("File: lib/screens/counter_screen.dart") {
            format!("```dart\n{}\n```\nCounter screen.", COUNTER_SCREEN)
        } else if prompt.contains("File: lib/providers/counter_provider.dart") {
            format!("```dart\n{}\n```", COUNTER_PROVIDER)
        } else {
            return Err(ServiceError::Empty);
        };
        Ok(Completion::new(reply))
    }
}

/// Passes everything except sources containing `BROKEN`.
struct MarkerChecker;

impl StructuralChecker for MarkerChecker {
    fn check(&self, source: &str) -> Result<CheckReport, CheckerError> {
        if source.contains("BROKEN") {
            Ok(CheckReport::failed("error - Undefined name 'BROKEN'."))
        } else {
            Ok(CheckReport::passed())
        }
    }
}

fn flutter_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join("lib/main.dart"), MAIN).unwrap();
    fs::write(dir.path().join("pubspec.yaml"), PUBSPEC).unwrap();
    dir
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

#[test]
fn test_plan_simplify_and_run() {
    let dir = flutter_project();
    let config = EngineConfig::default();
    let mut store = ProjectStateStore::open(dir.path(), &config).unwrap();
    let model = ScriptedModel::new();

    let planner = Planner::new(&model, PromptRegistry::builtin(), &config);
    let plan = planner.plan("add a counter screen", &store).unwrap();
    assert_eq!(plan.steps.len(), 3);
    assert_eq!(plan.dependencies.len(), 2);

    let plan = simplify(&plan, &SimplifyPolicy::from_config(&config));
    let paths: Vec<&str> = plan.steps.iter().map(|s| s.file_path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["lib/screens/counter_screen.dart", "lib/providers/counter_provider.dart"]
    );
    assert_eq!(plan.dependencies.len(), 1);

    let runner = TaskRunner::new(
        &model,
        MarkerChecker,
        HeuristicMerge,
        PromptRegistry::builtin(),
        &config,
    );
    let mut context = TaskContext::new();
    let report = runner
        .run(&plan, "add a counter screen", &mut store, &mut context)
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.warnings);
    assert!(matches!(report.entry_outcome, MergeOutcome::Merged { .. }));
    assert!(report.manifest_changed);
    assert!(report.checks.iter().all(|(_, state)| *state == CheckState::Passed));

    let main = read(dir.path(), "lib/main.dart");
    assert!(main.contains("import 'package:provider/provider.dart';"));
    assert!(main.contains("import 'screens/counter_screen.dart';"));
    assert!(main.contains("import 'providers/counter_provider.dart';"));
    assert!(main.contains("'/counter': (context) => const CounterScreen(),"));
    assert!(main.contains("initialRoute: '/counter'"));
    assert!(main.contains("MultiProvider("));
    assert!(main.contains("ChangeNotifierProvider(create: (_) => CounterProvider())"));
    assert!(main.contains("child: const MyApp()"));
    assert!(!main.contains("class CounterScreen"));
    assert!(!main.contains("Counter screen drafted"));
    assert!(main.contains("class HomeScreen"));

    let pubspec = read(dir.path(), "pubspec.yaml");
    assert!(pubspec.contains("  cupertino_icons: ^1.0.2\n  provider: ^6.1.2\n"));
    assert!(!pubspec.contains("lottie"));
    assert!(!dir.path().join("test/counter_test.dart").exists());

    assert_eq!(
        context.component_owner("CounterScreen"),
        Some("lib/screens/counter_screen.dart")
    );
    assert_eq!(context.route_component("/counter"), Some("CounterScreen"));

    let mut history = TaskHistory::load(dir.path()).unwrap();
    history.record("add a counter screen", &plan, &report, &store);
    history.save().unwrap();
    assert!(dir.path().join(".reconcile/task_history.json").exists());
    assert!(history.modified_since_recorded(&store).is_empty());
}

#[test]
fn test_rerunning_a_plan_is_idempotent() {
    let dir = flutter_project();
    let config = EngineConfig::default();
    let mut store = ProjectStateStore::open(dir.path(), &config).unwrap();
    let model = ScriptedModel::new();
    let planner = Planner::new(&model, PromptRegistry::builtin(), &config);
    let plan = simplify(
        &planner.plan("add a counter screen", &store).unwrap(),
        &SimplifyPolicy::from_config(&config),
    );
    let runner = TaskRunner::new(
        &model,
        MarkerChecker,
        HeuristicMerge,
        PromptRegistry::builtin(),
        &config,
    );

    runner
        .run(&plan, "first", &mut store, &mut TaskContext::new())
        .unwrap();
    let main_once = read(dir.path(), "lib/main.dart");
    let pubspec_once = read(dir.path(), "pubspec.yaml");

    let second = runner
        .run(&plan, "second", &mut store, &mut TaskContext::new())
        .unwrap();
    assert!(second.is_clean(), "{:?}", second.warnings);
    assert_eq!(read(dir.path(), "lib/main.dart"), main_once);
    assert_eq!(read(dir.path(), "pubspec.yaml"), pubspec_once);
    assert_eq!(main_once.matches("'/counter'").count(), 1);
    assert_eq!(main_once.matches("CounterProvider()").count(), 1);
    assert_eq!(pubspec_once.matches("provider:").count(), 1);
}

#[test]
fn test_store_digest_is_stable_and_tracks_writes() {
    let dir = flutter_project();
    let config = EngineConfig::default();
    let mut store = ProjectStateStore::open(dir.path(), &config).unwrap();

    let first = store.context_digest();
    assert_eq!(first, store.context_digest());
    assert!(first.starts_with("Project Structure:\nlib/main.dart\npubspec.yaml\n"));

    store.update("lib/models/item.dart", "class Item {}\n").unwrap();
    let second = store.context_digest();
    assert_ne!(first, second);
    assert!(second.contains("--- lib/models/item.dart ---\nclass Item {}\n"));
    assert_eq!(read(dir.path(), "lib/models/item.dart"), "class Item {}\n");
}

#[test]
fn test_unreachable_model_exhausts_planning() {
    struct Offline;
    impl TextGenerator for Offline {
        fn generate(&self, _prompt: &str) -> Result<Completion, ServiceError> {
            Err(ServiceError::Transport("connection refused".to_string()))
        }
    }

    let dir = flutter_project();
    let config = EngineConfig::default();
    let store = ProjectStateStore::open(dir.path(), &config).unwrap();
    let planner = Planner::new(Offline, PromptRegistry::builtin(), &config);
    let error = planner.plan("anything", &store).unwrap_err();
    assert!(matches!(error, EngineError::PlanExhausted { attempts: 3, .. }));
    assert_eq!(read(dir.path(), "lib/main.dart"), MAIN);
}

#[test]
fn test_model_calls_stay_bounded() {
    let dir = flutter_project();
    let config = EngineConfig::default();
    let mut store = ProjectStateStore::open(dir.path(), &config).unwrap();
    let model = ScriptedModel::new();
    let planner = Planner::new(&model, PromptRegistry::builtin(), &config);
    let plan = planner.plan("add a counter screen", &store).unwrap();
    assert_eq!(model.calls(), 1);

    let runner = TaskRunner::new(
        &model,
        MarkerChecker,
        HeuristicMerge,
        PromptRegistry::builtin(),
        &config,
    );
    let report = runner
        .run(&plan, "unsimplified", &mut store, &mut TaskContext::new())
        .unwrap();
    // Two generated files plus three failed attempts for the test file.
    assert_eq!(model.calls(), 1 + 2 + 3);
    assert_eq!(report.applied, 2);
    assert_eq!(report.warnings.len(), 1);
}
