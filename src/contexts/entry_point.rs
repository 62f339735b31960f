use crate::contexts::merge_strategy::{route_keys, MergeStrategy};
use crate::contexts::source_scan::{find_code_byte, find_matching, line_start};
use crate::data::{EntryPointUpdate, TaskContext};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Entry file used when the project has none yet.
pub const DEFAULT_ENTRY_TEMPLATE: &str = "import 'package:flutter/material.dart';

void main() {
  runApp(const MyApp());
}

class MyApp extends StatelessWidget {
  const MyApp({super.key});

  @override
  Widget build(BuildContext context) {
    return MaterialApp(
      title: 'Flutter App',
      theme: ThemeData(colorSchemeSeed: Colors.blue, useMaterial3: true),
      initialRoute: '/',
      routes: {
        '/': (context) => const Scaffold(body: Center(child: Text('Home'))),
      },
    );
  }
}
";

/// What happened to the structural part of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge; no strategy call was made.
    Skipped,
    Merged { attempts: usize },
    /// Every attempt failed the gate; the original entry content was kept.
    Reverted { attempts: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub content: String,
    pub removed_definitions: Vec<String>,
    pub outcome: MergeOutcome,
}

impl Reconciliation {
    pub fn changed_from(&self, original: &str) -> bool {
        self.content != original
    }
}

fn import_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*import\s+['"]"#).expect("valid regex"))
}

fn root_widget_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:MaterialApp|CupertinoApp|WidgetsApp)(?:\.router)?\s*\(").expect("valid regex")
    })
}

fn build_method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bWidget\s+build\s*\(").expect("valid regex"))
}

fn module_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]([^'"]+)['"]"#).expect("valid regex"))
}

/// Acceptance test for merge candidates.
///
/// A candidate must contain an import, the root app widget and a build
/// method, and must register every route the update asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGate;

impl ValidationGate {
    pub fn check(&self, candidate: &str, update: &EntryPointUpdate) -> Result<(), String> {
        if !import_marker_re().is_match(candidate) {
            return Err("candidate has no import".to_string());
        }
        if !root_widget_re().is_match(candidate) {
            return Err("candidate has no root app widget".to_string());
        }
        if !build_method_re().is_match(candidate) {
            return Err("candidate has no build method".to_string());
        }

        let keys = route_keys(candidate);
        let missing: Vec<&str> = update
            .routes_to_add
            .keys()
            .chain(update.initial_route.iter())
            .filter(|route| !keys.contains(*route))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("candidate lacks routes {}", missing.join(", ")));
        }
        Ok(())
    }
}

/// Whether a trimmed line is an import directive.
fn is_import_line(trimmed: &str) -> bool {
    trimmed.starts_with("import ") || trimmed.starts_with("import'") || trimmed.starts_with("import\"")
}

/// Drops a leading `import` keyword, but not the start of a name like `importer.dart`.
fn strip_import_keyword(text: &str) -> &str {
    match text.strip_prefix("import") {
        Some(rest) if rest.starts_with(|c: char| c.is_whitespace() || c == '\'' || c == '"') => rest,
        _ => text,
    }
}

/// The module path an import line or an import request refers to.
pub fn module_path(import: &str) -> String {
    let trimmed = import.trim();
    match module_re().captures(trimmed) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => strip_import_keyword(trimmed)
            .trim()
            .trim_end_matches(';')
            .trim()
            .to_string(),
    }
}

/// Adds requested imports, dropping duplicates by module path.
///
/// Import lines are re-emitted sorted, followed by one blank line and the
/// body. `library` directives stay on top. With nothing requested the
/// content is returned as is. Running it twice with the same request gives
/// the same text as running it once.
pub fn merge_imports(content: &str, requested: &[String]) -> String {
    if requested.iter().all(|r| module_path(r).is_empty()) {
        return content.to_string();
    }

    let mut preamble: Vec<&str> = Vec::new();
    let mut imports: Vec<(String, String)> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if is_import_line(trimmed) {
            let module = module_path(trimmed);
            if !imports.iter().any(|(m, _)| *m == module) {
                imports.push((module, trimmed.to_string()));
            }
        } else if body.is_empty() && imports.is_empty() && trimmed.starts_with("library") {
            preamble.push(line);
        } else {
            body.push(line);
        }
    }

    for request in requested {
        let module = module_path(request);
        if module.is_empty() || imports.iter().any(|(m, _)| *m == module) {
            continue;
        }
        let line = format!("import '{}';", module);
        imports.push((module, line));
    }
    imports.sort();

    while body.first().is_some_and(|l| l.trim().is_empty()) {
        body.remove(0);
    }

    let mut out = String::new();
    if !preamble.is_empty() {
        out.push_str(&preamble.join("\n"));
        out.push_str("\n\n");
    }
    let lines: Vec<&str> = imports.iter().map(|(_, line)| line.as_str()).collect();
    out.push_str(&lines.join("\n"));
    if !body.is_empty() {
        out.push_str("\n\n");
        out.push_str(&body.join("\n"));
    }
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Removes top-level definitions of `names` (and their `_NameState` companions).
///
/// # Returns
/// The cleaned content and the names whose definitions were removed.
pub fn remove_duplicate_definitions<'a>(
    content: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> (String, Vec<String>) {
    let mut text = content.to_string();
    let mut removed = Vec::new();

    for name in names {
        let mut hit = false;
        for target in [name.to_string(), format!("_{}State", name)] {
            while let Some(cut) = remove_definition(&text, &target) {
                text = cut;
                hit = true;
            }
        }
        if hit {
            removed.push(name.to_string());
        }
    }
    (text, removed)
}

fn remove_definition(text: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r"(?m)^(?:(?:abstract|base|final|sealed|interface)\s+)*class\s+{}\b",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(text)?;
    let open = find_code_byte(text, found.end(), b'{')?;
    let Some(close) = find_matching(text, open) else {
        tracing::warn!(component = %name, "definition has unbalanced braces, left in place");
        return None;
    };

    let start = annotations_start(text, line_start(text, found.start()));
    let mut end = close + 1;
    if text[end..].starts_with('\n') {
        end += 1;
    }
    let mut result = String::with_capacity(text.len());
    result.push_str(&text[..start]);
    let rest = &text[end..];
    if result.ends_with("\n\n") {
        result.push_str(rest.trim_start_matches('\n'));
    } else {
        result.push_str(rest);
    }
    Some(result)
}

/// Moves `start` back over doc comments and annotations directly above it.
fn annotations_start(text: &str, start: usize) -> usize {
    let mut start = start;
    while start > 0 {
        let prev_start = line_start(text, start - 1);
        let prev = text[prev_start..start - 1].trim();
        if prev.starts_with("///") || prev.starts_with('@') {
            start = prev_start;
        } else {
            break;
        }
    }
    start
}

/// Route keys already registered in an entry file.
pub fn existing_routes(content: &str) -> BTreeSet<String> {
    route_keys(content).into_iter().collect()
}

/// Applies entry-point registrations by merging, never by overwriting.
pub struct EntryPointReconciler<S: MergeStrategy> {
    entry_path: String,
    strategy: S,
    max_attempts: usize,
    gate: ValidationGate,
}

impl<S: MergeStrategy> EntryPointReconciler<S> {
    /// # Arguments
    /// * `entry_path` - Relative path of the entry file; components owned by it are never removed
    /// * `strategy` - Route/provider merge strategy
    /// * `max_attempts` - Attempts before the original content is kept
    pub fn new(entry_path: impl Into<String>, strategy: S, max_attempts: usize) -> Self {
        Self {
            entry_path: entry_path.into(),
            strategy,
            max_attempts: max_attempts.max(1),
            gate: ValidationGate,
        }
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// Reconciles `entry` with `update`.
    ///
    /// Duplicate definitions of components owned by other files are removed,
    /// imports are merged, then routes, providers and the initial route go
    /// through the strategy until a candidate passes the gate. If none does,
    /// the original `entry` comes back unchanged.
    pub fn reconcile(
        &self,
        entry: &str,
        update: &EntryPointUpdate,
        known: &TaskContext,
    ) -> Reconciliation {
        let (deduped, removed_definitions) =
            remove_duplicate_definitions(entry, known.components_outside(&self.entry_path));
        for name in &removed_definitions {
            tracing::info!(component = %name, path = %self.entry_path, "removed duplicate definition");
        }

        let with_imports = merge_imports(&deduped, &update.imports_to_add);

        if !update.has_structural_changes() {
            return Reconciliation {
                content: with_imports,
                removed_definitions,
                outcome: MergeOutcome::Skipped,
            };
        }

        let mut reason = String::new();
        for attempt in 1..=self.max_attempts {
            let candidate = match self.strategy.merge(&with_imports, update) {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!(attempt, strategy = self.strategy.name(), error = %e, "entry point merge failed");
                    reason = e.to_string();
                    continue;
                }
            };
            match self.gate.check(&candidate, update) {
                Ok(()) => {
                    tracing::debug!(attempt, strategy = self.strategy.name(), "entry point merged");
                    return Reconciliation {
                        content: candidate,
                        removed_definitions,
                        outcome: MergeOutcome::Merged { attempts: attempt },
                    };
                }
                Err(rejected) => {
                    tracing::warn!(attempt, strategy = self.strategy.name(), reason = %rejected, "merge candidate rejected");
                    reason = rejected;
                }
            }
        }

        tracing::warn!(
            path = %self.entry_path,
            attempts = self.max_attempts,
            "entry point reconciliation failed, keeping original content"
        );
        Reconciliation {
            content: entry.to_string(),
            removed_definitions: Vec::new(),
            outcome: MergeOutcome::Reverted {
                attempts: self.max_attempts,
                reason,
            },
        }
    }
}
