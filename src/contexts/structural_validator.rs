use crate::contexts::response_parser::extract_code;
use crate::data::{truncate_context, ProjectState, StructuralChecker, TextGenerator};
use crate::registries::PromptRegistry;
use regex::Regex;
use serde::Serialize;

/// Where a file ended up in the check/repair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    /// The checker could not run, or checking is disabled.
    Unchecked,
    Passed,
    CriticalFailure,
    Fixed,
    FixFailed,
}

/// Result of [`StructuralValidator::validate_and_fix`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Content to keep: the input, or the fixed text when the state is `Fixed`.
    pub content: String,
    pub state: CheckState,
    /// Diagnostics of the last check that ran.
    pub diagnostics: String,
    pub repair_attempts: usize,
}

/// Splits diagnostics into critical and cosmetic by a fixed set of markers.
#[derive(Debug, Clone)]
pub struct DiagnosticClassifier {
    critical: Vec<Regex>,
}

impl DiagnosticClassifier {
    /// Compiles the marker patterns; invalid patterns are logged and skipped.
    pub fn new(patterns: &[String]) -> Self {
        let critical = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring invalid critical pattern");
                    None
                }
            })
            .collect();
        Self { critical }
    }

    pub fn is_critical(&self, diagnostics: &str) -> bool {
        self.critical.iter().any(|re| re.is_match(diagnostics))
    }
}

#[derive(Serialize)]
struct RepairInput<'a> {
    path: &'a str,
    diagnostics: &'a str,
    content: &'a str,
    context: &'a str,
}

/// Check, classify, repair, re-check.
///
/// Never fails: every problem ends as a state in the report, and content is
/// only replaced by a fix that the checker accepts.
pub struct StructuralValidator<C: StructuralChecker, G: TextGenerator> {
    checker: C,
    repairer: G,
    prompts: PromptRegistry,
    classifier: DiagnosticClassifier,
    max_repair_attempts: usize,
    max_context_length: usize,
    enabled: bool,
}

impl<C: StructuralChecker, G: TextGenerator> StructuralValidator<C, G> {
    pub fn new(checker: C, repairer: G, prompts: PromptRegistry, classifier: DiagnosticClassifier) -> Self {
        Self {
            checker,
            repairer,
            prompts,
            classifier,
            max_repair_attempts: 1,
            max_context_length: 100_000,
            enabled: true,
        }
    }

    pub fn with_max_repair_attempts(mut self, attempts: usize) -> Self {
        self.max_repair_attempts = attempts.max(1);
        self
    }

    pub fn with_max_context_length(mut self, length: usize) -> Self {
        self.max_context_length = length;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Runs the checker once and classifies the outcome.
    fn classify(&self, content: &str, path: &str) -> (CheckState, String) {
        match self.checker.check(content) {
            Ok(report) if report.ok => (CheckState::Passed, report.diagnostics),
            Ok(report) if !self.classifier.is_critical(&report.diagnostics) => {
                tracing::debug!(path = %path, "only non-critical diagnostics, accepting");
                (CheckState::Passed, report.diagnostics)
            }
            Ok(report) => (CheckState::CriticalFailure, report.diagnostics),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "structural checker unavailable");
                (CheckState::Unchecked, e.to_string())
            }
        }
    }

    /// Validates `content` of `path` and repairs critical failures.
    ///
    /// # Arguments
    /// * `content` - Candidate file content
    /// * `path` - Relative path, used for prompts and logs
    /// * `siblings` - Other project files, given to the repairer as context
    ///
    /// # Returns
    /// A report whose content is the input unless a fix passed the checker.
    pub fn validate_and_fix(&self, content: &str, path: &str, siblings: &ProjectState) -> RepairReport {
        let unchanged = |state, diagnostics: String, repair_attempts| RepairReport {
            content: content.to_string(),
            state,
            diagnostics,
            repair_attempts,
        };

        if !self.enabled {
            return unchanged(CheckState::Unchecked, String::new(), 0);
        }

        let (state, diagnostics) = self.classify(content, path);
        if state != CheckState::CriticalFailure {
            return unchanged(state, diagnostics, 0);
        }

        tracing::info!(path = %path, "critical diagnostics, attempting repair");
        let context = truncate_context(
            &siblings.render_filtered(|p| p != path),
            self.max_context_length,
        );

        let mut last_diagnostics = diagnostics;
        let mut current = content.to_string();
        for attempt in 1..=self.max_repair_attempts {
            let prompt = match self.prompts.render(
                "structural_repair",
                &RepairInput {
                    path,
                    diagnostics: &last_diagnostics,
                    content: &current,
                    context: &context,
                },
            ) {
                Ok(prompt) => prompt,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "cannot build repair prompt");
                    return unchanged(CheckState::FixFailed, last_diagnostics, attempt - 1);
                }
            };

            let fixed = match self.repairer.generate(&prompt) {
                Ok(completion) => extract_code(&completion.text).content,
                Err(e) => {
                    tracing::warn!(path = %path, attempt, error = %e, "repair request failed");
                    continue;
                }
            };
            if fixed.trim().is_empty() {
                tracing::warn!(path = %path, attempt, "repair response contained no code");
                continue;
            }
            let fixed = format!("{}\n", fixed.trim_end());

            match self.classify(&fixed, path) {
                (CheckState::Passed, diagnostics) => {
                    tracing::info!(path = %path, attempt, "repair accepted");
                    return RepairReport {
                        content: fixed,
                        state: CheckState::Fixed,
                        diagnostics,
                        repair_attempts: attempt,
                    };
                }
                (_, diagnostics) => {
                    last_diagnostics = diagnostics;
                    current = fixed;
                }
            }
        }

        tracing::warn!(path = %path, "repair failed, keeping original content");
        unchanged(CheckState::FixFailed, last_diagnostics, self.max_repair_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CheckReport, Completion};
    use crate::error::{CheckerError, ServiceError};
    use std::cell::{Cell, RefCell};

    fn classifier() -> DiagnosticClassifier {
        DiagnosticClassifier::new(&crate::config::EngineConfig::default().critical_patterns)
    }

    struct ScriptedChecker {
        reports: RefCell<Vec<CheckReport>>,
        calls: Cell<usize>,
    }

    impl ScriptedChecker {
        fn new(reports: Vec<CheckReport>) -> Self {
            Self {
                reports: RefCell::new(reports.into_iter().rev().collect()),
                calls: Cell::new(0),
            }
        }
    }

    impl StructuralChecker for ScriptedChecker {
        fn check(&self, _source: &str) -> Result<CheckReport, CheckerError> {
            self.calls.set(self.calls.get() + 1);
            let mut reports = self.reports.borrow_mut();
            if reports.len() > 1 {
                Ok(reports.pop().unwrap_or_else(CheckReport::passed))
            } else {
                Ok(reports.last().cloned().unwrap_or_else(CheckReport::passed))
            }
        }
    }

    struct Repairer {
        reply: &'static str,
        calls: Cell<usize>,
    }

    impl TextGenerator for Repairer {
        fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
            self.calls.set(self.calls.get() + 1);
            assert!(prompt.contains("Diagnostics:"));
            Ok(Completion::new(self.reply))
        }
    }

    fn repairer(reply: &'static str) -> Repairer {
        Repairer {
            reply,
            calls: Cell::new(0),
        }
    }

    const CRITICAL: &str = "error - lib/a.dart:3:5 - Undefined name 'foo'.";

    #[test]
    fn test_classifier() {
        let c = classifier();
        assert!(c.is_critical("The method 'bar' isn't defined for the type 'A'"));
        assert!(c.is_critical(CRITICAL));
        assert!(!c.is_critical("info - Prefer const constructors"));
    }

    #[test]
    fn test_pass_returns_input() {
        let checker = ScriptedChecker::new(vec![CheckReport::passed()]);
        let fixer = repairer("unused");
        let validator = StructuralValidator::new(&checker, &fixer, PromptRegistry::builtin(), classifier());
        let report = validator.validate_and_fix("class A {}\n", "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::Passed);
        assert_eq!(report.content, "class A {}\n");
        assert_eq!(fixer.calls.get(), 0);
    }

    #[test]
    fn test_non_critical_only_is_a_pass_without_repair() {
        let checker = ScriptedChecker::new(vec![CheckReport::failed("info - Prefer const")]);
        let fixer = repairer("unused");
        let validator = StructuralValidator::new(&checker, &fixer, PromptRegistry::builtin(), classifier());
        let report = validator.validate_and_fix("class A {}", "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::Passed);
        assert_eq!(report.content, "class A {}");
        assert_eq!(fixer.calls.get(), 0);
    }

    #[test]
    fn test_critical_then_fixed() {
        let checker = ScriptedChecker::new(vec![CheckReport::failed(CRITICAL), CheckReport::passed()]);
        let fixer = repairer("```dart\nclass A { var foo = 1; }\n```");
        let validator = StructuralValidator::new(&checker, &fixer, PromptRegistry::builtin(), classifier());
        let report = validator.validate_and_fix("class A { bar() => foo; }", "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::Fixed);
        assert_eq!(report.content, "class A { var foo = 1; }\n");
        assert_eq!(report.repair_attempts, 1);
        assert_eq!(checker.calls.get(), 2);
    }

    #[test]
    fn test_always_critical_reverts_byte_for_byte() {
        let original = "class A {\r\n  bar() => foo;\n}  ";
        let checker = ScriptedChecker::new(vec![CheckReport::failed(CRITICAL)]);
        let fixer = repairer("```dart\nclass A {}\n```");
        let validator = StructuralValidator::new(&checker, &fixer, PromptRegistry::builtin(), classifier())
            .with_max_repair_attempts(2);
        let report = validator.validate_and_fix(original, "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::FixFailed);
        assert_eq!(report.content, original);
        assert_eq!(fixer.calls.get(), 2);
    }

    struct BrokenChecker;

    impl StructuralChecker for BrokenChecker {
        fn check(&self, _source: &str) -> Result<CheckReport, CheckerError> {
            Err(CheckerError::Timeout(60))
        }
    }

    #[test]
    fn test_checker_unavailable_is_unchecked() {
        let fixer = repairer("unused");
        let validator = StructuralValidator::new(BrokenChecker, &fixer, PromptRegistry::builtin(), classifier());
        let report = validator.validate_and_fix("x", "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::Unchecked);
        assert_eq!(report.content, "x");
    }

    #[test]
    fn test_disabled_skips_checker() {
        let checker = ScriptedChecker::new(vec![CheckReport::failed(CRITICAL)]);
        let fixer = repairer("unused");
        let validator = StructuralValidator::new(&checker, &fixer, PromptRegistry::builtin(), classifier())
            .enabled(false);
        let report = validator.validate_and_fix("x", "lib/a.dart", &ProjectState::new());
        assert_eq!(report.state, CheckState::Unchecked);
        assert_eq!(checker.calls.get(), 0);
    }

    #[test]
    fn test_repair_prompt_excludes_own_file_from_context() {
        struct Capture(RefCell<String>);
        impl TextGenerator for Capture {
            fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
                *self.0.borrow_mut() = prompt.to_string();
                Ok(Completion::new(""))
            }
        }

        let mut siblings = ProjectState::new();
        siblings.insert("lib/a.dart", "OWN FILE");
        siblings.insert("lib/b.dart", "SIBLING FILE");
        let checker = ScriptedChecker::new(vec![CheckReport::failed(CRITICAL)]);
        let capture = Capture(RefCell::new(String::new()));
        let validator = StructuralValidator::new(&checker, &capture, PromptRegistry::builtin(), classifier());
        let report = validator.validate_and_fix("broken", "lib/a.dart", &siblings);
        assert_eq!(report.state, CheckState::FixFailed);
        let prompt = capture.0.borrow();
        assert!(prompt.contains("SIBLING FILE"));
        assert!(!prompt.contains("OWN FILE"));
    }
}
