use reconcile::contexts::{CheckState, TaskReport};
use std::time::Instant;

pub struct ProgressIndicator {
    total: usize,
    completed: usize,
    failed: usize,
    warnings: Vec<String>,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            warnings: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn start_item(&self, name: &str) {
        println!(
            "Processing: {} ({}/{})",
            name,
            self.completed + self.failed + 1,
            self.total
        );
    }

    pub fn complete_item(&mut self, name: &str, success: bool) {
        if success {
            self.completed += 1;
            println!("✓ {}", name);
        } else {
            self.failed += 1;
            println!("✗ {}", name);
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Counts every file the report names: written and clean files succeed,
    /// files with a structural failure fail.
    pub fn record_report(&mut self, report: &TaskReport) {
        for path in &report.touched {
            let failed = report
                .checks
                .iter()
                .any(|(checked, state)| checked == path && *state == CheckState::FixFailed);
            self.complete_item(path, !failed);
        }
        for path in &report.deleted {
            self.complete_item(&format!("{} (deleted)", path), true);
        }
        for warning in &report.warnings {
            self.warn(warning.to_string());
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed();
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Total:     {}", self.total.max(self.completed + self.failed));
        println!("  Succeeded: {}", self.completed);
        println!("  Failed:    {}", self.failed);
        println!("  Duration:  {:.2}s", elapsed.as_secs_f64());
        if !self.warnings.is_empty() {
            println!("  Warnings:");
            for warning in &self.warnings {
                println!("    - {}", warning);
            }
        }
        println!("{}", "=".repeat(60));
    }
}
