use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test harness for running CLI commands against a temporary database
pub struct CliTestHarness {
    temp_dir: TempDir,
    db_path: PathBuf,
}

impl CliTestHarness {
    /// Create a new test harness with a temporary database
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");

        Self { temp_dir, db_path }
    }

    /// Get a Command instance configured for testing
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("cadence").expect("Failed to find cadence binary");

        // Isolate from any cadence.toml or CADENCE_* settings of the host
        cmd.current_dir(self.temp_dir.path());
        cmd.env("CADENCE_CONFIG", self.temp_dir.path().join("cadence.toml"));
        cmd.env("CADENCE_DATABASE_PATH", &self.db_path);
        cmd.env_remove("CADENCE_OWNER_ID");
        cmd.env_remove("CADENCE_LOG");

        cmd
    }

    /// Write a cadence.toml next to the database
    pub fn write_config(&self, contents: &str) {
        std::fs::write(self.temp_dir.path().join("cadence.toml"), contents).expect("Failed to write config");
    }

    /// Helper to run a command and assert success
    pub fn run_success(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().success()
    }

    /// Helper to run a command and assert failure
    pub fn run_failure(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().failure()
    }

    /// Weekly Monday/Wednesday standup starting Monday 2025-01-06 09:00, series ID 1 on a fresh database
    pub fn add_weekly_standup(&self) {
        self.run_success(&[
            "add", "Standup",
            "--start", "2025-01-06 09:00",
            "--every", "weekly",
            "--on", "mon,wed",
        ]);
    }

    /// List one day or a range of January 2025
    pub fn list_january(&self, from: u32, to: u32) -> assert_cmd::assert::Assert {
        let from = format!("2025-01-{:02}", from);
        let to = format!("2025-01-{:02}", to);
        self.run_success(&["list", "--from", &from, "--to", &to])
    }
}

/// Utility functions for test assertions
pub mod assertions {
    use predicates::prelude::*;

    /// Predicate to check if output contains occurrence table headers
    pub fn has_occurrence_table_headers() -> impl Predicate<str> {
        predicate::str::contains("ID")
            .and(predicate::str::contains("Title"))
            .and(predicate::str::contains("Kind"))
    }

    /// Predicate to check if output indicates a successful change
    pub fn succeeded() -> impl Predicate<str> {
        predicate::str::contains("✓")
    }

    /// Predicate to check for error messages
    pub fn has_error() -> impl Predicate<str> {
        predicate::str::contains("Error").or(predicate::str::contains("error"))
    }
}
