//! Helpers for running the `dirwatch` binary

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Command builder for the built `dirwatch` binary
pub struct DirwatchCommand {
    working_dir: PathBuf,
    args: Vec<String>,
}

impl DirwatchCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn execute(&self) -> CommandResult {
        let output = Command::new(env!("CARGO_BIN_EXE_dirwatch"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env_remove("DIRWATCH_LOG")
            .output()
            .expect("failed to run dirwatch");
        CommandResult { output }
    }
}

pub struct CommandResult {
    pub output: Output,
}

impl CommandResult {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn assert_success(&self) -> &Self {
        assert!(
            self.output.status.success(),
            "dirwatch failed\nstdout: {}\nstderr: {}",
            self.stdout(),
            self.stderr()
        );
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(
            !self.output.status.success(),
            "dirwatch unexpectedly succeeded\nstdout: {}",
            self.stdout()
        );
        self
    }
}
