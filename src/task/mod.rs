//! Benchmark task definitions and loading.
//!
//! A task describes one terminal challenge: the instruction shown to the
//! participant, the Docker image and setup the sandbox is built from, and
//! the verification script that decides the outcome. Tasks are loaded
//! from `task.yaml` files discovered under a directory, or from the
//! built-in sample set when no directory is given.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TaskError;

pub mod samples;

pub use samples::{sample_tasks, write_samples};

/// Default Docker image for tasks that do not specify one.
pub const DEFAULT_DOCKER_IMAGE: &str = "ubuntu:22.04";

/// Default working directory inside the sandbox.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/workspace";

fn default_docker_image() -> String {
    DEFAULT_DOCKER_IMAGE.to_string()
}

fn default_working_directory() -> String {
    DEFAULT_WORKING_DIRECTORY.to_string()
}

fn default_expected_reward() -> f64 {
    1.0
}

/// A single benchmark task. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub id: String,
    /// Natural-language instruction given to the participant.
    pub instruction: String,
    /// Docker image the sandbox is created from.
    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    /// Working directory for all commands inside the sandbox.
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    /// Environment variables injected into the sandbox.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Commands run during provisioning, after the container starts.
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Shell script whose exit code decides pass/fail.
    pub test_script: String,
    /// Score granted on a plain pass (scripts may override via a
    /// `SCORE:` marker on stdout).
    #[serde(default = "default_expected_reward")]
    pub expected_reward: f64,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per-task turn limit overriding the run default.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Per-task wall-clock budget in seconds overriding the run default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Task {
    /// Creates a task with the default image, workdir, and reward.
    pub fn new(
        id: impl Into<String>,
        instruction: impl Into<String>,
        test_script: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instruction: instruction.into(),
            docker_image: default_docker_image(),
            working_directory: default_working_directory(),
            environment: HashMap::new(),
            setup_commands: Vec::new(),
            test_script: test_script.into(),
            expected_reward: 1.0,
            tags: Vec::new(),
            max_turns: None,
            timeout_secs: None,
        }
    }

    /// Sets the Docker image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = image.into();
        self
    }

    /// Sets the setup commands.
    pub fn with_setup_commands(mut self, commands: Vec<String>) -> Self {
        self.setup_commands = commands;
        self
    }

    /// Sets the tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Checks structural validity beyond what serde enforces.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::Invalid("task id is empty".to_string()));
        }
        if self.instruction.trim().is_empty() {
            return Err(TaskError::Invalid(format!(
                "task '{}' has an empty instruction",
                self.id
            )));
        }
        if self.test_script.trim().is_empty() {
            return Err(TaskError::Invalid(format!(
                "task '{}' has an empty test script",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.expected_reward) {
            return Err(TaskError::Invalid(format!(
                "task '{}' expected_reward {} outside [0, 1]",
                self.id, self.expected_reward
            )));
        }
        Ok(())
    }
}

/// Load a single task from a `task.yaml` file.
pub fn load_task(path: &Path) -> Result<Task, TaskError> {
    let content = std::fs::read_to_string(path)?;
    let task: Task = serde_yaml::from_str(&content)?;
    task.validate()?;
    Ok(task)
}

/// Discover all `task.yaml` files under a directory, sorted by path.
pub fn discover_tasks(input_dir: &Path) -> Result<Vec<PathBuf>, TaskError> {
    let mut paths = Vec::new();
    fn walk(dir: &Path, paths: &mut Vec<PathBuf>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    walk(&p, paths);
                } else if p.file_name().map(|f| f == "task.yaml").unwrap_or(false) {
                    paths.push(p);
                }
            }
        }
    }
    walk(input_dir, &mut paths);
    paths.sort();
    Ok(paths)
}

/// Load all tasks under a directory. Unreadable or invalid files are
/// skipped with a warning; an empty result is an error.
pub fn load_tasks(input_dir: &Path) -> Result<Vec<Task>, TaskError> {
    let yaml_paths = discover_tasks(input_dir)?;
    if yaml_paths.is_empty() {
        return Err(TaskError::NoTasks(input_dir.display().to_string()));
    }

    let mut tasks = Vec::new();
    for path in &yaml_paths {
        match load_task(path) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!("Failed to load {}: {}", path.display(), e),
        }
    }

    if tasks.is_empty() {
        return Err(TaskError::NoTasks(input_dir.display().to_string()));
    }
    Ok(tasks)
}

/// Select a single task by id from an already-loaded set.
pub fn find_task(tasks: &[Task], id: &str) -> Result<Task, TaskError> {
    tasks
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .ok_or_else(|| TaskError::NotFound(id.to_string()))
}
