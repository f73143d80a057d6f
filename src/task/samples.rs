//! Built-in sample tasks.
//!
//! A small self-contained set used when no task directory is given, and
//! materialized to disk by `termbench init-samples` as a starting point
//! for custom suites.

use std::path::Path;

use crate::error::TaskError;

use super::Task;

/// The built-in sample task set.
pub fn sample_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "sample-001",
            "Create a file named 'hello.txt' containing the text 'Hello, World!'",
            r#"test -f /workspace/hello.txt && grep -q "Hello, World!" /workspace/hello.txt"#,
        )
        .with_tags(vec!["file-operations".to_string(), "basic".to_string()]),
        Task::new(
            "sample-002",
            "Create a directory named 'mydir' and inside it create a file named 'data.json' \
             with valid JSON content: {\"key\": \"value\"}",
            r#"test -d /workspace/mydir && test -f /workspace/mydir/data.json && python3 -c "import json; json.load(open('/workspace/mydir/data.json'))""#,
        )
        .with_image("python:3.11-slim")
        .with_tags(vec!["file-operations".to_string(), "json".to_string()]),
        Task::new(
            "sample-003",
            "Find all .txt files in /workspace and count how many there are. \
             Write the count to a file called 'count.txt'",
            "test -f /workspace/count.txt",
        )
        .with_setup_commands(vec![
            "mkdir -p /workspace/subdir".to_string(),
            "touch /workspace/a.txt /workspace/b.txt /workspace/subdir/c.txt".to_string(),
        ])
        .with_tags(vec!["file-operations".to_string(), "find".to_string()]),
    ]
}

/// Write the sample tasks as `<dir>/<id>/task.yaml` files.
pub fn write_samples(output_dir: &Path) -> Result<Vec<std::path::PathBuf>, TaskError> {
    let mut written = Vec::new();
    for task in sample_tasks() {
        let task_dir = output_dir.join(&task.id);
        std::fs::create_dir_all(&task_dir)?;
        let path = task_dir.join("task.yaml");
        let yaml = serde_yaml::to_string(&task)?;
        std::fs::write(&path, yaml)?;
        written.push(path);
    }
    Ok(written)
}
