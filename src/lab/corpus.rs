use crate::repair::RepairTask;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One benchmark task, using the HumanEvalPack field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(rename = "import", default)]
    pub imports: Option<String>,
    pub entry_point: String,
    #[serde(default)]
    pub buggy_solution: String,
    #[serde(default)]
    pub declaration: String,
    pub test: String,
}

impl TaskRecord {
    pub fn to_repair_task(&self) -> RepairTask {
        RepairTask {
            imports: self.imports.clone().unwrap_or_default(),
            buggy_body: self.buggy_solution.clone(),
            entry_point: self.entry_point.clone(),
            declaration: self.declaration.clone(),
            tests: self.test.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub tasks: Vec<TaskRecord>,
}

impl Corpus {
    /// Read a JSONL task file. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file '{}'", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid task file '{}'", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut tasks = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let task: TaskRecord = serde_json::from_str(line)
                .with_context(|| format!("Line {}: malformed task record", idx + 1))?;
            tasks.push(task);
        }
        let corpus = Self { tasks };
        corpus.validate()?;
        Ok(corpus)
    }

    fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if task.task_id.trim().is_empty() {
                return Err(anyhow!("Task id must not be empty"));
            }
            if !seen.insert(task.task_id.as_str()) {
                return Err(anyhow!("Duplicate task id '{}'", task.task_id));
            }
            if task.entry_point.trim().is_empty() {
                return Err(anyhow!("Task '{}' entry_point must not be empty", task.task_id));
            }
            if task.test.trim().is_empty() {
                return Err(anyhow!("Task '{}' test must not be empty", task.task_id));
            }
        }
        Ok(())
    }

    /// Keep only the first `limit` tasks.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.tasks.truncate(limit);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
