use super::corpus::{Corpus, TaskRecord};
use crate::llm::Generator;
use crate::repair::RepairLoop;
use crate::sandbox::Executor;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

pub const RESULTS_FILE: &str = "results.jsonl";

#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub max_retries: u32,
    /// Sessions run concurrently; 0 and 1 both mean sequential.
    pub jobs: usize,
    pub save_dir: PathBuf,
    /// Label written into every record.
    pub model: String,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            jobs: 1,
            save_dir: PathBuf::from("runs"),
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: String,
    pub passed: bool,
    pub model: String,
    pub program: String,
    pub error: String,
    pub attempts: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub pass_at_1: f64,
    pub results_path: PathBuf,
}

impl EvalSummary {
    fn from_records(records: &[ResultRecord], results_path: PathBuf) -> Self {
        let total = records.len();
        let passed = records.iter().filter(|r| r.passed).count();
        let pass_at_1 = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            pass_at_1,
            results_path,
        }
    }
}

/// Run one repair session per task and write `results.jsonl` in corpus order,
/// one line as soon as each task and all tasks before it are done.
///
/// A generator failure only ends the task it happened in. Errors returned
/// from here are about the results file or the thread pool.
pub fn run_eval<G, E>(
    corpus: &Corpus,
    generator: &G,
    executor: &E,
    options: &EvalOptions,
) -> Result<EvalSummary>
where
    G: Generator + Sync + ?Sized,
    E: Executor + Sync + ?Sized,
{
    fs::create_dir_all(&options.save_dir).with_context(|| {
        format!(
            "Failed to create results directory '{}'",
            options.save_dir.display()
        )
    })?;
    let results_path = options.save_dir.join(RESULTS_FILE);
    let file = fs::File::create(&results_path)
        .with_context(|| format!("Failed to create '{}'", results_path.display()))?;
    let mut writer = BufWriter::new(file);

    info!(
        tasks = corpus.len(),
        jobs = options.jobs.max(1),
        retries = options.max_retries,
        "Starting evaluation"
    );

    let records = if options.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .thread_name(|i| format!("fixloop-eval-{}", i))
            .build()
            .context("Failed to build evaluation thread pool")?;
        let (tx, rx) = mpsc::channel::<(usize, ResultRecord)>();
        thread::scope(|scope| -> Result<Vec<ResultRecord>> {
            scope.spawn(move || {
                pool.install(|| {
                    corpus.tasks.par_iter().enumerate().for_each_with(
                        tx,
                        |tx, (idx, task)| {
                            let record = evaluate_task(task, generator, executor, options);
                            let _ = tx.send((idx, record));
                        },
                    )
                })
            });

            // Finished sessions wait here until every earlier task is written.
            let mut pending = BTreeMap::new();
            let mut records = Vec::with_capacity(corpus.len());
            for (idx, record) in rx {
                pending.insert(idx, record);
                while let Some(record) = pending.remove(&records.len()) {
                    write_record(&mut writer, &record)?;
                    records.push(record);
                }
            }
            Ok(records)
        })?
    } else {
        let mut records = Vec::with_capacity(corpus.len());
        for task in &corpus.tasks {
            let record = evaluate_task(task, generator, executor, options);
            write_record(&mut writer, &record)?;
            records.push(record);
        }
        records
    };

    writer
        .flush()
        .with_context(|| format!("Failed to write '{}'", results_path.display()))?;

    let summary = EvalSummary::from_records(&records, results_path);
    info!(
        total = summary.total,
        passed = summary.passed,
        pass_at_1 = summary.pass_at_1,
        "Evaluation finished"
    );
    Ok(summary)
}

fn evaluate_task<G, E>(
    task: &TaskRecord,
    generator: &G,
    executor: &E,
    options: &EvalOptions,
) -> ResultRecord
where
    G: Generator + ?Sized,
    E: Executor + ?Sized,
{
    let start = Instant::now();
    let repair_task = task.to_repair_task();
    let outcome = RepairLoop::new(generator, executor).run(&repair_task, options.max_retries);
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(outcome) => {
            info!(
                task_id = %task.task_id,
                passed = outcome.passed,
                attempts = outcome.attempts.len(),
                duration_ms,
                "Task finished"
            );
            ResultRecord {
                task_id: task.task_id.clone(),
                passed: outcome.passed,
                model: options.model.clone(),
                attempts: outcome.attempts.len(),
                program: outcome.program,
                error: outcome.error,
                duration_ms,
            }
        }
        Err(err) => {
            warn!(task_id = %task.task_id, error = %format!("{:#}", err), "Task aborted");
            ResultRecord {
                task_id: task.task_id.clone(),
                passed: false,
                model: options.model.clone(),
                program: String::new(),
                error: format!("{:#}", err),
                attempts: 0,
                duration_ms,
            }
        }
    }
}

fn write_record(writer: &mut impl Write, record: &ResultRecord) -> Result<()> {
    let line = serde_json::to_string(record).context("Failed to serialize result record")?;
    writeln!(writer, "{}", line).context("Failed to write result record")?;
    writer.flush().context("Failed to write result record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionResult;
    use anyhow::anyhow;
    use tempfile::tempdir;

    /// Passes any candidate that adds.
    struct AddingExecutor;

    impl Executor for AddingExecutor {
        fn execute(&self, function_source: &str, _tests: &str, _imports: &str) -> ExecutionResult {
            if function_source.contains("a + b") {
                ExecutionResult::passed()
            } else {
                ExecutionResult::failed("AssertionError")
            }
        }
    }

    fn task(task_id: &str, entry_point: &str) -> TaskRecord {
        TaskRecord {
            task_id: task_id.to_string(),
            imports: None,
            entry_point: entry_point.to_string(),
            buggy_solution: "    return a - b\n".to_string(),
            declaration: format!("def {}(a, b):\n", entry_point),
            test: format!("assert {}(2, 3) == 5", entry_point),
        }
    }

    fn corpus() -> Corpus {
        Corpus {
            tasks: vec![task("t/0", "good"), task("t/1", "stuck"), task("t/2", "broken")],
        }
    }

    /// `good` is fixed on the first try, `stuck` never is, `broken` errors.
    fn generate(prompt: &str) -> anyhow::Result<String> {
        if prompt.contains("`good`") {
            Ok("```python\ndef good(a, b):\n    return a + b\n```".to_string())
        } else if prompt.contains("`broken`") {
            Err(anyhow!("quota exceeded"))
        } else {
            Ok("```python\ndef stuck(a, b):\n    return a - b\n```".to_string())
        }
    }

    fn read_records(path: &std::path::Path) -> Vec<ResultRecord> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn sequential_run_records_every_task_in_order() {
        let dir = tempdir().unwrap();
        let options = EvalOptions {
            max_retries: 2,
            jobs: 1,
            save_dir: dir.path().join("out"),
            model: "scripted".to_string(),
        };

        let summary = run_eval(&corpus(), &generate, &AddingExecutor, &options).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert!((summary.pass_at_1 - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.results_path, dir.path().join("out").join(RESULTS_FILE));

        let records = read_records(&summary.results_path);
        let ids: Vec<_> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, ["t/0", "t/1", "t/2"]);

        assert!(records[0].passed);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[0].model, "scripted");
        assert_eq!(records[0].error, "");

        assert!(!records[1].passed);
        assert_eq!(records[1].attempts, 2);
        assert_eq!(records[1].error, "AssertionError");

        assert!(!records[2].passed);
        assert_eq!(records[2].attempts, 0);
        assert!(records[2].error.contains("quota exceeded"));
    }

    #[test]
    fn parallel_run_matches_sequential_order() {
        let dir = tempdir().unwrap();
        let options = EvalOptions {
            max_retries: 2,
            jobs: 3,
            save_dir: dir.path().to_path_buf(),
            model: "scripted".to_string(),
        };

        let summary = run_eval(&corpus(), &generate, &AddingExecutor, &options).unwrap();

        assert_eq!(summary.passed, 1);
        let records = read_records(&summary.results_path);
        let ids: Vec<_> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, ["t/0", "t/1", "t/2"]);
    }

    #[test]
    fn parallel_run_writes_each_record_before_the_pool_drains() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let results_path = dir.path().join(RESULTS_FILE);
        let saw_first_record = AtomicBool::new(false);
        // `stuck` holds its worker until `good` shows up in the results file.
        let generator = |prompt: &str| -> anyhow::Result<String> {
            if prompt.contains("`stuck`") {
                for _ in 0..200 {
                    let written = fs::read_to_string(&results_path).unwrap_or_default();
                    if written.contains("\"task_id\":\"t/0\"") {
                        saw_first_record.store(true, Ordering::SeqCst);
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
            }
            generate(prompt)
        };
        let options = EvalOptions {
            max_retries: 1,
            jobs: 2,
            save_dir: dir.path().to_path_buf(),
            model: "scripted".to_string(),
        };
        let corpus = Corpus {
            tasks: vec![task("t/0", "good"), task("t/1", "stuck")],
        };

        let summary = run_eval(&corpus, &generator, &AddingExecutor, &options).unwrap();

        assert!(saw_first_record.load(Ordering::SeqCst));
        assert_eq!(summary.total, 2);
        let ids: Vec<_> = read_records(&results_path)
            .into_iter()
            .map(|r| r.task_id)
            .collect();
        assert_eq!(ids, ["t/0", "t/1"]);
    }

    #[test]
    fn existing_results_are_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(RESULTS_FILE);
        fs::write(&path, "stale line\nanother\n").unwrap();
        let options = EvalOptions {
            save_dir: dir.path().to_path_buf(),
            ..EvalOptions::default()
        };
        let corpus = Corpus {
            tasks: vec![task("only", "good")],
        };

        run_eval(&corpus, &generate, &AddingExecutor, &options).unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, "only");
    }

    #[test]
    fn empty_corpus_has_zero_pass_rate() {
        let dir = tempdir().unwrap();
        let options = EvalOptions {
            save_dir: dir.path().to_path_buf(),
            ..EvalOptions::default()
        };

        let summary = run_eval(&Corpus::default(), &generate, &AddingExecutor, &options).unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_at_1, 0.0);
        assert_eq!(fs::read_to_string(summary.results_path).unwrap(), "");
    }
}
