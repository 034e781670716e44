//! Batch evaluation over a task corpus.

pub mod corpus;
pub mod runner;

pub use corpus::{Corpus, TaskRecord};
pub use runner::{run_eval, EvalOptions, EvalSummary, ResultRecord, RESULTS_FILE};
