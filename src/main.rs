use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use fixloop::config::{Config, API_KEY_ENV};
use fixloop::lab::{run_eval, Corpus, EvalOptions};
use fixloop::llm::OpenRouterGenerator;
use fixloop::sandbox::{Executor, Sandbox};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "FIXLOOP_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "fixloop",
    about = "Repair single buggy functions with a generate, test, reflect loop",
    version
)]
struct Cli {
    /// Log at debug level unless FIXLOOP_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a repair session for every task in a JSONL corpus
    Eval(EvalArgs),
    /// Run one candidate function against its tests in the sandbox
    Exec(ExecArgs),
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[arg(long)]
    tasks: PathBuf,
    #[arg(long)]
    limit: Option<usize>,
    /// Generation budget per task (defaults to the config value)
    #[arg(long)]
    retries: Option<u32>,
    #[arg(long, default_value_t = 1)]
    jobs: usize,
    #[arg(long, default_value = "runs")]
    save_dir: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    #[arg(long)]
    function: PathBuf,
    #[arg(long)]
    tests: PathBuf,
    #[arg(long)]
    imports: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Eval(args) => run_eval_command(args),
        Commands::Exec(args) => run_exec_command(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_eval_command(args: EvalArgs) -> Result<ExitCode> {
    let mut config = Config::load();
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if let Some(model) = args.model {
        config.model.model = model;
    }
    if let Some(max_tokens) = args.max_tokens {
        config.model.max_tokens = max_tokens;
    }
    if args.seed.is_some() {
        config.model.seed = args.seed;
    }

    let corpus = Corpus::load(&args.tasks)?.limit(args.limit);
    if corpus.is_empty() {
        return Err(anyhow!("No tasks found in '{}'", args.tasks.display()));
    }

    let api_key = Config::api_key()
        .ok_or_else(|| anyhow!("No API key configured. Set {}.", API_KEY_ENV))?;
    let sandbox = Sandbox::new(&config.sandbox)?;
    let generator = OpenRouterGenerator::new(api_key, config.model.clone())?;

    let options = EvalOptions {
        max_retries: config.max_retries,
        jobs: args.jobs,
        save_dir: args.save_dir,
        model: config.model.model.clone(),
    };

    eprintln!(
        "Evaluating {} task(s) with {} (retries {}, jobs {})",
        corpus.len(),
        options.model,
        options.max_retries,
        options.jobs.max(1)
    );
    let summary = run_eval(&corpus, &generator, &sandbox, &options)?;
    let usage = generator.usage();

    println!(
        "pass@1 {:.4} ({}/{})",
        summary.pass_at_1, summary.passed, summary.total
    );
    println!(
        "tokens {} (prompt {}, completion {}), cost ${:.4}",
        usage.total_tokens,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.cost()
    );
    println!("results {}", summary.results_path.display());
    Ok(ExitCode::SUCCESS)
}

fn run_exec_command(args: ExecArgs) -> Result<ExitCode> {
    let config = Config::load();
    let function_source = read_source(&args.function)?;
    let test_source = read_source(&args.tests)?;
    let imports_source = match &args.imports {
        Some(path) => read_source(path)?,
        None => String::new(),
    };

    let sandbox = Sandbox::new(&config.sandbox)?;
    let result = sandbox.execute(&function_source, &test_source, &imports_source);

    println!("{}", result.verdict.as_str());
    if !result.diagnostic.is_empty() {
        println!("{}", result.diagnostic.trim_end());
    }
    Ok(if result.is_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}
