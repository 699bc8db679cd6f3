//! clusterjob CLI
//!
//! Entry point for the `clusterjob` command-line tool.

use clap::{Parser, Subcommand};
use clusterjob::backends::BackendRegistry;
use clusterjob::config::EffectiveSettings;
use clusterjob::conformance::ConformanceRunner;
use clusterjob::host::{expand_tilde, ShellRunner};
use clusterjob::job::{JobEnvironment, JobSpec, SubmitOptions};
use clusterjob::state::{CacheStore, SubmissionRecord};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clusterjob")]
#[command(about = "Submit, track and resume HPC batch jobs", version)]
struct Cli {
    /// Log commands and scheduler responses
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Settings files (TOML), later files win
    #[arg(long, short = 's', global = true)]
    settings: Vec<PathBuf>,

    /// Scheduler backend (overrides settings)
    #[arg(long, short = 'b', global = true)]
    backend: Option<String>,

    /// Submit over ssh on this host (overrides settings)
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Folder for cache files (overrides settings)
    #[arg(long, global = true)]
    cache_folder: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a job script to stdout
    Render {
        /// File holding the job body template
        body: PathBuf,

        /// Job name
        #[arg(long, short = 'n')]
        name: String,
    },

    /// Submit a job
    Submit {
        /// File holding the job body template
        body: PathBuf,

        /// Job name
        #[arg(long, short = 'n')]
        name: String,

        /// Cache key (default: next automatic id)
        #[arg(long)]
        cache_id: Option<String>,

        /// Discard any cached submission and submit again
        #[arg(long)]
        force: bool,

        /// Reuse a cached CANCELLED or FAILED submission instead of resubmitting
        #[arg(long)]
        no_retry: bool,

        /// Wait for the job to finish
        #[arg(long)]
        block: bool,
    },

    /// Query the status of a cached submission
    Status {
        cache_id: String,
    },

    /// Wait for a cached submission to finish
    Wait {
        cache_id: String,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Cancel a cached submission
    Cancel {
        cache_id: String,
    },

    /// List registered backends
    Backends,

    /// Run the backend conformance report
    CheckBackends {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Cache management commands
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached submission ids
    List,

    /// Remove every cached submission
    Clear,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Render { body, name } => run_render(&cli, body, name),
        Commands::Submit {
            body,
            name,
            cache_id,
            force,
            no_retry,
            block,
        } => {
            let options = SubmitOptions {
                block: *block,
                cache_id: cache_id.clone(),
                force: *force,
                retry: !*no_retry,
            };
            run_submit(&cli, body, name, options);
        }
        Commands::Status { cache_id } => run_status(&cli, cache_id),
        Commands::Wait { cache_id, timeout } => run_wait(&cli, cache_id, *timeout),
        Commands::Cancel { cache_id } => run_cancel(&cli, cache_id),
        Commands::Backends => run_backends(),
        Commands::CheckBackends { json } => run_check_backends(*json),
        Commands::Cache { action } => match action {
            CacheCommands::List => run_cache_list(&cli),
            CacheCommands::Clear => run_cache_clear(&cli),
        },
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, e);
    process::exit(1);
}

fn registry() -> BackendRegistry {
    BackendRegistry::builtin().unwrap_or_else(|e| fail("Error loading backends", e))
}

/// Settings files plus the global command-line overrides
fn environment(cli: &Cli) -> JobEnvironment {
    let mut attributes = serde_json::Map::new();
    if let Some(backend) = &cli.backend {
        attributes.insert("backend".to_string(), backend.clone().into());
    }
    if let Some(remote) = &cli.remote {
        attributes.insert("remote".to_string(), remote.clone().into());
    }
    if let Some(folder) = &cli.cache_folder {
        attributes.insert("cache_folder".to_string(), folder.clone().into());
    }
    let overrides = if attributes.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "attributes": attributes }))
    };

    let files: Vec<&Path> = cli.settings.iter().map(PathBuf::as_path).collect();
    let settings = EffectiveSettings::build(&files, overrides)
        .unwrap_or_else(|e| fail("Error loading settings", e));
    let defaults = settings
        .defaults()
        .unwrap_or_else(|e| fail("Error loading settings", e));

    JobEnvironment::new(defaults, registry(), Arc::new(ShellRunner::new()))
        .unwrap_or_else(|e| fail("Configuration error", e))
}

fn load_job(cli: &Cli, body: &Path, name: &str) -> JobSpec {
    let template = fs::read_to_string(body)
        .unwrap_or_else(|e| fail(&format!("Error reading {}", body.display()), e));
    JobSpec::new(template, name, &environment(cli)).unwrap_or_else(|e| fail("Invalid job", e))
}

fn cache_store(env: &JobEnvironment) -> CacheStore {
    let attributes = &env.defaults.attributes;
    let folder = match &attributes.cache_folder {
        Some(folder) => folder,
        None => fail("Caching is disabled", "set attributes.cache_folder or --cache-folder"),
    };
    CacheStore::new(expand_tilde(folder), attributes.cache_prefix.clone())
        .unwrap_or_else(|e| fail("Invalid cache settings", e))
}

fn load_record(cli: &Cli, cache_id: &str) -> SubmissionRecord {
    let env = environment(cli);
    let store = cache_store(&env);
    let location = store
        .location(cache_id)
        .unwrap_or_else(|e| fail("Invalid cache id", e));
    if !location.path.exists() {
        fail("No cached submission", cache_id);
    }
    SubmissionRecord::load(&location.path, &env.registry, Arc::clone(&env.runner))
        .unwrap_or_else(|e| fail("Error loading submission", e))
}

fn run_render(cli: &Cli, body: &Path, name: &str) {
    let job = load_job(cli, body, name);
    match job.render() {
        Ok(script) => print!("{}", script),
        Err(e) => fail("Render error", e),
    }
}

fn run_submit(cli: &Cli, body: &Path, name: &str, options: SubmitOptions) {
    let job = load_job(cli, body, name);
    let record = job
        .submit(options)
        .unwrap_or_else(|e| fail("Submission error", e));

    println!("job_id: {}", record.job_id());
    println!("status: {}", record.last_status());
    if let Some(location) = record.cache_file() {
        println!("cache:  {}", location.display());
    }
    if record.last_status().is_unsuccessful() {
        process::exit(1);
    }
}

fn run_status(cli: &Cli, cache_id: &str) {
    let mut record = load_record(cli, cache_id);
    match record.status() {
        Ok(status) => println!("{}", status),
        Err(e) => fail("Status error", e),
    }
}

fn run_wait(cli: &Cli, cache_id: &str, timeout: Option<u64>) {
    let mut record = load_record(cli, cache_id);
    let status = record
        .wait(timeout.map(Duration::from_secs))
        .unwrap_or_else(|e| fail("Status error", e));
    println!("{}", status);
    if !status.is_finished() {
        process::exit(2);
    }
    if status.is_unsuccessful() {
        process::exit(1);
    }
}

fn run_cancel(cli: &Cli, cache_id: &str) {
    let mut record = load_record(cli, cache_id);
    match record.cancel() {
        Ok(()) => println!("{}", record.last_status()),
        Err(e) => fail("Cancel error", e),
    }
}

fn run_backends() {
    let registry = registry();
    for backend in registry.iter() {
        println!(
            "{:<8} {:<8} .{}",
            backend.name(),
            backend.prefix(),
            backend.extension()
        );
    }
}

fn run_check_backends(json: bool) {
    let report = ConformanceRunner::new(Arc::new(registry())).run_all();
    if json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error serializing output", e),
        }
    } else {
        print!("{}", report.summary());
    }
    process::exit(report.exit_code());
}

fn run_cache_list(cli: &Cli) {
    let store = cache_store(&environment(cli));
    let ids = store.list().unwrap_or_else(|e| fail("Cache error", e));
    for id in ids {
        match store.load(&id) {
            Ok(Some(entry)) => println!("{:<12} {:<8} {:<10} {}", id, entry.backend, entry.status, entry.job_id),
            Ok(None) => {}
            Err(e) => eprintln!("{:<12} unreadable: {}", id, e),
        }
    }
}

fn run_cache_clear(cli: &Cli) {
    let store = cache_store(&environment(cli));
    match store.clear() {
        Ok(n) => println!("Removed {} cached submission(s)", n),
        Err(e) => fail("Cache error", e),
    }
}
