use anyhow::Context;
use clap::Parser;
use docfinder::app::{ChangeNotifier, NoopNotifier, RequestError, TriggerOutcome};
use docfinder::jobs::state::{JobState, JobStatus};
use docfinder::ui::cli::{Cli, Commands};
use docfinder::{Config, DocFinder, FileWatcher};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docfinder=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = Config::new(cli.base_dir)?;
    if !cli.roots.is_empty() {
        config = config.with_roots(cli.roots);
    }

    let notifier: Arc<dyn ChangeNotifier> = match cli.command {
        Commands::Watch => Arc::new(FileWatcher::new()),
        _ => Arc::new(NoopNotifier),
    };
    let app = DocFinder::open(config, notifier).context("Failed to open docfinder")?;

    let code = match cli.command {
        Commands::Accept => handle_accept(&app),
        Commands::Rescan => handle_rescan(&app),
        Commands::Status => handle_status(&app)?,
        Commands::Search { query, limit } => handle_search(&app, &query, limit),
        Commands::Watch => handle_watch(&app),
        Commands::Count => handle_count(&app),
    };
    Ok(code)
}

fn handle_accept(app: &DocFinder) -> i32 {
    match app.accept_terms() {
        Ok(TriggerOutcome::Started(handle)) => {
            println!("Full scan started...");
            report_job(&handle.wait())
        }
        Ok(TriggerOutcome::AlreadyIndexed) => {
            println!("Index already exists.");
            0
        }
        Err(e) => report_error(e),
    }
}

fn handle_rescan(app: &DocFinder) -> i32 {
    match app.trigger_smart_rescan() {
        Ok(handle) => {
            println!("Smart rescan started...");
            report_job(&handle.wait())
        }
        Err(e) => report_error(e),
    }
}

fn handle_status(app: &DocFinder) -> anyhow::Result<i32> {
    println!("{}", serde_json::to_string_pretty(&app.job_status())?);
    Ok(0)
}

fn handle_search(app: &DocFinder, query: &str, limit: usize) -> i32 {
    let results = match app.search(query, limit) {
        Ok(results) => results,
        Err(e) => return report_error(e),
    };

    if results.is_empty() {
        println!("No results found.");
        return 0;
    }

    println!("Found {} results:", results.len());
    for (i, hit) in results.iter().enumerate() {
        println!("\n{}. {} ({})", i + 1, hit.filename, hit.source);
        println!("   {}", hit.path);
        if !hit.modified.is_empty() {
            println!("   Modified: {}", hit.modified);
        }
    }
    0
}

fn handle_watch(app: &DocFinder) -> i32 {
    match app.startup() {
        Ok(Some(handle)) => {
            let state = handle.wait();
            if state.status == JobStatus::Error {
                return report_job(&state);
            }
        }
        Ok(None) if !app.preferences().terms_accepted => {
            return report_error(RequestError::TermsNotAccepted);
        }
        Ok(None) => {}
        Err(e) => return report_error(e),
    }

    if !app.is_watching() {
        eprintln!("Error: file watcher could not be started");
        return 1;
    }
    println!("Watching for changes. Press Ctrl+C to stop.");
    loop {
        std::thread::park();
    }
}

fn handle_count(app: &DocFinder) -> i32 {
    for (root, count) in app.count_files() {
        println!("{}: {}", root.display(), count);
    }
    0
}

fn report_job(state: &JobState) -> i32 {
    match state.status {
        JobStatus::Error => {
            eprintln!(
                "Job failed at {}: {}",
                state.step,
                state.error.as_deref().unwrap_or("unknown error")
            );
            1
        }
        _ => {
            println!("Done: {} documents indexed.", state.indexed);
            0
        }
    }
}

fn report_error(e: RequestError) -> i32 {
    eprintln!("Error: {}", e);
    e.exit_code()
}
