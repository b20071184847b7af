use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use ottica::cli::Args;
use ottica::config::Config;
use ottica::import::run::{run_import, RunOptions};
use ottica::logging::setup_logging;
use ottica::store::postgres::PgStore;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before anything reads the environment.
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let Some(file) = args.file.clone() else {
        eprintln!("error: --file <PATH> is required");
        eprintln!("usage: ottica-import --file survey.csv [--dry-run] [--live] [--no-auto-merge]");
        return ExitCode::FAILURE;
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    setup_logging(&config, args.tracing);

    let csv_text = match tokio::fs::read_to_string(&file).await {
        Ok(text) => text,
        Err(e) => {
            error!(file = %file.display(), error = %e, "could not read survey file");
            return ExitCode::FAILURE;
        }
    };

    let store = match PgStore::connect(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = format!("{e:#}"), "database connection failed");
            return ExitCode::FAILURE;
        }
    };

    let opts = RunOptions {
        source_file: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string()),
        dry_run: args.dry_run,
        // Historical is the default; --live opts into follow-up generation.
        historical: !args.live,
        recency_days: args.recency_days,
        notes: args.notes.clone(),
        auto_merge: !args.no_auto_merge,
        actor: config.admin_actor_id.clone(),
    };

    match run_import(&csv_text, &store, &opts).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "import failed");
            ExitCode::FAILURE
        }
    }
}
