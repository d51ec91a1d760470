use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fm_career_migrate::config::{db_url, ensure_dotenv, env_bool, env_u32, source_dir};
use fm_career_migrate::context::MigrationContext;
use fm_career_migrate::orchestrator::{catalog, run_steps};
use fm_career_migrate::source::export::JsonExportSource;
use fm_career_migrate::store::postgres::PgStore;

fn step_catalog_help() -> String {
    let mut help = String::from("Steps (always executed in this order):\n");
    for step in catalog() {
        help.push_str(&format!("  {:<26} {}\n", step.name, step.description));
    }
    help.push_str(
        "\nRun `fm-migrate report` on its own for a read-only integrity report,\n\
         before migrating or after.",
    );
    help
}

/// Migrate the document-store career export into the relational schema.
#[derive(Parser, Debug)]
#[command(version, about, after_help = step_catalog_help())]
struct Cli {
    /// Steps to run, in any order (they always execute in catalog order).
    /// With no steps named, the full catalog runs.
    steps: Vec<String>,

    /// Keep running remaining steps when one fails.
    #[arg(long)]
    continue_on_error: bool,

    /// Directory holding the document-store export (overrides SOURCE_EXPORT_DIR).
    #[arg(long)]
    source_dir: Option<String>,

    /// Target database URL (overrides DATABASE_URL).
    #[arg(long)]
    db_url: Option<String>,

    /// List the step catalog and exit.
    #[arg(long)]
    list_steps: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    ensure_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let cli = Cli::parse();
    let steps = catalog();

    if cli.list_steps {
        for step in &steps {
            println!("{:<26} {}", step.name, step.description);
        }
        return Ok(());
    }

    let export_dir = source_dir(cli.source_dir.as_deref())?;
    let source = JsonExportSource::open(&export_dir)?;
    let store = PgStore::connect(
        &db_url(cli.db_url.as_deref())?,
        env_u32("DB_MAX_CONNS", 10),
        env_bool("AUTO_MIGRATE", false),
    )
    .await?;
    let ctx = MigrationContext::new(Arc::new(source), Arc::new(store));

    // A summary with failures only comes back under --continue-on-error
    // (otherwise run_steps returns the error); the flag means finishing the
    // rest of the catalog is the success mode, so report and exit clean.
    let summary = run_steps(&ctx, &steps, &cli.steps, cli.continue_on_error).await?;
    if summary.ok() {
        info!("migration complete");
    } else {
        warn!(
            failed = %summary.failed.join(", "),
            "migration finished with step failures"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn help_lists_the_step_catalog() {
        let help = Cli::command().render_long_help().to_string();
        for step in catalog() {
            assert!(help.contains(step.name), "missing step {}", step.name);
        }
        assert!(help.contains("fm-migrate report"));
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
