//! Folk インポートの状況を確認・操作する運用 CLI。

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use folk_import_server::client::api::{ClientError, HttpImportApi, ImportApi};
use folk_import_server::client::render;
use folk_import_server::client::{FailedRecordSelection, StatusPoller};

#[derive(Parser, Debug)]
#[command(name = "folk-import-status", version, about = "Inspect and operate Folk import runs")]
struct Cli {
    /// Import server base URL
    #[arg(long, env = "FOLK_IMPORT_URL", default_value = "http://localhost:8080", global = true)]
    base_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show import progress, polling while a run is in progress
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
    /// List the failed records of a run
    Failed { run_id: String },
    /// Retry failed records of a run (all unresolved records when no --folk-id is given)
    Retry {
        run_id: String,
        #[arg(long = "folk-id")]
        folk_ids: Vec<String>,
        /// Poll interval in milliseconds while waiting for the retry result
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
        /// Give up waiting for the retry result after this many seconds
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,
    },
    /// Cancel a pending or running import
    Cancel { run_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Arc::new(HttpImportApi::new(
        &cli.base_url,
        Duration::from_secs(cli.timeout_secs),
    )?);

    match cli.command {
        Command::Watch { interval_ms } => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let poller = StatusPoller::new(api).with_interval(Duration::from_millis(interval_ms));
            let polls = poller
                .run(|snapshot| println!("{}", render::render_status(snapshot)), cancel)
                .await?;
            eprintln!("{polls} polls");
        }
        Command::Failed { run_id } => {
            let records = api.failed_records(&run_id).await?;
            if records.is_empty() {
                println!("no failed records");
            }
            for record in &records {
                println!("{}", render::render_failed_record(record));
            }
        }
        Command::Retry {
            run_id,
            folk_ids,
            interval_ms,
            wait_secs,
        } => {
            let records = api.failed_records(&run_id).await?;
            let mut selection = FailedRecordSelection::new(&records);
            let (response, submitted) = if folk_ids.is_empty() {
                selection.select_all();
                let submitted = selection.selected_records(&records);
                (selection.retry_all(api.as_ref(), &run_id).await?, submitted)
            } else {
                for folk_id in &folk_ids {
                    if !selection.select(folk_id) {
                        eprintln!("skipping {folk_id}: not an unresolved failed record of this run");
                    }
                }
                let submitted = selection.selected_records(&records);
                let response = match selection.retry_selected(api.as_ref(), &run_id).await {
                    Err(ClientError::EmptySelection) => {
                        anyhow::bail!("none of the given folk ids can be retried")
                    }
                    other => other?,
                };
                (response, submitted)
            };
            println!("{}", response.message);

            let watch = selection
                .await_retry(
                    api.as_ref(),
                    &run_id,
                    &submitted,
                    Duration::from_millis(interval_ms),
                    Duration::from_secs(wait_secs),
                )
                .await?;
            for record in watch
                .records
                .iter()
                .filter(|r| submitted.iter().any(|s| s.id == r.id))
            {
                println!("{}", render::render_failed_record(record));
            }
            if !watch.pending.is_empty() {
                eprintln!("still retrying: {}", watch.pending.join(", "));
            }
        }
        Command::Cancel { run_id } => {
            let run = api.cancel(&run_id).await?;
            println!("{}", render::render_run(&run));
        }
    }
    Ok(())
}
