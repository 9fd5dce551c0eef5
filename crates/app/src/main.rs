//! # divvy CLI
//!
//! Scan a receipt into an expense's item list.
//!
//! ```bash
//! divvy new-expense "Friday groceries"
//! divvy scan 1 receipt.jpg --crop 40,120,600,900 --transcript receipt.txt --preview bw.png
//! divvy items 1
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use divvy::{Cancelled, PipelineController, SessionError};
use divvy_core::{Config, ExpenseId, Money};
use divvy_ocr::{CropRect, ItemExtractor, TextItemExtractor, TranscriptRecognizer};
use divvy_storage::{ExpenseItems, ItemCollection, ReconciliationFailure};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "divvy")]
#[command(author, version, about = "Turn receipt photos into expense items", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an expense and print its id
    NewExpense { description: String },

    /// List the items of an expense
    Items { expense: i64 },

    /// Scan a receipt image into an expense, replacing its items
    Scan {
        expense: i64,

        image: PathBuf,

        /// Region of interest as x,y,width,height in image pixels
        #[arg(long)]
        crop: Option<CropRect>,

        /// Receipt text to use instead of running an OCR engine
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Write the binarized preview here
        #[arg(long)]
        preview: Option<PathBuf>,

        /// Cancel at the preview instead of finishing
        #[arg(long)]
        cancel: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let db_path = match cli.db.clone().or_else(|| config.storage.database.clone()) {
        Some(path) => path,
        None => default_db_path()?,
    };
    let pool = divvy_storage::create_db(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Commands::NewExpense { description } => {
            let id = divvy_storage::create_expense(&pool, &description).await?;
            println!("{id}");
        }
        Commands::Items { expense } => {
            let id = expense_id(&pool, expense).await?;
            print_items(&ExpenseItems::new(pool, id)).await?;
        }
        Commands::Scan { expense, image, crop, transcript, preview, cancel } => {
            let id = expense_id(&pool, expense).await?;
            let items = ExpenseItems::new(pool, id);
            let extractor = extractor(transcript.as_deref()).await?;
            let mut session = PipelineController::new(extractor, items, config.pipeline.clone());

            session.open()?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            if let Err(e) = session.select_file(Some(&bytes)) {
                session.cancel()?;
                return Err(e.into());
            }

            match session.proceed(crop).await {
                Ok(()) => {}
                Err(SessionError::Reconciliation(failure)) => {
                    eprintln!("warning: {failure}; the expense may hold a partial item list");
                    if let ReconciliationFailure::Incomplete { failed, .. } = &failure {
                        for write in failed {
                            eprintln!("  {}: {}", write.op, write.reason);
                        }
                    }
                }
                Err(e) => {
                    session.cancel()?;
                    return Err(e.into());
                }
            }

            if let (Some(path), Some(bin)) = (&preview, session.preview()) {
                tokio::fs::write(path, bin.to_png()?).await?;
                println!("preview written to {} (threshold {})", path.display(), bin.threshold());
            }

            if cancel {
                match session.cancel()? {
                    Cancelled::Discarded => println!("cancelled; no items written"),
                    Cancelled::AlreadyCommitted => println!("cancelled; items were already written"),
                }
            } else {
                session.finish().await?;
            }
            if let Some(summary) = session.last_commit() {
                println!(
                    "expense {}: {} item(s) totalling {} written",
                    session.collection().expense_id(),
                    summary.report.inserted,
                    summary.total()
                );
            }
            print_items(session.collection()).await?;
        }
    }

    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "divvy", "Divvy")
        .ok_or_else(|| anyhow!("Failed to get app directory"))?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    Ok(data_dir.join("divvy.db"))
}

async fn expense_id(pool: &divvy_storage::DbPool, raw: i64) -> Result<ExpenseId> {
    let id = ExpenseId(raw);
    divvy_storage::get_expense(pool, id)
        .await?
        .map(|e| e.id)
        .ok_or_else(|| anyhow!("Expense {id} not found"))
}

async fn extractor(transcript: Option<&Path>) -> Result<Arc<dyn ItemExtractor>> {
    if let Some(path) = transcript {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        return Ok(Arc::new(TextItemExtractor::new(TranscriptRecognizer::new(text))));
    }
    engine_extractor()
}

#[cfg(feature = "tesseract")]
fn engine_extractor() -> Result<Arc<dyn ItemExtractor>> {
    use divvy_ocr::recognizer::tesseract_backend::TesseractRecognizer;
    Ok(Arc::new(TextItemExtractor::new(TesseractRecognizer::new(None, "eng"))))
}

#[cfg(not(feature = "tesseract"))]
fn engine_extractor() -> Result<Arc<dyn ItemExtractor>> {
    Err(anyhow!("No OCR engine available: pass --transcript or build with the `tesseract` feature"))
}

async fn print_items<C: ItemCollection>(items: &C) -> Result<()> {
    let records = items.list().await?;
    if records.is_empty() {
        println!("(no items)");
    }
    let total: Money = records.iter().map(|r| r.price).sum();
    for r in &records {
        let claimed = if r.users.is_empty() {
            String::new()
        } else {
            format!("  [{} assigned]", r.users.len())
        };
        println!("{:>3}  {:<32} {:>10}{claimed}", r.index, r.name, r.price.to_string());
    }
    if !records.is_empty() {
        println!("     {:<32} {:>10}", "total", total.to_string());
    }
    Ok(())
}
