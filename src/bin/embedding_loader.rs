use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use expensetrack::{EmbeddingDraft, ExpenseVectors, StoreArgs, VectorError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "expensetrack-loader",
    about = "Load expense embeddings from JSONL into the pgvector-backed store"
)]
struct LoaderCli {
    /// JSONL file with one {user_id, expense_id, content, embedding} object per line
    #[arg(long, env = "EXPENSETRACK_LOADER_INPUT", default_value = "expense_embeddings.jsonl")]
    input: PathBuf,

    /// Replace existing embeddings of the same (user_id, expense_id) instead of appending
    #[arg(long, env = "EXPENSETRACK_LOADER_REPLACE", default_value_t = false)]
    replace: bool,

    /// Abort on the first invalid line instead of skipping it
    #[arg(long, default_value_t = false)]
    strict: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Default)]
struct LoadSummary {
    inserted: usize,
    skipped: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = LoaderCli::parse();
    let file = File::open(&cli.input)
        .with_context(|| format!("failed to open embedding input {:?}", cli.input))?;
    let config = cli.store.build_config()?;
    let vectors = ExpenseVectors::start(config)
        .await
        .context("failed to provision embedding schema")?;

    let summary = load(&vectors, BufReader::new(file), cli.replace, cli.strict).await;
    vectors.shutdown();
    let summary = summary?;

    if summary.inserted > 0 {
        println!();
    }
    println!(
        "Loaded {} embedding{} into {} ({} skipped).",
        summary.inserted,
        if summary.inserted == 1 { "" } else { "s" },
        vectors.provisioner().table().qualified(),
        summary.skipped
    );
    Ok(())
}

async fn load<R: BufRead>(
    vectors: &ExpenseVectors,
    reader: R,
    replace: bool,
    strict: bool,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<EmbeddingDraft>(&line)
            .with_context(|| format!("malformed JSON at line {}", line_no + 1))
            .and_then(|draft| draft.validate().map_err(anyhow::Error::from));
        let record = match record {
            Ok(record) => record,
            Err(err) if !strict => {
                warn!(line = line_no + 1, error = %err, "skipping invalid embedding line");
                summary.skipped += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        let ingestor = vectors.ingestor();
        let written = if replace {
            ingestor.replace(record).await
        } else {
            ingestor.ingest(record).await
        };
        match written {
            Ok(_) => {
                summary.inserted += 1;
                render_progress(summary.inserted)?;
            }
            Err(err @ VectorError::InvalidEmbeddingValue { .. }) if !strict => {
                warn!(line = line_no + 1, error = %err, "skipping embedding with wrong dimension");
                summary.skipped += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to store line {}", line_no + 1))
            }
        }
    }
    Ok(summary)
}

fn render_progress(inserted: usize) -> Result<()> {
    let plural = if inserted == 1 { "" } else { "s" };
    print!("\rInserted {} embedding{}...", inserted, plural);
    io::stdout().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use expensetrack::StoreConfig;
    use std::io::Cursor;

    fn offline_store() -> ExpenseVectors {
        let config = StoreConfig::new("postgres://nobody@127.0.0.1:1/expenses").with_dimension(3);
        ExpenseVectors::new(config).expect("lazy store")
    }

    const BAD_LINES: &str = concat!(
        "{not json\n",
        "\n",
        "{\"user_id\": {\"id\": 1}, \"expense_id\": \"1_exp_1\", \"embedding\": [0.1, 0.2, 0.3]}\n",
        "{\"user_id\": \"u1\", \"expense_id\": \"u1_exp_1\", \"embedding\": [0.1, 0.2]}\n",
    );

    #[tokio::test(flavor = "current_thread")]
    async fn lenient_load_skips_invalid_lines() {
        let store = offline_store();
        let summary = load(&store, Cursor::new(BAD_LINES), false, false)
            .await
            .expect("lenient load");
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(store.pool().stats().acquired, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn strict_load_stops_at_first_bad_line() {
        let store = offline_store();
        let err = load(&store, Cursor::new(BAD_LINES), true, true)
            .await
            .err()
            .expect("strict load fails");
        assert!(err.to_string().contains("line 1"));
    }
}
