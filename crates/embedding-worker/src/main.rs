//! BioSearch Embedding Worker
//!
//! Batch job that (re)computes the stored embedding of every paper:
//! 1. Reads all papers in id order
//! 2. Builds a composite text per paper
//! 3. Embeds texts in batches with the configured model
//! 4. Writes vectors and model name back to the database
//!
//! `embed-papers test [text]` embeds a single text without touching the database.

mod processor;

use crate::processor::EmbeddingProcessor;
use anyhow::Context;
use biosearch_common::{
    config::AppConfig,
    db::{DbPool, PaperStore, Repository},
    embeddings::create_embedder,
    VERSION,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEST_TEXT: &str = "This is a test sentence for embedding.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting BioSearch Embedding Worker v{}", VERSION);

    // Initialize embedder
    let embedder = create_embedder(&config.embedding)?;

    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    if embedder.dimension() != config.embedding.dimension {
        warn!(
            configured = config.embedding.dimension,
            actual = embedder.dimension(),
            "Embedder dimension differs from configuration, the vector column may reject writes"
        );
    }

    let args: Vec<String> = std::env::args().collect();

    if args.get(1).map(String::as_str) == Some("test") {
        // Test mode: generate a single embedding
        info!("Running in test mode...");

        let text = args.get(2).map(String::as_str).unwrap_or(DEFAULT_TEST_TEXT);

        return match embedder.embed(text).await {
            Ok(embedding) => {
                println!("Embedding generated successfully!");
                println!("  Model: {}", embedder.model_name());
                println!("  Dimension: {}", embedding.len());
                println!("  First 5 values: {:?}", &embedding[..5.min(embedding.len())]);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to generate embedding");
                Err(e.into())
            }
        };
    }

    // Unreachable database is fatal
    let pool = DbPool::new(&config.database).await?;
    let store: Arc<dyn PaperStore> = Arc::new(Repository::new(pool));

    let processor = EmbeddingProcessor::new(store, embedder, config.embedding.batch_size);

    let summary = processor.run().await.map_err(|e| {
        error!(error = %e, "Embedding run failed");
        e
    })?;

    println!("Embeddings updated: {}.", summary);

    Ok(())
}
