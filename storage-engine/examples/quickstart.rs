use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared::config::StoreConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Summary {
    title: String,
    bullet_points: Vec<String>,
}

/// Walks one pipeline's working memory through the store. Pick the engine
/// with RECALL_BACKEND (memory, file, sqlite or redis); defaults to memory.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = StoreConfig::from_env();
    println!("Opening context store ({} backend)", config.backend);
    let store = storage_engine::open(&config).await?;

    let ctx = store.context("content_pipeline")?;

    println!("\n=== Storing values ===");
    ctx.store(
        "summary",
        &Summary {
            title: "Weekly digest".to_string(),
            bullet_points: vec![
                "Revenue up 4%".to_string(),
                "Two incidents, both resolved".to_string(),
            ],
        },
    )
    .await?;
    ctx.store_with_ttl("draft", "only needed briefly", Some(Duration::from_secs(2)))
        .await?;
    println!("Keys: {:?}", ctx.keys().await?);

    println!("\n=== Reading back ===");
    let summary: Option<Summary> = ctx.get("summary").await?;
    println!("summary = {:?}", summary);

    println!("\n=== Waiting for the draft to expire ===");
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    let draft: Option<String> = ctx.get("draft").await?;
    println!("draft after ttl = {:?}", draft);

    println!("\n=== Cleanup and stats ===");
    let purged = store.cleanup().await;
    println!("Purged {} expired entries", purged);
    let stats = store.stats().await?;
    println!(
        "Backend {} holds {} entries across {} namespaces",
        stats.backend, stats.entries, stats.namespaces
    );

    ctx.clear().await?;
    println!("\nDone.");
    Ok(())
}
