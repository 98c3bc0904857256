use anyhow::{Context, Result};
use community_service::config::Config;
use community_service::{store, Repositories};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,community_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        env = %config.app.env,
        backend = ?config.store.backend,
        "Starting community-service"
    );

    let store = store::connect(&config.store).context("Failed to connect document store")?;
    let repos = Repositories::new(store);

    let community_id =
        std::env::var("COMMUNITY_ID").context("COMMUNITY_ID environment variable not set")?;

    let posts = repos
        .posts
        .get_posts(&community_id)
        .await
        .with_context(|| format!("Failed to fetch posts of community {}", community_id))?;

    tracing::info!(%community_id, count = posts.len(), "Community posts");
    println!("{}", serde_json::to_string_pretty(&posts)?);

    Ok(())
}
