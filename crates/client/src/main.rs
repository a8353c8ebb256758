//! casefeed-tail - follow the event stream and log every event.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use casefeed_client::config::redacted;
use casefeed_client::{EnvCredential, FeedConfig, RealtimeFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casefeed_tail=info,casefeed_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FeedConfig::from_env()?;
    tracing::info!(endpoint = %redacted(&config.endpoint), "Starting casefeed-tail");

    let credentials = Arc::new(EnvCredential::new("CASEFEED_TOKEN"));
    let feed = RealtimeFeed::new(config.clone(), credentials);

    let _all = feed.on_any(|event| {
        tracing::info!(
            topic = %event.topic,
            at = %event.timestamp.to_rfc3339(),
            payload = %event.payload,
            "Event"
        );
        Ok(())
    });

    // Give the hosting session time to settle before the first request.
    tokio::time::sleep(config.startup_grace).await;
    feed.connect();
    if feed.state() == casefeed_client::ConnectionState::Idle {
        tracing::warn!("CASEFEED_TOKEN is not set; nothing to follow");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    feed.dispose();

    Ok(())
}
