use anyhow::{Context, Result};
use clap::Parser;
use hub_api::{Event, Topic};
use quiz_live::{
    api,
    config::{Cli, Command, Config},
    relay,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(Command::Publish {
        to,
        kind,
        data,
        quiz_id,
    }) = &cli.command
    {
        let data = serde_json::from_str(data).context("--data must be valid JSON")?;
        let event = Event::new(kind.clone(), data, Topic::from_opt(quiz_id.as_deref()));
        return relay::publish(to, &event).await;
    }

    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    tracing::debug!(config = ?cfg, "configuration resolved");
    api::run_http_server(cfg).await
}
