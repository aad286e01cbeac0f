mod ai;
mod analyzer;
mod config;
mod connect;
mod engine;
mod indicators;
mod risk;
mod series;
mod types;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::analyzer::MarketAnalyzer;
use crate::config::AppSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs to stderr; stdout stays clean for the report JSON.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let conf = AppSettings::load()?;
    info!(
        "analyzing {} ({}), decision mode {:?}",
        conf.app.pair, conf.app.granularity, conf.engine.decision_mode
    );

    let analyzer = MarketAnalyzer::new(&conf.data, conf.engine.clone(), conf.ai.as_ref())?;
    let report = analyzer.analyze(&conf.app.pair, &conf.app.granularity).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
