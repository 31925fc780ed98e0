use anyhow::Context;
use clap::Parser;
use dcping_lib::{Config, DEFAULT_ENDPOINT};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "dcping",
    about = "Measure round-trip latency over an unordered WebRTC data channel"
)]
struct Cli {
    /// Signaling server address (ws:// or wss://)
    #[arg(env = "DCPING_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: Url,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dcping_lib::init_logging().map_err(anyhow::Error::msg)?;

    let cli = Cli::parse();
    let config = Config::new(cli.endpoint).with_env_overrides()?;

    let report = dcping_lib::run(config)
        .await
        .context("latency probe failed")?;
    println!("{report}");
    Ok(())
}
