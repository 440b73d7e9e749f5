//! Ts command implementation.

use anyhow::{Context, Result};
use meridian::client::{ConnectConfig, MeridianClient};
use serde::Serialize;

use crate::OutputFormat;

#[derive(Serialize)]
struct TsOutput {
    stream: String,
    epoch: u64,
    count: u32,
    physical: i64,
    logical: i64,
    /// `(physical << 18) | logical` of the first timestamp.
    composed: u64,
}

pub async fn run(config: ConnectConfig, stream: &str, count: u32, format: OutputFormat) -> Result<()> {
    let mut client = MeridianClient::connect(config)
        .await
        .context("failed to connect to server")?;

    let block = client
        .get_timestamp(stream, count)
        .await
        .context("GetTimestamp failed")?;

    match format {
        OutputFormat::Text => {
            for ts in block.iter() {
                println!("{ts}\t{}", ts.compose());
            }
        }
        OutputFormat::Json => {
            let output = TsOutput {
                stream: block.stream.clone(),
                epoch: block.epoch,
                count: block.count,
                physical: block.first.physical,
                logical: block.first.logical,
                composed: block.first.compose(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
