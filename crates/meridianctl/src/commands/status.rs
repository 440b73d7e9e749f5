//! Status command implementation.

use anyhow::{Context, Result};
use meridian::client::{ConnectConfig, MeridianClient};
use serde::Serialize;

use crate::OutputFormat;

#[derive(Serialize)]
struct StreamInfo {
    stream: String,
    ready: bool,
    physical: i64,
    logical: i64,
    saved_physical: i64,
}

#[derive(Serialize)]
struct StatusOutput {
    member_id: String,
    is_leader: bool,
    epoch: u64,
    streams: Vec<StreamInfo>,
}

pub async fn run(config: ConnectConfig, format: OutputFormat) -> Result<()> {
    let mut client = MeridianClient::connect(config)
        .await
        .context("failed to connect to server")?;

    let status = client.status().await.context("GetStatus failed")?;

    let output = StatusOutput {
        member_id: status.member_id,
        is_leader: status.is_leader,
        epoch: status.epoch,
        streams: status
            .streams
            .into_iter()
            .map(|s| {
                let current = s.current.unwrap_or_default();
                StreamInfo {
                    stream: s.stream,
                    ready: s.ready,
                    physical: current.physical,
                    logical: current.logical,
                    saved_physical: s.saved_physical,
                }
            })
            .collect(),
    };

    match format {
        OutputFormat::Text => {
            let role = if output.is_leader { "leader" } else { "follower" };
            println!("Member: {} ({role}, epoch {})", output.member_id, output.epoch);
            println!();
            println!("{:<24} {:>6} {:>24} {:>16}", "STREAM", "READY", "CURRENT", "WATERMARK");
            println!("{}", "-".repeat(73));
            for s in &output.streams {
                let current = format!("{}.{}", s.physical, s.logical);
                println!(
                    "{:<24} {:>6} {:>24} {:>16}",
                    s.stream,
                    if s.ready { "yes" } else { "no" },
                    current,
                    s.saved_physical
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
