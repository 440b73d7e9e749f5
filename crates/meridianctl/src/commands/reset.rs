//! Reset command implementation.

use anyhow::{bail, Context, Result};
use meridian::client::{ConnectConfig, MeridianClient};
use meridian::timestamp::{Timestamp, MAX_LOGICAL};
use serde::Serialize;

use crate::OutputFormat;

#[derive(Serialize)]
struct ResetOutput {
    stream: String,
    physical: i64,
    logical: i64,
}

/// Parse `<physical>.<logical>`, `<physical>`, or a composed value.
pub fn parse_target(raw: &str, composed: bool) -> Result<Timestamp> {
    if composed {
        let value: u64 = raw.parse().context("invalid composed timestamp")?;
        return Ok(Timestamp::from_composed(value));
    }

    let (physical, logical) = match raw.split_once('.') {
        Some((p, l)) => (p, l),
        None => (raw, "0"),
    };
    let physical: i64 = physical.parse().context("invalid physical part")?;
    let logical: i64 = logical.parse().context("invalid logical part")?;
    if !(0..MAX_LOGICAL).contains(&logical) {
        bail!("logical part must be below {MAX_LOGICAL}");
    }
    Ok(Timestamp::new(physical, logical))
}

pub async fn run(
    config: ConnectConfig,
    stream: &str,
    target: Timestamp,
    ignore_smaller: bool,
    skip_upper_bound_check: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut client = MeridianClient::connect(config)
        .await
        .context("failed to connect to server")?;

    client
        .reset_timestamp(stream, target, ignore_smaller, skip_upper_bound_check)
        .await
        .context("ResetTimestamp failed")?;

    match format {
        OutputFormat::Text => println!("Stream {stream} reset to {target}"),
        OutputFormat::Json => {
            let output = ResetOutput {
                stream: stream.to_string(),
                physical: target.physical,
                logical: target.logical,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
