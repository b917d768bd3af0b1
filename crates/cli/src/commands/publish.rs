//! Inject JSON messages onto the in-process bus through the API

use crate::client::ApiClient;
use crate::output::{print_json, print_success, print_warning, OutputFormat};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Serialize)]
struct PublishSummary {
    subject: String,
    published: usize,
    bytes: u64,
}

pub async fn publish_file(client: &ApiClient, subject: &str, file: &Path, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {:?}", file))?;
    let messages = parse_messages(&content)?;

    if messages.is_empty() {
        print_warning("No messages found in file");
        return Ok(());
    }

    let path = format!("api/v1/bus/{}", subject);
    let mut summary = PublishSummary {
        subject: subject.to_string(),
        published: 0,
        bytes: 0,
    };

    for (index, message) in messages.iter().enumerate() {
        let ack: Value = client
            .post(&path, message)
            .await
            .with_context(|| format!("Message {} was rejected", index + 1))?;
        summary.published += 1;
        summary.bytes += ack.get("bytes").and_then(Value::as_u64).unwrap_or_default();
    }

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => print_success(&format!(
            "Published {} message(s) ({} bytes) to {}",
            summary.published, summary.bytes, summary.subject
        )),
    }

    Ok(())
}

/// A single JSON document (an array is sent as one message per element),
/// otherwise one JSON value per non-empty line
fn parse_messages(content: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => return Ok(items),
        Ok(value) => return Ok(vec![value]),
        Err(_) => {}
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Line {} is not valid JSON", n + 1))
        })
        .collect()
}
