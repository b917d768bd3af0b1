//! Pending batch listing

use crate::client::ApiClient;
use crate::output::{color_remaining, format_timestamp, print_json, print_table, OutputFormat};
use aggregator_lib::pending::PendingBatchSummary;
use anyhow::Result;
use tabled::Tabled;

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "Batch")]
    batch_id: String,
    #[tabled(rename = "Vehicle")]
    vehicle_id: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Expires")]
    expire_time: String,
    #[tabled(rename = "Trips")]
    trips: String,
    #[tabled(rename = "Awaiting")]
    awaiting: String,
}

impl From<&PendingBatchSummary> for PendingRow {
    fn from(summary: &PendingBatchSummary) -> Self {
        Self {
            batch_id: summary.batch_id.clone(),
            vehicle_id: summary.vehicle_id.clone(),
            created_at: format_timestamp(summary.created_at),
            expire_time: summary
                .expire_time
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            trips: summary.trips.join(", "),
            awaiting: color_remaining(summary.pending_remaining, summary.requests),
        }
    }
}

pub async fn list_pending(client: &ApiClient, vehicle: Option<String>, format: OutputFormat) -> Result<()> {
    let summaries: Vec<PendingBatchSummary> = client.get("api/v1/pending").await?;
    let summaries = filter_by_vehicle(summaries, vehicle.as_deref());

    match format {
        OutputFormat::Json => print_json(&summaries)?,
        OutputFormat::Table => {
            let rows = summaries.iter().map(PendingRow::from).collect();
            print_table(rows, "No pending batches");
        }
    }

    Ok(())
}

fn filter_by_vehicle(summaries: Vec<PendingBatchSummary>, vehicle: Option<&str>) -> Vec<PendingBatchSummary> {
    match vehicle {
        Some(vehicle) => summaries.into_iter().filter(|s| s.vehicle_id == vehicle).collect(),
        None => summaries,
    }
}
