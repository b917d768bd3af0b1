//! Engine status command

use crate::client::ApiClient;
use crate::output::{format_timestamp, print_info, print_json, print_table, OutputFormat};
use aggregator_lib::engine::{EngineStatus, SweepCounts};
use anyhow::Result;
use tabled::Tabled;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct SweepRow {
    #[tabled(rename = "Collection")]
    collection: &'static str,
    #[tabled(rename = "Before")]
    before: usize,
    #[tabled(rename = "After")]
    after: usize,
    #[tabled(rename = "Removed")]
    removed: usize,
}

impl SweepRow {
    fn new(collection: &'static str, counts: &SweepCounts) -> Self {
        Self {
            collection,
            before: counts.before,
            after: counts.after,
            removed: counts.removed(),
        }
    }
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: EngineStatus = client.get("api/v1/status").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_table(status_rows(&status), "No status reported");

            match &status.last_sweep {
                Some(sweep) => {
                    print_info(&format!(
                        "Last sweep at {} took {} ms",
                        format_timestamp(sweep.swept_at),
                        sweep.elapsed_ms
                    ));
                    print_table(
                        vec![
                            SweepRow::new("pending batches", &sweep.pending_batches),
                            SweepRow::new("trip predictors", &sweep.trip_predictors),
                            SweepRow::new("observed transitions", &sweep.observed_transitions),
                        ],
                        "Empty sweep",
                    );
                }
                None => print_info("No sweep has run yet"),
            }
        }
    }

    Ok(())
}

fn status_rows(status: &EngineStatus) -> Vec<StatusRow> {
    vec![
        StatusRow { field: "Instance", value: status.instance.clone() },
        StatusRow { field: "Trip predictors", value: status.trip_predictors.to_string() },
        StatusRow { field: "Pending batches", value: status.pending_batches.to_string() },
        StatusRow { field: "Observed transitions", value: status.observed_transitions.to_string() },
        StatusRow { field: "Inference buckets", value: status.inference_bucket_count.to_string() },
        StatusRow { field: "Batch TTL", value: format!("{}s", status.batch_ttl_secs) },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rows() {
        let status = EngineStatus {
            instance: "aggregator-0".to_string(),
            trip_predictors: 3,
            pending_batches: 1,
            observed_transitions: 9,
            inference_bucket_count: 2,
            batch_ttl_secs: 30,
            last_sweep: None,
        };

        let rows = status_rows(&status);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[5].value, "30s");
    }

    #[test]
    fn test_sweep_row_removed() {
        let row = SweepRow::new("pending batches", &SweepCounts::from((5, 2)));
        assert_eq!(row.removed, 3);
    }
}
