//! HTTP client for the aggregator API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregator_lib::engine::EngineStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_decodes_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "instance": "aggregator-0",
                    "trip_predictors": 12,
                    "pending_batches": 2,
                    "observed_transitions": 40,
                    "inference_bucket_count": 4,
                    "batch_ttl_secs": 30
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status: EngineStatus = client.get("api/v1/status").await.unwrap();
        assert_eq!(status.pending_batches, 2);
        assert!(status.last_sweep.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/pending")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .get::<serde_json::Value>("api/v1/pending")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/bus/inference-response")
            .match_body(mockito::Matcher::Json(json!({"request_id": "x"})))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"subject":"inference-response","bytes":18}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let ack: serde_json::Value = client
            .post("api/v1/bus/inference-response", &json!({"request_id": "x"}))
            .await
            .unwrap();
        assert_eq!(ack["bytes"], 18);
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
