//! Thin client for the coordinator's HTTP front door.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn status(&self) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await
            .context("Failed to reach the coordinator")?;
        Ok(response.json().await?)
    }

    pub async fn calibrate(&self, params: &[(&str, Option<i32>)]) -> Result<Value> {
        let query: Vec<(&str, i32)> = params
            .iter()
            .filter_map(|(name, value)| value.map(|v| (*name, v)))
            .collect();
        if query.is_empty() {
            return Err(anyhow!(
                "need --x/--y, or --read-x/--read-y/--write-x/--write-y"
            ));
        }
        let response = self
            .http
            .get(format!("{}/api/calibrate", self.base_url))
            .query(&query)
            .send()
            .await
            .context("Failed to reach the coordinator")?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("calibration rejected: {}", body));
        }
        Ok(body)
    }

    pub async fn chat(&self, message: &str, model: Option<&str>) -> Result<Value> {
        let mut body = serde_json::json!({ "message": message });
        if let Some(model) = model {
            body["model"] = Value::String(model.to_string());
        }
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach the coordinator")?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("chat request failed: {}", body));
        }
        Ok(body)
    }
}
