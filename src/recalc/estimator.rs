//! Estimator collaborator
//!
//! The probability estimator is an external scoring service: it receives
//! a (user, course) pair and returns the heterogeneous raw entity list.
//! Its internal model is a black box to this crate.

use anyhow::{Context, Result};
use serde_json::Value;

/// External scoring service producing raw per-entity probabilities.
#[allow(async_fn_in_trait)]
pub trait Estimator {
    async fn estimate(&self, user_id: &str, course_id: &str) -> Result<Vec<Value>>;
}

/// Production estimator speaking JSON over HTTP.
pub struct HttpEstimator {
    client: reqwest::Client,
    url: String,
}

impl HttpEstimator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Estimator for HttpEstimator {
    async fn estimate(&self, user_id: &str, course_id: &str) -> Result<Vec<Value>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "user_id": user_id,
                "course_id": course_id,
            }))
            .send()
            .await
            .with_context(|| format!("Estimator request to {} failed", self.url))?
            .error_for_status()
            .context("Estimator returned an error status")?;

        response
            .json::<Vec<Value>>()
            .await
            .context("Estimator returned a malformed entity list")
    }
}
