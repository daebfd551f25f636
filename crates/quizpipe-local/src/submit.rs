//! Submission client.
//!
//! One POST at most per run; never called when the answer candidate is
//! absent (the pipeline reports `no_answer` instead), and never retried.

use crate::excerpt;
use quizpipe_core::{Answer, Error, Result, RunTrace, Task};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubmitClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl SubmitClient {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("quizpipe-local/0.1")
            .build()
            .map_err(|e| Error::Submit(e.to_string()))?;
        Ok(Self {
            client,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// POST `{email, secret, url, answer}` to the resolved target.
    ///
    /// Returns the remote status code; the response body (JSON when it
    /// parses, a truncated excerpt otherwise) lands in the trace.
    pub async fn submit(
        &self,
        target: &str,
        task: &Task,
        answer: &Answer,
        trace: &mut RunTrace,
    ) -> Result<u16> {
        let body = serde_json::json!({
            "email": task.email,
            "secret": task.secret,
            "url": task.url,
            "answer": answer,
        });
        tracing::info!(target, "submitting answer");

        let resp = self
            .client
            .post(target)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Submit(e.to_string()))?;

        let code = resp.status().as_u16();
        trace.note("submit_status_code", code);
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(v) => trace.note("submit_response", v),
            Err(_) => trace.note("submit_response_text", excerpt(&text, 2000)),
        }
        Ok(code)
    }
}
