//! Time-series retrieval over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use chipflow_core::types::{ChipKey, TimeSeriesRecord};
use chipflow_runtime::collab::{Profile, TimeSeriesSource};

/// Blocking client for a retrieval service exposing `GET /timeseries`.
///
/// Must be built outside of an async context; calls are made from blocking worker threads.
#[derive(Clone)]
pub struct HttpSeriesSource {
    client: Client,
    base_url: String,
}

impl HttpSeriesSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "retrieval url must be an http(s) URL, got '{base_url}'"
        );
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build retrieval HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/timeseries", self.base_url)
    }
}

impl TimeSeriesSource for HttpSeriesSource {
    fn fetch(
        &self,
        chip: ChipKey,
        acquired: &str,
        profile: Profile,
    ) -> Result<Vec<TimeSeriesRecord>> {
        let url = self.endpoint();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("x", chip.cx.to_string()),
                ("y", chip.cy.to_string()),
                ("acquired", acquired.to_string()),
                ("profile", profile.name().to_string()),
            ])
            .send()
            .with_context(|| format!("GET {url} for chip {chip} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("GET {url} for chip {chip} returned {status}: {body}");
        }
        let records: Vec<TimeSeriesRecord> = resp
            .json()
            .with_context(|| format!("decoding {} series for chip {chip}", profile.name()))?;
        tracing::debug!(
            cx = chip.cx,
            cy = chip.cy,
            acquired = acquired,
            profile = profile.name(),
            records = records.len(),
            "fetched time series"
        );
        Ok(records)
    }
}
