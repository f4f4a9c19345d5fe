//! Token usage and cost totals from the organisation billing API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{error, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Stop following cursors after this many pages.
const MAX_PAGES: usize = 1000;
pub const MAX_PERIOD_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("usage reporting is not configured (missing admin key)")]
    NotConfigured,
    #[error("period must be between 1 and {MAX_PERIOD_DAYS} days")]
    InvalidPeriod,
    #[error("usage API request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageBucket {
    #[serde(default)]
    pub results: Vec<UsageResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageResult {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CostBucket {
    #[serde(default)]
    pub results: Vec<CostResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CostResult {
    #[serde(default)]
    pub amount: Option<CostAmount>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CostAmount {
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub period_days: i64,
    pub start_date: String,
    pub end_date: String,
}

/// Sum input and output tokens over all buckets.
pub fn aggregate_usage(buckets: &[UsageBucket]) -> (u64, u64) {
    buckets
        .iter()
        .flat_map(|b| &b.results)
        .fold((0, 0), |(input, output), r| {
            (input + r.input_tokens, output + r.output_tokens)
        })
}

/// Sum cost amounts over all buckets.
pub fn aggregate_costs(buckets: &[CostBucket]) -> f64 {
    buckets
        .iter()
        .flat_map(|b| &b.results)
        .filter_map(|r| r.amount.as_ref())
        .map(|a| a.value)
        .sum()
}

pub struct UsageClient {
    client: reqwest::Client,
    base_url: String,
    admin_key: Option<String>,
    org_id: Option<String>,
}

impl UsageClient {
    pub fn new(
        base_url: impl Into<String>,
        admin_key: Option<String>,
        org_id: Option<String>,
    ) -> Result<Self, UsageError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_key,
            org_id,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    /// Fetch every page of a cursor-paginated endpoint.
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, UsageError> {
        let admin_key = self.admin_key.as_deref().ok_or(UsageError::NotConfigured)?;
        let url = format!("{}{}", self.base_url, path);

        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(admin_key)
                .query(params);
            if let Some(org_id) = &self.org_id {
                request = request.header("OpenAI-Organization", org_id);
            }
            if let Some(page) = &cursor {
                request = request.query(&[("page", page)]);
            }

            let page: Page<T> = request.send().await?.error_for_status()?.json().await?;
            all.extend(page.data);

            match (page.has_more, page.next_page) {
                (true, Some(next)) => cursor = Some(next),
                (true, None) => {
                    warn!(path, "Usage API reported more pages without a cursor");
                    break;
                }
                (false, _) => break,
            }
        }

        Ok(all)
    }

    /// Usage and cost totals for the last `days` days, ending now.
    pub async fn report(&self, days: i64) -> Result<UsageReport, UsageError> {
        self.report_until(days, Utc::now()).await
    }

    /// Usage and cost totals for the `days` days ending at `end`.
    ///
    /// A failed fetch of either series is logged and counted as zero.
    pub async fn report_until(&self, days: i64, end: DateTime<Utc>) -> Result<UsageReport, UsageError> {
        if !self.is_configured() {
            return Err(UsageError::NotConfigured);
        }
        if !(1..=MAX_PERIOD_DAYS).contains(&days) {
            return Err(UsageError::InvalidPeriod);
        }

        let start = end - chrono::Duration::days(days);
        let params = [
            ("start_time", start.timestamp().to_string()),
            ("end_time", end.timestamp().to_string()),
            ("interval", "1d".to_string()),
        ];

        let (total_input_tokens, total_output_tokens) = match self
            .fetch_all_pages::<UsageBucket>("/organization/usage/completions", &params)
            .await
        {
            Ok(buckets) => aggregate_usage(&buckets),
            Err(e) => {
                error!(error = %e, "Failed to fetch usage data");
                (0, 0)
            }
        };

        let total_cost_usd = match self
            .fetch_all_pages::<CostBucket>("/organization/costs", &params)
            .await
        {
            Ok(buckets) => aggregate_costs(&buckets),
            Err(e) => {
                error!(error = %e, "Failed to fetch cost data");
                0.0
            }
        };

        info!(
            days,
            total_input_tokens, total_output_tokens, total_cost_usd, "Usage report built"
        );

        Ok(UsageReport {
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            total_cost_usd,
            period_days: days,
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
        })
    }
}
