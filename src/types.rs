use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Client configuration persisted at `~/.manobal/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Seconds before a JWT `exp` at which the session is refreshed proactively.
    #[serde(default = "default_refresh_leeway_secs")]
    pub refresh_leeway_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub use_mock_data: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}
fn default_poll_interval_ms() -> u64 {
    30_000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_refresh_timeout_secs() -> u64 {
    15
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_refresh_leeway_secs() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            refresh_leeway_secs: default_refresh_leeway_secs(),
            token_path: None,
            retry: RetryPolicy::default(),
            use_mock_data: false,
        }
    }
}

/// Backoff policy for retryable HTTP failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

// ============================================================================
// Auth payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body returned by `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub user: Option<DashboardUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardUser {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: String,
}

// ============================================================================
// Dashboard payloads
// ============================================================================

/// Query filter shared by the dashboard endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DashboardFilter {
    pub department: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DashboardFilter {
    /// Query pairs in the order the backend documents them; dates as `YYYY-MM-DD`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(department) = &self.department {
            pairs.push(("department", department.clone()));
        }
        if let Some(location) = &self.location {
            pairs.push(("location", location.clone()));
        }
        if let Some(start) = self.start_date {
            pairs.push(("start_date", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_date {
            pairs.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u32,
}

/// `GET /dashboard`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub sentiment_score: u32,
    pub trend: Trend,
    pub risk_level: RiskLevel,
    pub mental_health_score: u32,
    #[serde(default)]
    pub departments: Vec<NamedCount>,
    #[serde(default)]
    pub locations: Vec<NamedCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentScore {
    pub name: String,
    pub sentiment_score: u32,
    pub trend: Trend,
    pub risk_level: RiskLevel,
}

/// `GET /department-comparison`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentComparison {
    pub departments: Vec<DepartmentScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub sentiment_score: u32,
    pub message_count: u32,
}

/// `GET /time-series`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub time_series: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u32,
}

/// `GET /department/{name}/details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentDetails {
    pub name: String,
    pub sentiment_score: u32,
    pub trend: Trend,
    pub risk_level: RiskLevel,
    pub employee_count: u32,
    #[serde(default)]
    pub top_keywords: Vec<KeywordCount>,
}

/// `GET /keyword-stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordStats {
    pub keywords: Vec<KeywordCount>,
}

/// Weekly mood breakdown shown on the mood trend chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodWeek {
    pub label: String,
    pub anxiety: f64,
    pub depression: f64,
    pub stress: f64,
    pub wellbeing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodAverages {
    pub anxiety: f64,
    pub depression: f64,
    pub stress: f64,
    pub wellbeing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodData {
    pub weeks: Vec<MoodWeek>,
    pub current: MoodAverages,
    pub previous: MoodAverages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellbeingPoint {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentWellbeing {
    pub name: String,
    pub wellbeing_score: f64,
    pub engagement_rate: u32,
    #[serde(default)]
    pub critical_cases: Option<u32>,
}

/// Keyword occurrence with its period-over-period trend, e.g. `"+12%"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordOccurrence {
    pub count: u32,
    pub trend: String,
}

/// Headline numbers for the overview page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewData {
    pub total_employees: u32,
    pub at_risk_departments: u32,
    pub mental_health_score: f64,
    pub keyword_occurrences: BTreeMap<String, KeywordOccurrence>,
    pub departments: Vec<DepartmentRisk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRisk {
    pub name: String,
    pub count: u32,
    pub risk_level: RiskLevel,
}
