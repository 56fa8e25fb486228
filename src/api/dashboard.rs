//! Typed dashboard endpoints.

use async_trait::async_trait;
use reqwest::Method;

use super::{ApiClient, Auth};
use crate::error::ApiError;
use crate::types::{
    DashboardFilter, DashboardSummary, DepartmentComparison, DepartmentDetails, KeywordStats,
    TimeSeries,
};

/// Where dashboard data comes from: the live API or the mock data service.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn dashboard(&self, filter: &DashboardFilter) -> Result<DashboardSummary, ApiError>;
    async fn department_comparison(&self) -> Result<DepartmentComparison, ApiError>;
    async fn time_series(&self, filter: &DashboardFilter) -> Result<TimeSeries, ApiError>;
    async fn department_details(&self, department: &str) -> Result<DepartmentDetails, ApiError>;
    async fn keyword_stats(&self, filter: &DashboardFilter) -> Result<KeywordStats, ApiError>;
}

impl ApiClient {
    /// `GET /department/{name}/details` with the name encoded as one path segment.
    fn department_details_url(&self, department: &str) -> Result<url::Url, ApiError> {
        let mut url = self.endpoint("department")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Config(format!("base URL '{}' cannot carry a path", self.base_url())))?
            .push(department)
            .push("details");
        Ok(url)
    }
}

#[async_trait]
impl DashboardSource for ApiClient {
    async fn dashboard(&self, filter: &DashboardFilter) -> Result<DashboardSummary, ApiError> {
        self.get_json("dashboard", &filter.query_pairs()).await
    }

    async fn department_comparison(&self) -> Result<DepartmentComparison, ApiError> {
        self.get_json("department-comparison", &[]).await
    }

    async fn time_series(&self, filter: &DashboardFilter) -> Result<TimeSeries, ApiError> {
        self.get_json("time-series", &filter.query_pairs()).await
    }

    async fn department_details(&self, department: &str) -> Result<DepartmentDetails, ApiError> {
        let url = self.department_details_url(department)?;
        self.request_json(Method::GET, url, None, Auth::Session).await
    }

    async fn keyword_stats(&self, filter: &DashboardFilter) -> Result<KeywordStats, ApiError> {
        self.get_json("keyword-stats", &filter.query_pairs()).await
    }
}
