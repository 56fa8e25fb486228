//! Mock data service.
//!
//! Serves fixed and randomly generated dashboard payloads so views can run
//! without a backend (`useMockData` in the config). Random values stay in
//! the same ranges the live service reports.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};

use crate::api::DashboardSource;
use crate::error::ApiError;
use crate::types::{
    DashboardFilter, DashboardSummary, DepartmentComparison, DepartmentDetails, DepartmentRisk,
    DepartmentScore, DepartmentWellbeing, KeywordCount, KeywordOccurrence, KeywordStats, MoodAverages,
    MoodData, MoodWeek, NamedCount, OverviewData, RiskLevel, TimeSeries, TimeSeriesPoint, Trend,
    WellbeingPoint,
};

const DEPARTMENTS: [&str; 4] = ["Engineering", "Sales", "Marketing", "HR"];

/// Length of the generated wellbeing trend.
pub const WELLBEING_TREND_DAYS: usize = 28;

/// Range used when a time-series filter leaves the dates open.
const DEFAULT_SERIES_DAYS: u64 = 30;

fn random_decimal(min: f64, max: f64) -> f64 {
    let value = min + rand::random::<f64>() * (max - min);
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct MockDashboardSource {
    latency: Duration,
}

impl MockDashboardSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, to exercise loading states.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Headline numbers for the overview page.
    pub fn overview(&self) -> OverviewData {
        let keyword_occurrences: BTreeMap<String, KeywordOccurrence> = [
            ("stress", 45, "+12%"),
            ("anxiety", 32, "+5%"),
            ("workload", 28, "-3%"),
            ("burnout", 25, "+8%"),
            ("depression", 20, "-2%"),
        ]
        .into_iter()
        .map(|(keyword, count, trend)| {
            (
                keyword.to_string(),
                KeywordOccurrence {
                    count,
                    trend: trend.to_string(),
                },
            )
        })
        .collect();

        let departments = [
            ("Engineering", 120, RiskLevel::Medium),
            ("Sales", 85, RiskLevel::Low),
            ("Marketing", 45, RiskLevel::High),
            ("HR", 30, RiskLevel::Low),
        ]
        .into_iter()
        .map(|(name, count, risk_level)| DepartmentRisk {
            name: name.to_string(),
            count,
            risk_level,
        })
        .collect();

        OverviewData {
            total_employees: 2850,
            at_risk_departments: 2,
            mental_health_score: 7.4,
            keyword_occurrences,
            departments,
        }
    }

    /// Four weeks of mood scores with current and previous period averages.
    pub fn mood_data(&self) -> MoodData {
        let weeks = (1..=4)
            .map(|week| MoodWeek {
                label: format!("Week {}", week),
                anxiety: random_decimal(30.0, 60.0),
                depression: random_decimal(20.0, 40.0),
                stress: random_decimal(40.0, 70.0),
                wellbeing: random_decimal(60.0, 80.0),
            })
            .collect();

        let averages = || MoodAverages {
            anxiety: random_decimal(35.0, 45.0),
            depression: random_decimal(20.0, 30.0),
            stress: random_decimal(45.0, 65.0),
            wellbeing: random_decimal(65.0, 75.0),
        };

        MoodData {
            weeks,
            current: averages(),
            previous: averages(),
        }
    }

    pub fn department_wellbeing(&self) -> Vec<DepartmentWellbeing> {
        DEPARTMENTS
            .iter()
            .map(|name| DepartmentWellbeing {
                name: name.to_string(),
                wellbeing_score: random_decimal(7.0, 8.0),
                engagement_rate: rand::random_range(75..=90),
                critical_cases: None,
            })
            .collect()
    }

    /// Daily wellbeing score over the last 28 days.
    pub fn wellbeing_trend(&self) -> Vec<WellbeingPoint> {
        (1..=WELLBEING_TREND_DAYS)
            .map(|day| WellbeingPoint {
                label: format!("Day {}", day),
                score: random_decimal(7.0, 8.0),
            })
            .collect()
    }

    fn keywords() -> Vec<KeywordCount> {
        [("stress", 45), ("anxiety", 32), ("workload", 28), ("burnout", 25), ("depression", 20)]
            .into_iter()
            .map(|(keyword, count)| KeywordCount {
                keyword: keyword.to_string(),
                count,
            })
            .collect()
    }
}

/// Inclusive date range for a series; open ends default to the last 30 days.
fn series_range(filter: &DashboardFilter) -> (NaiveDate, NaiveDate) {
    let end = filter.end_date.unwrap_or_else(|| Utc::now().date_naive());
    let start = filter.start_date.unwrap_or_else(|| {
        end.checked_sub_days(Days::new(DEFAULT_SERIES_DAYS - 1))
            .unwrap_or(end)
    });
    (start, end)
}

#[async_trait]
impl DashboardSource for MockDashboardSource {
    async fn dashboard(&self, filter: &DashboardFilter) -> Result<DashboardSummary, ApiError> {
        self.simulate_latency().await;
        let departments = DEPARTMENTS
            .iter()
            .zip([120, 85, 45, 30])
            .filter(|(name, _)| filter.department.as_deref().map_or(true, |d| d == **name))
            .map(|(name, count)| NamedCount {
                name: name.to_string(),
                count,
            })
            .collect();

        Ok(DashboardSummary {
            sentiment_score: 74,
            trend: Trend::Stable,
            risk_level: RiskLevel::Medium,
            mental_health_score: 74,
            departments,
            locations: vec![
                NamedCount {
                    name: "Bengaluru".to_string(),
                    count: 160,
                },
                NamedCount {
                    name: "Mumbai".to_string(),
                    count: 120,
                },
            ],
        })
    }

    async fn department_comparison(&self) -> Result<DepartmentComparison, ApiError> {
        self.simulate_latency().await;
        let departments = [
            ("Engineering", 72, Trend::Up, RiskLevel::Medium),
            ("Sales", 68, Trend::Down, RiskLevel::Low),
            ("Marketing", 75, Trend::Stable, RiskLevel::High),
            ("HR", 78, Trend::Up, RiskLevel::Low),
        ]
        .into_iter()
        .map(|(name, sentiment_score, trend, risk_level)| DepartmentScore {
            name: name.to_string(),
            sentiment_score,
            trend,
            risk_level,
        })
        .collect();
        Ok(DepartmentComparison { departments })
    }

    async fn time_series(&self, filter: &DashboardFilter) -> Result<TimeSeries, ApiError> {
        self.simulate_latency().await;
        let (start, end) = series_range(filter);
        let time_series = start
            .iter_days()
            .take_while(|date| *date <= end)
            .map(|date| TimeSeriesPoint {
                date,
                sentiment_score: rand::random_range(60..=80),
                message_count: rand::random_range(30..50),
            })
            .collect();
        Ok(TimeSeries { time_series })
    }

    async fn department_details(&self, department: &str) -> Result<DepartmentDetails, ApiError> {
        self.simulate_latency().await;
        let Some(index) = DEPARTMENTS.iter().position(|d| *d == department) else {
            return Err(ApiError::Status {
                status: 404,
                message: format!("Department '{}' not found", department),
                body: None,
            });
        };

        Ok(DepartmentDetails {
            name: department.to_string(),
            sentiment_score: rand::random_range(60..=80),
            trend: Trend::Stable,
            risk_level: if index == 2 { RiskLevel::High } else { RiskLevel::Low },
            employee_count: [120, 85, 45, 30][index],
            top_keywords: Self::keywords().into_iter().take(3).collect(),
        })
    }

    async fn keyword_stats(&self, _filter: &DashboardFilter) -> Result<KeywordStats, ApiError> {
        self.simulate_latency().await;
        Ok(KeywordStats {
            keywords: Self::keywords(),
        })
    }
}
