use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{CollectionRow, Grade};

/// Longest tolerated invoice overdue age, in days, before a graded path is
/// denied by the ceiling check.
pub const MAX_DUE_DAYS: i64 = 30;

/// Trailing window used when asking the data source for party status.
pub const STATUS_WINDOW_DAYS: i64 = 30;

/// Status assumed when the data source has no transactions for the party.
pub const DEFAULT_PARTY_STATUS: &str = "WATCHFUL";

/// Address placeholder when the data source has no record for the party.
pub const DEFAULT_PARTY_ADDRESS: &str = "NOT FOUND";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GradingSourceError {
    #[error("grading source connection failed: {0}")]
    Connection(String),
    #[error("grading source query failed: {0}")]
    Query(String),
}

/// Raw grading row as supplied by the external financial source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GradingSnapshot {
    pub party_code: String,
    pub all_docs_up: Option<String>,
    pub rating_certificate: Option<String>,
    pub average_collection_ratio: i64,
    pub grade: Option<Grade>,
}

/// Inclusive date range, always derived from an injected "now" so tests and
/// replays are not pinned to the wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        Self { start: now - Duration::days(days), end: now }
    }
}

/// Read access to the external financial system that grades parties.
///
/// Implementations are expected to be remote and fallible; every call maps
/// transport problems into [`GradingSourceError`] rather than panicking.
#[async_trait]
pub trait GradingDataSource: Send + Sync {
    async fn party_grading(
        &self,
        party_code: &str,
    ) -> Result<Option<GradingSnapshot>, GradingSourceError>;

    async fn max_due_days(&self, party_code: &str) -> Result<i64, GradingSourceError>;

    async fn party_status(
        &self,
        party_code: &str,
        window: DateWindow,
    ) -> Result<Option<String>, GradingSourceError>;

    async fn default_address(
        &self,
        party_code: &str,
    ) -> Result<Option<String>, GradingSourceError>;

    async fn collections(
        &self,
        party_code: &str,
    ) -> Result<Vec<CollectionRow>, GradingSourceError>;
}

/// Everything pulled from the grading source for one party, with defaults
/// already applied for missing status and address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradingEnrichment {
    pub snapshot: GradingSnapshot,
    pub overdue_days: i64,
    pub party_status: String,
    pub default_address: String,
    pub collections: Vec<CollectionRow>,
}

pub async fn fetch_enrichment(
    source: &dyn GradingDataSource,
    party_code: &str,
    now: DateTime<Utc>,
) -> Result<GradingEnrichment, GradingSourceError> {
    let snapshot = source
        .party_grading(party_code)
        .await?
        .unwrap_or_else(|| GradingSnapshot { party_code: party_code.to_string(), ..Default::default() });
    let overdue_days = source.max_due_days(party_code).await?;
    let window = DateWindow::trailing_days(now, STATUS_WINDOW_DAYS);
    let party_status = source
        .party_status(party_code, window)
        .await?
        .unwrap_or_else(|| DEFAULT_PARTY_STATUS.to_string());
    let default_address = source
        .default_address(party_code)
        .await?
        .unwrap_or_else(|| DEFAULT_PARTY_ADDRESS.to_string());
    let collections = source.collections(party_code).await?;

    Ok(GradingEnrichment { snapshot, overdue_days, party_status, default_address, collections })
}

/// Derives a letter grade from source signals when none is assigned yet.
///
/// A grade requires the documentation flag, a collection ratio clearing the
/// grade's floor (a negative ratio means no sales in the window and passes),
/// and either a rating certificate in the grade's tier set or a physical
/// security instrument on file.
pub fn derive_grade(
    snapshot: &GradingSnapshot,
    has_security_cheque: bool,
    has_judicial_stamp: bool,
) -> Option<Grade> {
    let docs_up = snapshot
        .all_docs_up
        .as_deref()
        .map(|flag| matches!(flag.trim().to_ascii_uppercase().as_str(), "YES" | "OTHERS"))
        .unwrap_or(false);
    if !docs_up {
        return snapshot.grade;
    }

    let ratio = snapshot.average_collection_ratio;
    let secured = has_security_cheque || has_judicial_stamp;
    let rating = snapshot
        .rating_certificate
        .as_deref()
        .map(|tier| tier.trim().to_ascii_uppercase())
        .unwrap_or_default();

    let tiers_a = ["AAA", "AA", "A"];
    let tiers_b = ["AAA", "AA", "A", "BBB"];
    let tiers_c = ["AAA", "AA", "A", "BBB", "BB"];

    if (ratio >= 100 || ratio < 0) && (tiers_a.contains(&rating.as_str()) || secured) {
        Some(Grade::A)
    } else if (ratio >= 80 || ratio < 0) && (tiers_b.contains(&rating.as_str()) || secured) {
        Some(Grade::B)
    } else if (ratio >= 60 || ratio < 0) && (tiers_c.contains(&rating.as_str()) || secured) {
        Some(Grade::C)
    } else {
        snapshot.grade
    }
}

/// Monetary ceiling per grade. Ceilings strictly decrease with the grade so
/// a weaker grade never unlocks a larger expedited amount.
pub fn ceiling_for(grade: Grade) -> Decimal {
    match grade {
        Grade::A => Decimal::from(500_000),
        Grade::B => Decimal::from(300_000),
        Grade::C => Decimal::from(150_000),
    }
}

/// Ceiling gate for graded paths. The grade path applies only when the
/// proposed total fits under the grade's ceiling and the party either
/// carries a credit balance or is at most [`MAX_DUE_DAYS`] overdue.
pub fn ceiling_allows(
    grade: Grade,
    proposed_total: Decimal,
    closing_balance_sum: Decimal,
    overdue_days: i64,
) -> bool {
    (closing_balance_sum < Decimal::ZERO || overdue_days <= MAX_DUE_DAYS)
        && proposed_total <= ceiling_for(grade)
}

/// Fixture-backed grading source for tests and local runs.
#[derive(Clone, Debug, Default)]
pub struct InMemoryGradingSource {
    snapshots: HashMap<String, GradingSnapshot>,
    due_days: HashMap<String, i64>,
    statuses: HashMap<String, String>,
    addresses: HashMap<String, String>,
    collections: HashMap<String, Vec<CollectionRow>>,
    failure: Option<String>,
}

impl InMemoryGradingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: GradingSnapshot) -> Self {
        self.snapshots.insert(snapshot.party_code.clone(), snapshot);
        self
    }

    pub fn with_due_days(mut self, party_code: &str, days: i64) -> Self {
        self.due_days.insert(party_code.to_string(), days);
        self
    }

    pub fn with_status(mut self, party_code: &str, status: &str) -> Self {
        self.statuses.insert(party_code.to_string(), status.to_string());
        self
    }

    pub fn with_address(mut self, party_code: &str, address: &str) -> Self {
        self.addresses.insert(party_code.to_string(), address.to_string());
        self
    }

    pub fn with_collections(mut self, party_code: &str, rows: Vec<CollectionRow>) -> Self {
        self.collections.insert(party_code.to_string(), rows);
        self
    }

    /// Makes every call fail with a connection error, for exercising the
    /// retry path of callers.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    fn check_failure(&self) -> Result<(), GradingSourceError> {
        match &self.failure {
            Some(message) => Err(GradingSourceError::Connection(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GradingDataSource for InMemoryGradingSource {
    async fn party_grading(
        &self,
        party_code: &str,
    ) -> Result<Option<GradingSnapshot>, GradingSourceError> {
        self.check_failure()?;
        Ok(self.snapshots.get(party_code).cloned())
    }

    async fn max_due_days(&self, party_code: &str) -> Result<i64, GradingSourceError> {
        self.check_failure()?;
        Ok(self.due_days.get(party_code).copied().unwrap_or(0))
    }

    async fn party_status(
        &self,
        party_code: &str,
        _window: DateWindow,
    ) -> Result<Option<String>, GradingSourceError> {
        self.check_failure()?;
        Ok(self.statuses.get(party_code).cloned())
    }

    async fn default_address(
        &self,
        party_code: &str,
    ) -> Result<Option<String>, GradingSourceError> {
        self.check_failure()?;
        Ok(self.addresses.get(party_code).cloned())
    }

    async fn collections(
        &self,
        party_code: &str,
    ) -> Result<Vec<CollectionRow>, GradingSourceError> {
        self.check_failure()?;
        Ok(self.collections.get(party_code).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn snapshot(docs: &str, rating: &str, ratio: i64) -> GradingSnapshot {
        GradingSnapshot {
            party_code: "WITP-1".to_string(),
            all_docs_up: Some(docs.to_string()),
            rating_certificate: Some(rating.to_string()),
            average_collection_ratio: ratio,
            grade: None,
        }
    }

    #[test]
    fn top_tier_with_full_collection_is_grade_a() {
        assert_eq!(derive_grade(&snapshot("YES", "AAA", 100), false, false), Some(Grade::A));
    }

    #[test]
    fn mid_tier_with_partial_collection_is_grade_b() {
        assert_eq!(derive_grade(&snapshot("YES", "BBB", 85), false, false), Some(Grade::B));
    }

    #[test]
    fn low_tier_with_weak_collection_is_grade_c() {
        assert_eq!(derive_grade(&snapshot("others", "BB", 60), false, false), Some(Grade::C));
    }

    #[test]
    fn security_instrument_substitutes_for_rating() {
        assert_eq!(derive_grade(&snapshot("YES", "", 100), true, false), Some(Grade::A));
        assert_eq!(derive_grade(&snapshot("YES", "", 100), false, true), Some(Grade::A));
    }

    #[test]
    fn negative_ratio_passes_every_floor() {
        assert_eq!(derive_grade(&snapshot("YES", "AAA", -5), false, false), Some(Grade::A));
    }

    #[test]
    fn missing_documentation_leaves_grade_unassigned() {
        assert_eq!(derive_grade(&snapshot("NO", "AAA", 100), true, true), None);
    }

    #[test]
    fn unqualified_signals_leave_grade_unassigned() {
        assert_eq!(derive_grade(&snapshot("YES", "B", 50), false, false), None);
    }

    #[test]
    fn ceiling_passes_within_limit_and_fresh_dues() {
        assert!(ceiling_allows(Grade::A, Decimal::from(500_000), Decimal::from(10), 30));
    }

    #[test]
    fn ceiling_rejects_amount_above_grade_limit() {
        assert!(!ceiling_allows(Grade::A, Decimal::from(500_001), Decimal::from(-10), 0));
        assert!(!ceiling_allows(Grade::B, Decimal::from(300_001), Decimal::from(-10), 0));
        assert!(!ceiling_allows(Grade::C, Decimal::from(150_001), Decimal::from(-10), 0));
    }

    #[test]
    fn stale_dues_pass_only_with_credit_balance() {
        assert!(!ceiling_allows(Grade::B, Decimal::from(1_000), Decimal::from(5), 45));
        assert!(ceiling_allows(Grade::B, Decimal::from(1_000), Decimal::from(-5), 45));
    }

    #[tokio::test]
    async fn enrichment_applies_defaults_for_unknown_party() {
        let source = InMemoryGradingSource::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let enrichment = fetch_enrichment(&source, "WITP-404", now).await.unwrap();
        assert_eq!(enrichment.party_status, DEFAULT_PARTY_STATUS);
        assert_eq!(enrichment.default_address, DEFAULT_PARTY_ADDRESS);
        assert_eq!(enrichment.overdue_days, 0);
        assert!(enrichment.collections.is_empty());
    }

    #[test]
    fn trailing_window_spans_requested_days() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = DateWindow::trailing_days(now, STATUS_WINDOW_DAYS);
        assert_eq!(window.end - window.start, Duration::days(30));
    }
}
