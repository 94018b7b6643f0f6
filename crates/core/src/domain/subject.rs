use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{ProcessCode, SystemCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Closed set of subject kinds the engine routes. Dispatch is explicit
/// (enum + handler registry), never reflective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Party,
    CreditLimit,
    ShipLocation,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Party => "party",
            Self::CreditLimit => "credit_limit",
            Self::ShipLocation => "ship_location",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "party" => Some(Self::Party),
            "credit_limit" => Some(Self::CreditLimit),
            "ship_location" => Some(Self::ShipLocation),
            _ => None,
        }
    }
}

/// Polymorphic subject reference: kind discriminator plus UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: SubjectId,
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Shared lifecycle status enum, used for both subjects and queue entries.
/// The queue only actively sets pending/approved/rejected; the remaining
/// values are subject-level states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Init,
    Draft,
    Submitted,
    Pending,
    Processing,
    Approved,
    Rejected,
    Archived,
    NotRequired,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
            Self::NotRequired => "not_required",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init" => Some(Self::Init),
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            "not_required" => Some(Self::NotRequired),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyCategory {
    GeneralCorporate,
    Government,
    Pcb,
    Education,
    Finance,
    Uncategorized,
}

impl PartyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralCorporate => "general_corporate",
            Self::Government => "government",
            Self::Pcb => "pcb",
            Self::Education => "education",
            Self::Finance => "finance",
            Self::Uncategorized => "uncategorized",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "general_corporate" => Some(Self::GeneralCorporate),
            "government" => Some(Self::Government),
            "pcb" => Some(Self::Pcb),
            "education" => Some(Self::Education),
            "finance" => Some(Self::Finance),
            "uncategorized" => Some(Self::Uncategorized),
            _ => None,
        }
    }
}

/// Presence flags for the documents the resolver's required-set checks
/// inspect. The engine never reads document contents, only presence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDocuments {
    pub trade_license: bool,
    pub trade_license_file: bool,
    pub bin_number: bool,
    pub bin_number_file: bool,
    pub tin_number: bool,
    pub tin_number_file: bool,
    pub mou_file: bool,
    pub authorization_letter: bool,
    pub rating_certificate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub has_phone: bool,
    pub is_existing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDetail {
    pub category: PartyCategory,
    pub documents: PartyDocuments,
    pub contacts: Vec<Contact>,
}

/// One row of the external collection history, replaced wholesale on each
/// grading fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRow {
    pub period: String,
    pub closing_balance: Decimal,
    pub collection_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLimitDetail {
    /// External business code keying the grading source lookup.
    pub party_code: String,
    pub grade: Option<Grade>,
    pub proposed_limit_wcl: Decimal,
    pub proposed_limit_wdc: Decimal,
    pub security_cheque: bool,
    pub judicial_stamp: bool,
    pub overdue_days: i64,
    pub party_status: Option<String>,
    pub default_address: Option<String>,
    pub collections: Vec<CollectionRow>,
    /// Set once the external grading fetch has landed; submit defers to the
    /// grading task until then.
    pub info_pulled: bool,
}

impl CreditLimitDetail {
    pub fn proposed_total(&self) -> Decimal {
        self.proposed_limit_wcl + self.proposed_limit_wdc
    }

    pub fn closing_balance_sum(&self) -> Decimal {
        self.collections.iter().map(|row| row.closing_balance).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectDetail {
    Party(PartyDetail),
    CreditLimit(CreditLimitDetail),
    ShipLocation,
}

impl SubjectDetail {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::Party(_) => SubjectKind::Party,
            Self::CreditLimit(_) => SubjectKind::CreditLimit,
            Self::ShipLocation => SubjectKind::ShipLocation,
        }
    }
}

/// The engine-visible slice of a routed business record. Anything beyond
/// these fields belongs to the surrounding application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub system: SystemCode,
    pub process: ProcessCode,
    pub status: LifecycleStatus,
    /// Current step codename, or a terminal value once the chain closes.
    pub stage: Option<String>,
    /// Lineage pointer chaining a re-submitted instance to the prior
    /// approved version it supersedes.
    pub lineage: Option<SubjectId>,
    pub history_step: Option<i32>,
    pub history_stage: Option<String>,
    pub stepper_index: i32,
    pub detail: SubjectDetail,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        self.detail.kind()
    }

    pub fn subject_ref(&self) -> SubjectRef {
        SubjectRef { kind: self.kind(), id: self.id }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        CollectionRow, CreditLimitDetail, Grade, LifecycleStatus, PartyCategory, SubjectKind,
    };

    #[test]
    fn lifecycle_status_round_trips_through_strings() {
        for status in [
            LifecycleStatus::Init,
            LifecycleStatus::Draft,
            LifecycleStatus::Submitted,
            LifecycleStatus::Pending,
            LifecycleStatus::Processing,
            LifecycleStatus::Approved,
            LifecycleStatus::Rejected,
            LifecycleStatus::Archived,
            LifecycleStatus::NotRequired,
        ] {
            assert_eq!(LifecycleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LifecycleStatus::parse("unknown"), None);
    }

    #[test]
    fn subject_kind_and_category_parse_known_tags_only() {
        assert_eq!(SubjectKind::parse("credit_limit"), Some(SubjectKind::CreditLimit));
        assert_eq!(SubjectKind::parse("invoice"), None);
        assert_eq!(PartyCategory::parse("finance"), Some(PartyCategory::Finance));
        assert_eq!(PartyCategory::parse("charity"), None);
    }

    #[test]
    fn grade_parse_is_case_insensitive_and_strict() {
        assert_eq!(Grade::parse(" a "), Some(Grade::A));
        assert_eq!(Grade::parse("D"), None);
        assert_eq!(Grade::parse(""), None);
    }

    #[test]
    fn credit_detail_sums_proposed_limits_and_closing_balances() {
        let detail = CreditLimitDetail {
            party_code: "W-1001".to_string(),
            grade: None,
            proposed_limit_wcl: Decimal::new(120_000, 0),
            proposed_limit_wdc: Decimal::new(80_000, 0),
            security_cheque: false,
            judicial_stamp: false,
            overdue_days: 0,
            party_status: None,
            default_address: None,
            collections: vec![
                CollectionRow {
                    period: "2026-06".to_string(),
                    closing_balance: Decimal::new(-500, 0),
                    collection_amount: Decimal::new(900, 0),
                },
                CollectionRow {
                    period: "2026-07".to_string(),
                    closing_balance: Decimal::new(200, 0),
                    collection_amount: Decimal::new(400, 0),
                },
            ],
            info_pulled: true,
        };

        assert_eq!(detail.proposed_total(), Decimal::new(200_000, 0));
        assert_eq!(detail.closing_balance_sum(), Decimal::new(-300, 0));
    }
}
