pub mod grading;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{ApprovalCatalog, CatalogError};
use crate::domain::{
    ChainNode, Grade, PartyCategory, PartyDetail, ProcessCode, Subject, SubjectDetail, SubjectId,
};
use grading::{
    ceiling_allows, derive_grade, fetch_enrichment, GradingDataSource, GradingEnrichment,
    GradingSourceError,
};

pub const PROCESS_NEW_CODE_ALL_OK: &str = "new_code_all_ok";
pub const PROCESS_NEW_CODE_PARTIAL_OK: &str = "new_code_partial_ok";
pub const PROCESS_EXISTING_PARTY: &str = "existing_party";
pub const PROCESS_GRADE_A: &str = "revise_credit_limit_a";
pub const PROCESS_GRADE_B: &str = "revise_credit_limit_b";
pub const PROCESS_GRADE_C: &str = "revise_credit_limit_c";
pub const PROCESS_NON_CATEGORIZED: &str = "non_categorized";

/// Ordinal and stage stamped onto a prior party version when its successor
/// enters the existing-party flow.
pub const LINEAGE_HISTORY_STEP: i32 = 2;
pub const LINEAGE_HISTORY_STAGE: &str = "incharge";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Grading(#[from] GradingSourceError),
    #[error("subject `{0}` is on the existing-party flow but has no linked prior version")]
    MissingLineage(SubjectId),
}

/// Mutation the caller must apply alongside the resolved chain. Resolution
/// itself never writes; the engine turns these into store updates in the
/// same transaction as the chain replacement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResolutionEffect {
    /// Stamp the prior version's history ordinal and stage.
    TagPriorHistory { prior: SubjectId, history_step: i32, history_stage: String },
    /// Persist the grade and enrichment pulled from the grading source.
    ApplyEnrichment { grade: Option<Grade>, enrichment: GradingEnrichment },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub process: ProcessCode,
    pub chain: Vec<ChainNode>,
    pub effects: Vec<ResolutionEffect>,
}

/// Selects the approval process for a subject and materializes its chain.
///
/// Party subjects branch on documentation completeness, credit limits
/// branch on the letter grade and a monetary ceiling, and everything else
/// resolves its already-assigned process directly.
pub struct PathResolver {
    grading: std::sync::Arc<dyn GradingDataSource>,
}

impl PathResolver {
    pub fn new(grading: std::sync::Arc<dyn GradingDataSource>) -> Self {
        Self { grading }
    }

    pub async fn resolve(
        &self,
        catalog: &ApprovalCatalog,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPath, ResolveError> {
        match &subject.detail {
            SubjectDetail::Party(detail) => self.resolve_party(catalog, subject, detail),
            SubjectDetail::CreditLimit(_) => self.resolve_credit_limit(catalog, subject, now).await,
            SubjectDetail::ShipLocation => self.resolve_direct(catalog, subject),
        }
    }

    fn resolve_direct(
        &self,
        catalog: &ApprovalCatalog,
        subject: &Subject,
    ) -> Result<ResolvedPath, ResolveError> {
        let chain = catalog.ordered_chain(&subject.system, &subject.process)?;
        Ok(ResolvedPath { process: subject.process.clone(), chain, effects: Vec::new() })
    }

    fn resolve_party(
        &self,
        catalog: &ApprovalCatalog,
        subject: &Subject,
        detail: &PartyDetail,
    ) -> Result<ResolvedPath, ResolveError> {
        if subject.process.0 == PROCESS_EXISTING_PARTY {
            let prior = subject
                .lineage
                .ok_or(ResolveError::MissingLineage(subject.id))?;
            info!(subject = %subject.id, %prior, "resolving existing-party path");
            let chain = catalog.ordered_chain(&subject.system, &subject.process)?;
            return Ok(ResolvedPath {
                process: subject.process.clone(),
                chain,
                effects: vec![ResolutionEffect::TagPriorHistory {
                    prior,
                    history_step: LINEAGE_HISTORY_STEP,
                    history_stage: LINEAGE_HISTORY_STAGE.to_string(),
                }],
            });
        }

        let process = if has_all_required_docs(detail) {
            info!(subject = %subject.id, "resolving all-ok path");
            ProcessCode(PROCESS_NEW_CODE_ALL_OK.to_string())
        } else {
            info!(subject = %subject.id, "resolving partial-ok path");
            ProcessCode(PROCESS_NEW_CODE_PARTIAL_OK.to_string())
        };

        let chain = catalog.ordered_chain(&subject.system, &process)?;
        Ok(ResolvedPath { process, chain, effects: Vec::new() })
    }

    async fn resolve_credit_limit(
        &self,
        catalog: &ApprovalCatalog,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPath, ResolveError> {
        let SubjectDetail::CreditLimit(detail) = &subject.detail else {
            return self.resolve_direct(catalog, subject);
        };

        let enrichment =
            fetch_enrichment(self.grading.as_ref(), &detail.party_code, now).await?;

        let grade = match detail.grade {
            Some(existing) => Some(existing),
            None => derive_grade(
                &enrichment.snapshot,
                detail.security_cheque,
                detail.judicial_stamp,
            ),
        };

        let closing_balance_sum: rust_decimal::Decimal =
            enrichment.collections.iter().map(|row| row.closing_balance).sum();
        let proposed_total = detail.proposed_total();

        let process = match grade {
            Some(g)
                if ceiling_allows(g, proposed_total, closing_balance_sum, enrichment.overdue_days) =>
            {
                info!(subject = %subject.id, grade = ?g, "resolving graded credit path");
                ProcessCode(grade_process(g).to_string())
            }
            _ => {
                debug!(
                    subject = %subject.id,
                    grade = ?grade,
                    %proposed_total,
                    "ceiling or grade unmet, resolving non-categorized path"
                );
                ProcessCode(PROCESS_NON_CATEGORIZED.to_string())
            }
        };

        let chain = catalog.ordered_chain(&subject.system, &process)?;
        Ok(ResolvedPath {
            process,
            chain,
            effects: vec![ResolutionEffect::ApplyEnrichment { grade, enrichment }],
        })
    }
}

fn grade_process(grade: Grade) -> &'static str {
    match grade {
        Grade::A => PROCESS_GRADE_A,
        Grade::B => PROCESS_GRADE_B,
        Grade::C => PROCESS_GRADE_C,
    }
}

/// Documentation completeness per party category. Each category names its
/// own required attachments; contacts must all carry a phone number
/// wherever contacts are part of the requirement.
pub fn has_all_required_docs(detail: &PartyDetail) -> bool {
    let docs = &detail.documents;
    let contacts_ok = detail.contacts.iter().all(|contact| contact.has_phone);
    let identity_ok = docs.trade_license
        && docs.trade_license_file
        && docs.bin_number
        && docs.bin_number_file
        && docs.tin_number
        && docs.tin_number_file;

    match detail.category {
        PartyCategory::GeneralCorporate | PartyCategory::Pcb => {
            identity_ok && docs.mou_file && contacts_ok && docs.authorization_letter
        }
        PartyCategory::Finance => {
            identity_ok
                && docs.mou_file
                && contacts_ok
                && docs.authorization_letter
                && docs.rating_certificate
        }
        PartyCategory::Education => {
            docs.bin_number
                && docs.bin_number_file
                && docs.tin_number
                && docs.tin_number_file
                && contacts_ok
                && docs.authorization_letter
        }
        PartyCategory::Government => docs.mou_file && contacts_ok,
        PartyCategory::Uncategorized => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::grading::{GradingSnapshot, InMemoryGradingSource};
    use super::*;
    use crate::domain::{
        ApprovalProcess, ApprovalStep, ApprovalSystem, ApproverBinding, BindingId, CollectionRow,
        Contact, CreditLimitDetail, LifecycleStatus, PartyDocuments, StepId, SubjectId,
        SystemCode,
    };

    fn catalog_with(processes: &[(&str, &[&str])]) -> ApprovalCatalog {
        let system = ApprovalSystem {
            code: SystemCode("scm".to_string()),
            display_name: "Supply Chain".to_string(),
            description: None,
        };
        let mut process_rows = Vec::new();
        let mut steps = Vec::new();
        let mut bindings = Vec::new();
        for (process, codenames) in processes {
            process_rows.push(ApprovalProcess {
                code: ProcessCode(process.to_string()),
                display_name: process.to_string(),
                system: SystemCode("scm".to_string()),
            });
            for (idx, codename) in codenames.iter().enumerate() {
                let step_id = format!("{process}-{codename}");
                steps.push(ApprovalStep {
                    id: StepId(step_id.clone()),
                    system: SystemCode("scm".to_string()),
                    process: ProcessCode(process.to_string()),
                    codename: codename.to_string(),
                    forward_step: idx as i32 + 1,
                    backward_step: idx as i32,
                    remarks: None,
                    created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                });
                bindings.push(ApproverBinding {
                    id: BindingId(format!("b-{step_id}")),
                    step_id: StepId(step_id),
                    user_id: format!("u-{codename}"),
                    is_active: true,
                    created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                });
            }
        }
        ApprovalCatalog::new(vec![system], process_rows, steps, bindings).unwrap()
    }

    fn party_catalog() -> ApprovalCatalog {
        catalog_with(&[
            (PROCESS_NEW_CODE_ALL_OK, &["incharge", "dhos"]),
            (PROCESS_NEW_CODE_PARTIAL_OK, &["incharge", "dhos", "cbo"]),
            (PROCESS_EXISTING_PARTY, &["incharge"]),
        ])
    }

    fn credit_catalog() -> ApprovalCatalog {
        catalog_with(&[
            (PROCESS_GRADE_A, &["credit_monitoring", "cbo"]),
            (PROCESS_GRADE_B, &["credit_monitoring", "cbo", "amd"]),
            (PROCESS_GRADE_C, &["credit_monitoring", "cbo", "amd", "chairman"]),
            (PROCESS_NON_CATEGORIZED, &["credit_monitoring", "cbo", "amd", "chairman", "ebs"]),
        ])
    }

    fn full_documents() -> PartyDocuments {
        PartyDocuments {
            trade_license: true,
            trade_license_file: true,
            bin_number: true,
            bin_number_file: true,
            tin_number: true,
            tin_number_file: true,
            mou_file: true,
            authorization_letter: true,
            rating_certificate: true,
        }
    }

    fn party_subject(process: &str, detail: PartyDetail) -> Subject {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Subject {
            id: SubjectId(Uuid::new_v4()),
            system: SystemCode("scm".to_string()),
            process: ProcessCode(process.to_string()),
            status: LifecycleStatus::Draft,
            stage: None,
            lineage: None,
            history_step: None,
            history_stage: None,
            stepper_index: 0,
            detail: SubjectDetail::Party(detail),
            created_at: now,
            updated_at: now,
        }
    }

    fn credit_subject(detail: CreditLimitDetail) -> Subject {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Subject {
            id: SubjectId(Uuid::new_v4()),
            system: SystemCode("scm".to_string()),
            process: ProcessCode(PROCESS_NON_CATEGORIZED.to_string()),
            status: LifecycleStatus::Draft,
            stage: None,
            lineage: None,
            history_step: None,
            history_stage: None,
            stepper_index: 0,
            detail: SubjectDetail::CreditLimit(detail),
            created_at: now,
            updated_at: now,
        }
    }

    fn credit_detail(grade: Option<Grade>, total: i64) -> CreditLimitDetail {
        CreditLimitDetail {
            party_code: "WITP-1".to_string(),
            grade,
            proposed_limit_wcl: Decimal::from(total),
            proposed_limit_wdc: Decimal::ZERO,
            security_cheque: false,
            judicial_stamp: false,
            overdue_days: 0,
            party_status: None,
            default_address: None,
            collections: Vec::new(),
            info_pulled: false,
        }
    }

    fn resolver() -> PathResolver {
        PathResolver::new(Arc::new(InMemoryGradingSource::new()))
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn complete_documents_resolve_all_ok_path() {
        let detail = PartyDetail {
            category: PartyCategory::GeneralCorporate,
            documents: full_documents(),
            contacts: vec![Contact { id: Uuid::new_v4(), has_phone: true, is_existing: false }],
        };
        let subject = party_subject("new_code", detail);

        let path = resolver().resolve(&party_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_NEW_CODE_ALL_OK);
        assert_eq!(path.chain.len(), 2);
        assert!(path.effects.is_empty());
    }

    #[tokio::test]
    async fn missing_attachment_resolves_partial_ok_path() {
        let mut documents = full_documents();
        documents.mou_file = false;
        let detail = PartyDetail {
            category: PartyCategory::GeneralCorporate,
            documents,
            contacts: Vec::new(),
        };
        let subject = party_subject("new_code", detail);

        let path = resolver().resolve(&party_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_NEW_CODE_PARTIAL_OK);
        assert_eq!(path.chain.len(), 3);
    }

    #[tokio::test]
    async fn phoneless_contact_downgrades_to_partial_ok() {
        let detail = PartyDetail {
            category: PartyCategory::Government,
            documents: full_documents(),
            contacts: vec![Contact { id: Uuid::new_v4(), has_phone: false, is_existing: false }],
        };
        let subject = party_subject("new_code", detail);

        let path = resolver().resolve(&party_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_NEW_CODE_PARTIAL_OK);
    }

    #[tokio::test]
    async fn existing_party_resolves_own_process_and_tags_prior() {
        let detail = PartyDetail {
            category: PartyCategory::Uncategorized,
            documents: full_documents(),
            contacts: Vec::new(),
        };
        let prior = SubjectId(Uuid::new_v4());
        let mut subject = party_subject(PROCESS_EXISTING_PARTY, detail);
        subject.lineage = Some(prior);

        let path = resolver().resolve(&party_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_EXISTING_PARTY);
        assert_eq!(
            path.effects,
            vec![ResolutionEffect::TagPriorHistory {
                prior,
                history_step: LINEAGE_HISTORY_STEP,
                history_stage: LINEAGE_HISTORY_STAGE.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn existing_party_without_lineage_is_an_error() {
        let detail = PartyDetail {
            category: PartyCategory::Uncategorized,
            documents: full_documents(),
            contacts: Vec::new(),
        };
        let subject = party_subject(PROCESS_EXISTING_PARTY, detail);

        let err = resolver().resolve(&party_catalog(), &subject, now()).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingLineage(_)));
    }

    #[tokio::test]
    async fn preassigned_grade_within_ceiling_uses_grade_path() {
        let subject = credit_subject(credit_detail(Some(Grade::B), 200_000));

        let path = resolver().resolve(&credit_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_GRADE_B);
    }

    #[tokio::test]
    async fn grade_over_ceiling_falls_back_to_non_categorized() {
        let subject = credit_subject(credit_detail(Some(Grade::A), 600_000));

        let path = resolver().resolve(&credit_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_NON_CATEGORIZED);
        assert_eq!(path.chain.len(), 5);
    }

    #[tokio::test]
    async fn derived_grade_routes_graded_path() {
        let source = InMemoryGradingSource::new().with_snapshot(GradingSnapshot {
            party_code: "WITP-1".to_string(),
            all_docs_up: Some("YES".to_string()),
            rating_certificate: Some("AAA".to_string()),
            average_collection_ratio: 120,
            grade: None,
        });
        let resolver = PathResolver::new(Arc::new(source));
        let subject = credit_subject(credit_detail(None, 100_000));

        let path = resolver.resolve(&credit_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_GRADE_A);
        assert!(matches!(
            path.effects.as_slice(),
            [ResolutionEffect::ApplyEnrichment { grade: Some(Grade::A), .. }]
        ));
    }

    #[tokio::test]
    async fn stale_dues_with_positive_balance_fall_back() {
        let source = InMemoryGradingSource::new()
            .with_due_days("WITP-1", 45)
            .with_collections(
                "WITP-1",
                vec![CollectionRow {
                    period: "2024-05".to_string(),
                    closing_balance: Decimal::from(10_000),
                    collection_amount: Decimal::ZERO,
                }],
            );
        let resolver = PathResolver::new(Arc::new(source));
        let subject = credit_subject(credit_detail(Some(Grade::A), 100_000));

        let path = resolver.resolve(&credit_catalog(), &subject, now()).await.unwrap();
        assert_eq!(path.process.0, PROCESS_NON_CATEGORIZED);
    }
}
