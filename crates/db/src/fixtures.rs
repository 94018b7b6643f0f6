use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Canonical catalog seeds and verification contract for the stock
/// approval processes.
const SEED_PROCESSES: &[SeedProcessContract] = &[
    SeedProcessContract {
        process_code: "new_code_all_ok",
        step_count: 4,
        first_codename: "incharge",
        last_codename: "cbo",
        description: "New party with every required document present",
    },
    SeedProcessContract {
        process_code: "new_code_partial_ok",
        step_count: 5,
        first_codename: "incharge",
        last_codename: "amd",
        description: "New party with gaps in the document set",
    },
    SeedProcessContract {
        process_code: "existing_party",
        step_count: 2,
        first_codename: "incharge",
        last_codename: "dhos",
        description: "Revision of an already-approved party",
    },
    SeedProcessContract {
        process_code: "revise_credit_limit_a",
        step_count: 4,
        first_codename: "incharge",
        last_codename: "cbo",
        description: "Credit limit revision, grade A",
    },
    SeedProcessContract {
        process_code: "revise_credit_limit_b",
        step_count: 5,
        first_codename: "incharge",
        last_codename: "amd",
        description: "Credit limit revision, grade B",
    },
    SeedProcessContract {
        process_code: "revise_credit_limit_c",
        step_count: 6,
        first_codename: "incharge",
        last_codename: "chairman",
        description: "Credit limit revision, grade C",
    },
    SeedProcessContract {
        process_code: "non_categorized",
        step_count: 7,
        first_codename: "incharge",
        last_codename: "ebs",
        description: "Credit limit revision outside the grade ceilings",
    },
    SeedProcessContract {
        process_code: "ship_location_change",
        step_count: 2,
        first_codename: "incharge",
        last_codename: "logistics",
        description: "Ship-to location change",
    },
];

const SEED_SYSTEM_CODE: &str = "scm";

/// Deterministic catalog seed for demos and end-to-end tests: one system,
/// the stock processes, their step ladders, and an active binding per step.
pub struct CatalogSeedDataset;

impl CatalogSeedDataset {
    /// SQL fixture content for the catalog seed.
    pub const SQL: &str = include_str!("../../../config/fixtures/workflow_seed_data.sql");

    /// Load the catalog seed into the database. Idempotent.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let processes_seeded = SEED_PROCESSES
            .iter()
            .map(|process| ProcessSeedInfo {
                process_code: process.process_code,
                step_count: process.step_count,
                description: process.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { processes_seeded })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let system_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM approval_system WHERE code = ?1)")
                .bind(SEED_SYSTEM_CODE)
                .fetch_one(pool)
                .await?;
        checks.push(("system", system_exists == 1));

        for process in SEED_PROCESSES {
            let step_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_step WHERE system_code = ?1 AND process_code = ?2",
            )
            .bind(SEED_SYSTEM_CODE)
            .bind(process.process_code)
            .fetch_one(pool)
            .await?;
            checks.push((process.process_code, step_count == process.step_count));

            let ladder: Vec<String> = sqlx::query_scalar(
                "SELECT codename FROM approval_step
                 WHERE system_code = ?1 AND process_code = ?2
                 ORDER BY forward_step, created_at",
            )
            .bind(SEED_SYSTEM_CODE)
            .bind(process.process_code)
            .fetch_all(pool)
            .await?;
            let endpoints_ok = ladder.first().map(String::as_str)
                == Some(process.first_codename)
                && ladder.last().map(String::as_str) == Some(process.last_codename);
            checks.push((process.ladder_label(), endpoints_ok));

            // Every seeded step carries exactly one active binding.
            let unbound_steps: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_step s
                 WHERE s.system_code = ?1 AND s.process_code = ?2
                   AND (SELECT COUNT(1) FROM approver_binding b
                        WHERE b.step_id = s.id AND b.is_active = 1) != 1",
            )
            .bind(SEED_SYSTEM_CODE)
            .bind(process.process_code)
            .fetch_one(pool)
            .await?;
            checks.push((process.bindings_label(), unbound_steps == 0));
        }

        let inactive_bindings: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM approver_binding WHERE is_active = 0")
                .fetch_one(pool)
                .await?;
        checks.push(("inactive-binding", inactive_bindings >= 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Clean up seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            "DELETE FROM approver_binding WHERE step_id IN
                 (SELECT id FROM approval_step WHERE system_code = ?1)",
        )
        .bind(SEED_SYSTEM_CODE)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM approval_step WHERE system_code = ?1")
            .bind(SEED_SYSTEM_CODE)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approval_process WHERE system_code = ?1")
            .bind(SEED_SYSTEM_CODE)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approval_system WHERE code = ?1")
            .bind(SEED_SYSTEM_CODE)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedProcessContract {
    process_code: &'static str,
    step_count: i64,
    first_codename: &'static str,
    last_codename: &'static str,
    description: &'static str,
}

impl SeedProcessContract {
    fn ladder_label(&self) -> &'static str {
        match self.process_code {
            "new_code_all_ok" => "new_code_all_ok-ladder",
            "new_code_partial_ok" => "new_code_partial_ok-ladder",
            "existing_party" => "existing_party-ladder",
            "revise_credit_limit_a" => "revise_credit_limit_a-ladder",
            "revise_credit_limit_b" => "revise_credit_limit_b-ladder",
            "revise_credit_limit_c" => "revise_credit_limit_c-ladder",
            "non_categorized" => "non_categorized-ladder",
            _ => "ship_location_change-ladder",
        }
    }

    fn bindings_label(&self) -> &'static str {
        match self.process_code {
            "new_code_all_ok" => "new_code_all_ok-bindings",
            "new_code_partial_ok" => "new_code_partial_ok-bindings",
            "existing_party" => "existing_party-bindings",
            "revise_credit_limit_a" => "revise_credit_limit_a-bindings",
            "revise_credit_limit_b" => "revise_credit_limit_b-bindings",
            "revise_credit_limit_c" => "revise_credit_limit_c-bindings",
            "non_categorized" => "non_categorized-bindings",
            _ => "ship_location_change-bindings",
        }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub processes_seeded: Vec<ProcessSeedInfo>,
}

#[derive(Debug)]
pub struct ProcessSeedInfo {
    pub process_code: &'static str,
    pub step_count: i64,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
