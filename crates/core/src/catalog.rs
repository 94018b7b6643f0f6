use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    ApprovalProcess, ApprovalStep, ApprovalSystem, ApproverBinding, ChainNode, ProcessCode,
    StepId, SystemCode,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown approval system `{0}`")]
    UnknownSystem(SystemCode),
    #[error("unknown approval process `{0}` in system `{1}`")]
    UnknownProcess(ProcessCode, SystemCode),
    #[error("step `{0}` references a process that is not registered")]
    DanglingStep(StepId),
    #[error("binding `{binding_id}` references unknown step `{step_id}`")]
    DanglingBinding { binding_id: String, step_id: StepId },
}

/// In-memory view of the approval catalog: systems, their processes, the
/// ordered steps inside each process, and the users bound to each step.
///
/// The catalog is loaded once from storage and queried read-only; the
/// store layer owns persistence and reload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApprovalCatalog {
    systems: HashMap<String, ApprovalSystem>,
    processes: HashMap<String, ApprovalProcess>,
    steps: HashMap<String, ApprovalStep>,
    bindings: Vec<ApproverBinding>,
}

impl ApprovalCatalog {
    pub fn new(
        systems: Vec<ApprovalSystem>,
        processes: Vec<ApprovalProcess>,
        steps: Vec<ApprovalStep>,
        bindings: Vec<ApproverBinding>,
    ) -> Result<Self, CatalogError> {
        let systems: HashMap<String, ApprovalSystem> = systems
            .into_iter()
            .map(|system| (normalize_key(&system.code.0), system))
            .collect();

        let mut process_map = HashMap::new();
        for process in processes {
            if !systems.contains_key(&normalize_key(&process.system.0)) {
                return Err(CatalogError::UnknownSystem(process.system.clone()));
            }
            process_map.insert(process_key(&process.system, &process.code), process);
        }

        let mut step_map = HashMap::new();
        for step in steps {
            if !process_map.contains_key(&process_key(&step.system, &step.process)) {
                return Err(CatalogError::DanglingStep(step.id.clone()));
            }
            step_map.insert(step.id.0.clone(), step);
        }

        for binding in &bindings {
            if !step_map.contains_key(&binding.step_id.0) {
                return Err(CatalogError::DanglingBinding {
                    binding_id: binding.id.0.clone(),
                    step_id: binding.step_id.clone(),
                });
            }
        }

        Ok(Self { systems, processes: process_map, steps: step_map, bindings })
    }

    pub fn system(&self, code: &SystemCode) -> Option<&ApprovalSystem> {
        self.systems.get(&normalize_key(&code.0))
    }

    pub fn process(
        &self,
        system: &SystemCode,
        code: &ProcessCode,
    ) -> Result<&ApprovalProcess, CatalogError> {
        if !self.systems.contains_key(&normalize_key(&system.0)) {
            return Err(CatalogError::UnknownSystem(system.clone()));
        }
        self.processes
            .get(&process_key(system, code))
            .ok_or_else(|| CatalogError::UnknownProcess(code.clone(), system.clone()))
    }

    pub fn step(&self, id: &StepId) -> Option<&ApprovalStep> {
        self.steps.get(&id.0)
    }

    /// All steps of a process ordered by their forward ordinal. Ties on the
    /// ordinal fall back to creation time so the chain order is stable.
    pub fn ordered_steps(&self, system: &SystemCode, process: &ProcessCode) -> Vec<&ApprovalStep> {
        let mut steps: Vec<&ApprovalStep> = self
            .steps
            .values()
            .filter(|step| {
                normalize_key(&step.system.0) == normalize_key(&system.0)
                    && normalize_key(&step.process.0) == normalize_key(&process.0)
            })
            .collect();
        steps.sort_by(|a, b| {
            (a.forward_step, a.created_at).cmp(&(b.forward_step, b.created_at))
        });
        steps
    }

    /// Materializes the approval chain for a process: one node per active
    /// approver binding, carried in step order. Inactive bindings are
    /// skipped entirely so past deactivations never resurface in new chains.
    pub fn ordered_chain(
        &self,
        system: &SystemCode,
        process: &ProcessCode,
    ) -> Result<Vec<ChainNode>, CatalogError> {
        self.process(system, process)?;

        let mut nodes = Vec::new();
        for step in self.ordered_steps(system, process) {
            let mut active: Vec<&ApproverBinding> = self
                .bindings
                .iter()
                .filter(|binding| binding.is_active && binding.step_id == step.id)
                .collect();
            active.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            for binding in active {
                nodes.push(ChainNode {
                    binding_id: binding.id.clone(),
                    step_id: step.id.clone(),
                    user_id: binding.user_id.clone(),
                    step_codename: step.codename.clone(),
                    forward_step: step.forward_step,
                    backward_step: step.backward_step,
                });
            }
        }

        Ok(nodes)
    }
}

fn process_key(system: &SystemCode, process: &ProcessCode) -> String {
    format!("{}::{}", normalize_key(&system.0), normalize_key(&process.0))
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{ApprovalStep, ApproverBinding, BindingId};

    fn system() -> ApprovalSystem {
        ApprovalSystem {
            code: SystemCode("scm".to_string()),
            display_name: "Supply Chain".to_string(),
            description: None,
        }
    }

    fn process(code: &str) -> ApprovalProcess {
        ApprovalProcess {
            code: ProcessCode(code.to_string()),
            display_name: code.to_string(),
            system: SystemCode("scm".to_string()),
        }
    }

    fn step(id: &str, process: &str, codename: &str, forward: i32, minute: u32) -> ApprovalStep {
        ApprovalStep {
            id: StepId(id.to_string()),
            system: SystemCode("scm".to_string()),
            process: ProcessCode(process.to_string()),
            codename: codename.to_string(),
            forward_step: forward,
            backward_step: (forward - 1).max(0),
            remarks: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, minute, 0).unwrap(),
        }
    }

    fn binding(id: &str, step_id: &str, user: &str, active: bool) -> ApproverBinding {
        ApproverBinding {
            id: BindingId(id.to_string()),
            step_id: StepId(step_id.to_string()),
            user_id: user.to_string(),
            is_active: active,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    fn catalog() -> ApprovalCatalog {
        ApprovalCatalog::new(
            vec![system()],
            vec![process("new_code_all_ok")],
            vec![
                step("s2", "new_code_all_ok", "dhos", 2, 0),
                step("s1", "new_code_all_ok", "incharge", 1, 0),
                step("s3", "new_code_all_ok", "cbo", 3, 0),
            ],
            vec![
                binding("b3", "s3", "carol", true),
                binding("b1", "s1", "alice", true),
                binding("b2", "s2", "bob", true),
                binding("b4", "s2", "ghost", false),
            ],
        )
        .unwrap()
    }

    #[test]
    fn chain_is_ordered_by_forward_step() {
        let chain = catalog()
            .ordered_chain(&SystemCode("scm".into()), &ProcessCode("new_code_all_ok".into()))
            .unwrap();

        let users: Vec<&str> = chain.iter().map(|node| node.user_id.as_str()).collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
        assert_eq!(chain[0].step_codename, "incharge");
    }

    #[test]
    fn inactive_bindings_are_excluded() {
        let chain = catalog()
            .ordered_chain(&SystemCode("scm".into()), &ProcessCode("new_code_all_ok".into()))
            .unwrap();

        assert!(chain.iter().all(|node| node.user_id != "ghost"));
    }

    #[test]
    fn equal_ordinals_break_ties_by_creation_time() {
        let mut older = step("s9", "new_code_all_ok", "amd", 2, 30);
        older.created_at = Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();

        let catalog = ApprovalCatalog::new(
            vec![system()],
            vec![process("new_code_all_ok")],
            vec![step("s2", "new_code_all_ok", "dhos", 2, 0), older],
            vec![binding("b1", "s2", "bob", true), binding("b2", "s9", "amy", true)],
        )
        .unwrap();

        let chain = catalog
            .ordered_chain(&SystemCode("scm".into()), &ProcessCode("new_code_all_ok".into()))
            .unwrap();
        assert_eq!(chain[0].user_id, "amy");
    }

    #[test]
    fn unknown_process_is_reported() {
        let err = catalog()
            .ordered_chain(&SystemCode("scm".into()), &ProcessCode("missing".into()))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownProcess(..)));
    }

    #[test]
    fn dangling_binding_is_rejected_at_load() {
        let err = ApprovalCatalog::new(
            vec![system()],
            vec![process("new_code_all_ok")],
            vec![],
            vec![binding("b1", "nope", "alice", true)],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::DanglingBinding { .. }));
    }

    #[test]
    fn catalog_errors_name_the_offending_codes() {
        let err = catalog()
            .ordered_chain(&SystemCode("scm".into()), &ProcessCode("missing".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown approval process `missing` in system `scm`");
    }
}
