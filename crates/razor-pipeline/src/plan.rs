//! Ordered migration plan and its validation.

use std::collections::HashSet;
use std::path::{Component, Path};

use razor_types::RazorError;
use serde::{Deserialize, Serialize};

/// One target file to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Path of the new file, relative to the target root.
    pub file_name: String,
    /// Documented legacy files the step reads.
    #[serde(default)]
    pub legacy_context: Vec<String>,
    /// Target files produced by earlier steps that this step reads.
    #[serde(default)]
    pub new_context: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MigrationStep> {
        self.steps.get(index)
    }

    /// Check that every step depends only on strictly earlier steps and
    /// that target file names are unique, non-empty, relative paths that
    /// stay inside the target root.
    pub fn validate(&self) -> razor_types::Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let reject = |reason: String| RazorError::PlanValidation {
                step: index,
                file: step.file_name.clone(),
                reason,
            };

            let name = step.file_name.trim();
            if name.is_empty() {
                return Err(reject("empty file_name".into()));
            }
            let path = Path::new(name);
            if path.is_absolute() {
                return Err(reject("file_name must be relative".into()));
            }
            if path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
            {
                return Err(reject("file_name escapes the target root".into()));
            }
            if seen.contains(step.file_name.as_str()) {
                return Err(reject("duplicate file_name".into()));
            }

            for reference in &step.new_context {
                if !seen.contains(reference.as_str()) {
                    let reason = if *reference == step.file_name {
                        format!("new_context references the step itself ('{}')", reference)
                    } else {
                        format!(
                            "new_context '{}' is not produced by an earlier step",
                            reference
                        )
                    };
                    return Err(reject(reason));
                }
            }
            seen.insert(step.file_name.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(file: &str, new_context: &[&str]) -> MigrationStep {
        MigrationStep {
            file_name: file.to_string(),
            legacy_context: vec![],
            new_context: new_context.iter().map(|s| s.to_string()).collect(),
            description: String::new(),
        }
    }

    #[test]
    fn backward_references_are_accepted() {
        let plan = MigrationPlan::new(vec![
            step("src/models.rs", &[]),
            step("src/db.rs", &["src/models.rs"]),
            step("src/main.rs", &["src/models.rs", "src/db.rs"]),
        ]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn forward_reference_is_rejected() {
        let plan = MigrationPlan::new(vec![
            step("src/main.rs", &["src/lib.rs"]),
            step("src/lib.rs", &[]),
        ]);
        match plan.validate().unwrap_err() {
            RazorError::PlanValidation { step, file, reason } => {
                assert_eq!(step, 0);
                assert_eq!(file, "src/main.rs");
                assert!(reason.contains("src/lib.rs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_reference_is_rejected() {
        let plan = MigrationPlan::new(vec![step("a.rs", &["a.rs"])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn duplicate_and_escaping_names_are_rejected() {
        let dup = MigrationPlan::new(vec![step("a.rs", &[]), step("a.rs", &[])]);
        assert!(dup.validate().is_err());

        let escape = MigrationPlan::new(vec![step("../a.rs", &[])]);
        assert!(escape.validate().is_err());

        let absolute = MigrationPlan::new(vec![step("/etc/a.rs", &[])]);
        assert!(absolute.validate().is_err());

        let empty = MigrationPlan::new(vec![step("  ", &[])]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn empty_plan_is_valid() {
        assert!(MigrationPlan::default().validate().is_ok());
    }

    #[test]
    fn missing_optional_fields_deserialize() {
        let plan: MigrationPlan =
            serde_json::from_str(r#"{"steps":[{"file_name":"src/lib.rs"}]}"#).unwrap();
        assert_eq!(plan.steps[0].new_context.len(), 0);
        assert!(plan.validate().is_ok());
    }
}
