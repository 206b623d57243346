//! YAML run configuration.

use std::path::{Path, PathBuf};

use razor_pipeline::{StageModels, StageSettings};
use razor_types::RazorError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model: String,
}

/// Generation service connection.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint; the public API when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_max_layout_revisions")]
    pub max_layout_revisions: usize,
    #[serde(default = "default_max_plan_repairs")]
    pub max_plan_repairs: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_layout_revisions: default_max_layout_revisions(),
            max_plan_repairs: default_max_plan_repairs(),
        }
    }
}

/// Post-migration check run in a container with the target tree mounted.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    pub image: String,
    pub command: String,
    #[serde(default = "default_verify_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where `--create-pull-request` pushes the migrated tree.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    pub branch: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub entry_path: PathBuf,
    pub output_path: PathBuf,
    pub legacy_language: String,
    #[serde(default)]
    pub legacy_framework: String,
    pub new_language: String,
    #[serde(default)]
    pub new_framework: String,

    pub document: ModelConfig,
    pub layout: ModelConfig,
    pub planner: ModelConfig,
    pub migrate: ModelConfig,

    /// Session id. Reusing one resumes that run.
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub tracing: bool,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default = "default_true")]
    pub generate_readme: bool,

    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub verify: Option<VerifyConfig>,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> usize {
    3
}
fn default_max_tool_rounds() -> usize {
    25
}
fn default_max_layout_revisions() -> usize {
    3
}
fn default_max_plan_repairs() -> usize {
    2
}
fn default_verify_timeout_ms() -> u64 {
    600_000
}
fn default_commit_message() -> String {
    "Migrate legacy code with debtrazor".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}

impl Config {
    /// Read and parse `path`. Relative `entry_path` and `output_path` are
    /// resolved against the directory holding the config file.
    pub fn load(path: &Path) -> razor_types::Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| RazorError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::parse(&source)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.entry_path = resolve(base, &config.entry_path);
        config.output_path = resolve(base, &config.output_path);
        Ok(config)
    }

    pub fn parse(source: &str) -> razor_types::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Reject configurations that would fail midway through a run.
    pub fn validate(&self) -> razor_types::Result<()> {
        if !self.entry_path.is_dir() {
            return Err(invalid(format!(
                "entry_path {} is not a directory",
                self.entry_path.display()
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(invalid("output_path is empty"));
        }
        let entry = std::fs::canonicalize(&self.entry_path)?;
        if anchored(&self.output_path)?.starts_with(&entry) {
            return Err(invalid(format!(
                "output_path {} lies inside entry_path {}; the walk would pick up its own output",
                self.output_path.display(),
                self.entry_path.display()
            )));
        }
        for (field, value) in [
            ("legacy_language", &self.legacy_language),
            ("new_language", &self.new_language),
        ] {
            if !is_path_segment(value) {
                return Err(invalid(format!(
                    "{} '{}' must be a plain directory name",
                    field, value
                )));
            }
        }
        if self.legacy_language == self.new_language {
            return Err(invalid(
                "legacy_language and new_language must differ; both name directories under output_path",
            ));
        }
        for (stage, model) in [
            ("document", &self.document),
            ("layout", &self.layout),
            ("planner", &self.planner),
            ("migrate", &self.migrate),
        ] {
            if model.model.trim().is_empty() {
                return Err(invalid(format!("{}.model is empty", stage)));
            }
        }
        if let Some(id) = &self.thread_id {
            if !is_path_segment(id) {
                return Err(invalid(format!("thread_id '{}' is not usable as a file name", id)));
            }
        }
        if self.tracing && self.project_name.as_deref().map_or(true, |p| !is_path_segment(p)) {
            return Err(invalid("tracing requires a project_name usable as a file name"));
        }
        if self.limits.max_tool_rounds == 0 {
            return Err(invalid("limits.max_tool_rounds must be at least 1"));
        }
        if let Some(verify) = &self.verify {
            if verify.image.trim().is_empty() || verify.command.trim().is_empty() {
                return Err(invalid("verify needs both image and command"));
            }
            if verify.timeout_ms == 0 {
                return Err(invalid("verify.timeout_ms must be positive"));
            }
        }
        if let Some(publish) = &self.publish {
            let branch = regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$")
                .map_err(|e| RazorError::Other(e.to_string()))?;
            if !branch.is_match(&publish.branch) || publish.branch.contains("..") {
                return Err(invalid(format!("publish.branch '{}' is not a valid branch name", publish.branch)));
            }
            if publish.commit_message.trim().is_empty() {
                return Err(invalid("publish.commit_message is empty"));
            }
        }
        Ok(())
    }

    /// Settings handed to every pipeline stage.
    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            entry_path: self.entry_path.clone(),
            output_path: self.output_path.clone(),
            legacy_language: self.legacy_language.clone(),
            legacy_framework: self.legacy_framework.clone(),
            new_language: self.new_language.clone(),
            new_framework: self.new_framework.clone(),
            models: StageModels {
                document: self.document.model.clone(),
                layout: self.layout.model.clone(),
                planner: self.planner.model.clone(),
                migrate: self.migrate.model.clone(),
            },
            generate_readme: self.generate_readme,
            max_tool_rounds: self.limits.max_tool_rounds,
            max_layout_revisions: self.limits.max_layout_revisions,
            max_plan_repairs: self.limits.max_plan_repairs,
        }
    }

    /// `<output_path>/<project_name>.trace.log` when file tracing is on.
    pub fn trace_log_path(&self) -> Option<PathBuf> {
        if !self.tracing {
            return None;
        }
        self.project_name
            .as_ref()
            .map(|name| self.output_path.join(format!("{}.trace.log", name)))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Canonical form of `path` even when its tail does not exist yet: the
/// deepest existing ancestor is canonicalized and the rest appended.
fn anchored(path: &Path) -> razor_types::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut missing = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(found) = std::fs::canonicalize(cursor) {
            return Ok(missing.iter().rev().fold(found, |acc, part| acc.join(part)));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                cursor = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.trim().is_empty()
        && value != "."
        && value != ".."
        && !value.contains(&['/', '\\'][..])
}

fn invalid(message: impl Into<String>) -> RazorError {
    RazorError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
entry_path: legacy
output_path: out
legacy_language: python
new_language: rust
document: { model: gpt-4o-mini }
layout: { model: gpt-4o }
planner: { model: gpt-4o }
migrate: { model: gpt-4o }
"#;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        std::fs::create_dir_all(dir.join("legacy")).unwrap();
        let path = dir.join("debtrazor.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.new_framework, "");
        assert_eq!(config.legacy_framework, "");
        assert!(config.generate_readme);
        assert!(!config.tracing);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.limits.max_tool_rounds, 25);
        assert!(config.verify.is_none());
        assert!(config.publish.is_none());
    }

    #[test]
    fn load_resolves_relative_paths_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.entry_path, dir.path().join("legacy"));
        assert_eq!(config.output_path, dir.path().join("out"));
        config.validate().unwrap();
    }

    #[test]
    fn missing_required_field_is_yaml_error() {
        let err = Config::parse("entry_path: x\n").unwrap_err();
        assert!(matches!(err, RazorError::Yaml(_)));
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/debtrazor.yaml")).unwrap_err();
        assert!(matches!(err, RazorError::Config(_)));
    }

    #[test]
    fn validate_rejects_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &MINIMAL.replace("entry_path: legacy", "entry_path: gone"));
        let err = Config::load(&path).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("entry_path"));
    }

    #[test]
    fn validate_rejects_same_language_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &MINIMAL.replace("new_language: rust", "new_language: python"));
        let err = Config::load(&path).unwrap().validate().unwrap_err();
        assert!(matches!(err, RazorError::Config(_)));
    }

    #[test]
    fn validate_rejects_output_inside_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &MINIMAL.replace("output_path: out", "output_path: legacy/out"));
        let err = Config::load(&path).unwrap().validate().unwrap_err();
        assert!(matches!(err, RazorError::Config(_)));
        assert!(err.to_string().contains("inside entry_path"));

        let path = write_config(dir.path(), &MINIMAL.replace("output_path: out", "output_path: ./legacy"));
        assert!(Config::load(&path).unwrap().validate().is_err());

        // A sibling whose name merely starts with the entry's is fine.
        let path = write_config(dir.path(), &MINIMAL.replace("output_path: out", "output_path: legacy-port"));
        Config::load(&path).unwrap().validate().unwrap();
    }

    #[test]
    fn tracing_requires_project_name() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}tracing: true\n", MINIMAL);
        let config = Config::load(&write_config(dir.path(), &body)).unwrap();
        assert!(config.validate().is_err());

        let body = format!("{}tracing: true\nproject_name: billing\n", MINIMAL);
        let config = Config::load(&write_config(dir.path(), &body)).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.trace_log_path().unwrap(),
            dir.path().join("out").join("billing.trace.log")
        );
    }

    #[test]
    fn thread_id_must_be_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}thread_id: ../escape\n", MINIMAL);
        let config = Config::load(&write_config(dir.path(), &body)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn publish_branch_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}publish:\n  branch: \"-delete\"\n", MINIMAL);
        let config = Config::load(&write_config(dir.path(), &body)).unwrap();
        assert!(config.validate().is_err());

        let body = format!("{}publish:\n  branch: debtrazor/rust-port\n", MINIMAL);
        let config = Config::load(&write_config(dir.path(), &body)).unwrap();
        config.validate().unwrap();
        let publish = config.publish.unwrap();
        assert_eq!(publish.remote, "origin");
    }

    #[test]
    fn stage_settings_carry_models_and_limits() {
        let body = format!(
            "{}new_framework: axum\nlimits:\n  max_layout_revisions: 5\n",
            MINIMAL
        );
        let settings = Config::parse(&body).unwrap().stage_settings();
        assert_eq!(settings.models.document, "gpt-4o-mini");
        assert_eq!(settings.new_framework, "axum");
        assert_eq!(settings.max_layout_revisions, 5);
        assert_eq!(settings.max_plan_repairs, 2);
        assert_eq!(settings.docs_root(), PathBuf::from("out/python"));
    }
}
