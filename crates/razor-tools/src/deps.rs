//! Per-language dependency extraction.
//!
//! A [`DependencyTool`] maps one source file to the project files it imports.
//! Tools are looked up by exact language name in a [`DependencyToolRegistry`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use razor_types::RazorError;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::environment::{shell_quote, ExecutionEnvironment};

/// Dependencies of one file. Identifiers are `/`-separated paths relative
/// to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub root: String,
    pub dependencies: Vec<String>,
}

/// Project-relative identifier for `path`, always `/`-separated.
pub fn relative_id(project_root: &Path, path: &Path) -> String {
    let Ok(rel) = path.strip_prefix(project_root) else {
        return path.to_string_lossy().into_owned();
    };
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
pub trait DependencyTool: Send + Sync {
    fn language(&self) -> &str;

    /// Returns `None` when the file is not something this tool understands.
    async fn extract(
        &self,
        file: &Path,
        project_root: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<Option<DependencyRecord>>;
}

// ---------------------------------------------------------------------------
// DependencyToolRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct DependencyToolRegistry {
    tools: HashMap<String, Arc<dyn DependencyTool>>,
}

impl DependencyToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Python import scanning plus `madge` for JavaScript and TypeScript.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PythonImportScanner::new());
        registry.register(MadgeTool::new("javascript"));
        registry.register(MadgeTool::new("typescript"));
        registry
    }

    pub fn register(&mut self, tool: impl DependencyTool + 'static) {
        self.tools
            .insert(tool.language().to_lowercase(), Arc::new(tool));
    }

    /// Case-insensitive exact match on the language name.
    pub fn get(&self, language: &str) -> Option<Arc<dyn DependencyTool>> {
        self.tools.get(&language.to_lowercase()).cloned()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.tools.keys().cloned().collect();
        langs.sort();
        langs
    }
}

// ---------------------------------------------------------------------------
// PythonImportScanner
// ---------------------------------------------------------------------------

/// Resolves `import x.y` and `from .x import y` statements to files that
/// exist under the project root. Third-party and stdlib imports resolve to
/// nothing and are dropped.
pub struct PythonImportScanner {
    import_re: Regex,
    from_re: Regex,
}

impl PythonImportScanner {
    pub fn new() -> Self {
        Self {
            import_re: Regex::new(r"^\s*import\s+(.+)$").expect("literal regex"),
            from_re: Regex::new(r"^\s*from\s+(\.*)([\w\.]*)\s+import\s+(.+)$")
                .expect("literal regex"),
        }
    }

    /// Module path candidates for `module` (dotted) under `base`.
    fn module_candidates(base: &Path, module: &str) -> Vec<PathBuf> {
        let mut rel = PathBuf::new();
        for part in module.split('.').filter(|p| !p.is_empty()) {
            rel.push(part);
        }
        if rel.as_os_str().is_empty() {
            return vec![base.join("__init__.py")];
        }
        vec![
            base.join(rel.with_extension("py")),
            base.join(&rel).join("__init__.py"),
        ]
    }

    async fn first_existing(
        env: &dyn ExecutionEnvironment,
        candidates: Vec<PathBuf>,
    ) -> razor_types::Result<Option<PathBuf>> {
        for candidate in candidates {
            if env.file_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl Default for PythonImportScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_alias(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

#[async_trait]
impl DependencyTool for PythonImportScanner {
    fn language(&self) -> &str {
        "python"
    }

    async fn extract(
        &self,
        file: &Path,
        project_root: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<Option<DependencyRecord>> {
        if file.extension().and_then(|e| e.to_str()) != Some("py") {
            return Ok(None);
        }
        let source = env.read_file(file).await?;
        let file_dir = file.parent().unwrap_or(project_root).to_path_buf();

        let mut found: Vec<PathBuf> = Vec::new();
        for line in source.lines() {
            if let Some(caps) = self.import_re.captures(line) {
                for module in caps[1].split(',').map(strip_alias) {
                    let mut candidates = Self::module_candidates(project_root, module);
                    candidates.extend(Self::module_candidates(&file_dir, module));
                    if let Some(hit) = Self::first_existing(env, candidates).await? {
                        found.push(hit);
                    }
                }
            } else if let Some(caps) = self.from_re.captures(line) {
                let dots = caps[1].len();
                let module = &caps[2];
                let base = if dots == 0 {
                    project_root.to_path_buf()
                } else {
                    let mut base = file_dir.clone();
                    for _ in 1..dots {
                        base = base.parent().unwrap_or(project_root).to_path_buf();
                    }
                    base
                };

                let names = caps[3].trim().trim_start_matches('(').trim_end_matches(')');
                let mut module_hit = None;
                if !module.is_empty() {
                    let mut candidates = Self::module_candidates(&base, module);
                    if dots == 0 {
                        candidates.extend(Self::module_candidates(&file_dir, module));
                    }
                    module_hit = Self::first_existing(env, candidates).await?;
                }

                // `from pkg import sub` may name submodules rather than symbols.
                let package_dir = {
                    let mut dir = base.clone();
                    for part in module.split('.').filter(|p| !p.is_empty()) {
                        dir.push(part);
                    }
                    dir
                };
                let mut submodule_hit = false;
                for name in names.split(',').map(strip_alias).filter(|n| *n != "*") {
                    if name.is_empty() {
                        continue;
                    }
                    let candidate = package_dir.join(format!("{name}.py"));
                    if env.file_exists(&candidate).await? {
                        found.push(candidate);
                        submodule_hit = true;
                    }
                }
                if !submodule_hit {
                    if let Some(hit) = module_hit {
                        found.push(hit);
                    }
                }
            }
        }

        let root = relative_id(project_root, file);
        let mut dependencies: Vec<String> = Vec::new();
        for path in found {
            let id = relative_id(project_root, &path);
            if id != root && !dependencies.contains(&id) {
                dependencies.push(id);
            }
        }
        Ok(Some(DependencyRecord { root, dependencies }))
    }
}

// ---------------------------------------------------------------------------
// MadgeTool
// ---------------------------------------------------------------------------

const MADGE_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "ts", "tsx"];

/// Runs `madge --json` for JavaScript/TypeScript sources.
pub struct MadgeTool {
    language: String,
    timeout_ms: u64,
}

impl MadgeTool {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            timeout_ms: 60_000,
        }
    }
}

#[async_trait]
impl DependencyTool for MadgeTool {
    fn language(&self) -> &str {
        &self.language
    }

    async fn extract(
        &self,
        file: &Path,
        project_root: &Path,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<Option<DependencyRecord>> {
        let supported = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| MADGE_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if !supported {
            return Ok(None);
        }

        let root = relative_id(project_root, file);
        let command = format!("madge --json {}", shell_quote(&root));
        let result = env
            .exec_command(&command, self.timeout_ms, Some(project_root), None)
            .await?;
        if result.timed_out {
            return Err(RazorError::CommandTimeout {
                timeout_ms: self.timeout_ms,
            });
        }
        if result.exit_code != 0 {
            return Err(RazorError::ToolError {
                tool: "madge".into(),
                message: format!("exit code {}: {}", result.exit_code, result.stderr.trim()),
            });
        }

        let graph: HashMap<String, Vec<String>> =
            serde_json::from_str(result.stdout.trim()).map_err(|e| RazorError::ToolError {
                tool: "madge".into(),
                message: format!("unparseable output: {e}"),
            })?;

        // madge keys its graph relative to the file's own directory.
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_dir = Path::new(&root).parent().unwrap_or(Path::new(""));
        let deps = graph
            .get(&root)
            .or_else(|| graph.get(&file_name))
            .cloned()
            .unwrap_or_default();

        let dependencies = deps
            .iter()
            .map(|d| {
                let joined = base_dir.join(d);
                relative_id(Path::new(""), &joined)
            })
            .collect();
        Ok(Some(DependencyRecord { root, dependencies }))
    }
}
