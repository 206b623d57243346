//! `.gptignore` loading and glob matching for the traversal.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use razor_tools::ExecutionEnvironment;
use razor_types::RazorError;

/// Name of the ignore file looked up in the entry directory.
pub const IGNORE_FILE_NAME: &str = ".gptignore";

/// Compiled ignore patterns.
///
/// An entry is ignored when a pattern matches either its bare name or its
/// path relative to the traversal root. A trailing `/` on a pattern is
/// dropped, so `node_modules/` matches the directory `node_modules`.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    set: GlobSet,
    len: usize,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> razor_types::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut len = 0;
        for raw in patterns {
            let pattern = raw.trim().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let glob = Glob::new(pattern).map_err(|e| {
                RazorError::Config(format!("invalid ignore pattern '{}': {}", raw, e))
            })?;
            builder.add(glob);
            len += 1;
        }
        let set = builder
            .build()
            .map_err(|e| RazorError::Config(format!("ignore patterns: {}", e)))?;
        Ok(Self { set, len })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            len: 0,
        }
    }

    pub fn is_ignored(&self, name: &str, relative: &str) -> bool {
        self.len > 0 && (self.set.is_match(name) || self.set.is_match(relative))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Parse ignore file content: one pattern per line, blank lines and `#`
/// comments skipped.
pub fn parse_ignore_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Load `<entry>/.gptignore`. A missing file means no patterns; an
/// existing one also ignores itself.
pub async fn load_ignore_file(
    env: &dyn ExecutionEnvironment,
    entry: &Path,
) -> razor_types::Result<Vec<String>> {
    let path = entry.join(IGNORE_FILE_NAME);
    if !env.file_exists(&path).await? {
        return Ok(Vec::new());
    }
    let content = env.read_file(&path).await?;
    let mut patterns = parse_ignore_file(&content);
    patterns.push(IGNORE_FILE_NAME.to_string());
    tracing::debug!(path = %path.display(), patterns = patterns.len(), "Loaded ignore file");
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[&str]) -> IgnoreRules {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        IgnoreRules::new(&owned).unwrap()
    }

    #[test]
    fn extension_pattern_matches_by_name() {
        let r = rules(&["*.json"]);
        assert!(r.is_ignored("a.json", "a.json"));
        assert!(r.is_ignored("b.json", "sub/b.json"));
        assert!(!r.is_ignored("a.txt", "a.txt"));
    }

    #[test]
    fn trailing_slash_matches_directory_name() {
        let r = rules(&["node_modules/"]);
        assert!(r.is_ignored("node_modules", "web/node_modules"));
        assert!(!r.is_ignored("modules", "modules"));
    }

    #[test]
    fn relative_path_patterns() {
        let r = rules(&["build/*.o"]);
        assert!(r.is_ignored("x.o", "build/x.o"));
        assert!(!r.is_ignored("x.o", "src/x.o"));
    }

    #[test]
    fn empty_rules_ignore_nothing() {
        let r = IgnoreRules::empty();
        assert!(r.is_empty());
        assert!(!r.is_ignored(".git", ".git"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = IgnoreRules::new(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, RazorError::Config(_)));
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        let parsed = parse_ignore_file("# deps\nnode_modules/\n\n  *.pyc  \n#*.md\n");
        assert_eq!(parsed, vec!["node_modules/", "*.pyc"]);
    }
}
