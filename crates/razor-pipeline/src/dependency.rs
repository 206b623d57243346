//! Aggregation of per-file dependency records into one graph.

use std::collections::{BTreeMap, BTreeSet};

use razor_tools::DependencyRecord;
use serde::{Deserialize, Serialize};

/// File identifier → files it depends on. Keys are unique; a later record
/// for the same root replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, record: DependencyRecord) {
        self.edges.insert(record.root, record.dependencies);
    }

    /// Sub-graph keyed only by identifiers in `allowed`.
    pub fn restrict<'a, I>(&self, allowed: I) -> DependencyGraph
    where
        I: IntoIterator<Item = &'a str>,
    {
        let allowed: BTreeSet<&str> = allowed.into_iter().collect();
        let edges = self
            .edges
            .iter()
            .filter(|(root, _)| allowed.contains(root.as_str()))
            .map(|(root, deps)| (root.clone(), deps.clone()))
            .collect();
        DependencyGraph { edges }
    }

    pub fn get(&self, file: &str) -> Option<&[String]> {
        self.edges.get(file).map(Vec::as_slice)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Pretty JSON for embedding in prompts.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.edges).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(root: &str, deps: &[&str]) -> DependencyRecord {
        DependencyRecord {
            root: root.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = DependencyGraph::new();
        once.merge(record("app.py", &["models.py"]));

        let mut twice = once.clone();
        twice.merge(record("app.py", &["models.py"]));
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn later_record_wins() {
        let mut graph = DependencyGraph::new();
        graph.merge(record("app.py", &["a.py"]));
        graph.merge(record("app.py", &["b.py"]));
        assert_eq!(graph.get("app.py").unwrap(), &["b.py".to_string()]);
    }

    #[test]
    fn restrict_never_adds_keys() {
        let mut graph = DependencyGraph::new();
        graph.merge(record("a.py", &["b.py"]));
        graph.merge(record("b.py", &[]));
        graph.merge(record("tests/t.py", &["a.py"]));

        let restricted = graph.restrict(["a.py", "b.py", "missing.py"]);
        let keys: Vec<&str> = restricted.files().collect();
        assert_eq!(keys, vec!["a.py", "b.py"]);
        assert!(restricted.get("missing.py").is_none());
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut graph = DependencyGraph::new();
        graph.merge(record("z.js", &["a.js"]));
        graph.merge(record("a.js", &[]));
        let json = serde_json::to_string(&graph).unwrap();
        assert_eq!(json, r#"{"a.js":[],"z.js":["a.js"]}"#);
        let back: DependencyGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
