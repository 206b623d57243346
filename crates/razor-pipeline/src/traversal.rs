//! Resumable directory traversal.
//!
//! The walk is an explicit frame stack stored in [`TraversalState`]. The
//! [`TraversalEngine`] never touches the file system: [`TraversalEngine::demand`]
//! says what the current phase needs from the outside world, and
//! [`TraversalEngine::advance`] applies exactly one [`Event`] and returns the
//! next state. Serializing the state between any two transitions and
//! continuing from the deserialized copy produces the same walk.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use razor_tools::{relative_id, DirEntry, ExecutionEnvironment};
use razor_types::RazorError;
use serde::{Deserialize, Serialize};

use crate::ignore::IgnoreRules;

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE_INDENT: &str = "│   ";
const SPACE_INDENT: &str = "    ";
const INDENT_WIDTH: usize = 4;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// A directory entry captured at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Canonical target, used by the cycle guard.
    pub resolved: PathBuf,
}

impl From<DirEntry> for PendingEntry {
    fn from(entry: DirEntry) -> Self {
        Self {
            name: entry.name,
            kind: if entry.is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            resolved: entry.resolved,
        }
    }
}

/// Entries left to consume in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameCount {
    /// Pushed but not yet listed.
    Unlisted,
    Remaining(usize),
    /// Nothing left; the frame ascends next.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryFrame {
    pub name: String,
    pub path: PathBuf,
    pub resolved: PathBuf,
    pub count: FrameCount,
    pub pending: VecDeque<PendingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Enter,
    List,
    Select,
    Leaf,
    Ascend,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Enter => "enter",
            Phase::List => "list",
            Phase::Select => "select",
            Phase::Leaf => "leaf",
            Phase::Ascend => "ascend",
            Phase::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Complete, serializable state of one directory walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalState {
    pub root: PathBuf,
    pub stack: Vec<DirectoryFrame>,
    pub current: Option<PendingEntry>,
    pub phase: Phase,
    /// Tree rendering accumulated so far, one line per entry.
    pub rendered: String,
    pub indent: String,
    pub ignore_patterns: Vec<String>,
    /// Whether every directory gets a trailing `README.md` line.
    pub emit_readme: bool,
    pub frames_opened: usize,
    pub files_seen: usize,
    pub directories_seen: usize,
    pub listing_failures: usize,
}

impl TraversalState {
    /// A walk positioned to list `root`.
    ///
    /// `resolved_root` is the canonical form of `root`; it seeds the cycle
    /// guard.
    pub fn new(
        root: impl Into<PathBuf>,
        resolved_root: impl Into<PathBuf>,
        ignore_patterns: Vec<String>,
        emit_readme: bool,
    ) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string());
        let frame = DirectoryFrame {
            name,
            path: root.clone(),
            resolved: resolved_root.into(),
            count: FrameCount::Unlisted,
            pending: VecDeque::new(),
        };
        Self {
            root,
            stack: vec![frame],
            current: None,
            phase: Phase::List,
            rendered: String::new(),
            indent: String::new(),
            ignore_patterns,
            emit_readme,
            frames_opened: 1,
            files_seen: 0,
            directories_seen: 0,
            listing_failures: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    fn push_line(&mut self, line: String) {
        self.rendered.push_str(&line);
        self.rendered.push('\n');
    }
}

// ---------------------------------------------------------------------------
// Demands and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    /// `/`-joined path relative to the traversal root.
    pub relative: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTask {
    pub path: PathBuf,
    /// Empty for the root.
    pub relative: String,
    pub name: String,
    pub is_root: bool,
}

/// What the current phase needs before it can advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Demand {
    /// Nothing external; answer with [`Event::Tick`].
    Internal,
    /// List this directory and answer with [`Event::Listed`].
    List { path: PathBuf },
    /// Process this file and answer with [`Event::FileProcessed`].
    Document(FileTask),
    /// Finish this directory and answer with [`Event::DirectoryClosed`].
    Close(DirectoryTask),
    Done,
}

#[derive(Debug, Clone)]
pub enum Event {
    Tick,
    /// Directory listing result; `Err` carries the failure message.
    Listed(Result<Vec<DirEntry>, String>),
    FileProcessed,
    DirectoryClosed,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Tick => "tick",
            Event::Listed(_) => "listed",
            Event::FileProcessed => "file_processed",
            Event::DirectoryClosed => "directory_closed",
        }
    }
}

/// Run the directory listing a [`Demand::List`] asks for.
pub async fn list_event(env: &dyn ExecutionEnvironment, path: &Path) -> Event {
    match env.list_directory(path).await {
        Ok(entries) => Event::Listed(Ok(entries)),
        Err(e) => {
            let failure = RazorError::Listing {
                path: path.display().to_string(),
                message: e.to_string(),
            };
            Event::Listed(Err(failure.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// TraversalEngine
// ---------------------------------------------------------------------------

pub struct TraversalEngine {
    ignore: IgnoreRules,
}

impl TraversalEngine {
    pub fn new(state: &TraversalState) -> razor_types::Result<Self> {
        Ok(Self {
            ignore: IgnoreRules::new(&state.ignore_patterns)?,
        })
    }

    pub fn demand(&self, state: &TraversalState) -> razor_types::Result<Demand> {
        match state.phase {
            Phase::Enter | Phase::Select => Ok(Demand::Internal),
            Phase::List => {
                let top = top_frame(state)?;
                Ok(Demand::List {
                    path: top.path.clone(),
                })
            }
            Phase::Leaf => {
                let top = top_frame(state)?;
                let entry = current_entry(state)?;
                let path = top.path.join(&entry.name);
                Ok(Demand::Document(FileTask {
                    relative: relative_id(&state.root, &path),
                    path,
                }))
            }
            Phase::Ascend => {
                let top = top_frame(state)?;
                Ok(Demand::Close(DirectoryTask {
                    path: top.path.clone(),
                    relative: relative_to_root(&state.root, &top.path),
                    name: top.name.clone(),
                    is_root: state.stack.len() == 1,
                }))
            }
            Phase::Finished => Ok(Demand::Done),
        }
    }

    /// Apply one event. A mismatched event is rejected and `state` is left
    /// as it was.
    pub fn advance(
        &self,
        state: &TraversalState,
        event: Event,
    ) -> razor_types::Result<TraversalState> {
        let mut next = state.clone();
        match (state.phase, event) {
            (Phase::List, Event::Listed(result)) => self.list(&mut next, result)?,
            (Phase::Select, Event::Tick) => self.select(&mut next)?,
            (Phase::Enter, Event::Tick) => self.enter(&mut next)?,
            (Phase::Leaf, Event::FileProcessed) => self.leaf(&mut next)?,
            (Phase::Ascend, Event::DirectoryClosed) => self.ascend(&mut next)?,
            (phase, event) => {
                return Err(RazorError::UnexpectedEvent {
                    phase: phase.to_string(),
                    event: event.name().to_string(),
                })
            }
        }
        Ok(next)
    }

    /// Drive the walk to completion, acknowledging files and directories
    /// without doing any work for them.
    pub async fn walk(
        &self,
        mut state: TraversalState,
        env: &dyn ExecutionEnvironment,
    ) -> razor_types::Result<TraversalState> {
        loop {
            let event = match self.demand(&state)? {
                Demand::Internal => Event::Tick,
                Demand::List { path } => list_event(env, &path).await,
                Demand::Document(_) => Event::FileProcessed,
                Demand::Close(_) => Event::DirectoryClosed,
                Demand::Done => return Ok(state),
            };
            state = self.advance(&state, event)?;
        }
    }

    fn list(
        &self,
        state: &mut TraversalState,
        result: Result<Vec<DirEntry>, String>,
    ) -> razor_types::Result<()> {
        let depth = state.stack.len();
        if depth == 0 {
            return Err(corrupt("list with an empty stack"));
        }

        if depth > 1 {
            let has_more = self.has_visible_remaining(state, &state.stack[depth - 2]);
            let (connector, extension) = if has_more {
                (BRANCH, PIPE_INDENT)
            } else {
                (LAST_BRANCH, SPACE_INDENT)
            };
            let line = format!("{}{}{}/", state.indent, connector, state.stack[depth - 1].name);
            state.push_line(line);
            state.indent.push_str(extension);
        }

        let top = &mut state.stack[depth - 1];
        match result {
            Ok(mut entries) => {
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                top.count = FrameCount::Remaining(entries.len());
                top.pending = entries.into_iter().map(PendingEntry::from).collect();
            }
            Err(message) => {
                tracing::warn!(path = %top.path.display(), error = %message, "Directory listing failed, skipping");
                top.count = FrameCount::Exhausted;
                top.pending.clear();
                state.listing_failures += 1;
            }
        }
        state.phase = Phase::Select;
        Ok(())
    }

    fn select(&self, state: &mut TraversalState) -> razor_types::Result<()> {
        let root = state.root.clone();
        let top = state
            .stack
            .last_mut()
            .ok_or_else(|| corrupt("select with an empty stack"))?;

        while let Some(entry) = top.pending.pop_front() {
            if let FrameCount::Remaining(n) = top.count {
                top.count = FrameCount::Remaining(n.saturating_sub(1));
            }
            let relative = relative_id(&root, &top.path.join(&entry.name));
            if self.ignore.is_ignored(&entry.name, &relative) {
                tracing::debug!(entry = %relative, "Ignored");
                continue;
            }
            state.phase = match entry.kind {
                EntryKind::Directory => Phase::Enter,
                EntryKind::File => Phase::Leaf,
            };
            state.current = Some(entry);
            return Ok(());
        }

        top.count = FrameCount::Exhausted;
        state.phase = Phase::Ascend;
        Ok(())
    }

    fn enter(&self, state: &mut TraversalState) -> razor_types::Result<()> {
        let entry = state
            .current
            .take()
            .ok_or_else(|| corrupt("enter without a current entry"))?;
        if entry.kind != EntryKind::Directory {
            return Err(corrupt("enter on a file"));
        }

        if state.stack.iter().any(|f| f.resolved == entry.resolved) {
            tracing::warn!(
                directory = %entry.name,
                resolved = %entry.resolved.display(),
                "Directory already on the walk stack, skipping cycle"
            );
            state.phase = Phase::Select;
            return Ok(());
        }

        let parent = top_frame(state)?.path.clone();
        state.stack.push(DirectoryFrame {
            path: parent.join(&entry.name),
            name: entry.name,
            resolved: entry.resolved,
            count: FrameCount::Unlisted,
            pending: VecDeque::new(),
        });
        state.frames_opened += 1;
        state.phase = Phase::List;
        Ok(())
    }

    fn leaf(&self, state: &mut TraversalState) -> razor_types::Result<()> {
        let entry = state
            .current
            .take()
            .ok_or_else(|| corrupt("leaf without a current entry"))?;
        let connector = if self.has_visible_remaining(state, top_frame(state)?) {
            BRANCH
        } else {
            LAST_BRANCH
        };
        let line = format!("{}{}{}", state.indent, connector, entry.name);
        state.push_line(line);
        state.files_seen += 1;
        state.phase = Phase::Select;
        Ok(())
    }

    fn ascend(&self, state: &mut TraversalState) -> razor_types::Result<()> {
        if state.emit_readme {
            let line = format!("{}{}README.md", state.indent, LAST_BRANCH);
            state.push_line(line);
        }
        state
            .stack
            .pop()
            .ok_or_else(|| corrupt("ascend with an empty stack"))?;
        state.directories_seen += 1;

        if state.stack.is_empty() {
            state.phase = Phase::Finished;
        } else {
            let keep = state.indent.chars().count().saturating_sub(INDENT_WIDTH);
            state.indent = state.indent.chars().take(keep).collect();
            state.phase = Phase::Select;
        }
        Ok(())
    }

    /// Whether `frame` still has something to render after the current line.
    fn has_visible_remaining(&self, state: &TraversalState, frame: &DirectoryFrame) -> bool {
        state.emit_readme
            || frame.pending.iter().any(|e| {
                let relative = relative_id(&state.root, &frame.path.join(&e.name));
                !self.ignore.is_ignored(&e.name, &relative)
            })
    }
}

fn top_frame(state: &TraversalState) -> razor_types::Result<&DirectoryFrame> {
    state
        .stack
        .last()
        .ok_or_else(|| corrupt("empty frame stack"))
}

fn current_entry(state: &TraversalState) -> razor_types::Result<&PendingEntry> {
    state
        .current
        .as_ref()
        .ok_or_else(|| corrupt("no current entry"))
}

fn relative_to_root(root: &Path, path: &Path) -> String {
    if path == root {
        String::new()
    } else {
        relative_id(root, path)
    }
}

fn corrupt(what: &str) -> RazorError {
    RazorError::Other(format!("traversal state corrupt: {}", what))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dir: &str, name: &str, is_dir: bool) -> DirEntry {
        let path = PathBuf::from(dir).join(name);
        DirEntry {
            name: name.to_string(),
            resolved: path.clone(),
            path,
            is_dir,
            size: 0,
        }
    }

    fn state(patterns: &[&str], emit_readme: bool) -> TraversalState {
        TraversalState::new(
            "/r",
            "/r",
            patterns.iter().map(|p| p.to_string()).collect(),
            emit_readme,
        )
    }

    /// Feeds listings from a fixed table keyed by path.
    fn run(mut st: TraversalState, listings: &[(&str, Vec<DirEntry>)]) -> (TraversalState, Vec<String>) {
        let engine = TraversalEngine::new(&st).unwrap();
        let mut files = Vec::new();
        loop {
            let event = match engine.demand(&st).unwrap() {
                Demand::Internal => Event::Tick,
                Demand::List { path } => {
                    let key = path.to_string_lossy().to_string();
                    let found = listings.iter().find(|(p, _)| *p == key);
                    match found {
                        Some((_, entries)) => Event::Listed(Ok(entries.clone())),
                        None => Event::Listed(Err(format!("no listing for {}", key))),
                    }
                }
                Demand::Document(task) => {
                    files.push(task.relative);
                    Event::FileProcessed
                }
                Demand::Close(_) => Event::DirectoryClosed,
                Demand::Done => return (st, files),
            };
            st = engine.advance(&st, event).unwrap();
        }
    }

    // 1. Sorted siblings, nested directory rendering
    #[test]
    fn nested_tree_renders_in_sorted_order() {
        let listings = vec![
            ("/r", vec![entry("/r", "sub", true), entry("/r", "a.txt", false)]),
            ("/r/sub", vec![entry("/r/sub", "b.txt", false)]),
        ];
        let (st, files) = run(state(&[], false), &listings);
        assert_eq!(st.rendered, "├── a.txt\n└── sub/\n    └── b.txt\n");
        assert_eq!(files, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(st.frames_opened, 2);
        assert_eq!(st.directories_seen, 2);
        assert!(st.stack.is_empty());
        assert!(st.is_finished());
    }

    // 2. Ignored entries never render and never reach the work queue
    #[test]
    fn ignored_entries_are_consumed_silently() {
        let listings = vec![(
            "/r",
            vec![entry("/r", "a.json", false), entry("/r", "a.txt", false)],
        )];
        let (st, files) = run(state(&["*.json"], false), &listings);
        assert_eq!(files, vec!["a.txt"]);
        assert_eq!(st.rendered, "└── a.txt\n");
    }

    // 3. A trailing ignored sibling does not keep the branch connector open
    #[test]
    fn connector_considers_only_visible_siblings() {
        let listings = vec![(
            "/r",
            vec![entry("/r", "a.txt", false), entry("/r", "z.lock", false)],
        )];
        let (st, _) = run(state(&["*.lock"], false), &listings);
        assert_eq!(st.rendered, "└── a.txt\n");
    }

    // 4. README lines close every directory
    #[test]
    fn readme_lines_are_emitted_last() {
        let listings = vec![
            ("/r", vec![entry("/r", "a.txt", false), entry("/r", "sub", true)]),
            ("/r/sub", vec![entry("/r/sub", "b.txt", false)]),
        ];
        let (st, _) = run(state(&[], true), &listings);
        assert_eq!(
            st.rendered,
            "├── a.txt\n├── sub/\n│   ├── b.txt\n│   └── README.md\n└── README.md\n"
        );
    }

    // 5. Listing failure exhausts the frame and the walk continues
    #[test]
    fn listing_failure_is_contained() {
        let listings = vec![(
            "/r",
            vec![entry("/r", "locked", true), entry("/r", "z.txt", false)],
        )];
        let (st, files) = run(state(&[], false), &listings);
        assert_eq!(st.listing_failures, 1);
        assert_eq!(files, vec!["z.txt"]);
        assert_eq!(st.rendered, "├── locked/\n└── z.txt\n");
    }

    // 6. Cycle guard
    #[test]
    fn directory_resolving_to_ancestor_is_skipped() {
        let mut link = entry("/r/sub", "loop", true);
        link.resolved = PathBuf::from("/r");
        let listings = vec![
            ("/r", vec![entry("/r", "sub", true)]),
            ("/r/sub", vec![link, entry("/r/sub", "c.txt", false)]),
        ];
        let (st, files) = run(state(&[], false), &listings);
        assert_eq!(files, vec!["sub/c.txt"]);
        assert_eq!(st.frames_opened, 2);
    }

    // 7. Mismatched events are rejected without touching the state
    #[test]
    fn unexpected_event_is_rejected() {
        let st = state(&[], false);
        let engine = TraversalEngine::new(&st).unwrap();
        let err = engine.advance(&st, Event::Tick).unwrap_err();
        assert!(matches!(err, RazorError::UnexpectedEvent { .. }));
        assert_eq!(st.phase, Phase::List);
        assert_eq!(st.frames_opened, 1);
    }

    // 8. Counts decrement and end on the terminal sentinel
    #[test]
    fn frame_count_transitions() {
        let st = state(&[], false);
        let engine = TraversalEngine::new(&st).unwrap();
        assert_eq!(st.stack[0].count, FrameCount::Unlisted);
        let st = engine
            .advance(
                &st,
                Event::Listed(Ok(vec![entry("/r", "a", false), entry("/r", "b", false)])),
            )
            .unwrap();
        assert_eq!(st.stack[0].count, FrameCount::Remaining(2));
        let st = engine.advance(&st, Event::Tick).unwrap();
        assert_eq!(st.stack[0].count, FrameCount::Remaining(1));
        let st = engine.advance(&st, Event::FileProcessed).unwrap();
        let st = engine.advance(&st, Event::Tick).unwrap();
        let st = engine.advance(&st, Event::FileProcessed).unwrap();
        let st = engine.advance(&st, Event::Tick).unwrap();
        assert_eq!(st.stack[0].count, FrameCount::Exhausted);
        assert_eq!(st.phase, Phase::Ascend);
    }

    // 9. Demands carry root-relative identifiers
    #[test]
    fn close_demand_for_root_has_empty_relative() {
        let st = state(&[], false);
        let engine = TraversalEngine::new(&st).unwrap();
        let st = engine.advance(&st, Event::Listed(Ok(vec![]))).unwrap();
        let st = engine.advance(&st, Event::Tick).unwrap();
        match engine.demand(&st).unwrap() {
            Demand::Close(task) => {
                assert!(task.is_root);
                assert_eq!(task.relative, "");
                assert_eq!(task.name, "r");
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
}
