//! Document stage: walk the legacy tree, write a documented copy of every
//! file, summarize directories into READMEs, and collect dependencies.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use razor_llm::extract_code_block;
use razor_tools::truncation::{truncate_output, TruncationMode};
use razor_types::StageId;
use serde::{Deserialize, Serialize};

use super::{is_contained, parent_key, Assessment, Services, Stage, StageSettings};
use crate::checkpoint::Checkpointer;
use crate::context::RunContext;
use crate::dependency::DependencyGraph;
use crate::events::PipelineEvent;
use crate::prompts::{DIRECTORY_README, DOCUMENT_FILE, SUMMARIZE_FILE};
use crate::traversal::{
    list_event, Demand, DirectoryTask, Event, FileTask, TraversalEngine, TraversalState,
};

/// Longest README text handed up to the parent directory's summaries.
const README_SUMMARY_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub traversal: TraversalState,
    pub docs_root: PathBuf,
    /// Summaries of processed children, keyed by directory relative path.
    pub summaries: BTreeMap<String, Vec<FileSummary>>,
    pub dependencies: DependencyGraph,
    pub documented_files: Vec<String>,
    pub failed_files: Vec<String>,
}

impl DocumentState {
    pub fn new(traversal: TraversalState, docs_root: impl Into<PathBuf>) -> Self {
        Self {
            traversal,
            docs_root: docs_root.into(),
            summaries: BTreeMap::new(),
            dependencies: DependencyGraph::new(),
            documented_files: Vec::new(),
            failed_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentOutput {
    pub directory_structure: String,
    pub dependencies: DependencyGraph,
    pub documented_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub docs_root: PathBuf,
}

pub struct DocumentStage<'a> {
    settings: &'a StageSettings,
    services: &'a Services,
}

impl<'a> DocumentStage<'a> {
    pub fn new(settings: &'a StageSettings, services: &'a Services) -> Self {
        Self { settings, services }
    }

    async fn document_file(
        &self,
        state: &mut DocumentState,
        task: &FileTask,
        ctx: &RunContext,
    ) -> razor_types::Result<()> {
        self.collect_dependencies(state, task).await;

        match self.write_documented_copy(state, task).await {
            Ok((summary, reused)) => {
                state
                    .summaries
                    .entry(parent_key(&task.relative).to_string())
                    .or_default()
                    .push(FileSummary {
                        name: file_name(&task.relative).to_string(),
                        summary,
                    });
                state.documented_files.push(task.relative.clone());
                tracing::info!(file = %task.relative, reused, "Documented");
                ctx.emit(PipelineEvent::FileDocumented {
                    file: task.relative.clone(),
                    reused,
                });
                Ok(())
            }
            Err(e) if is_contained(&e) => {
                tracing::warn!(file = %task.relative, error = %e, "Documentation failed, continuing");
                state.failed_files.push(task.relative.clone());
                ctx.emit(PipelineEvent::FileFailed {
                    file: task.relative.clone(),
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the file's summary and whether an existing documented copy
    /// was reused.
    async fn write_documented_copy(
        &self,
        state: &DocumentState,
        task: &FileTask,
    ) -> razor_types::Result<(String, bool)> {
        let env = self.services.env.as_ref();
        let target = state.docs_root.join(&task.relative);
        let model = &self.settings.models.document;

        let reused = self.services.has_content(&target).await?;
        let documented = if reused {
            env.read_file(&target).await?
        } else {
            let source = env.read_file(&task.path).await?;
            if source.trim().is_empty() {
                env.write_file(&target, &source).await?;
                return Ok(("Empty file.".to_string(), false));
            }
            let mut vars = self.settings.prompt_vars();
            vars.insert("file", task.relative.clone());
            vars.insert("source", source);
            let reply = self.services.ask(model, &DOCUMENT_FILE, &vars).await?;
            let documented = extract_code_block(&reply);
            env.write_file(&target, &documented).await?;
            documented
        };

        let mut vars = self.settings.prompt_vars();
        vars.insert("file", task.relative.clone());
        vars.insert("content", documented);
        let summary = self.services.ask(model, &SUMMARIZE_FILE, &vars).await?;
        Ok((summary.trim().to_string(), reused))
    }

    async fn collect_dependencies(&self, state: &mut DocumentState, task: &FileTask) {
        let Some(tool) = self
            .services
            .dependency_tools
            .get(&self.settings.legacy_language)
        else {
            return;
        };
        let root = state.traversal.root.clone();
        match tool
            .extract(&task.path, &root, self.services.env.as_ref())
            .await
        {
            Ok(Some(record)) => state.dependencies.merge(record),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(file = %task.relative, error = %e, "Dependency extraction failed")
            }
        }
    }

    async fn close_directory(
        &self,
        state: &mut DocumentState,
        dir: &DirectoryTask,
        ctx: &RunContext,
    ) -> razor_types::Result<()> {
        let children = state.summaries.remove(&dir.relative).unwrap_or_default();
        if !state.traversal.emit_readme {
            return Ok(());
        }

        let readme_rel = if dir.relative.is_empty() {
            "README.md".to_string()
        } else {
            format!("{}/README.md", dir.relative)
        };
        match self.write_readme(state, dir, &children).await {
            Ok(readme) => {
                ctx.emit(PipelineEvent::ReadmeWritten {
                    directory: dir.relative.clone(),
                });
                if !dir.is_root {
                    state
                        .summaries
                        .entry(parent_key(&dir.relative).to_string())
                        .or_default()
                        .push(FileSummary {
                            name: format!("{}/", dir.name),
                            summary: truncate_output(
                                &readme,
                                README_SUMMARY_CHARS,
                                TruncationMode::HeadTail,
                            ),
                        });
                }
                Ok(())
            }
            Err(e) if is_contained(&e) => {
                tracing::warn!(file = %readme_rel, error = %e, "README generation failed, continuing");
                state.failed_files.push(readme_rel.clone());
                ctx.emit(PipelineEvent::FileFailed {
                    file: readme_rel,
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn write_readme(
        &self,
        state: &DocumentState,
        dir: &DirectoryTask,
        children: &[FileSummary],
    ) -> razor_types::Result<String> {
        let env = self.services.env.as_ref();
        let target = state.docs_root.join(&dir.relative).join("README.md");
        if self.services.has_content(&target).await? {
            return env.read_file(&target).await;
        }

        let readme = if children.is_empty() {
            format!("# {}\n\nThis directory has no documented files.\n", dir.name)
        } else {
            let listing = children
                .iter()
                .map(|c| format!("- {}: {}", c.name, c.summary))
                .collect::<Vec<_>>()
                .join("\n");
            let mut vars = self.settings.prompt_vars();
            vars.insert(
                "directory",
                if dir.is_root {
                    dir.name.clone()
                } else {
                    dir.relative.clone()
                },
            );
            vars.insert("summaries", listing);
            self.services
                .ask(&self.settings.models.document, &DIRECTORY_README, &vars)
                .await?
        };
        env.write_file(&target, &readme).await?;
        tracing::debug!(directory = %dir.relative, "README written");
        Ok(readme)
    }
}

#[async_trait]
impl<'a> Stage for DocumentStage<'a> {
    type State = DocumentState;
    type Output = DocumentOutput;

    fn id(&self) -> StageId {
        StageId::Document
    }

    fn assess(&self, state: &DocumentState) -> Assessment {
        if state.traversal.is_finished() {
            Assessment::Complete
        } else {
            Assessment::Resume
        }
    }

    async fn run(
        &self,
        mut state: DocumentState,
        ctx: &RunContext,
        checkpointer: &Checkpointer,
    ) -> razor_types::Result<DocumentState> {
        let engine = TraversalEngine::new(&state.traversal)?;
        loop {
            let event = match engine.demand(&state.traversal)? {
                Demand::Done => break,
                Demand::Internal => Event::Tick,
                Demand::List { path } => {
                    let event = list_event(self.services.env.as_ref(), &path).await;
                    if let Event::Listed(Err(_)) = &event {
                        ctx.emit(PipelineEvent::ListingFailed {
                            path: path.display().to_string(),
                        });
                    }
                    event
                }
                Demand::Document(task) => {
                    self.document_file(&mut state, &task, ctx).await?;
                    Event::FileProcessed
                }
                Demand::Close(dir) => {
                    self.close_directory(&mut state, &dir, ctx).await?;
                    Event::DirectoryClosed
                }
            };
            state.traversal = engine.advance(&state.traversal, event)?;
            checkpointer.save(&state).await?;
        }

        tracing::info!(
            files = state.traversal.files_seen,
            directories = state.traversal.directories_seen,
            failed = state.failed_files.len(),
            listing_failures = state.traversal.listing_failures,
            "Documentation finished"
        );
        Ok(state)
    }

    fn output(&self, state: &DocumentState) -> razor_types::Result<DocumentOutput> {
        Ok(DocumentOutput {
            directory_structure: state.traversal.rendered.clone(),
            dependencies: state.dependencies.clone(),
            documented_files: state.documented_files.clone(),
            failed_files: state.failed_files.clone(),
            docs_root: state.docs_root.clone(),
        })
    }
}

fn file_name(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(_, name)| name).unwrap_or(relative)
}
