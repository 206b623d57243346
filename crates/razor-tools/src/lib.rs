//! Tool trait, file tools, dependency extractors, and execution environment
//! for debtrazor.
//!
//! Provides `Tool` trait, exact-match `ToolRegistry`, the fixed `ToolSet`
//! capability sets, `ExecutionEnvironment` trait with its local
//! implementation, per-language `DependencyTool`s, and the container
//! `Sandbox`.

pub mod builtin;
pub mod deps;
pub mod environment;
pub mod local_env;
pub mod sandbox;
pub mod tool;
pub mod toolsets;
pub mod truncation;

pub use builtin::{ReadFileTool, WriteFileTool};
pub use deps::{
    relative_id, DependencyRecord, DependencyTool, DependencyToolRegistry, MadgeTool,
    PythonImportScanner,
};
pub use environment::{shell_quote, DirEntry, ExecResult, ExecutionEnvironment};
pub use local_env::LocalExecutionEnvironment;
pub use sandbox::{DockerSandbox, Sandbox, SandboxHandle, SandboxOutput, VolumeBinding};
pub use tool::{confine_path, Tool, ToolDefinition, ToolRegistry};
pub use toolsets::ToolSet;
