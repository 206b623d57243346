//! Prompt templates for every generation call the stages make.
//!
//! Templates use `${name}` placeholders rendered by [`expand_variables`].

use std::collections::HashMap;

/// A system/user template pair.
#[derive(Debug, Clone, Copy)]
pub struct Prompt {
    pub system: &'static str,
    pub user: &'static str,
}

impl Prompt {
    pub fn render(&self, vars: &HashMap<&str, String>) -> (String, String) {
        (
            expand_variables(self.system, vars),
            expand_variables(self.user, vars),
        )
    }
}

/// Replace `${name}` placeholders in one pass.
///
/// Substituted values are never rescanned, so generated code containing
/// `${...}` passes through untouched. Unknown names are left as written.
pub fn expand_variables(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Document stage
// ---------------------------------------------------------------------------

pub const DOCUMENT_FILE: Prompt = Prompt {
    system: "You are a senior ${legacy_language} engineer documenting a legacy ${legacy_framework} \
codebase ahead of a migration to ${new_language}. Return the complete file with thorough \
docstrings and comments added. Do not change behaviour. Reply with a single fenced code block.",
    user: "File: ${file}\n\n```\n${source}\n```",
};

pub const SUMMARIZE_FILE: Prompt = Prompt {
    system: "You summarize source files for engineers planning a migration. Reply with one short \
paragraph describing the file's responsibility and its public surface.",
    user: "File: ${file}\n\n${content}",
};

pub const DIRECTORY_README: Prompt = Prompt {
    system: "You write README.md files for directories of a ${legacy_language} codebase. Describe \
what the directory contains and how its parts fit together, based on the summaries given. \
Reply with Markdown only.",
    user: "Directory: ${directory}\n\nContents:\n${summaries}",
};

// ---------------------------------------------------------------------------
// Layout stage
// ---------------------------------------------------------------------------

pub const LAYOUT_PROPOSE: Prompt = Prompt {
    system: "You are a software architect migrating a ${legacy_language} (${legacy_framework}) \
project to ${new_language} (${new_framework}). The documented legacy sources are readable \
with the read_file tool, using paths relative to the documentation root. Propose the directory \
layout of the new project as a tree.",
    user: "Legacy layout:\n${legacy_structure}\n\nDependencies between legacy files:\n${dependencies}",
};

pub const LAYOUT_REVISE: Prompt = Prompt {
    system: "",
    user: "A reviewer responded to your proposed layout:\n\n${critique}\n\nRevise the layout accordingly and reply with the full tree.",
};

pub const LAYOUT_CRITIQUE: Prompt = Prompt {
    system: "You review proposed ${new_language} (${new_framework}) project layouts for a migration \
from ${legacy_language}. If the layout is idiomatic and complete, reply with the single word END. \
Otherwise list concrete changes.",
    user: "Legacy layout:\n${legacy_structure}\n\nProposed layout:\n${proposal}",
};

pub const LAYOUT_EXTRACT: Prompt = Prompt {
    system: "Extract the list of source files from a project layout. Reply with JSON of the form \
{\"files\": [\"relative/path\", ...]} and nothing else.",
    user: "${proposal}",
};

// ---------------------------------------------------------------------------
// Planning stage
// ---------------------------------------------------------------------------

pub const PLAN_DRAFT: Prompt = Prompt {
    system: "You plan the order in which a ${legacy_language} project is rewritten in \
${new_language} (${new_framework}). Each target file is written once, after every target file it \
depends on. For each target file name the legacy files it is derived from and the earlier target \
files it needs.",
    user: "Legacy layout:\n${legacy_structure}\n\nTarget layout:\n${new_structure}\n\nTarget files:\n${files}\n\nLegacy dependencies:\n${dependencies}",
};

pub const PLAN_STRUCTURE: Prompt = Prompt {
    system: "Convert a migration plan into JSON: {\"steps\": [{\"file_name\": \"...\", \
\"legacy_context\": [\"...\"], \"new_context\": [\"...\"], \"description\": \"...\"}]}. \
new_context may only list file_name values of earlier steps. Reply with JSON only.",
    user: "${draft}${feedback}",
};

// ---------------------------------------------------------------------------
// Migration stage
// ---------------------------------------------------------------------------

pub const STEP_PLAN: Prompt = Prompt {
    system: "You are migrating a ${legacy_language} project to ${new_language} (${new_framework}). \
Plan how to write one target file: the types, functions and behaviour it needs, and how it uses \
the files it depends on.",
    user: "Target file: ${file}\n\nDescription: ${description}\n\nTarget layout:\n${new_structure}\n\nLegacy sources:\n${legacy_context}\n\nEarlier target files:\n${new_context}",
};

pub const STEP_GENERATE: Prompt = Prompt {
    system: "You write ${new_language} (${new_framework}) code. Use read_file to inspect the legacy \
documentation (under ${legacy_dir}/) and already-migrated files (under ${new_dir}/). When done, \
reply with the complete contents of the target file in a single fenced code block.",
    user: "Target file: ${file}\n\nTarget layout:\n${new_structure}\n\nPlan:\n${file_plan}",
};

pub const STEP_WRITE: Prompt = Prompt {
    system: "You save generated files with the write_file tool. Paths are relative to the project root.",
    user: "Write the following content to ${file} exactly as given.\n\n${generated}",
};

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn expands_known_placeholders() {
        let v = vars(&[("name", "world"), ("n", "2")]);
        assert_eq!(expand_variables("Hello ${name} x${n}!", &v), "Hello world x2!");
    }

    #[test]
    fn unknown_placeholder_left_verbatim() {
        let v = vars(&[]);
        assert_eq!(expand_variables("a ${missing} b", &v), "a ${missing} b");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let v = vars(&[("code", "`${x}`"), ("x", "boom")]);
        assert_eq!(expand_variables("${code}", &v), "`${x}`");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        let v = vars(&[("a", "1")]);
        assert_eq!(expand_variables("${a} ${oops", &v), "1 ${oops");
    }

    #[test]
    fn prompt_renders_both_halves() {
        let v = vars(&[
            ("legacy_language", "python"),
            ("legacy_framework", "flask"),
            ("new_language", "rust"),
            ("file", "app.py"),
            ("source", "print(1)"),
        ]);
        let (system, user) = DOCUMENT_FILE.render(&v);
        assert!(system.contains("python engineer"));
        assert!(system.contains("to rust"));
        assert!(user.contains("print(1)"));
    }
}
