//! Best-effort name resolution across a repository's source files.
//!
//! No AST dependency: definitions are found with a line-prefix linear scan
//! adapted to Python's `def`/`class` syntax.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Max chars returned for a single resolved snippet.
const MAX_SNIPPET_CHARS: usize = 5000;

pub struct SymbolIndex {
    files: Vec<PathBuf>,
    cache: HashMap<String, Option<(PathBuf, String)>>,
}

impl SymbolIndex {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            cache: HashMap::new(),
        }
    }

    /// Resolve `name` to its defining (or, failing that, referencing)
    /// source snippet. Returns `None` on a miss — not an error.
    pub fn resolve(&mut self, name: &str) -> Option<(PathBuf, String)> {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let mut reference_fallback: Option<(PathBuf, String)> = None;

        for file in self.files.clone() {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };

            if let Some(snippet) = find_definition(&content, name) {
                let result = (file, truncate(snippet));
                self.cache.insert(name.to_string(), Some(result.clone()));
                return Some(result);
            }

            if reference_fallback.is_none()
                && let Some(line) = find_reference(&content, name)
            {
                reference_fallback = Some((file.clone(), truncate(line)));
            }
        }

        self.cache
            .insert(name.to_string(), reference_fallback.clone());
        reference_fallback
    }
}

/// Locate a `def name(...)` or `class name(...)`/`class name:` and return
/// the enclosing block: from the definition line to the next line at the
/// same or lower indentation, or end of file.
fn find_definition(content: &str, name: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let def_prefix = format!("def {name}(");
    let class_prefix1 = format!("class {name}(");
    let class_prefix2 = format!("class {name}:");

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let is_match = trimmed.starts_with(&def_prefix)
            || trimmed.starts_with(&class_prefix1)
            || trimmed.starts_with(&class_prefix2);
        if !is_match {
            continue;
        }

        let mut end = lines.len();
        for (j, later) in lines.iter().enumerate().skip(i + 1) {
            if later.trim().is_empty() {
                continue;
            }
            let later_indent = later.len() - later.trim_start().len();
            if later_indent <= indent {
                end = j;
                break;
            }
        }
        return Some(lines[i..end].join("\n"));
    }
    None
}

/// Fall back to a bare syntactic reference site (first line containing
/// the name as a call or attribute access).
fn find_reference(content: &str, name: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line.contains(name))
        .map(|line| line.to_string())
}

fn truncate(s: String) -> String {
    if s.len() <= MAX_SNIPPET_CHARS {
        s
    } else {
        let mut out = s[..MAX_SNIPPET_CHARS].to_string();
        out.push_str("\n... [truncated]");
        out
    }
}

#[allow(dead_code)]
fn is_python_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "py")
}
