//! Repository walk and entry-point filter: narrows a repo's Python files
//! down to the ones that expose an externally reachable entry point.
//!
//! Uses `WalkDir` with a hidden/build-directory skip and a `fancy_regex`
//! pattern table. This filter's *precision* is explicitly not part of the
//! engine's correctness contract, so it is a replaceable trait
//! (`EntryPointFilter`) with one concrete implementation rather than
//! something the engine depends on directly.

use fancy_regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

const DEFAULT_EXCLUDES: &[&str] = &[
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    ".git",
    "site-packages",
    "dist-packages",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
];

/// Walk `repo_root`, returning every `.py` file not under an excluded
/// directory (a default set, extended with `extra_excludes` from
/// `Config::analysis.exclude_paths`).
pub fn walk_python_files(repo_root: &Path, extra_excludes: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(repo_root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().is_none_or(|e| e != "py") {
            continue;
        }
        let path_str = path.to_string_lossy();
        let excluded = DEFAULT_EXCLUDES
            .iter()
            .chain(extra_excludes.iter().map(|s| s.as_str()))
            .any(|ex| path_str.contains(&format!("/{ex}/")) || path_str.contains(&format!("\\{ex}\\")));
        if excluded {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    files
}

/// Honors `include_paths`/`exclude_paths` from config on top of the base
/// walk: if `include_paths` is non-empty, only files whose path contains
/// one of those substrings survive; `exclude_paths` always drops matches.
pub fn apply_path_filters(
    files: Vec<PathBuf>,
    include_paths: &[String],
    exclude_paths: &[String],
) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|f| {
            let s = f.to_string_lossy();
            let included = include_paths.is_empty() || include_paths.iter().any(|p| s.contains(p.as_str()));
            let excluded = exclude_paths.iter().any(|p| s.contains(p.as_str()));
            included && !excluded
        })
        .collect()
}

/// Replaceable entry-point detector. The one concrete implementation
/// pattern-matches common Python web-framework route decorators; a
/// different filter (or none at all) can be substituted without touching
/// the engine.
pub trait EntryPointFilter {
    fn exposes_entry_point(&self, source: &str) -> bool;
}

struct FrameworkPattern {
    #[allow(dead_code)]
    name: &'static str,
    regex: &'static str,
}

static FRAMEWORK_PATTERNS: &[FrameworkPattern] = &[
    FrameworkPattern {
        name: "flask-route",
        regex: r"@(?:app|blueprint|bp)\.route\s*\(",
    },
    FrameworkPattern {
        name: "fastapi-router",
        regex: r"@(?:app|router)\.(?:get|post|put|delete|patch|options|head)\s*\(",
    },
    FrameworkPattern {
        name: "django-path",
        regex: r"\bpath\s*\(\s*['\"][^'\"]*['\"]\s*,",
    },
    FrameworkPattern {
        name: "django-url",
        regex: r"\burl\s*\(\s*r?['\"]",
    },
    FrameworkPattern {
        name: "tornado-handler",
        regex: r"class\s+\w+\(.*RequestHandler.*\):",
    },
    FrameworkPattern {
        name: "grpc-servicer",
        regex: r"class\s+\w+Servicer(?:Base)?\b",
    },
    FrameworkPattern {
        name: "celery-task",
        regex: r"@(?:app|celery)\.task\s*\(",
    },
];

static COMPILED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FRAMEWORK_PATTERNS
        .iter()
        .map(|p| Regex::new(p.regex).expect("static entry-point pattern is valid"))
        .collect()
});

/// Default concrete filter: matches Flask/FastAPI/Django/Tornado/gRPC/
/// Celery decorator and class patterns against a backtrack-limited
/// `fancy_regex` pattern table.
pub struct FrameworkPatternFilter;

impl EntryPointFilter for FrameworkPatternFilter {
    fn exposes_entry_point(&self, source: &str) -> bool {
        COMPILED.iter().any(|re| re.is_match(source).unwrap_or(false))
    }
}

/// Narrow `files` to those whose contents match the entry-point filter.
/// Files that can't be read are dropped rather than erroring — discovery
/// is best-effort triage, not a correctness boundary.
pub fn filter_entry_point_files(files: Vec<PathBuf>, filter: &dyn EntryPointFilter) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|f| {
            std::fs::read_to_string(f)
                .map(|src| filter.exposes_entry_point(&src))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_tree(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "vulnhuntr-discovery-{}-{}",
            std::process::id(),
            files.len()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        for (rel, content) in files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        }
        dir
    }

    #[test]
    fn walk_skips_excluded_dirs_and_non_python() {
        let dir = write_temp_tree(&[
            ("app.py", "x = 1"),
            ("README.md", "hi"),
            ("__pycache__/app.cpython-311.pyc", "junk"),
            ("venv/lib/thing.py", "ignored"),
            ("src/routes.py", "x = 2"),
        ]);
        let files = walk_python_files(&dir, &[]);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(&dir).unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"app.py".to_string()));
        assert!(names.contains(&"src/routes.py".to_string()));
        assert!(!names.iter().any(|n| n.contains("venv")));
        assert!(!names.iter().any(|n| n.contains("__pycache__")));
    }

    #[test]
    fn flask_route_detected() {
        let filter = FrameworkPatternFilter;
        let src = "@app.route('/x')\ndef x():\n    return 'ok'\n";
        assert!(filter.exposes_entry_point(src));
    }

    #[test]
    fn fastapi_route_detected() {
        let filter = FrameworkPatternFilter;
        let src = "@router.get('/items/{id}')\nasync def get_item(id: int):\n    ...\n";
        assert!(filter.exposes_entry_point(src));
    }

    #[test]
    fn plain_module_not_detected() {
        let filter = FrameworkPatternFilter;
        let src = "def helper(x):\n    return x + 1\n";
        assert!(!filter.exposes_entry_point(src));
    }

    #[test]
    fn include_paths_restrict_to_matching_substrings() {
        let files = vec![PathBuf::from("app/routes.py"), PathBuf::from("app/models.py")];
        let filtered = apply_path_filters(files, &["routes".into()], &[]);
        assert_eq!(filtered, vec![PathBuf::from("app/routes.py")]);
    }

    #[test]
    fn exclude_paths_drop_matches() {
        let files = vec![PathBuf::from("app/routes.py"), PathBuf::from("tests/test_routes.py")];
        let filtered = apply_path_filters(files, &[], &["tests/".into()]);
        assert_eq!(filtered, vec![PathBuf::from("app/routes.py")]);
    }
}
