//! Path exclusion for the scanner and watcher
//!
//! Composition, in evaluation order: built-in deny list (VCS dirs, build
//! outputs, our own `.grepai` state) ∪ user patterns from the project config
//! ∪ `.gitignore` semantics rooted at the project root. Matching is relative
//! to the root; a trailing slash on a pattern means "the whole subtree".

use ::ignore::gitignore::{Gitignore, GitignoreBuilder};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Directories and files that are never indexed, regardless of user config.
const BUILTIN_PATTERNS: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".grepai/",
    "node_modules/",
    "target/",
    "build/",
    "dist/",
    "out/",
    "vendor/",
    "coverage/",
    "__pycache__/",
    ".idea/",
    ".vscode/",
    "*.min.js",
    "*.bundle.js",
    "*.map",
    "*.pyc",
    "*.o",
    "*.a",
    "*.so",
    "*.dylib",
    "*.exe",
];

/// Decides whether a root-relative path is excluded from indexing.
pub struct IgnoreMatcher {
    builtin: GlobSet,
    user: GlobSet,
    gitignore: Option<Gitignore>,
}

impl IgnoreMatcher {
    /// Build a matcher for `project_root`, merging built-ins, the user's
    /// `exclude` patterns, and the root `.gitignore` when present.
    pub fn new(project_root: &Path, user_patterns: &[String]) -> Result<Self> {
        let builtin = build_globset(BUILTIN_PATTERNS.iter().copied())?;
        let user = build_globset(user_patterns.iter().map(String::as_str))?;

        let gitignore_path = project_root.join(".gitignore");
        let gitignore = if gitignore_path.exists() {
            let mut builder = GitignoreBuilder::new(project_root);
            builder.add(&gitignore_path);
            Some(
                builder
                    .build()
                    .context("failed to compile .gitignore patterns")?,
            )
        } else {
            None
        };

        Ok(Self {
            builtin,
            user,
            gitignore,
        })
    }

    /// Matcher with built-ins only, for roots without config or .gitignore.
    pub fn builtin_only() -> Result<Self> {
        Ok(Self {
            builtin: build_globset(BUILTIN_PATTERNS.iter().copied())?,
            user: GlobSet::empty(),
            gitignore: None,
        })
    }

    /// Check a root-relative path. `is_dir` selects directory semantics for
    /// gitignore rules (`foo/` matches only directories).
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let normalized = rel_path.replace('\\', "/");
        let path = Path::new(&normalized);

        if self.matches_globset(&self.builtin, path, is_dir)
            || self.matches_globset(&self.user, path, is_dir)
        {
            return true;
        }

        if let Some(gi) = &self.gitignore {
            if gi.matched(path, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }

    fn matches_globset(&self, set: &GlobSet, path: &Path, is_dir: bool) -> bool {
        if set.is_match(path) {
            return true;
        }
        // A file inside an excluded directory is excluded too: test every
        // ancestor with directory semantics.
        if !is_dir {
            for ancestor in path.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if set.is_match(ancestor) {
                    return true;
                }
            }
        }
        false
    }
}

/// Compile glob patterns, translating the trailing-slash directory convention
/// into a bare directory-name glob (ancestors are checked separately).
fn build_globset<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = trimmed.trim_end_matches('/');
        // Patterns without a slash match at any depth.
        let expanded = if normalized.contains('/') {
            normalized.to_string()
        } else {
            format!("{{{n},**/{n}}}", n = normalized)
        };
        let glob = Glob::new(&expanded)
            .with_context(|| format!("invalid ignore pattern {:?}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("failed to build ignore glob set")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_patterns_exclude_vcs_and_build_dirs() {
        let matcher = IgnoreMatcher::builtin_only().unwrap();

        assert!(matcher.is_ignored(".git", true));
        assert!(matcher.is_ignored(".git/HEAD", false));
        assert!(matcher.is_ignored("node_modules/react/index.js", false));
        assert!(matcher.is_ignored("src/node_modules/pkg/a.js", false));
        assert!(matcher.is_ignored("target/debug/build.rs", false));
        assert!(matcher.is_ignored(".grepai/vectors.bin", false));
        assert!(matcher.is_ignored("app.min.js", false));

        assert!(!matcher.is_ignored("src/main.rs", false));
        assert!(!matcher.is_ignored("lib/targets.go", false));
    }

    #[test]
    fn test_user_patterns_are_merged() {
        let dir = TempDir::new().unwrap();
        let matcher =
            IgnoreMatcher::new(dir.path(), &["generated/".to_string(), "*.pb.go".to_string()])
                .unwrap();

        assert!(matcher.is_ignored("generated/api.go", false));
        assert!(matcher.is_ignored("proto/service.pb.go", false));
        assert!(!matcher.is_ignored("proto/service.go", false));
    }

    #[test]
    fn test_gitignore_semantics_rooted_at_project() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "secrets.yaml\n/tmp-cache/\n").unwrap();

        let matcher = IgnoreMatcher::new(dir.path(), &[]).unwrap();
        assert!(matcher.is_ignored("secrets.yaml", false));
        assert!(matcher.is_ignored("tmp-cache", true));
        assert!(!matcher.is_ignored("src/app.rs", false));
    }
}
