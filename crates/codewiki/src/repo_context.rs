//! Repository context helpers for topic identification.
//!
//! Trims the raw file tree down to what a reader of the source cares about
//! (no vendored dependencies, build output, lockfiles, or binary assets),
//! locates the README and root manifests, and renders the tree as indented
//! text for a prompt.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Paths excluded from every analysis.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/vendor/**",
    "**/third_party/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/.next/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/go.sum",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.map",
    "**/*.{png,jpg,jpeg,gif,bmp,ico,svg,webp,tiff,psd}",
    "**/*.{woff,woff2,ttf,otf,eot}",
    "**/*.{zip,tar,gz,tgz,bz2,xz,7z,rar,jar,war}",
    "**/*.{exe,dll,so,dylib,a,o,obj,bin,class,pyc,wasm}",
    "**/*.{mp3,mp4,wav,mov,avi,pdf}",
];

/// Root-level files that describe how a project is built.
const MANIFEST_NAMES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "Gemfile",
    "composer.json",
    "CMakeLists.txt",
    "Makefile",
    "Dockerfile",
];

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Exclusion filter plus an entry cap for file trees.
pub struct TreeFilter {
    exclude: GlobSet,
    max_entries: usize,
}

impl TreeFilter {
    pub fn new(extra_excludes: &[String], max_entries: usize) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(extra_excludes.iter().cloned());
        Ok(Self {
            exclude: build_globset(&patterns)?,
            max_entries,
        })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude.is_match(path)
    }

    /// Drop excluded paths, sort, and cap the list at `max_entries`.
    pub fn filter_tree(&self, paths: Vec<String>) -> Vec<String> {
        let mut kept: Vec<String> = paths.into_iter().filter(|p| !self.is_excluded(p)).collect();
        kept.sort();
        kept.dedup();
        if kept.len() > self.max_entries {
            tracing::debug!(total = kept.len(), cap = self.max_entries, "file tree truncated");
            kept.truncate(self.max_entries);
        }
        kept
    }
}

fn is_root(path: &str) -> bool {
    !path.contains('/')
}

/// The root README, preferring markdown.
pub fn find_readme(paths: &[String]) -> Option<String> {
    let mut candidates: Vec<&String> = paths
        .iter()
        .filter(|p| is_root(p) && p.to_ascii_lowercase().starts_with("readme"))
        .collect();
    candidates.sort_by_key(|p| {
        let lower = p.to_ascii_lowercase();
        match lower.as_str() {
            "readme.md" => 0,
            "readme" | "readme.markdown" => 1,
            "readme.rst" | "readme.txt" => 2,
            _ => 3,
        }
    });
    candidates.first().map(|p| p.to_string())
}

/// Root-level manifests, in tree order.
pub fn find_manifests(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|p| is_root(p) && MANIFEST_NAMES.contains(&p.as_str()))
        .cloned()
        .collect()
}

/// Render sorted paths as an indented tree, directories suffixed with `/`.
///
/// ```rust
/// use codewiki::repo_context::render_tree;
///
/// let tree = render_tree(&["src/main.rs".to_string(), "src/util/io.rs".to_string()]);
/// assert_eq!(tree, "src/\n  main.rs\n  util/\n    io.rs\n");
/// ```
pub fn render_tree(paths: &[String]) -> String {
    let mut out = String::new();
    let mut prev: Vec<&str> = Vec::new();

    for path in paths {
        let parts: Vec<&str> = path.split('/').collect();
        let (dirs, file) = parts.split_at(parts.len() - 1);

        let shared = prev
            .iter()
            .zip(dirs)
            .take_while(|(a, b)| a == b)
            .count();
        for (depth, dir) in dirs.iter().enumerate().skip(shared) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(dir);
            out.push_str("/\n");
        }
        out.push_str(&"  ".repeat(dirs.len()));
        out.push_str(file[0]);
        out.push('\n');

        prev = dirs.to_vec();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_excludes_vendored_and_assets() {
        let filter = TreeFilter::new(&[], 100).unwrap();
        let kept = filter.filter_tree(paths(&[
            "src/main.rs",
            "node_modules/x/index.js",
            "web/node_modules/y.js",
            "Cargo.lock",
            "docs/logo.png",
            "target/debug/app",
            "README.md",
        ]));
        assert_eq!(kept, paths(&["README.md", "src/main.rs"]));
    }

    #[test]
    fn test_filter_extra_excludes_and_cap() {
        let filter = TreeFilter::new(&["**/fixtures/**".to_string()], 2).unwrap();
        let kept = filter.filter_tree(paths(&["c.rs", "tests/fixtures/a.json", "a.rs", "b.rs"]));
        assert_eq!(kept, paths(&["a.rs", "b.rs"]));
    }

    #[test]
    fn test_find_readme_prefers_markdown() {
        let tree = paths(&["README.txt", "README.md", "docs/README.md"]);
        assert_eq!(find_readme(&tree).as_deref(), Some("README.md"));
        assert_eq!(find_readme(&paths(&["docs/README.md"])), None);
    }

    #[test]
    fn test_find_manifests_root_only() {
        let tree = paths(&["Cargo.toml", "crates/a/Cargo.toml", "package.json", "src/lib.rs"]);
        assert_eq!(find_manifests(&tree), paths(&["Cargo.toml", "package.json"]));
    }

    #[test]
    fn test_render_tree_shares_prefixes() {
        let tree = render_tree(&paths(&["Cargo.toml", "src/a.rs", "src/b/c.rs", "src/d.rs"]));
        assert_eq!(tree, "Cargo.toml\nsrc/\n  a.rs\n  b/\n    c.rs\n  d.rs\n");
    }
}
