//! glob-style ignore rules from `.zetaignore` files, evaluated
//! bottom-up from the file's directory to the worktree root

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::repo::REPO_DIR;

/// per-directory ignore file name
pub const IGNORE_FILE: &str = ".zetaignore";

struct Rule {
    pattern: glob::Pattern,
    negated: bool,
    dir_only: bool,
    /// patterns containing a slash match relative to their file's
    /// directory; bare patterns match any basename
    anchored: bool,
}

fn parse_rules(content: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (negated, rest) = match line.strip_prefix('!') {
            Some(r) => (true, r),
            None => (false, line),
        };
        let (dir_only, rest) = match rest.strip_suffix('/') {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let anchored = rest.contains('/');
        let rest = rest.trim_start_matches('/');
        if let Ok(pattern) = glob::Pattern::new(rest) {
            rules.push(Rule {
                pattern,
                negated,
                dir_only,
                anchored,
            });
        }
    }
    rules
}

/// lazily loaded view of every ignore file relevant to a worktree
pub struct IgnoreMatcher {
    worktree: PathBuf,
    cache: RefCell<HashMap<PathBuf, Vec<Rule>>>,
}

impl IgnoreMatcher {
    pub fn new(worktree: &Path) -> Self {
        Self {
            worktree: worktree.to_path_buf(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// is a worktree-relative path ignored
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        if rel.is_empty() {
            return false;
        }
        // the repository directory is always invisible
        if rel == REPO_DIR || rel.starts_with(&format!("{}/", REPO_DIR)) {
            return true;
        }

        // a path inside an ignored directory is ignored
        let mut prefix_end = 0;
        while let Some(i) = rel[prefix_end..].find('/') {
            let dir = &rel[..prefix_end + i];
            if self.decide(dir, true) == Some(true) {
                return true;
            }
            prefix_end += i + 1;
        }

        self.decide(rel, is_dir).unwrap_or(false)
    }

    /// walk ignore files from the path's directory up to the root;
    /// the nearest file with a matching rule decides
    fn decide(&self, rel: &str, is_dir: bool) -> Option<bool> {
        let mut dirs: Vec<&str> = Vec::new();
        let mut end = rel.rfind('/');
        while let Some(i) = end {
            dirs.push(&rel[..i]);
            end = rel[..i].rfind('/');
        }
        dirs.push("");

        for dir in dirs {
            if let Some(verdict) = self.match_in_dir(dir, rel, is_dir) {
                return Some(verdict);
            }
        }
        None
    }

    fn match_in_dir(&self, dir: &str, rel: &str, is_dir: bool) -> Option<bool> {
        let file_dir = if dir.is_empty() {
            self.worktree.clone()
        } else {
            self.worktree.join(dir)
        };

        let mut cache = self.cache.borrow_mut();
        let rules = cache.entry(file_dir.clone()).or_insert_with(|| {
            std::fs::read_to_string(file_dir.join(IGNORE_FILE))
                .map(|c| parse_rules(&c))
                .unwrap_or_default()
        });
        if rules.is_empty() {
            return None;
        }

        // path relative to this ignore file's directory
        let local = if dir.is_empty() {
            rel
        } else {
            rel.strip_prefix(dir)?.trim_start_matches('/')
        };
        let basename = local.rsplit('/').next().unwrap_or(local);

        // last matching rule wins within one file
        let mut verdict = None;
        for rule in rules.iter() {
            if rule.dir_only && !is_dir {
                continue;
            }
            let subject = if rule.anchored { local } else { basename };
            if rule.pattern.matches(subject) {
                verdict = Some(!rule.negated);
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, IgnoreMatcher) {
        let dir = tempdir().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let matcher = IgnoreMatcher::new(dir.path());
        (dir, matcher)
    }

    #[test]
    fn test_basic_globs() {
        let (_dir, m) = setup(&[(IGNORE_FILE, "*.log\nbuild/\n")]);

        assert!(m.is_ignored("debug.log", false));
        assert!(m.is_ignored("nested/deep/error.log", false));
        assert!(m.is_ignored("build", true));
        assert!(m.is_ignored("build/output.bin", false));
        assert!(!m.is_ignored("src/main.rs", false));
        // dir-only pattern does not hit a file of the same name
        assert!(!m.is_ignored("build", false));
    }

    #[test]
    fn test_negation() {
        let (_dir, m) = setup(&[(IGNORE_FILE, "*.log\n!keep.log\n")]);

        assert!(m.is_ignored("a.log", false));
        assert!(!m.is_ignored("keep.log", false));
    }

    #[test]
    fn test_nested_file_wins() {
        let (_dir, m) = setup(&[
            (IGNORE_FILE, "*.tmp\n"),
            ("sub/.zetaignore", "!special.tmp\n"),
        ]);

        assert!(m.is_ignored("top.tmp", false));
        assert!(m.is_ignored("sub/other.tmp", false));
        // nearest file overrides the root
        assert!(!m.is_ignored("sub/special.tmp", false));
    }

    #[test]
    fn test_anchored_patterns() {
        let (_dir, m) = setup(&[(IGNORE_FILE, "docs/*.md\n")]);

        assert!(m.is_ignored("docs/readme.md", false));
        assert!(!m.is_ignored("other/readme.md", false));
        assert!(!m.is_ignored("readme.md", false));
    }

    #[test]
    fn test_repo_dir_always_ignored() {
        let (_dir, m) = setup(&[]);
        assert!(m.is_ignored(".zeta", true));
        assert!(m.is_ignored(".zeta/HEAD", false));
    }

    #[test]
    fn test_comments_and_blanks() {
        let (_dir, m) = setup(&[(IGNORE_FILE, "# comment\n\n*.o\n")]);
        assert!(m.is_ignored("x.o", false));
        assert!(!m.is_ignored("# comment", false));
    }
}
