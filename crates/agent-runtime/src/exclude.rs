//! Paths the file tools refuse to expose.
//!
//! Rules come from a built-in list of secret and VCS files plus every
//! `.<name>ignore` file in the working directory, in gitignore-like syntax:
//! `#` comments, `!` negation, leading and trailing `/` ignored. A rule
//! matches a path when its glob matches the whole path or any single
//! component of it. The last matching rule decides.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

/// Always applied, before any ignore file
pub const DEFAULT_EXCLUDES: [&str; 10] = [
    ".git",
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "id_rsa*",
    "id_ed25519*",
    "id_ecdsa*",
    ".netrc",
];

struct Rule {
    matcher: GlobMatcher,
    negate: bool,
}

/// Ordered exclude rules
#[derive(Default)]
pub struct Excludes {
    rules: Vec<Rule>,
}

impl std::fmt::Debug for Excludes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Excludes")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Excludes {
    /// Defaults plus the ignore files found directly in `work_dir`
    pub fn load(work_dir: &Path) -> Self {
        let mut excludes = Self::from_lines(DEFAULT_EXCLUDES);

        let Ok(entries) = std::fs::read_dir(work_dir) else {
            return excludes;
        };
        let mut ignore_files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.') && n.ends_with("ignore"))
            })
            .collect();
        ignore_files.sort();

        for path in ignore_files {
            match std::fs::read_to_string(&path) {
                Ok(raw) => excludes.extend(raw.lines()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping ignore file");
                }
            }
        }
        excludes
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut excludes = Self::default();
        excludes.extend(lines);
        excludes
    }

    fn extend<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        self.rules.extend(lines.into_iter().filter_map(parse_line));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let mut excluded = false;
        for rule in &self.rules {
            let hit = rule.matcher.is_match(path)
                || path
                    .components()
                    .any(|c| rule.matcher.is_match(Path::new(c.as_os_str())));
            if hit {
                excluded = !rule.negate;
            }
        }
        excluded
    }
}

fn parse_line(raw: &str) -> Option<Rule> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (negate, line) = match line.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let line = line.trim_start_matches('/').trim_end_matches('/');
    if line.is_empty() {
        return None;
    }

    match GlobBuilder::new(line).literal_separator(true).build() {
        Ok(glob) => Some(Rule {
            matcher: glob.compile_matcher(),
            negate,
        }),
        Err(e) => {
            tracing::debug!(pattern = line, error = %e, "ignoring invalid exclude pattern");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_secrets() {
        let excludes = Excludes::from_lines(DEFAULT_EXCLUDES);
        assert!(excludes.is_excluded(Path::new("/work/.env")));
        assert!(excludes.is_excluded(Path::new("/work/.env.production")));
        assert!(excludes.is_excluded(Path::new("/work/.git/config")));
        assert!(excludes.is_excluded(Path::new("certs/server.pem")));
        assert!(excludes.is_excluded(Path::new("/home/u/.ssh/id_rsa.pub")));
        assert!(!excludes.is_excluded(Path::new("/work/src/env.rs")));
        assert!(!excludes.is_excluded(Path::new("/work/.gitignore")));
    }

    #[test]
    fn test_negation_and_comments() {
        let excludes = Excludes::from_lines(["# build output", "/target/", "*.log", "!keep.log", ""]);
        assert_eq!(excludes.len(), 3);
        assert!(excludes.is_excluded(Path::new("target/debug/app")));
        assert!(excludes.is_excluded(Path::new("logs/run.log")));
        assert!(!excludes.is_excluded(Path::new("logs/keep.log")));

        let nested = Excludes::from_lines(["docs/*.pdf"]);
        assert!(nested.is_excluded(Path::new("docs/report.pdf")));
        assert!(!nested.is_excluded(Path::new("docs/notes/report.pdf")));
    }

    #[test]
    fn test_load_reads_ignore_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "secrets/\n").unwrap();
        std::fs::write(tmp.path().join(".dockerignore"), "*.tar\n").unwrap();

        let excludes = Excludes::load(tmp.path());
        assert_eq!(excludes.len(), DEFAULT_EXCLUDES.len() + 2);
        assert!(excludes.is_excluded(Path::new("secrets/db.txt")));
        assert!(excludes.is_excluded(Path::new("image.tar")));
        assert!(!excludes.is_excluded(Path::new("README.md")));
    }
}
