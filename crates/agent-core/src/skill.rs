//! Skills
//!
//! A skill is a directory holding a `SKILL.md` manifest (optional `---`
//! frontmatter with `name` and `description`, then a markdown body) plus
//! optional `scripts/`, `templates/` and `assets/` folders.
//!
//! [`SkillScanner`] walks a fixed list of roots concurrently, one task per
//! root, and merges everything into an immutable [`SkillCatalog`].

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};

/// Manifest file name inside a skill directory
pub const MANIFEST_FILE: &str = "SKILL.md";

/// Queue capacity shared by all scan workers
const SCAN_QUEUE_CAPACITY: usize = 100;

/// Description fallback length limit
const MAX_DESCRIPTION_CHARS: usize = 200;

/// A cataloged skill
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Skill directory (absolute when scanned from absolute roots)
    pub path: PathBuf,
    /// Manifest body after the frontmatter
    pub body: String,
    /// SHA-256 of the whole manifest, hex encoded
    pub hash: String,
}

impl Skill {
    /// Parse a manifest. `dir_name` is used when the frontmatter has no name.
    pub fn parse(path: impl Into<PathBuf>, dir_name: &str, raw: &str) -> Self {
        let (frontmatter, body) = split_frontmatter(raw);

        let mut name = None;
        let mut description = None;
        if let Some(yaml) = frontmatter {
            for line in yaml.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = unquote(value.trim());
                if value.is_empty() {
                    continue;
                }
                match key.trim() {
                    "name" => name = Some(value),
                    "description" => description = Some(value),
                    _ => {}
                }
            }
        }

        Self {
            name: name.unwrap_or_else(|| dir_name.to_string()),
            description: description.unwrap_or_else(|| first_paragraph_line(&body)),
            path: path.into(),
            hash: hex::encode(Sha256::digest(raw.as_bytes())),
            body,
        }
    }

    /// Read and parse `<dir>/SKILL.md`
    pub async fn load(dir: &Path) -> Result<Self> {
        let manifest = dir.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&manifest)
            .await
            .map_err(|e| AgentError::Skill(format!("{}: {}", manifest.display(), e)))?;
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::parse(dir, &dir_name, &raw))
    }
}

fn split_frontmatter(raw: &str) -> (Option<&str>, String) {
    let trimmed = raw.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return (None, raw.to_string());
    };
    let rest = rest.strip_prefix('\r').unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    match rest.find("\n---") {
        Some(end) => {
            let body = &rest[end + 4..];
            let body = body.split_once('\n').map_or("", |(_, tail)| tail);
            (Some(&rest[..end]), body.trim_start_matches('\n').to_string())
        }
        None => (None, raw.to_string()),
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn first_paragraph_line(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.chars().take(MAX_DESCRIPTION_CHARS).collect())
        .unwrap_or_default()
}

/// Immutable snapshot of discovered skills
#[derive(Clone, Debug, Default)]
pub struct SkillCatalog {
    skills: BTreeMap<String, Skill>,
    /// Roots that were scanned, in priority order
    roots: Vec<PathBuf>,
}

impl SkillCatalog {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            skills: BTreeMap::new(),
            roots,
        }
    }

    /// Insert unless a skill of the same name is already present.
    /// Returns whether the skill was added.
    pub fn insert(&mut self, skill: Skill) -> bool {
        if self.skills.contains_key(&skill.name) {
            return false;
        }
        self.skills.insert(skill.name.clone(), skill);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// name → description map offered to the selector
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.skills
            .values()
            .map(|s| (s.name.clone(), s.description.trim().to_string()))
            .collect()
    }
}

/// Concurrent skill directory scanner
#[derive(Clone, Debug)]
pub struct SkillScanner {
    roots: Vec<PathBuf>,
}

impl SkillScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Scanner over the standard roots for `cwd` and the user's home
    pub fn with_default_roots(cwd: &Path) -> Self {
        Self::new(default_roots(cwd, dirs::home_dir().as_deref()))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Scan every root concurrently. Missing roots and unreadable entries are
    /// skipped; the first skill seen for a name wins.
    pub async fn scan(&self) -> SkillCatalog {
        let (tx, mut rx) = mpsc::channel::<Skill>(SCAN_QUEUE_CAPACITY);

        let workers: Vec<_> = self
            .roots
            .iter()
            .cloned()
            .map(|root| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = scan_root(&root, tx).await {
                        tracing::warn!(root = %root.display(), error = %e, "skill scan failed");
                    }
                })
            })
            .collect();
        drop(tx);

        let mut catalog = SkillCatalog::new(self.roots.clone());
        while let Some(skill) = rx.recv().await {
            let name = skill.name.clone();
            if !catalog.insert(skill) {
                tracing::debug!(skill = %name, "duplicate skill ignored");
            }
        }

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "skill scan worker aborted");
            }
        }

        tracing::debug!(count = catalog.len(), "skill scan complete");
        catalog
    }
}

async fn scan_root(root: &Path, tx: mpsc::Sender<Skill>) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }

        let dir = entry.path();
        if !tokio::fs::try_exists(dir.join(MANIFEST_FILE))
            .await
            .unwrap_or(false)
        {
            continue;
        }

        match Skill::load(&dir).await {
            Ok(skill) => {
                if tx.send(skill).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "skipping skill"),
        }
    }
    Ok(())
}

/// Standard roots in priority order
pub fn default_roots(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = vec![cwd.join(".claude/skills"), cwd.join(".skills")];
    if let Some(home) = home {
        for sub in [".claude", ".opencode", ".openai", ".codex"] {
            roots.push(home.join(sub).join("skills"));
        }
    }
    for sub in ["public", "user", "examples"] {
        roots.push(PathBuf::from("/mnt/skills").join(sub));
    }
    roots
}
