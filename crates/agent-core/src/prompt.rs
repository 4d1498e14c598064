//! Prompt Templates
//!
//! All fixed prompt text lives in [`PromptTemplates`], which is handed to the
//! orchestrator at construction time. The defaults are compiled in from
//! `prompts/*.md`; tests and embedders can swap any of them.

use std::path::Path;

use crate::skill::Skill;

/// Skill sub-folders whose relative references are rewritten to absolute paths
const SKILL_ASSET_DIRS: [&str; 3] = ["scripts/", "templates/", "assets/"];

/// Placeholder used when no skill matched
const NO_SKILL_DIR: &str = "None";

/// Placeholder used when the session has no persisted summary
const NO_SUMMARY: &str = "None yet.";

#[derive(Clone, Debug)]
pub struct PromptTemplates {
    /// Main system prompt with `{{...}}` placeholders
    pub system: String,
    /// Inserted at `{{skill_extension}}` when a skill matched
    pub skill_extension: String,
    pub skill_selector: String,
    pub agent_selector: String,
    /// User turn for the forced summary call
    pub summarize: String,
    /// Fixed fallback answer
    pub apology: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: include_str!("../prompts/system.md").to_string(),
            skill_extension: include_str!("../prompts/skill_extension.md").to_string(),
            skill_selector: include_str!("../prompts/skill_selector.md").to_string(),
            agent_selector: include_str!("../prompts/agent_selector.md").to_string(),
            summarize: include_str!("../prompts/summarize.md").trim().to_string(),
            apology: include_str!("../prompts/apology.md").trim().to_string(),
        }
    }
}

impl PromptTemplates {
    /// Render the system prompt for a run
    pub fn render_system(
        &self,
        work_dir: &Path,
        skill: Option<&Skill>,
        summary: Option<&serde_json::Value>,
    ) -> String {
        let (skill_dir, extension, content) = match skill {
            Some(skill) => (
                skill.path.display().to_string(),
                self.skill_extension.as_str(),
                resolve_skill_paths(&skill.body, &skill.path),
            ),
            None => (NO_SKILL_DIR.to_string(), "", String::new()),
        };

        let summary = summary
            .and_then(|s| serde_json::to_string_pretty(s).ok())
            .unwrap_or_else(|| NO_SUMMARY.to_string());

        self.system
            .replace("{{work_dir}}", &work_dir.display().to_string())
            .replace("{{skill_dir}}", &skill_dir)
            .replace("{{skill_extension}}", extension)
            .replace("{{session_summary}}", &summary)
            // last, so skill text containing braces is never re-expanded
            .replace("{{skill_content}}", &content)
    }
}

/// Rewrite `scripts/`, `templates/` and `assets/` references in a skill body to
/// absolute paths, for the folders that actually exist.
pub fn resolve_skill_paths(body: &str, skill_dir: &Path) -> String {
    let mut content = body.to_string();
    for prefix in SKILL_ASSET_DIRS {
        let resolved = skill_dir.join(prefix.trim_end_matches('/'));
        if resolved.is_dir() {
            let absolute = format!("{}{}", resolved.display(), std::path::MAIN_SEPARATOR);
            content = content.replace(prefix, &absolute);
        }
    }
    content
}
