//! Skill discovery.
//!
//! A skill is a directory holding a `SKILL.md` with a small frontmatter
//! header (`name:`, `description:`) and a markdown body. A body carrying a
//! `mermaid` flowchart block is a flow skill and also runs as `/flow:<name>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// How a skill can be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillKind {
    /// The body is injected as a user prompt.
    Standard,
    /// The body carries a flowchart the Soul walks.
    Flow,
}

/// A discovered skill.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name (slash command suffix).
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Path to the `SKILL.md` file.
    pub path: PathBuf,
    /// Standard or flow.
    pub kind: SkillKind,
}

impl Skill {
    /// Read the skill body (frontmatter stripped).
    pub async fn read_body(&self) -> Option<String> {
        let text = tokio::fs::read_to_string(&self.path).await.ok()?;
        Some(split_frontmatter(&text).1.trim().to_string())
    }

    /// Extract the flowchart source from a flow skill body.
    pub async fn read_flow_source(&self) -> Option<String> {
        let body = self.read_body().await?;
        extract_mermaid_block(&body)
    }
}

/// Split `---`-fenced frontmatter from the body.
fn split_frontmatter(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut header = BTreeMap::new();
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return (header, text);
    };
    let Some(end) = rest.find("\n---") else {
        return (header, text);
    };
    for line in rest[..end].lines() {
        if let Some((key, value)) = line.split_once(':') {
            header.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    let body = rest[end..].trim_start_matches("\n---");
    (header, body)
}

/// First fenced ```mermaid block of a body, if any.
fn extract_mermaid_block(body: &str) -> Option<String> {
    let start = body.find("```mermaid")?;
    let after = body[start..].trim_start_matches("```mermaid");
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

/// Discover skills under the working directory (`.amadeus/skills/`), the
/// share directory, and an optional override root.
pub async fn discover_skills(
    work_dir: &Path,
    override_root: Option<&Path>,
) -> BTreeMap<String, Skill> {
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(root) = override_root {
        roots.push(root.to_path_buf());
    }
    roots.push(work_dir.join(".amadeus").join("skills"));
    if let Ok(share) = std::env::var("AMADEUS_SHARE_DIR") {
        if !share.is_empty() {
            roots.push(PathBuf::from(share).join("skills"));
        }
    }

    let mut skills = BTreeMap::new();
    for root in roots {
        let Ok(mut dir) = tokio::fs::read_dir(&root).await else {
            continue;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let skill_md = entry.path().join("SKILL.md");
            let Ok(text) = tokio::fs::read_to_string(&skill_md).await else {
                continue;
            };
            let (header, body) = split_frontmatter(&text);
            let Some(name) = header.get("name").cloned() else {
                warn!(path = %skill_md.display(), "Skill missing `name`; skipping");
                continue;
            };
            if skills.contains_key(&name) {
                debug!(skill = %name, "Skill already registered; earlier root wins");
                continue;
            }
            let kind = if extract_mermaid_block(body).is_some() {
                SkillKind::Flow
            } else {
                SkillKind::Standard
            };
            skills.insert(
                name.clone(),
                Skill {
                    name,
                    description: header.get("description").cloned().unwrap_or_default(),
                    path: skill_md,
                    kind,
                },
            );
        }
    }
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir_name: &str, content: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    #[tokio::test]
    async fn test_discover_standard_and_flow() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(
            tmp.path(),
            "review",
            "---\nname: review\ndescription: Review the changes\n---\nLook at the diff.\n",
        );
        write_skill(
            tmp.path(),
            "release",
            "---\nname: release\ndescription: Cut a release\n---\n\
             ```mermaid\nflowchart TD\n  BEGIN --> T1\n  T1[tag it] --> END\n```\n",
        );

        let skills = discover_skills(Path::new("/nonexistent"), Some(tmp.path())).await;
        assert_eq!(skills.len(), 2);
        assert_eq!(skills["review"].kind, SkillKind::Standard);
        assert_eq!(skills["release"].kind, SkillKind::Flow);
        assert_eq!(skills["review"].description, "Review the changes");

        let body = skills["review"].read_body().await.unwrap();
        assert_eq!(body, "Look at the diff.");

        let flow = skills["release"].read_flow_source().await.unwrap();
        assert!(flow.starts_with("flowchart"));
    }

    #[tokio::test]
    async fn test_skill_without_name_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "anon", "---\ndescription: nameless\n---\nbody\n");
        let skills = discover_skills(Path::new("/nonexistent"), Some(tmp.path())).await;
        assert!(skills.is_empty());
    }

    #[test]
    fn test_frontmatter_absent() {
        let (header, body) = split_frontmatter("just a body");
        assert!(header.is_empty());
        assert_eq!(body, "just a body");
    }
}
