//! Prompt templates for Studycast.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub extraction: ExtractionPrompts,
    pub analysis: AnalysisPrompts,
    pub gap_review: GapReviewPrompts,
    pub script: ScriptPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for topic extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPrompts {
    pub system: String,
    pub user: String,
}

impl Default for ExtractionPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a study assistant analyzing a student's recorded study session.
Your task is to list the discrete subject-matter topics the student worked on."#
                .to_string(),

            user: r#"Extract the discrete topics discussed in this study session transcript.

Rules:
- Keep topics concise (e.g. "cardiac output", "types of skin cancer", "histamine signaling")
- Avoid duplicates and overly broad groupings
- Return one topic per line, no numbering, no commentary
- If no substantive topic is discussed, return nothing

Transcript:
---
{{transcript}}
---

Topics:"#
                .to_string(),
        }
    }
}

/// Prompts for student performance analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPrompts {
    pub system: String,
    pub user: String,
}

impl Default for AnalysisPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are an education expert reviewing a student's self-guided study session."#
                .to_string(),

            user: r#"Analyze this transcript for the learner's performance across the topics listed.
Identify strengths, weaknesses, knowledge gaps and opportunities for improvement in a
detailed but concise summary.

Transcript:
---
{{transcript}}
---

Topics:
{{topics}}

Summary:"#
                .to_string(),
        }
    }
}

/// Prompts for the gap review that follows performance analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapReviewPrompts {
    pub system: String,
    pub user: String,
}

impl Default for GapReviewPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a medical expert with deep understanding of the complexities of medicine.
You review an educational evaluation of a medical student's study session that outlines
pitfalls, mistakes and gaps in knowledge."#
                .to_string(),

            user: r#"Supply detailed, comprehensive information addressing the gaps in the evaluation
below, so the student can answer similar questions correctly in the future. Also reinforce
the topics the student answered correctly, to aid spaced repetition.

Use only the reference context to support your answer. Reply in plain text with no extra
formatting.

Topics:
{{topics}}

Evaluation:
---
{{performance}}
---

Reference context:
---
{{facts}}
---

Transcript:
---
{{transcript}}
---

Explanations:"#
                .to_string(),
        }
    }
}

/// Prompts for narration script generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPrompts {
    pub system: String,
    pub user: String,
}

impl Default for ScriptPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are the host of an educational review podcast. You teach one topic per
segment to a student who recently completed a self-guided study session.

Guidelines:
- Use only the factual context you are given; do not add facts that are not in it
- Be friendly but focused, clear and concise
- Structure the segment as a brief intro, the core teaching, and a single key takeaway
- Write plain spoken prose with no headings, lists or stage directions"#
                .to_string(),

            user: r#"Topic: {{topic}}

Student performance notes (use these to pick tone and focus):
{{performance}}
{{gap_review}}

Previously covered topic: {{previous_topic}}
{{previous_facts}}

Factual context (trusted retrieval output):
---
{{facts}}
---

Write a 2-5 minute segment (about 300-600 words). Start your segment below:"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let extraction_path = custom_path.join("extraction.toml");
            if extraction_path.exists() {
                let content = std::fs::read_to_string(&extraction_path)?;
                prompts.extraction = toml::from_str(&content)?;
            }

            let analysis_path = custom_path.join("analysis.toml");
            if analysis_path.exists() {
                let content = std::fs::read_to_string(&analysis_path)?;
                prompts.analysis = toml::from_str(&content)?;
            }

            let gap_review_path = custom_path.join("gap_review.toml");
            if gap_review_path.exists() {
                let content = std::fs::read_to_string(&gap_review_path)?;
                prompts.gap_review = toml::from_str(&content)?;
            }

            let script_path = custom_path.join("script.toml");
            if script_path.exists() {
                let content = std::fs::read_to_string(&script_path)?;
                prompts.script = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.extraction.user.contains("{{transcript}}"));
        assert!(prompts.script.user.contains("{{facts}}"));
        assert!(!prompts.analysis.system.is_empty());
        assert!(prompts.gap_review.user.contains("{{performance}}"));
        assert!(prompts.script.user.contains("{{gap_review}}"));
    }

    #[test]
    fn test_render_with_custom_prefers_call_variables() {
        let mut prompts = Prompts::default();
        prompts
            .variables
            .insert("audience".to_string(), "second-year students".to_string());
        prompts.variables.insert("topic".to_string(), "ignored".to_string());

        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), "nephrons".to_string());

        let result = prompts.render_with_custom("{{topic}} for {{audience}}", &vars);
        assert_eq!(result, "nephrons for second-year students");
    }

    #[test]
    fn test_load_custom_script_prompt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("script.toml"),
            "system = \"custom host\"\nuser = \"Teach {{topic}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.script.system, "custom host");
        assert!(prompts.extraction.user.contains("{{transcript}}"));
    }
}
