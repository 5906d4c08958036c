use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::llm::GenerationRequest;

/// Taxonomy names offered to the model when extracting topics.
pub const PROMPT_TAXONOMY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct TopicsFile {
    #[serde(default)]
    topics: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    name: String,
}

/// Topic names from `config/topics.yaml`.
pub fn read_topic_taxonomy(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: TopicsFile = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file.topics.into_iter().map(|t| t.name).collect())
}

/// Like [`read_topic_taxonomy`], but a missing or unreadable file is an empty
/// taxonomy.
pub fn load_topic_taxonomy(path: &Path) -> Vec<String> {
    read_topic_taxonomy(path).unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "no topic taxonomy");
        Vec::new()
    })
}

const METADATA_SYSTEM: &str = "You are an expert at extracting structured metadata from technical blog posts. \
You understand AI, coding tools, software development, and thought leadership. Output only valid YAML.";

pub fn metadata_request(title: &str, author: &str, url: &str, content: &str, taxonomy: &[String]) -> GenerationRequest {
    let existing = taxonomy
        .iter()
        .take(PROMPT_TAXONOMY_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let user = format!(
        r#"Analyze this blog post and extract structured metadata for a knowledge base.

**Article Details:**
- Title: {title}
- Author: {author}
- URL: {url}

**Content:**
{content}

**Task:**
Extract the following information in YAML format:

1. **topics**: 3-5 main topics (choose from existing taxonomy when possible, or suggest new ones)
   Existing topics: {existing}

2. **key_quotes**: 2-4 impactful quotes from the article
   Each quote should have:
   - text: the exact quote
   - context: brief explanation of what they're discussing

3. **stance**: Author's position on mentioned tools/concepts
   Format: {{tool_name: positive|neutral|negative|critical}}
   Example: {{claude_code: positive, cursor: neutral}}

4. **evolution_note**: One sentence describing where this fits in their thought journey
   Focus on: Is this early exploration? Deep expertise? Paradigm shift?

5. **tags**: 3-6 relevant tags for filtering and search

**Output format (YAML only, no markdown):**
```yaml
topics:
  - Topic Name 1
  - Topic Name 2
key_quotes:
  - text: "Exact quote from article"
    context: "Brief context"
stance:
  tool_or_concept: positive|neutral|negative
evolution_note: "One sentence about thought evolution"
tags:
  - tag1
  - tag2
```

Important:
- Be precise with quotes (exact text from article)
- stance should only include tools/concepts actually discussed
- evolution_note should be insightful, not generic
- Use existing topic names when semantically equivalent
"#
    );
    GenerationRequest {
        system: METADATA_SYSTEM.to_string(),
        user,
        temperature: 0.3,
        max_tokens: 1000,
    }
}

const DIATAXIS_DEFINITIONS: &str = "The Diátaxis framework defines four types of documentation:

1. TUTORIAL (learning-oriented)
   - Teaches beginners through hands-on lessons
   - Step-by-step, building toward a goal
2. HOW-TO (task-oriented)
   - Solves a specific problem and assumes some knowledge
3. REFERENCE (information-oriented)
   - Describes the machinery: specifications, API docs
4. EXPLANATION (understanding-oriented)
   - Explains concepts, background, alternatives and trade-offs";

const CLASSIFY_SYSTEM: &str =
    "You are an expert at classifying technical content using the Diátaxis framework. Respond with exactly one word.";

pub fn classify_request(title: &str, author: Option<&str>, content: &str) -> GenerationRequest {
    let author_line = author
        .filter(|a| !a.trim().is_empty())
        .map(|a| format!("**Author:** {a}\n"))
        .unwrap_or_default();
    let user = format!(
        "{DIATAXIS_DEFINITIONS}

Analyze this article and classify it into ONE Diátaxis type.

**Article Title:** {title}
{author_line}
**Content Preview:**
{content}

Consider the article's primary purpose (teaching, solving, describing, explaining) and choose the best fit.

**Respond with ONLY one word:** tutorial, how-to, reference, or explanation
"
    );
    GenerationRequest {
        system: CLASSIFY_SYSTEM.to_string(),
        user,
        temperature: 0.1,
        max_tokens: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_loads_names_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.yaml");
        std::fs::write(&path, "topics:\n  - name: AI Agents\n  - name: Evaluation\n").unwrap();
        assert_eq!(load_topic_taxonomy(&path), vec!["AI Agents", "Evaluation"]);
        assert!(load_topic_taxonomy(&dir.path().join("missing.yaml")).is_empty());
    }

    #[test]
    fn taxonomy_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.yaml");
        std::fs::write(&path, "topics: [name: broken").unwrap();
        let err = read_topic_taxonomy(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
        assert!(format!("{err:#}").contains("topics.yaml"));
        assert!(load_topic_taxonomy(&path).is_empty());
    }

    #[test]
    fn metadata_prompt_lists_at_most_twenty_topics() {
        let taxonomy: Vec<String> = (0..30).map(|i| format!("T{i}")).collect();
        let req = metadata_request("t", "a", "u", "c", &taxonomy);
        assert!(req.user.contains("T19"));
        assert!(!req.user.contains("T20"));
        assert!(req.user.contains("{tool_name: positive|neutral|negative|critical}"));
    }

    #[test]
    fn classify_prompt_omits_blank_author() {
        assert!(!classify_request("t", Some(" "), "c").user.contains("**Author:**"));
        assert!(classify_request("t", Some("Ann"), "c").user.contains("**Author:** Ann"));
    }
}
