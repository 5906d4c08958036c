use serde_yaml::Value;

use crate::frontmatter::{key_quotes_from, scalar_string, stance_from, string_list};
use crate::{ArticleMetadata, MAX_KEY_QUOTES};

/// Coerce an arbitrary model reply into well-formed metadata.
///
/// Unknown stance values and incomplete quotes are dropped; everything else
/// is bounded and defaulted by [`ArticleMetadata::validated`].
pub fn validate_metadata(raw: &Value) -> ArticleMetadata {
    let Some(map) = raw.as_mapping() else {
        return ArticleMetadata::default().validated();
    };
    ArticleMetadata {
        topics: string_list(map.get("topics")),
        key_quotes: key_quotes_from(map.get("key_quotes"), MAX_KEY_QUOTES),
        stance: stance_from(map.get("stance")),
        evolution_note: scalar_string(map.get("evolution_note")).unwrap_or_default(),
        tags: string_list(map.get("tags")),
    }
    .validated()
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{Stance, DEFAULT_EVOLUTION_NOTE, DEFAULT_TOPIC, MAX_TAGS, MAX_TOPICS};

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn unknown_stance_values_are_dropped() {
        let meta = validate_metadata(&yaml(
            "topics: [AI]\nstance:\n  claude_code: positive\n  fake_tool: banana\n",
        ));
        assert_eq!(
            meta.stance,
            BTreeMap::from([("claude_code".to_string(), Stance::Positive)])
        );
    }

    #[test]
    fn empty_reply_gets_every_default() {
        let meta = validate_metadata(&yaml("{}"));
        assert_eq!(meta.topics, vec![DEFAULT_TOPIC]);
        assert_eq!(meta.tags, vec!["uncategorized"]);
        assert_eq!(meta.evolution_note, DEFAULT_EVOLUTION_NOTE);
        assert!(meta.key_quotes.is_empty());
        assert!(meta.stance.is_empty());
    }

    #[test]
    fn non_mapping_replies_are_treated_as_empty() {
        for raw in [Value::Null, yaml("[1, 2, 3]"), yaml("\"just a string\""), yaml("42")] {
            let meta = validate_metadata(&raw);
            assert_eq!(meta.topics, vec![DEFAULT_TOPIC], "{raw:?}");
        }
    }

    #[test]
    fn bounds_are_enforced() {
        let meta = validate_metadata(&yaml(
            r#"
topics: [a, b, c, d, e, f, g]
tags: [One Tag, two, three, four, five, six, seven, eight]
key_quotes:
  - {text: q1, context: c1}
  - {text: q2, context: c2}
  - {text: q3, context: c3}
  - {text: q4, context: c4}
  - {text: q5, context: c5}
evolution_note: "  A real note  "
"#,
        ));
        assert_eq!(meta.topics.len(), MAX_TOPICS);
        assert_eq!(meta.tags.len(), MAX_TAGS);
        assert_eq!(meta.tags[0], "one-tag");
        assert_eq!(meta.key_quotes.len(), 4);
        assert_eq!(meta.evolution_note, "A real note");
    }

    #[test]
    fn wrongly_typed_fields_fall_back() {
        let meta = validate_metadata(&yaml(
            "topics: 7\nkey_quotes: nope\nstance: [positive]\ntags: {a: b}\n",
        ));
        assert_eq!(meta.topics, vec![DEFAULT_TOPIC]);
        assert!(meta.key_quotes.is_empty());
        assert!(meta.stance.is_empty());
        assert_eq!(meta.tags, vec!["uncategorized"]);
    }

    #[test]
    fn normalize_tag_lowercases_and_hyphenates() {
        assert_eq!(normalize_tag("  Developer Tools "), "developer-tools");
        assert_eq!(normalize_tag("AI"), "ai");
    }
}
