use crate::error::{RepairError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Source of localized diagnostic templates and salvage names.
///
/// Templates use positional `{0}`, `{1}` placeholders.
pub trait Localizer {
    fn lookup(&self, key: &str) -> Option<&str>;

    /// Render `key` with `args`; unknown keys render as `key: args`
    fn render(&self, key: &str, args: &[String]) -> String {
        match self.lookup(key) {
            Some(template) => fill_template(template, args),
            None if args.is_empty() => key.to_string(),
            None => format!("{key}: {}", args.join(", ")),
        }
    }

    fn text(&self, key: &str) -> String {
        self.lookup(key).unwrap_or(key).to_string()
    }

    /// Human label for a rule shown in progress reports
    fn rule_label(&self, rule: &str) -> String {
        self.lookup(&format!("label.{rule}"))
            .map(str::to_string)
            .unwrap_or_else(|| rule.replace('_', " "))
    }
}

fn fill_template(template: &str, args: &[String]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").unwrap());

    re.replace_all(template, |caps: &regex::Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| args.get(i))
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

const ENGLISH: &[(&str, &str)] = &[
    ("salvaged_category_name", "Salvage Area"),
    ("salvaged_board_name", "Salvaged Topics"),
    (
        "salvaged_board_description",
        "Topics created for messages with non-existent topics",
    ),
    ("salvaged_poll_topic_name", "Salvaged Poll"),
    (
        "salvaged_poll_message_body",
        "Poll question recovered during database repair.",
    ),
    ("zero_topics", "There are {0} topics with a topic id of zero."),
    ("zero_messages", "There are {0} messages with a message id of zero."),
    (
        "missing_topic_for_message",
        "Message #{0} is linked to non-existent topic #{1}.",
    ),
    ("missing_messages", "Topic #{0} contains no (actual) posts."),
    ("polls_missing_topics", "Poll #{0} is not attached to any topic."),
    (
        "poll_options_missing_poll",
        "Poll #{0} has {1} options but the poll itself is missing.",
    ),
    ("missing_polls", "Topic #{0} is tied to non-existent poll #{1}."),
    (
        "stats_topics",
        "The first or last message of topic #{0} is incorrect.",
    ),
    (
        "stats_topics2",
        "Topic #{0} has the wrong number of replies, {1}. It should be {2}.",
    ),
    (
        "stats_topics3",
        "Topic #{0} has the wrong number of unapproved posts, {1}. It should be {2}.",
    ),
    ("missing_boards", "Topic #{0} is in board #{1}, which is missing."),
    (
        "missing_categories",
        "Board #{0} is in category #{1}, which is missing.",
    ),
    (
        "missing_posters",
        "Message #{0} was posted by member #{1}, who is now missing.",
    ),
    (
        "missing_parents",
        "Board #{0} is a child of board #{1}, which is missing.",
    ),
    (
        "missing_calendar_topics",
        "Event #{0} is tied to topic #{1}, which is missing.",
    ),
    (
        "missing_log_topics",
        "Topic #{0} is marked as read for one or more people, but does not exist.",
    ),
    (
        "missing_log_topics_members",
        "Member #{0} has marked one or more topics as read, but does not exist.",
    ),
    (
        "missing_log_boards",
        "Board #{0} is marked as read for one or more people, but does not exist.",
    ),
    (
        "missing_log_boards_members",
        "Member #{0} has marked one or more boards as read, but does not exist.",
    ),
    (
        "missing_log_mark_read",
        "Board #{0} is marked as read for one or more people, but does not exist.",
    ),
    (
        "missing_notify_members",
        "Notifications have been requested by member #{0} who no longer exists.",
    ),
    (
        "missing_pms",
        "Personal message #{0} has been sent to one or more people, but does not exist.",
    ),
    (
        "missing_recipients",
        "Member #{0} has received one or more personal messages, but does not exist.",
    ),
    (
        "missing_senders",
        "Personal message #{0} was sent by member #{1}, who is now missing.",
    ),
    (
        "missing_cached_subject",
        "The subject of topic #{0} is not stored in the subject cache.",
    ),
    (
        "missing_topic_for_cache",
        "The search cache holds {1} words for non-existent topic #{0}.",
    ),
    (
        "missing_member_vote",
        "Member #{0} has voted in one or more polls, but does not exist.",
    ),
    (
        "missing_log_poll_vote",
        "Votes were cast on poll #{0}, which no longer exists.",
    ),
    (
        "report_missing_comments",
        "Report #{0} of subject \"{1}\" is missing its comments.",
    ),
    (
        "comments_missing_report",
        "Report comment #{0} submitted by member #{1} has no associated report.",
    ),
    (
        "group_request_missing_member",
        "A group join request exists for deleted member #{0}.",
    ),
    (
        "group_request_missing_group",
        "A group join request exists for deleted group #{0}.",
    ),
];

/// In-memory template table, English by default
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    entries: HashMap<String, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::english()
    }
}

impl MessageCatalog {
    pub fn english() -> Self {
        Self {
            entries: ENGLISH
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Layer a JSON object of `{key: template}` over the current entries
    pub fn with_overrides_file(mut self, path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let overrides: HashMap<String, String> =
            serde_json::from_slice(&data).map_err(|err| RepairError::Parse(err.to_string()))?;
        self.entries.extend(overrides);
        Ok(self)
    }

    pub fn insert(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.entries.insert(key.into(), template.into());
    }
}

impl Localizer for MessageCatalog {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_positional_args() {
        let catalog = MessageCatalog::english();
        let rendered = catalog.render(
            "missing_topic_for_message",
            &["12".to_string(), "77".to_string()],
        );
        assert_eq!(rendered, "Message #12 is linked to non-existent topic #77.");
    }

    #[test]
    fn test_missing_key_and_arg_fallbacks() {
        let catalog = MessageCatalog::english();
        assert_eq!(catalog.render("no_such_rule", &["1".to_string()]), "no_such_rule: 1");
        assert_eq!(fill_template("a {0} b {3}", &["x".to_string()]), "a x b {3}");
        assert_eq!(catalog.rule_label("missing_log_topics"), "missing log topics");
    }

    #[test]
    fn test_overrides_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            r#"{"salvaged_board_name": "Gerettete Themen", "label.stats_topics": "Themenstatistik"}"#,
        )
        .unwrap();

        let catalog = MessageCatalog::english()
            .with_overrides_file(file.path())
            .unwrap();
        assert_eq!(catalog.text("salvaged_board_name"), "Gerettete Themen");
        assert_eq!(catalog.text("salvaged_category_name"), "Salvage Area");
        assert_eq!(catalog.rule_label("stats_topics"), "Themenstatistik");
    }
}
