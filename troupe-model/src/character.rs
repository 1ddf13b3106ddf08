use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The agent persona document.
///
/// Everything an agent "is" lives here: identity, biography, topical
/// interests, style guidance and free-form settings. The document is
/// mutated only through the modification service; unknown fields are
/// preserved across serde round-trips so newer documents survive older
/// hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Display name. Required, never empty in a valid document.
    pub name: String,

    /// System prompt backing the persona.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Biography, either one string or a list of entries.
    #[serde(default, skip_serializing_if = "Bio::is_empty")]
    pub bio: Bio,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjectives: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lore: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_examples: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,

    /// Free-form runtime settings; may contain a nested `"secrets"` object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,

    /// Static secret configuration (API keys and the like).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Map<String, Value>>,

    /// Fields this host does not model, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Character {
    /// Creates a minimal valid character with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks the document's structural invariants.
    ///
    /// Returns every violation found, not just the first: an empty name,
    /// empty biography entries, and empty strings inside any of the
    /// string-array fields (topics, adjectives, lore, post examples,
    /// style lists).
    pub fn validate_structure(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push("name must not be empty".to_string());
        }

        match &self.bio {
            Bio::Single(s) => {
                if s.trim().is_empty() && !s.is_empty() {
                    violations.push("bio must not be blank".to_string());
                }
            }
            Bio::List(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if entry.trim().is_empty() {
                        violations.push(format!("bio[{i}] must not be empty"));
                    }
                }
            }
        }

        check_entries(&mut violations, "topics", self.topics.as_deref());
        check_entries(&mut violations, "adjectives", self.adjectives.as_deref());
        check_entries(&mut violations, "lore", self.lore.as_deref());
        check_entries(&mut violations, "postExamples", self.post_examples.as_deref());

        if let Some(style) = &self.style {
            check_entries(&mut violations, "style.all", style.all.as_deref());
            check_entries(&mut violations, "style.chat", style.chat.as_deref());
            check_entries(&mut violations, "style.post", style.post.as_deref());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Looks up a secret value by key.
    ///
    /// Resolution order: the `secrets` map, then `settings.secrets`, then
    /// `settings` itself. Only string values count; anything else is
    /// skipped and the search continues.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.secrets.as_ref().and_then(|m| m.get(key)).and_then(Value::as_str) {
            return Some(v);
        }
        if let Some(v) = self
            .settings
            .as_ref()
            .and_then(|m| m.get("secrets"))
            .and_then(Value::as_object)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
        {
            return Some(v);
        }
        self.settings.as_ref().and_then(|m| m.get(key)).and_then(Value::as_str)
    }
}

fn check_entries(violations: &mut Vec<String>, field: &str, entries: Option<&[String]>) {
    let Some(entries) = entries else { return };
    for (i, entry) in entries.iter().enumerate() {
        if entry.trim().is_empty() {
            violations.push(format!("{field}[{i}] must not be empty"));
        }
    }
}

/// Biography text: one string or a list of entries.
///
/// Stored untagged so both JSON shapes (`"..."` and `["...", ...]`)
/// deserialize directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bio {
    Single(String),
    List(Vec<String>),
}

impl Default for Bio {
    fn default() -> Self {
        Bio::List(Vec::new())
    }
}

impl Bio {
    /// True when there is no biography text at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Bio::Single(s) => s.is_empty(),
            Bio::List(entries) => entries.is_empty(),
        }
    }

    /// Number of entries (a single string counts as one).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Bio::Single(_) => 1,
            Bio::List(entries) => entries.len(),
        }
    }

    /// Borrowed view of the entries.
    #[must_use]
    pub fn entries(&self) -> Vec<&str> {
        match self {
            Bio::Single(s) => vec![s.as_str()],
            Bio::List(entries) => entries.iter().map(String::as_str).collect(),
        }
    }

    /// Appends an entry, promoting a single string to a list first.
    pub fn push(&mut self, entry: String) {
        match self {
            Bio::Single(s) => {
                let first = std::mem::take(s);
                *self = Bio::List(vec![first, entry]);
            }
            Bio::List(entries) => entries.push(entry),
        }
    }
}

/// Per-channel style guidance lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Vec<String>>,
}
