//! The character diff language: a restricted, element-based textual format
//! describing modifications to a character document.
//!
//! ```text
//! <character-modification>
//!   <operations>
//!     <add path="bio[]" type="string">Learned a new skill</add>
//!     <modify path="system">You are a helpful assistant</modify>
//!     <delete path="topics[2]"/>
//!   </operations>
//!   <reasoning>User asked for a persona tweak</reasoning>
//!   <timestamp>2026-08-26T12:00:00Z</timestamp>
//! </character-modification>
//! ```
//!
//! The parser is hand-rolled: the grammar is tiny, values are text-only,
//! and we need behavior no general XML library gives us. Declarations
//! (`<!DOCTYPE ...>`, `<!ENTITY ...>`) and processing instructions are
//! stripped before structural parsing rather than honored, and entity
//! references other than the five standard escapes stay in values as
//! literal text. Nothing in a diff payload is ever expanded or executed.
//!
//! Every operation path is screened against a denylist before the diff is
//! accepted; see [`parse_diff`].

use crate::error::DiffError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// A parsed modification payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDiff {
    pub operations: Vec<DiffOperation>,
    pub reasoning: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CharacterDiff {
    /// An empty diff with the given reasoning.
    #[must_use]
    pub fn new(reasoning: impl Into<String>) -> Self {
        Self {
            operations: Vec::new(),
            reasoning: reasoning.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, op: DiffOperation) -> Self {
        self.operations.push(op);
        self
    }
}

/// One operation inside a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOperation {
    pub kind: OpKind,
    pub path: String,
    pub value: Option<String>,
    /// How the updater interprets `value`. Meaningless for deletes.
    pub value_type: ValueType,
}

impl DiffOperation {
    #[must_use]
    pub fn add(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Add,
            path: path.into(),
            value: Some(value.into()),
            value_type: ValueType::String,
        }
    }

    #[must_use]
    pub fn modify(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Modify,
            path: path.into(),
            value: Some(value.into()),
            value_type: ValueType::String,
        }
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Delete,
            path: path.into(),
            value: None,
            value_type: ValueType::String,
        }
    }

    #[must_use]
    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

/// Operation kinds the language admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Modify,
    Delete,
}

impl OpKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Modify => "modify",
            OpKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared interpretation of an operation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    /// The default when the `type` attribute is absent.
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl ValueType {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ValueType::String),
            "number" => Some(ValueType::Number),
            "boolean" => Some(ValueType::Boolean),
            "json" => Some(ValueType::Json),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Json => "json",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a diff payload.
///
/// Declarations and processing instructions are neutralized first, then the
/// element structure is read strictly: the root must be
/// `<character-modification>`, an `<operations>` block is required, and
/// only add/modify/delete elements are accepted inside it. Every operation
/// path is checked against the denylist (absolute prefixes, `..`, double
/// separators, backslashes) and an unsafe path rejects the whole payload.
pub fn parse_diff(input: &str) -> Result<CharacterDiff, DiffError> {
    let sanitized = neutralize(input);
    Parser { rest: &sanitized }.parse_document()
}

/// Emits the canonical textual form of a diff.
///
/// Two-space indent, deletes self-closing without a `type` attribute,
/// `type` always present on add/modify, timestamps at the precision they
/// carry. `parse_diff(serialize_diff(d))` reproduces `d` exactly.
#[must_use]
pub fn serialize_diff(diff: &CharacterDiff) -> String {
    let mut out = String::new();
    out.push_str("<character-modification>\n");
    out.push_str("  <operations>\n");
    for op in &diff.operations {
        out.push_str("    ");
        match (op.kind, &op.value) {
            (OpKind::Delete, _) => {
                out.push_str(&format!("<delete path=\"{}\"/>\n", escape_attr(&op.path)));
            }
            (kind, Some(value)) => {
                out.push_str(&format!(
                    "<{k} path=\"{}\" type=\"{}\">{}</{k}>\n",
                    escape_attr(&op.path),
                    op.value_type,
                    escape_text(value),
                    k = kind.as_str(),
                ));
            }
            (kind, None) => {
                out.push_str(&format!(
                    "<{k} path=\"{}\" type=\"{}\"/>\n",
                    escape_attr(&op.path),
                    op.value_type,
                    k = kind.as_str(),
                ));
            }
        }
    }
    out.push_str("  </operations>\n");
    out.push_str(&format!(
        "  <reasoning>{}</reasoning>\n",
        escape_text(&diff.reasoning)
    ));
    if let Some(ts) = &diff.timestamp {
        out.push_str(&format!(
            "  <timestamp>{}</timestamp>\n",
            ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ));
    }
    out.push_str("</character-modification>\n");
    out
}

// ── Neutralization ────────────────────────────────────────────────

/// Strips comments, declarations (with bracketed internal subsets) and
/// processing instructions. The remaining text is what gets structurally
/// parsed; entity references inside it are never expanded.
fn neutralize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(lt) = rest.find('<') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..lt]);
        rest = &rest[lt..];

        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => rest = &rest[end + 3..],
                None => return out,
            }
        } else if rest.starts_with("<!") {
            // <!DOCTYPE ...> or <!ENTITY ...>; a '>' inside an internal
            // subset ([...]) does not close the declaration
            let bytes = rest.as_bytes();
            let mut depth = 0i32;
            let mut close = None;
            for (j, &b) in bytes.iter().enumerate().skip(2) {
                match b {
                    b'[' => depth += 1,
                    b']' => depth -= 1,
                    b'>' if depth <= 0 => {
                        close = Some(j);
                        break;
                    }
                    _ => {}
                }
            }
            match close {
                Some(j) => rest = &rest[j + 1..],
                None => return out,
            }
        } else if rest.starts_with("<?") {
            match rest.find("?>") {
                Some(end) => rest = &rest[end + 2..],
                None => return out,
            }
        } else {
            out.push('<');
            rest = &rest[1..];
        }
    }
}

// ── Path denylist ─────────────────────────────────────────────────

fn ensure_safe_path(path: &str) -> Result<(), DiffError> {
    let p = path.trim();
    let rejected = p.is_empty()
        || p.starts_with('/')
        || p.starts_with('\\')
        || p.contains('\\')
        || p.contains("//")
        || p.contains("..");
    if rejected {
        return Err(DiffError::UnsafePath(path.to_string()));
    }
    Ok(())
}

// ── Escaping ──────────────────────────────────────────────────────

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decodes the five standard escapes. Anything else after `&` stays as
/// literal text, which is how undeclared entity references survive.
fn unescape(s: &str) -> String {
    const ENTITIES: [(&str, char); 5] = [
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&amp;", '&'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let mut replaced = false;
        for (entity, ch) in ENTITIES {
            if rest.starts_with(entity) {
                out.push(ch);
                rest = &rest[entity.len()..];
                replaced = true;
                break;
            }
        }
        if !replaced {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

// ── Parser ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Tag {
    name: String,
    attrs: Vec<(String, String)>,
    closing: bool,
    self_closing: bool,
}

impl Tag {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

struct Parser<'a> {
    rest: &'a str,
}

impl Parser<'_> {
    fn parse_document(mut self) -> Result<CharacterDiff, DiffError> {
        self.skip_ws();
        if !self.rest.starts_with('<') {
            return Err(DiffError::MissingRoot);
        }
        let root = self.read_tag()?;
        if root.closing || root.self_closing || root.name != "character-modification" {
            return Err(DiffError::MissingRoot);
        }

        let mut operations: Option<Vec<DiffOperation>> = None;
        let mut reasoning = String::new();
        let mut timestamp = None;

        loop {
            self.skip_ws();
            if self.rest.is_empty() {
                return Err(DiffError::Malformed(
                    "missing </character-modification>".into(),
                ));
            }
            let tag = self.read_tag()?;
            if tag.closing {
                if tag.name == "character-modification" {
                    break;
                }
                return Err(DiffError::Malformed(format!("unexpected </{}>", tag.name)));
            }
            match tag.name.as_str() {
                "operations" => {
                    if tag.self_closing {
                        operations = Some(Vec::new());
                    } else {
                        operations = Some(self.parse_operations()?);
                    }
                }
                "reasoning" => {
                    if !tag.self_closing {
                        reasoning = self.read_text()?;
                        self.expect_close("reasoning")?;
                    }
                }
                "timestamp" => {
                    if !tag.self_closing {
                        let text = self.read_text()?;
                        self.expect_close("timestamp")?;
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            let parsed = DateTime::parse_from_rfc3339(trimmed)
                                .map_err(|_| DiffError::InvalidTimestamp(trimmed.to_string()))?;
                            timestamp = Some(parsed.with_timezone(&Utc));
                        }
                    }
                }
                // Unknown sections at the top level are skipped, not
                // rejected; only the operations block is read strictly.
                _ => {
                    if !tag.self_closing {
                        self.skip_element(&tag.name)?;
                    }
                }
            }
        }

        let operations = operations.ok_or(DiffError::MissingOperations)?;
        Ok(CharacterDiff {
            operations,
            reasoning,
            timestamp,
        })
    }

    fn parse_operations(&mut self) -> Result<Vec<DiffOperation>, DiffError> {
        let mut ops = Vec::new();
        loop {
            self.skip_ws();
            if self.rest.is_empty() {
                return Err(DiffError::Malformed("missing </operations>".into()));
            }
            if !self.rest.starts_with('<') {
                return Err(DiffError::Malformed(
                    "unexpected text inside <operations>".into(),
                ));
            }
            let tag = self.read_tag()?;
            if tag.closing {
                if tag.name == "operations" {
                    return Ok(ops);
                }
                return Err(DiffError::Malformed(format!("unexpected </{}>", tag.name)));
            }

            let kind = match tag.name.as_str() {
                "add" => OpKind::Add,
                "modify" => OpKind::Modify,
                "delete" => OpKind::Delete,
                other => return Err(DiffError::UnknownOperation(other.to_string())),
            };
            let path = tag.attr("path").ok_or_else(|| DiffError::MissingAttribute {
                element: tag.name.clone(),
                attribute: "path".into(),
            })?;
            ensure_safe_path(&path)?;
            let value_type = match tag.attr("type") {
                Some(t) => ValueType::parse(&t).ok_or(DiffError::InvalidValueType(t))?,
                None => ValueType::String,
            };

            let value = if tag.self_closing {
                None
            } else {
                let text = self.read_text()?;
                self.expect_close(&tag.name)?;
                // Deletes carry no value; any element content is dropped.
                (kind != OpKind::Delete).then_some(text)
            };

            ops.push(DiffOperation {
                kind,
                path,
                value,
                value_type,
            });
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Reads the tag at the cursor. The cursor must be at `<`.
    fn read_tag(&mut self) -> Result<Tag, DiffError> {
        let end = find_tag_end(self.rest)
            .ok_or_else(|| DiffError::Malformed("unterminated tag".into()))?;
        let inner = &self.rest[1..end];
        self.rest = &self.rest[end + 1..];

        let closing = inner.starts_with('/');
        let inner = if closing { &inner[1..] } else { inner };
        let self_closing = inner.ends_with('/');
        let inner = if self_closing {
            &inner[..inner.len() - 1]
        } else {
            inner
        };
        let inner = inner.trim();

        let (name, attr_text) = match inner.find(char::is_whitespace) {
            Some(sp) => (&inner[..sp], inner[sp..].trim()),
            None => (inner, ""),
        };
        if name.is_empty() {
            return Err(DiffError::Malformed("empty tag name".into()));
        }
        if closing && (!attr_text.is_empty() || self_closing) {
            return Err(DiffError::Malformed(format!("malformed closing tag </{name}>")));
        }

        Ok(Tag {
            name: name.to_string(),
            attrs: parse_attrs(attr_text)?,
            closing,
            self_closing,
        })
    }

    /// Collects text up to the next `<`.
    fn read_text(&mut self) -> Result<String, DiffError> {
        match self.rest.find('<') {
            Some(lt) => {
                let text = &self.rest[..lt];
                self.rest = &self.rest[lt..];
                Ok(unescape(text))
            }
            None => Err(DiffError::Malformed("unexpected end of input".into())),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), DiffError> {
        let tag = self.read_tag()?;
        if !tag.closing || tag.name != name {
            return Err(DiffError::Malformed(format!("expected </{name}>")));
        }
        Ok(())
    }

    /// Skips an element and its content, tracking same-name nesting.
    fn skip_element(&mut self, name: &str) -> Result<(), DiffError> {
        let mut depth = 1usize;
        while depth > 0 {
            let Some(lt) = self.rest.find('<') else {
                return Err(DiffError::Malformed(format!("missing </{name}>")));
            };
            self.rest = &self.rest[lt..];
            let tag = self.read_tag()?;
            if tag.name == name {
                if tag.closing {
                    depth -= 1;
                } else if !tag.self_closing {
                    depth += 1;
                }
            }
        }
        Ok(())
    }
}

/// Finds the `>` closing the tag at position 0, ignoring `>` inside
/// quoted attribute values.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in s.as_bytes().iter().enumerate() {
        match (quote, b) {
            (None, b'"') | (None, b'\'') => quote = Some(b),
            (Some(q), _) if b == q => quote = None,
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attrs(text: &str) -> Result<Vec<(String, String)>, DiffError> {
    let mut attrs = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| DiffError::Malformed(format!("attribute without value: '{rest}'")))?;
        let name = rest[..eq].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DiffError::Malformed(format!("malformed attribute: '{rest}'")));
        }
        let after = rest[eq + 1..].trim_start();
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| DiffError::Malformed("unquoted attribute value".into()))?;
        let body = &after[1..];
        let close = body
            .find(quote)
            .ok_or_else(|| DiffError::Malformed("unterminated attribute value".into()))?;
        attrs.push((name.to_string(), unescape(&body[..close])));
        rest = body[close + 1..].trim_start();
    }
    Ok(attrs)
}

// ================================================================
// Tests
// ================================================================
