//! Path expressions addressing locations inside a character document.
//!
//! Dot-separated segments with optional index or append markers:
//!
//! - `system`: a scalar field
//! - `style.chat`: a nested field
//! - `topics[2]`: the third element of an array
//! - `bio[]`: append position at the end of an array (final segment only)

use crate::error::OpError;
use std::fmt;

/// One step through the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seg {
    /// Named field or object key.
    Key(String),
    /// Zero-based array index.
    Index(usize),
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    pub segments: Vec<Seg>,
    /// True when the expression ended with `[]`.
    pub append: bool,
}

impl DocPath {
    /// Parses a dot/bracket path expression.
    ///
    /// Safety screening happens earlier, at diff parse time; this only
    /// checks that the expression is well-formed.
    pub fn parse(raw: &str) -> Result<Self, OpError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OpError::InvalidPath("empty path".into()));
        }

        let mut segments = Vec::new();
        let mut append = false;

        for (i, part) in raw.split('.').enumerate() {
            if append {
                return Err(OpError::InvalidPath(format!(
                    "'[]' must be the final segment in '{raw}'"
                )));
            }
            if part.is_empty() {
                return Err(OpError::InvalidPath(format!("empty segment in '{raw}'")));
            }

            let (name, bracket) = match part.find('[') {
                Some(open) => {
                    let Some(stripped) = part.strip_suffix(']') else {
                        return Err(OpError::InvalidPath(format!(
                            "unterminated bracket in '{part}'"
                        )));
                    };
                    (&part[..open], Some(&stripped[open + 1..]))
                }
                None => {
                    if part.contains(']') {
                        return Err(OpError::InvalidPath(format!("stray ']' in '{part}'")));
                    }
                    (part, None)
                }
            };

            if name.is_empty() {
                return Err(OpError::InvalidPath(format!(
                    "segment {i} of '{raw}' has no field name"
                )));
            }
            segments.push(Seg::Key(name.to_string()));

            match bracket {
                None => {}
                Some("") => append = true,
                Some(digits) => {
                    if digits.contains('[') {
                        return Err(OpError::InvalidPath(format!(
                            "multiple brackets in '{part}'"
                        )));
                    }
                    let index: usize = digits.parse().map_err(|_| {
                        OpError::InvalidPath(format!("bad index '{digits}' in '{part}'"))
                    })?;
                    segments.push(Seg::Index(index));
                }
            }
        }

        Ok(Self { segments, append })
    }

    /// The field name of the first segment.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Seg::Key(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            match seg {
                Seg::Key(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Seg::Index(i) => write!(f, "[{i}]")?,
            }
            first = false;
        }
        if self.append {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// The top-level field a raw path expression addresses.
///
/// Used by focus-area filtering before the path is fully parsed.
#[must_use]
pub fn top_level_field(raw: &str) -> &str {
    let raw = raw.trim();
    let end = raw
        .find(['.', '['])
        .unwrap_or(raw.len());
    &raw[..end]
}

// ================================================================
// Tests
// ================================================================
