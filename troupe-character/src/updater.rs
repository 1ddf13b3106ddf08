//! Applies parsed diffs to character documents.
//!
//! [`apply_diff`] works on a clone and dispatches each operation against the
//! document schema: the known top-level fields each have their own shape
//! rules, and `settings` admits arbitrary nested JSON paths. The input
//! document is never mutated; the first failing operation aborts the whole
//! application with the operation index and path attached.

use crate::diff::{CharacterDiff, DiffOperation, OpKind, ValueType};
use crate::error::{OpError, UpdateError};
use crate::path::{DocPath, Seg};
use serde_json::{Map, Value};
use troupe_model::{Bio, Character, Style};

/// Applies all operations of a diff to a copy of `character`.
///
/// Operations run in order. Any operation error leaves the original
/// untouched and reports the index and path of the failing operation.
/// After the last operation the result is structurally validated;
/// violations roll everything back.
pub fn apply_diff(character: &Character, diff: &CharacterDiff) -> Result<Character, UpdateError> {
    let mut updated = character.clone();
    for (index, op) in diff.operations.iter().enumerate() {
        apply_operation(&mut updated, op).map_err(|source| UpdateError::Operation {
            index,
            path: op.path.clone(),
            source,
        })?;
    }
    updated
        .validate_structure()
        .map_err(UpdateError::Validation)?;
    Ok(updated)
}

/// Produces a diff that transforms `old` into `new`.
///
/// Mechanical output: scalars become modifies, changed arrays become a
/// delete followed by appends, changed settings become one wholesale json
/// modify. Reasoning is left empty for the caller to fill in.
#[must_use]
pub fn diff_documents(old: &Character, new: &Character) -> CharacterDiff {
    let mut diff = CharacterDiff::new("");

    if old.name != new.name {
        diff.operations
            .push(DiffOperation::modify("name", new.name.clone()));
    }
    match (&old.system, &new.system) {
        (a, Some(b)) if a.as_deref() != Some(b.as_str()) => {
            diff.operations.push(DiffOperation::modify("system", b.clone()));
        }
        (Some(_), None) => diff.operations.push(DiffOperation::delete("system")),
        _ => {}
    }

    if old.bio.entries() != new.bio.entries() {
        diff.operations.push(DiffOperation::delete("bio"));
        for entry in new.bio.entries() {
            diff.operations.push(DiffOperation::add("bio[]", entry));
        }
    }

    diff_string_list("topics", &old.topics, &new.topics, &mut diff.operations);
    diff_string_list(
        "adjectives",
        &old.adjectives,
        &new.adjectives,
        &mut diff.operations,
    );
    diff_string_list("lore", &old.lore, &new.lore, &mut diff.operations);
    diff_string_list(
        "postExamples",
        &old.post_examples,
        &new.post_examples,
        &mut diff.operations,
    );

    match (&old.style, &new.style) {
        (Some(_), None) => diff.operations.push(DiffOperation::delete("style")),
        (a, Some(b)) => {
            let empty = Style::default();
            let a = a.as_ref().unwrap_or(&empty);
            diff_string_list("style.all", &a.all, &b.all, &mut diff.operations);
            diff_string_list("style.chat", &a.chat, &b.chat, &mut diff.operations);
            diff_string_list("style.post", &a.post, &b.post, &mut diff.operations);
        }
        (None, None) => {}
    }

    match (&old.settings, &new.settings) {
        (Some(_), None) => diff.operations.push(DiffOperation::delete("settings")),
        (a, Some(b)) if a.as_ref() != Some(b) => {
            diff.operations.push(
                DiffOperation::modify("settings", Value::Object(b.clone()).to_string())
                    .with_type(ValueType::Json),
            );
        }
        _ => {}
    }

    diff
}

fn diff_string_list(
    path: &str,
    old: &Option<Vec<String>>,
    new: &Option<Vec<String>>,
    ops: &mut Vec<DiffOperation>,
) {
    if old == new {
        return;
    }
    match new {
        None => ops.push(DiffOperation::delete(path)),
        Some(entries) => {
            if old.is_some() {
                ops.push(DiffOperation::delete(path));
            }
            for entry in entries {
                ops.push(DiffOperation::add(format!("{path}[]"), entry.clone()));
            }
        }
    }
}

// ── Operation dispatch ────────────────────────────────────────────

fn apply_operation(character: &mut Character, op: &DiffOperation) -> Result<(), OpError> {
    let path = DocPath::parse(&op.path)?;
    let Some(Seg::Key(head)) = path.segments.first() else {
        return Err(OpError::InvalidPath(format!(
            "'{}' has no field name",
            op.path
        )));
    };
    let rest = &path.segments[1..];
    let append = path.append;

    match head.as_str() {
        "name" => {
            ensure_scalar_path("name", rest, append, op)?;
            match op.kind {
                OpKind::Add | OpKind::Modify => {
                    character.name = string_value(op)?;
                    Ok(())
                }
                OpKind::Delete => Err(OpError::CannotDelete("name")),
            }
        }
        "system" => {
            ensure_scalar_path("system", rest, append, op)?;
            match op.kind {
                OpKind::Add | OpKind::Modify => {
                    character.system = Some(string_value(op)?);
                    Ok(())
                }
                OpKind::Delete => {
                    character.system = None;
                    Ok(())
                }
            }
        }
        "bio" => apply_bio(character, rest, append, op),
        "topics" => apply_string_list("topics", &mut character.topics, rest, append, op),
        "adjectives" => apply_string_list("adjectives", &mut character.adjectives, rest, append, op),
        "lore" => apply_string_list("lore", &mut character.lore, rest, append, op),
        "postExamples" => {
            apply_string_list("postExamples", &mut character.post_examples, rest, append, op)
        }
        "style" => apply_style(character, rest, append, op),
        "settings" => apply_settings(character, rest, append, op),
        _ => Err(OpError::UnknownField(head.clone())),
    }
}

fn ensure_scalar_path(
    field: &'static str,
    rest: &[Seg],
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    if append {
        return Err(OpError::AppendUnsupported(op.path.clone()));
    }
    if !rest.is_empty() {
        return Err(OpError::InvalidPath(format!(
            "'{field}' has no nested fields"
        )));
    }
    Ok(())
}

fn apply_bio(
    character: &mut Character,
    rest: &[Seg],
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    match (rest, append) {
        ([], true) => {
            if op.kind != OpKind::Add {
                return Err(OpError::AppendUnsupported(op.path.clone()));
            }
            character.bio.push(string_value(op)?);
            Ok(())
        }
        ([], false) => match op.kind {
            OpKind::Add => {
                character.bio.push(string_value(op)?);
                Ok(())
            }
            OpKind::Modify => {
                character.bio = Bio::Single(string_value(op)?);
                Ok(())
            }
            OpKind::Delete => {
                character.bio = Bio::default();
                Ok(())
            }
        },
        ([Seg::Index(index)], false) => {
            // Index operations see a single-string bio as a one-element
            // list and leave it in list form afterwards.
            let mut entries = match std::mem::take(&mut character.bio) {
                Bio::Single(entry) => vec![entry],
                Bio::List(list) => list,
            };
            let outcome = apply_indexed(&mut entries, *index, op);
            character.bio = Bio::List(entries);
            outcome
        }
        _ => Err(OpError::InvalidPath(
            "'bio' entries have no nested fields".into(),
        )),
    }
}

fn apply_string_list(
    field: &'static str,
    slot: &mut Option<Vec<String>>,
    rest: &[Seg],
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    match (rest, append) {
        ([], is_append) => match (op.kind, is_append) {
            // Bare add and `[]` add both append, creating the array
            // when absent.
            (OpKind::Add, _) => {
                let value = string_value(op)?;
                slot.get_or_insert_with(Vec::new).push(value);
                Ok(())
            }
            (_, true) => Err(OpError::AppendUnsupported(op.path.clone())),
            (OpKind::Modify, false) => Err(OpError::TypeMismatch {
                expected: "indexed path into array",
            }),
            (OpKind::Delete, false) => {
                *slot = None;
                Ok(())
            }
        },
        ([Seg::Index(index)], false) => {
            let entries = slot.as_mut().ok_or(OpError::PathNotFound)?;
            apply_indexed(entries, *index, op)
        }
        _ => Err(OpError::InvalidPath(format!(
            "'{field}' entries have no nested fields"
        ))),
    }
}

/// Indexed add (insert), modify (replace) or delete (remove) on a string
/// array. Bounds and value checks happen before any mutation.
fn apply_indexed(entries: &mut Vec<String>, index: usize, op: &DiffOperation) -> Result<(), OpError> {
    let len = entries.len();
    match op.kind {
        OpKind::Add => {
            if index > len {
                return Err(OpError::IndexOutOfBounds { index, len });
            }
            let value = string_value(op)?;
            entries.insert(index, value);
        }
        OpKind::Modify => {
            if index >= len {
                return Err(OpError::IndexOutOfBounds { index, len });
            }
            entries[index] = string_value(op)?;
        }
        OpKind::Delete => {
            if index >= len {
                return Err(OpError::IndexOutOfBounds { index, len });
            }
            entries.remove(index);
        }
    }
    Ok(())
}

fn apply_style(
    character: &mut Character,
    rest: &[Seg],
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    let Some(first) = rest.first() else {
        if append {
            return Err(OpError::AppendUnsupported(op.path.clone()));
        }
        return match op.kind {
            OpKind::Delete => {
                character.style = None;
                Ok(())
            }
            _ => Err(OpError::InvalidPath(
                "'style' is edited through style.all, style.chat, or style.post".into(),
            )),
        };
    };
    let Seg::Key(section) = first else {
        return Err(OpError::InvalidPath("'style' is not an array".into()));
    };
    match section.as_str() {
        "all" | "chat" | "post" => {}
        other => return Err(OpError::UnknownField(format!("style.{other}"))),
    }
    if character.style.is_none() && op.kind != OpKind::Add {
        return Err(OpError::PathNotFound);
    }
    let style = character.style.get_or_insert_with(Style::default);
    let slot = match section.as_str() {
        "all" => &mut style.all,
        "chat" => &mut style.chat,
        _ => &mut style.post,
    };
    apply_string_list("style", slot, &rest[1..], append, op)
}

fn apply_settings(
    character: &mut Character,
    rest: &[Seg],
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    let Some((last, parents)) = rest.split_last() else {
        if append {
            // settings is a map, not an array
            return Err(OpError::AppendUnsupported(op.path.clone()));
        }
        return match op.kind {
            OpKind::Delete => {
                character.settings = None;
                Ok(())
            }
            OpKind::Add | OpKind::Modify => match settings_value(op)? {
                Value::Object(map) => {
                    character.settings = Some(map);
                    Ok(())
                }
                _ => Err(OpError::TypeMismatch { expected: "object" }),
            },
        };
    };

    if character.settings.is_none() && op.kind != OpKind::Add {
        return Err(OpError::PathNotFound);
    }
    let map = character.settings.get_or_insert_with(Map::new);
    let mut root = Value::Object(std::mem::take(map));
    let outcome = apply_settings_path(&mut root, parents, last, append, op);
    if let Value::Object(restored) = root {
        *map = restored;
    }
    outcome
}

fn apply_settings_path(
    root: &mut Value,
    parents: &[Seg],
    last: &Seg,
    append: bool,
    op: &DiffOperation,
) -> Result<(), OpError> {
    let create = op.kind == OpKind::Add;
    let mut cur = root;
    for seg in parents {
        cur = match seg {
            Seg::Key(key) => {
                let obj = cur
                    .as_object_mut()
                    .ok_or(OpError::TypeMismatch { expected: "object" })?;
                if create {
                    obj.entry(key.as_str())
                        .or_insert_with(|| Value::Object(Map::new()))
                } else {
                    obj.get_mut(key.as_str()).ok_or(OpError::PathNotFound)?
                }
            }
            Seg::Index(index) => {
                let arr = cur
                    .as_array_mut()
                    .ok_or(OpError::TypeMismatch { expected: "array" })?;
                let len = arr.len();
                arr.get_mut(*index)
                    .ok_or(OpError::IndexOutOfBounds { index: *index, len })?
            }
        };
    }

    if append {
        let Seg::Key(key) = last else {
            return Err(OpError::InvalidPath("append needs a named array".into()));
        };
        if op.kind != OpKind::Add {
            return Err(OpError::AppendUnsupported(op.path.clone()));
        }
        let value = settings_value(op)?;
        let obj = cur
            .as_object_mut()
            .ok_or(OpError::TypeMismatch { expected: "object" })?;
        let slot = obj
            .entry(key.as_str())
            .or_insert_with(|| Value::Array(Vec::new()));
        let arr = slot
            .as_array_mut()
            .ok_or(OpError::TypeMismatch { expected: "array" })?;
        arr.push(value);
        return Ok(());
    }

    match last {
        Seg::Key(key) => {
            let obj = cur
                .as_object_mut()
                .ok_or(OpError::TypeMismatch { expected: "object" })?;
            match op.kind {
                OpKind::Add => {
                    let value = settings_value(op)?;
                    obj.insert(key.clone(), value);
                    Ok(())
                }
                OpKind::Modify => {
                    let value = settings_value(op)?;
                    let slot = obj.get_mut(key.as_str()).ok_or(OpError::PathNotFound)?;
                    *slot = value;
                    Ok(())
                }
                OpKind::Delete => obj
                    .remove(key.as_str())
                    .map(|_| ())
                    .ok_or(OpError::PathNotFound),
            }
        }
        Seg::Index(index) => {
            let arr = cur
                .as_array_mut()
                .ok_or(OpError::TypeMismatch { expected: "array" })?;
            let len = arr.len();
            let index = *index;
            match op.kind {
                OpKind::Add => {
                    if index > len {
                        return Err(OpError::IndexOutOfBounds { index, len });
                    }
                    let value = settings_value(op)?;
                    arr.insert(index, value);
                    Ok(())
                }
                OpKind::Modify => {
                    let value = settings_value(op)?;
                    let slot = arr
                        .get_mut(index)
                        .ok_or(OpError::IndexOutOfBounds { index, len })?;
                    *slot = value;
                    Ok(())
                }
                OpKind::Delete => {
                    if index >= len {
                        return Err(OpError::IndexOutOfBounds { index, len });
                    }
                    arr.remove(index);
                    Ok(())
                }
            }
        }
    }
}

// ── Value coercion ────────────────────────────────────────────────

/// The operation's value as a plain string. Schema fields outside
/// `settings` only hold strings.
fn string_value(op: &DiffOperation) -> Result<String, OpError> {
    match op.value_type {
        ValueType::String => op
            .value
            .clone()
            .ok_or_else(|| OpError::InvalidValue(format!("<{}> requires a value", op.kind))),
        ValueType::Json => Err(OpError::JsonOutsideSettings),
        _ => Err(OpError::TypeMismatch { expected: "string" }),
    }
}

/// The operation's value coerced per its declared type. Only `settings`
/// paths accept the full range.
fn settings_value(op: &DiffOperation) -> Result<Value, OpError> {
    let raw = op
        .value
        .as_deref()
        .ok_or_else(|| OpError::InvalidValue(format!("<{}> requires a value", op.kind)))?;
    match op.value_type {
        ValueType::String => Ok(Value::String(raw.to_string())),
        ValueType::Number => {
            let trimmed = raw.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::Number(n.into()));
            }
            let f: f64 = trimmed
                .parse()
                .map_err(|_| OpError::InvalidValue(format!("'{raw}' is not a number")))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| OpError::InvalidValue(format!("'{raw}' is not a finite number")))
        }
        ValueType::Boolean => match raw.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(OpError::InvalidValue(format!("'{raw}' is not a boolean"))),
        },
        ValueType::Json => serde_json::from_str(raw)
            .map_err(|e| OpError::InvalidValue(format!("invalid json: {e}"))),
    }
}

// ================================================================
// Tests
// ================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn base_character() -> Character {
        let mut character = Character::new("Ada");
        character.system = Some("You are Ada".into());
        character.bio = Bio::List(vec!["First entry".into(), "Second entry".into()]);
        character.topics = Some(vec!["math".into(), "history".into()]);
        character
    }

    fn apply_one(character: &Character, op: DiffOperation) -> Result<Character, UpdateError> {
        apply_diff(character, &CharacterDiff::new("test").with_operation(op))
    }

    // ── Scalars ──────────────────────────────────────────────────

    #[test]
    fn modify_name() {
        let updated = apply_one(&base_character(), DiffOperation::modify("name", "Grace")).unwrap();
        assert_eq!(updated.name, "Grace");
    }

    #[test]
    fn delete_name_refused() {
        let err = apply_one(&base_character(), DiffOperation::delete("name")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::CannotDelete("name"),
                ..
            }
        ));
    }

    #[test]
    fn name_rejects_non_string_value() {
        let op = DiffOperation::modify("name", "42").with_type(ValueType::Number);
        let err = apply_one(&base_character(), op).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::TypeMismatch { expected: "string" },
                ..
            }
        ));
    }

    #[test]
    fn delete_system_clears_it() {
        let updated = apply_one(&base_character(), DiffOperation::delete("system")).unwrap();
        assert_eq!(updated.system, None);
    }

    #[test]
    fn input_is_never_mutated() {
        let original = base_character();
        let _ = apply_one(&original, DiffOperation::modify("name", "Grace")).unwrap();
        assert_eq!(original.name, "Ada");

        let _ = apply_one(&original, DiffOperation::delete("name")).unwrap_err();
        assert_eq!(original.name, "Ada");
    }

    // ── Bio ──────────────────────────────────────────────────────

    #[test]
    fn bio_append() {
        let updated = apply_one(&base_character(), DiffOperation::add("bio[]", "Third")).unwrap();
        assert_eq!(updated.bio.entries(), vec!["First entry", "Second entry", "Third"]);
    }

    #[test]
    fn bio_append_promotes_single() {
        let mut character = base_character();
        character.bio = Bio::Single("Only entry".into());
        let updated = apply_one(&character, DiffOperation::add("bio[]", "Second")).unwrap();
        assert_eq!(updated.bio.entries(), vec!["Only entry", "Second"]);
    }

    #[test]
    fn bio_indexed_modify_and_delete() {
        let updated =
            apply_one(&base_character(), DiffOperation::modify("bio[1]", "Rewritten")).unwrap();
        assert_eq!(updated.bio.entries(), vec!["First entry", "Rewritten"]);

        let updated = apply_one(&base_character(), DiffOperation::delete("bio[0]")).unwrap();
        assert_eq!(updated.bio.entries(), vec!["Second entry"]);
    }

    #[test]
    fn bio_index_out_of_bounds() {
        let err = apply_one(&base_character(), DiffOperation::modify("bio[5]", "x")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::IndexOutOfBounds { index: 5, len: 2 },
                ..
            }
        ));
    }

    #[test]
    fn bio_single_treated_as_one_element_list() {
        let mut character = base_character();
        character.bio = Bio::Single("Only entry".into());
        let updated = apply_one(&character, DiffOperation::modify("bio[0]", "Edited")).unwrap();
        assert_eq!(updated.bio.entries(), vec!["Edited"]);
    }

    // ── String list fields ───────────────────────────────────────

    #[test]
    fn topics_append_creates_when_absent() {
        let mut character = base_character();
        character.topics = None;
        let updated = apply_one(&character, DiffOperation::add("topics[]", "science")).unwrap();
        assert_eq!(updated.topics, Some(vec!["science".to_string()]));
    }

    #[test]
    fn topics_indexed_modify() {
        let updated =
            apply_one(&base_character(), DiffOperation::modify("topics[0]", "physics")).unwrap();
        assert_eq!(
            updated.topics,
            Some(vec!["physics".to_string(), "history".to_string()])
        );
    }

    #[test]
    fn topics_delete_whole_field() {
        let updated = apply_one(&base_character(), DiffOperation::delete("topics")).unwrap();
        assert_eq!(updated.topics, None);
    }

    #[test]
    fn indexed_op_on_absent_field_not_found() {
        let mut character = base_character();
        character.lore = None;
        let err = apply_one(&character, DiffOperation::modify("lore[0]", "x")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::PathNotFound,
                ..
            }
        ));
    }

    // ── Style ────────────────────────────────────────────────────

    #[test]
    fn style_section_append_creates_nested_structure() {
        let updated =
            apply_one(&base_character(), DiffOperation::add("style.chat[]", "Be brief")).unwrap();
        let style = updated.style.unwrap();
        assert_eq!(style.chat, Some(vec!["Be brief".to_string()]));
        assert_eq!(style.all, None);
    }

    #[test]
    fn style_unknown_section_rejected() {
        let err =
            apply_one(&base_character(), DiffOperation::add("style.voice[]", "x")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::UnknownField(field),
                ..
            } if field == "style.voice"
        ));
    }

    #[test]
    fn style_delete_on_absent_style_not_found() {
        let err = apply_one(&base_character(), DiffOperation::delete("style.chat")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::PathNotFound,
                ..
            }
        ));
    }

    // ── Settings ─────────────────────────────────────────────────

    #[test]
    fn settings_add_creates_intermediate_objects() {
        let op = DiffOperation::add("settings.voice.model", "en_US-hfc_female-medium");
        let updated = apply_one(&base_character(), op).unwrap();
        assert_eq!(
            updated.settings.unwrap()["voice"]["model"],
            json!("en_US-hfc_female-medium")
        );
    }

    #[test]
    fn settings_typed_values() {
        let character = base_character();
        let diff = CharacterDiff::new("typed")
            .with_operation(DiffOperation::add("settings.retries", "3").with_type(ValueType::Number))
            .with_operation(
                DiffOperation::add("settings.debug", "true").with_type(ValueType::Boolean),
            )
            .with_operation(
                DiffOperation::add("settings.limits", r#"{"rpm":60}"#).with_type(ValueType::Json),
            );
        let updated = apply_diff(&character, &diff).unwrap();
        let settings = updated.settings.unwrap();
        assert_eq!(settings["retries"], json!(3));
        assert_eq!(settings["debug"], json!(true));
        assert_eq!(settings["limits"], json!({"rpm": 60}));
    }

    #[test]
    fn json_outside_settings_rejected() {
        let op = DiffOperation::add("bio[]", r#"{"a":1}"#).with_type(ValueType::Json);
        let err = apply_one(&base_character(), op).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::JsonOutsideSettings,
                ..
            }
        ));
    }

    #[test]
    fn settings_modify_requires_presence() {
        let err =
            apply_one(&base_character(), DiffOperation::modify("settings.missing", "x")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::PathNotFound,
                ..
            }
        ));
    }

    #[test]
    fn settings_array_append_and_index() {
        let character = base_character();
        let diff = CharacterDiff::new("arrays")
            .with_operation(DiffOperation::add("settings.models[]", "gpt-a"))
            .with_operation(DiffOperation::add("settings.models[]", "gpt-b"))
            .with_operation(DiffOperation::modify("settings.models[1]", "gpt-c"))
            .with_operation(DiffOperation::delete("settings.models[0]"));
        let updated = apply_diff(&character, &diff).unwrap();
        assert_eq!(updated.settings.unwrap()["models"], json!(["gpt-c"]));
    }

    #[test]
    fn settings_wholesale_replace_requires_object() {
        let op = DiffOperation::modify("settings", "[1,2]").with_type(ValueType::Json);
        let err = apply_one(&base_character(), op).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::TypeMismatch { expected: "object" },
                ..
            }
        ));

        let op = DiffOperation::modify("settings", r#"{"a":1}"#).with_type(ValueType::Json);
        let updated = apply_one(&base_character(), op).unwrap();
        assert_eq!(updated.settings.unwrap()["a"], json!(1));
    }

    #[test]
    fn bad_number_value_rejected() {
        let op = DiffOperation::add("settings.retries", "lots").with_type(ValueType::Number);
        let err = apply_one(&base_character(), op).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                source: OpError::InvalidValue(_),
                ..
            }
        ));
    }

    // ── Schema gate ──────────────────────────────────────────────

    #[test]
    fn unknown_top_level_field_rejected() {
        let err = apply_one(&base_character(), DiffOperation::add("secrets.key", "v")).unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Operation {
                index: 0,
                source: OpError::UnknownField(field),
                ..
            } if field == "secrets"
        ));
    }

    #[test]
    fn error_reports_operation_index() {
        let character = base_character();
        let diff = CharacterDiff::new("partial")
            .with_operation(DiffOperation::add("bio[]", "ok"))
            .with_operation(DiffOperation::modify("nonsense", "x"));
        let err = apply_diff(&character, &diff).unwrap_err();
        match err {
            UpdateError::Operation { index, path, .. } => {
                assert_eq!(index, 1);
                assert_eq!(path, "nonsense");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // ── Validation gate ──────────────────────────────────────────

    #[test]
    fn validation_rolls_back_blank_entries() {
        let err = apply_one(&base_character(), DiffOperation::add("bio[]", "   ")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(_)));
    }

    #[test]
    fn validation_rejects_emptied_name() {
        let err = apply_one(&base_character(), DiffOperation::modify("name", "")).unwrap_err();
        assert!(matches!(err, UpdateError::Validation(_)));
    }

    // ── End-to-end with the parser ───────────────────────────────

    #[test]
    fn parsed_diff_applies() {
        let diff = parse_diff(
            r#"<character-modification>
  <operations>
    <add path="bio[]" type="string">Learned a new skill</add>
    <modify path="system">You are a helpful assistant</modify>
    <delete path="topics[1]"/>
    <add path="settings.voice.speed" type="number">1.5</add>
  </operations>
  <reasoning>Routine update</reasoning>
</character-modification>"#,
        )
        .unwrap();
        let updated = apply_diff(&base_character(), &diff).unwrap();
        assert_eq!(updated.bio.len(), 3);
        assert_eq!(updated.system.as_deref(), Some("You are a helpful assistant"));
        assert_eq!(updated.topics, Some(vec!["math".to_string()]));
        assert_eq!(updated.settings.unwrap()["voice"]["speed"], json!(1.5));
    }

    // ── Document diffing ─────────────────────────────────────────

    #[test]
    fn diff_documents_roundtrips_through_apply() {
        let old = base_character();
        let mut new = old.clone();
        new.name = "Grace".into();
        new.bio.push("Third entry".into());
        new.topics = Some(vec!["computing".into()]);
        new.settings = Some(Map::from_iter([("model".to_string(), json!("gpt"))]));

        let diff = diff_documents(&old, &new);
        let rebuilt = apply_diff(&old, &diff).unwrap();
        assert_eq!(rebuilt.name, new.name);
        assert_eq!(rebuilt.bio.entries(), new.bio.entries());
        assert_eq!(rebuilt.topics, new.topics);
        assert_eq!(rebuilt.settings, new.settings);
    }

    #[test]
    fn diff_documents_identical_is_empty() {
        let character = base_character();
        assert!(diff_documents(&character, &character).operations.is_empty());
    }
}
