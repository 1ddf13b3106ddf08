use pretty_assertions::assert_eq;
use serde_json::json;
use troupe_model::{Bio, Character, Style};

// ── Serde shapes ──────────────────────────────────────────────────

#[test]
fn bio_single_and_list_both_deserialize() {
    let single: Character = serde_json::from_value(json!({
        "name": "Ada",
        "bio": "One line about Ada"
    }))
    .unwrap();
    assert_eq!(single.bio, Bio::Single("One line about Ada".into()));

    let list: Character = serde_json::from_value(json!({
        "name": "Ada",
        "bio": ["First", "Second"]
    }))
    .unwrap();
    assert_eq!(list.bio.len(), 2);
}

#[test]
fn post_examples_uses_camel_case_wire_name() {
    let character: Character = serde_json::from_value(json!({
        "name": "Ada",
        "postExamples": ["gm"]
    }))
    .unwrap();
    assert_eq!(character.post_examples, Some(vec!["gm".to_string()]));

    let back = serde_json::to_value(&character).unwrap();
    assert!(back.get("postExamples").is_some());
    assert!(back.get("post_examples").is_none());
}

#[test]
fn unknown_fields_survive_roundtrip() {
    let source = json!({
        "name": "Ada",
        "bio": ["Mathematician"],
        "plugins": ["plugin-web-search"],
        "messageExamples": [[{"user": "u", "content": {"text": "hi"}}]]
    });
    let character: Character = serde_json::from_value(source.clone()).unwrap();
    assert_eq!(character.extra.len(), 2);

    let back = serde_json::to_value(&character).unwrap();
    assert_eq!(back["plugins"], source["plugins"]);
    assert_eq!(back["messageExamples"], source["messageExamples"]);
}

#[test]
fn empty_optionals_are_not_serialized() {
    let character = Character::new("Ada");
    let value = serde_json::to_value(&character).unwrap();
    let obj = value.as_object().unwrap();
    assert_eq!(obj.len(), 1, "only name should serialize: {obj:?}");
}

// ── validate_structure ────────────────────────────────────────────

#[test]
fn valid_character_passes() {
    let mut character = Character::new("Ada");
    character.bio = Bio::List(vec!["Mathematician".into(), "Pioneer".into()]);
    character.topics = Some(vec!["computing".into()]);
    character.style = Some(Style {
        all: Some(vec!["be precise".into()]),
        ..Style::default()
    });
    assert!(character.validate_structure().is_ok());
}

#[test]
fn empty_name_is_a_violation() {
    let character = Character::new("   ");
    let violations = character.validate_structure().unwrap_err();
    assert_eq!(violations, vec!["name must not be empty".to_string()]);
}

#[test]
fn collects_all_violations_not_just_first() {
    let mut character = Character::new("");
    character.bio = Bio::List(vec!["ok".into(), "  ".into()]);
    character.topics = Some(vec!["".into(), "fine".into()]);

    let violations = character.validate_structure().unwrap_err();
    assert_eq!(violations.len(), 3);
    assert!(violations.iter().any(|v| v.contains("name")));
    assert!(violations.iter().any(|v| v.contains("bio[1]")));
    assert!(violations.iter().any(|v| v.contains("topics[0]")));
}

#[test]
fn style_entries_are_checked() {
    let mut character = Character::new("Ada");
    character.style = Some(Style {
        chat: Some(vec![" ".into()]),
        ..Style::default()
    });
    let violations = character.validate_structure().unwrap_err();
    assert_eq!(violations, vec!["style.chat[0] must not be empty".to_string()]);
}

#[test]
fn validation_does_not_mutate() {
    let mut character = Character::new("");
    character.topics = Some(vec!["".into()]);
    let before = character.clone();
    let _ = character.validate_structure();
    assert_eq!(character, before);
}

// ── Bio helpers ───────────────────────────────────────────────────

#[test]
fn bio_push_promotes_single_to_list() {
    let mut bio = Bio::Single("First".into());
    bio.push("Second".into());
    assert_eq!(bio, Bio::List(vec!["First".into(), "Second".into()]));
}

#[test]
fn bio_push_appends_to_list() {
    let mut bio = Bio::List(vec!["First".into()]);
    bio.push("Second".into());
    assert_eq!(bio.len(), 2);
}

#[test]
fn bio_entries_views_both_shapes() {
    assert_eq!(Bio::Single("x".into()).entries(), vec!["x"]);
    assert_eq!(
        Bio::List(vec!["a".into(), "b".into()]).entries(),
        vec!["a", "b"]
    );
}

// ── Secret lookup chain ───────────────────────────────────────────

#[test]
fn secret_prefers_secrets_map() {
    let character: Character = serde_json::from_value(json!({
        "name": "Ada",
        "secrets": {"API_KEY": "from-secrets"},
        "settings": {
            "secrets": {"API_KEY": "from-nested"},
            "API_KEY": "from-settings"
        }
    }))
    .unwrap();
    assert_eq!(character.secret("API_KEY"), Some("from-secrets"));
}

#[test]
fn secret_falls_back_to_nested_then_flat_settings() {
    let character: Character = serde_json::from_value(json!({
        "name": "Ada",
        "settings": {
            "secrets": {"NESTED_KEY": "nested"},
            "FLAT_KEY": "flat"
        }
    }))
    .unwrap();
    assert_eq!(character.secret("NESTED_KEY"), Some("nested"));
    assert_eq!(character.secret("FLAT_KEY"), Some("flat"));
    assert_eq!(character.secret("ABSENT"), None);
}

#[test]
fn secret_skips_non_string_values() {
    let character: Character = serde_json::from_value(json!({
        "name": "Ada",
        "secrets": {"PORT": 8080},
        "settings": {"PORT": "8080"}
    }))
    .unwrap();
    assert_eq!(character.secret("PORT"), Some("8080"));
}
