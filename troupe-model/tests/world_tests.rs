use serde_json::json;
use troupe_model::World;
use troupe_types::AgentId;

#[test]
fn new_world_is_empty() {
    let world = World::new(AgentId::new(), "main");
    assert_eq!(world.name, "main");
    assert!(world.metadata.is_empty());
}

#[test]
fn metadata_sections_roundtrip() {
    let mut world = World::new(AgentId::new(), "main");
    world.set_metadata_section("envRequirements", json!({"openai": {}}));

    assert_eq!(
        world.metadata_section("envRequirements"),
        Some(&json!({"openai": {}}))
    );
    assert_eq!(world.metadata_section("absent"), None);
}

#[test]
fn world_serde_roundtrip() {
    let mut world = World::new(AgentId::new(), "main");
    world.set_metadata_section("k", json!([1, 2, 3]));

    let json = serde_json::to_string(&world).unwrap();
    let parsed: World = serde_json::from_str(&json).unwrap();
    assert_eq!(world, parsed);
}

#[test]
fn missing_metadata_defaults_to_empty() {
    let agent_id = AgentId::new();
    let parsed: World = serde_json::from_value(json!({
        "id": troupe_types::WorldId::new(),
        "agent_id": agent_id,
        "name": "bare"
    }))
    .unwrap();
    assert!(parsed.metadata.is_empty());
}
