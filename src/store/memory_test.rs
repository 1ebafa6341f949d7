use super::*;
use crate::geometry::{Circle, Rect};
use crate::model::{TokenType, TokenUpdate, VisionType};

async fn store_with_map() -> (MemoryStore, MapRecord) {
    let store = MemoryStore::new();
    let map = store.create_map(&NewMap::new("Crypt", 1400, 700)).await.unwrap();
    (store, map)
}

#[tokio::test]
async fn position_update_changes_only_position() {
    let (store, map) = store_with_map().await;
    let created = store
        .create_token(
            &NewToken::new(map.id, "Aria", TokenType::Pc, 10.0, 10.0)
                .with_vision(VisionType::Darkvision, Some(60.0)),
        )
        .await
        .unwrap();

    store.update_token_position(created.id, 500.0, 500.0).await.unwrap();
    let fetched = store.get_token(created.id).await.unwrap();
    assert_eq!(fetched, Token { x: 500.0, y: 500.0, ..created });
}

#[tokio::test]
async fn list_resolves_display_names() {
    let (store, map) = store_with_map().await;
    let goblin = store.register_monster("Goblin");
    let mut new = NewToken::new(map.id, "Goblin 1", TokenType::Monster, 0.0, 0.0);
    new.monster_id = Some(goblin);
    store.create_token(&new).await.unwrap();
    store.create_token(&NewToken::new(map.id, "Chest", TokenType::Marker, 5.0, 5.0)).await.unwrap();

    let listed = store.list_tokens(map.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].monster_name.as_deref(), Some("Goblin"));
    assert_eq!(listed[1].monster_name, None);
}

#[tokio::test]
async fn dangling_references_are_foreign_key_errors() {
    let (store, map) = store_with_map().await;
    let err = store
        .create_token(&NewToken::new(Uuid::new_v4(), "Ghost", TokenType::Npc, 0.0, 0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)));

    let mut new = NewToken::new(map.id, "Ghost", TokenType::Npc, 0.0, 0.0);
    new.character_id = Some(Uuid::new_v4());
    assert!(matches!(store.create_token(&new).await, Err(StoreError::ForeignKey(_))));
}

#[tokio::test]
async fn missing_rows_are_not_found() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();
    assert!(store.get_token(id).await.unwrap_err().is_not_found());
    assert!(store.update_token_position(id, 1.0, 1.0).await.unwrap_err().is_not_found());
    assert!(store.delete_light(id).await.unwrap_err().is_not_found());
    assert!(store.get_fog_state(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn light_radius_check_is_a_constraint_error() {
    let (store, map) = store_with_map().await;
    let err = store.create_light(&NewLightSource::new(map.id, 0.0, 0.0, 50.0, 10.0)).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
}

#[tokio::test]
async fn update_token_keeps_identity() {
    let (store, map) = store_with_map().await;
    let created = store.create_token(&NewToken::new(map.id, "Orc", TokenType::Monster, 1.0, 1.0)).await.unwrap();
    let mut next = TokenUpdate { name: Some("Orc Chief".into()), ..TokenUpdate::default() }.apply(&created).unwrap();
    next.map_id = Uuid::new_v4();
    let stored = store.update_token(&next).await.unwrap();
    assert_eq!(stored.map_id, map.id);
    assert_eq!(stored.name, "Orc Chief");
}

#[tokio::test]
async fn deleting_map_cascades() {
    let (store, map) = store_with_map().await;
    let token = store.create_token(&NewToken::new(map.id, "Orc", TokenType::Monster, 1.0, 1.0)).await.unwrap();
    let light = store.create_light(&NewLightSource::torch(map.id, 3.0, 3.0)).await.unwrap();
    store
        .insert_revealed_area(&NewRevealedArea::rect(map.id, Rect::new(0.0, 0.0, 10.0, 10.0)))
        .await
        .unwrap();

    store.delete_map(map.id).await.unwrap();
    assert!(store.get_token(token.id).await.is_err());
    assert!(store.get_light(light.id).await.is_err());
    assert_eq!(store.count_revealed_areas(map.id).await.unwrap(), 0);
}

#[tokio::test]
async fn deleting_carrier_token_detaches_light() {
    let (store, map) = store_with_map().await;
    let token = store.create_token(&NewToken::new(map.id, "Aria", TokenType::Pc, 1.0, 1.0)).await.unwrap();
    let mut torch = NewLightSource::torch(map.id, 1.0, 1.0);
    torch.token_id = Some(token.id);
    let light = store.create_light(&torch).await.unwrap();

    store.delete_token(token.id).await.unwrap();
    assert_eq!(store.get_light(light.id).await.unwrap().token_id, None);
}

#[tokio::test]
async fn fog_reveal_and_reset_scenario() {
    let (store, map) = store_with_map().await;
    store
        .insert_revealed_area(&NewRevealedArea::rect(map.id, Rect::new(0.0, 0.0, 100.0, 100.0)))
        .await
        .unwrap();
    store
        .insert_revealed_area(&NewRevealedArea::circle(map.id, Circle::new(200.0, 200.0, 50.0)))
        .await
        .unwrap();
    assert_eq!(store.get_fog_state(map.id).await.unwrap().revealed_areas.len(), 2);

    assert_eq!(store.delete_all_revealed_areas(map.id).await.unwrap(), 2);
    let fog = store.get_fog_state(map.id).await.unwrap();
    assert!(fog.revealed_areas.is_empty());
}

#[tokio::test]
async fn toggle_fog_flips_flag_only() {
    let (store, map) = store_with_map().await;
    store
        .insert_revealed_area(&NewRevealedArea::rect(map.id, Rect::new(0.0, 0.0, 5.0, 5.0)))
        .await
        .unwrap();
    assert!(store.toggle_fog_enabled(map.id).await.unwrap());
    assert!(!store.toggle_fog_enabled(map.id).await.unwrap());
    assert_eq!(store.count_revealed_areas(map.id).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_all_lights_is_scoped_to_map() {
    let (store, map) = store_with_map().await;
    let other = store.create_map(&NewMap::new("Other", 100, 100)).await.unwrap();
    store.create_light(&NewLightSource::torch(map.id, 1.0, 1.0)).await.unwrap();
    store.create_light(&NewLightSource::lantern(map.id, 2.0, 2.0)).await.unwrap();
    store.create_light(&NewLightSource::torch(other.id, 1.0, 1.0)).await.unwrap();

    assert_eq!(store.delete_all_lights(map.id).await.unwrap(), 2);
    assert_eq!(store.list_lights(other.id).await.unwrap().len(), 1);
}
