use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::services::map::attach_player;
use crate::services::token::create_token;
use crate::state::test_helpers::{seed_map, test_app_state};

fn data(value: serde_json::Value) -> Data {
    serde_json::from_value(value).expect("object payload")
}

async fn open(state: &AppState, map_id: Uuid) -> mpsc::Receiver<crate::services::sync::PlayerMessage> {
    let (tx, rx) = mpsc::channel(64);
    attach_player(state, map_id, Uuid::new_v4(), tx).await.expect("attach");
    rx
}

#[tokio::test]
async fn torch_preset_round_trip() {
    let state = test_app_state();
    let map = seed_map(&state).await;

    let torch = create_light(&state, map.id, &data(json!({ "preset": "torch", "x": 100.0, "y": 100.0 })))
        .await
        .expect("torch");

    assert_eq!(torch.light.bright_radius_ft, 20.0);
    assert_eq!(torch.light.dim_radius_ft, 40.0);
    assert_eq!(torch.light.color.as_deref(), Some("#FFAA00"));
    assert_eq!(torch.light.light_type, LightType::Torch);
    assert!(torch.effective_active);
}

#[tokio::test]
async fn lantern_preset_round_trip() {
    let state = test_app_state();
    let map = seed_map(&state).await;

    let lantern = create_preset(&state, map.id, LightType::Lantern, 50.0, 50.0).await.expect("lantern");
    assert_eq!(lantern.light.bright_radius_ft, 30.0);
    assert_eq!(lantern.light.dim_radius_ft, 60.0);
    assert_eq!(lantern.light.color.as_deref(), Some("#FFD700"));

    let listed = list_lights(&state, map.id).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].light.id, lantern.light.id);
}

#[tokio::test]
async fn create_rejects_bright_above_dim() {
    let state = test_app_state();
    let map = seed_map(&state).await;

    let err = create_light(
        &state,
        map.id,
        &data(json!({ "x": 1.0, "y": 1.0, "bright_radius_ft": 50.0, "dim_radius_ft": 10.0 })),
    )
    .await
    .expect_err("bright > dim");
    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");
    assert!(list_lights(&state, map.id).await.expect("list").is_empty());
}

#[tokio::test]
async fn update_rechecks_radii_on_merged_light() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let torch = create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");

    let err = update_light(&state, torch.light.id, &data(json!({ "dim_radius_ft": 5.0 })))
        .await
        .expect_err("dim below bright");
    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");

    let updated = update_light(&state, torch.light.id, &data(json!({ "name": "Brazier", "color": null })))
        .await
        .expect("update");
    assert_eq!(updated.light.name, "Brazier");
    assert_eq!(updated.light.color, None);
    assert_eq!(updated.light.dim_radius_ft, 40.0);
}

#[tokio::test]
async fn move_light_updates_position_only() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let torch = create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");

    let moved = move_light(&state, torch.light.id, 300.0, 200.0).await.expect("move");
    assert_eq!((moved.light.x, moved.light.y), (300.0, 200.0));
    assert_eq!(moved.light.bright_radius_ft, torch.light.bright_radius_ft);
    assert_eq!(moved.light.name, torch.light.name);

    let err = move_light(&state, torch.light.id, -5.0, 0.0).await.expect_err("off map");
    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");
}

#[tokio::test]
async fn delete_all_lights_reports_count() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");
    create_preset(&state, map.id, LightType::Lantern, 20.0, 20.0).await.expect("lantern");
    let _rx = open(&state, map.id).await;

    assert_eq!(delete_all_lights(&state, map.id).await.expect("delete all"), 2);
    assert!(list_lights(&state, map.id).await.expect("list").is_empty());
    let sessions = state.sessions.read().await;
    assert_eq!(sessions.get(&map.id).expect("session").registry.lights().count(), 0);
}

#[tokio::test]
async fn delete_light_then_get_is_not_found() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let torch = create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");

    delete_light(&state, torch.light.id).await.expect("delete");
    let err = delete_light(&state, torch.light.id).await.expect_err("already gone");
    assert_eq!(err.error_code(), "E_NOT_FOUND");
}

#[tokio::test]
async fn overlay_requires_open_map() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let torch = create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");

    let err = set_light_active(&state, map.id, torch.light.id, false).await.expect_err("not open");
    assert_eq!(err.error_code(), "E_MAP_NOT_OPEN");
}

#[tokio::test]
async fn overlay_wins_and_is_never_persisted() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let torch = create_preset(&state, map.id, LightType::Torch, 10.0, 10.0).await.expect("torch");
    let _rx = open(&state, map.id).await;

    let view = set_light_active(&state, map.id, torch.light.id, false).await.expect("override");
    assert!(view.light.active);
    assert!(!view.effective_active);

    let listed = list_lights(&state, map.id).await.expect("list");
    assert!(listed[0].light.active);
    assert!(!listed[0].effective_active);
    assert!(state.store.get_light(torch.light.id).await.expect("row").active);

    let cleared = clear_light_override(&state, map.id, torch.light.id).await.expect("clear");
    assert!(cleared.effective_active);
}

#[tokio::test]
async fn overlay_on_unknown_light_is_not_found() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let _rx = open(&state, map.id).await;

    let err = set_light_active(&state, map.id, Uuid::new_v4(), true).await.expect_err("unknown");
    assert_eq!(err.error_code(), "E_NOT_FOUND");
}

#[tokio::test]
async fn carried_light_requires_existing_token() {
    let state = test_app_state();
    let map = seed_map(&state).await;

    let err = create_light(
        &state,
        map.id,
        &data(json!({ "preset": "torch", "x": 1.0, "y": 1.0, "token_id": Uuid::new_v4().to_string() })),
    )
    .await
    .expect_err("dangling carrier");
    assert_eq!(err.error_code(), "E_FOREIGN_KEY");

    let token = create_token(&state, map.id, &data(json!({ "name": "Aria", "token_type": "pc", "x": 5.0, "y": 5.0 })))
        .await
        .expect("token");
    let carried = create_light(
        &state,
        map.id,
        &data(json!({ "preset": "torch", "x": 1.0, "y": 1.0, "token_id": token.id.to_string() })),
    )
    .await
    .expect("carried");
    assert_eq!(carried.light.token_id, Some(token.id));
}
