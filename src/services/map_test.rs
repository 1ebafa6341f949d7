use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use super::*;
use crate::geometry::Point;
use crate::services::sync::PlayerMessage;
use crate::services::token::create_token;
use crate::state::test_helpers::{seed_map, test_app_state};

fn data(value: serde_json::Value) -> Data {
    serde_json::from_value(value).expect("object payload")
}

#[tokio::test]
async fn create_map_applies_defaults() {
    let state = test_app_state();
    let map = create_map(&state, &data(json!({ "name": "Keep", "width_px": 700, "height_px": 350 })))
        .await
        .expect("create");

    assert_eq!(map.grid_size_px, 70);
    assert_eq!(map.feet_per_square, 5.0);
    assert_eq!(map.ambient_light, AmbientLight::Bright);
    assert!(!map.fog_enabled);
    assert!(map.occluders.is_empty());
    assert_eq!(get_map(&state, map.id).await.expect("get"), map);
}

#[tokio::test]
async fn create_map_rejects_zero_width() {
    let state = test_app_state();
    let err = create_map(&state, &data(json!({ "width_px": 0, "height_px": 10 }))).await.expect_err("zero width");
    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");
}

#[tokio::test]
async fn open_map_hydrates_and_snapshots() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    create_token(&state, map.id, &data(json!({ "name": "Aria", "token_type": "pc", "x": 10.0, "y": 10.0 })))
        .await
        .expect("token");

    let (tx, _rx) = mpsc::channel(8);
    let client_id = Uuid::new_v4();
    let snapshot = open_map(&state, map.id, client_id, tx).await.expect("open");

    assert_eq!(snapshot.map.id, map.id);
    assert_eq!(snapshot.tokens.len(), 1);
    assert_eq!(snapshot.viewport, Viewport::default());
    let sessions = state.sessions.read().await;
    let session = sessions.get(&map.id).expect("session");
    assert!(session.gm_clients.contains_key(&client_id));
    assert_eq!(session.pending.len(), 1);
}

#[tokio::test]
async fn open_missing_map_is_not_found() {
    let state = test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let err = open_map(&state, Uuid::new_v4(), Uuid::new_v4(), tx).await.expect_err("missing");
    assert_eq!(err.error_code(), "E_NOT_FOUND");
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn player_attach_gets_full_resync_in_order() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let (tx, mut rx) = mpsc::channel(8);
    attach_player(&state, map.id, Uuid::new_v4(), tx).await.expect("attach");

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let msg = timeout(Duration::from_millis(200), rx.recv()).await.expect("timely").expect("message");
        kinds.push(msg.kind());
    }
    assert_eq!(kinds, ["map-update", "tokens-update", "fog-update", "viewport-update"]);
}

#[tokio::test]
async fn last_client_leaving_evicts_session() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let gm = Uuid::new_v4();
    let player = Uuid::new_v4();
    let (gm_tx, _gm_rx) = mpsc::channel(8);
    let (player_tx, _player_rx) = mpsc::channel(8);
    open_map(&state, map.id, gm, gm_tx).await.expect("open");
    attach_player(&state, map.id, player, player_tx).await.expect("attach");

    part_gm(&state, map.id, gm).await;
    assert!(state.sessions.read().await.contains_key(&map.id));

    part_player(&state, map.id, player).await;
    assert!(!state.sessions.read().await.contains_key(&map.id));
}

#[tokio::test]
async fn set_occluders_marks_every_emitter() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    create_token(&state, map.id, &data(json!({ "name": "Aria", "token_type": "pc", "x": 10.0, "y": 10.0 })))
        .await
        .expect("token");
    let (tx, _rx) = mpsc::channel(8);
    open_map(&state, map.id, Uuid::new_v4(), tx).await.expect("open");
    state.sessions.write().await.get_mut(&map.id).expect("session").pending.clear();

    let wall = Segment::new(Point::new(100.0, 0.0), Point::new(100.0, 700.0));
    let updated = set_occluders(&state, map.id, &[wall]).await.expect("occluders");

    assert_eq!(updated.occluders, vec![wall]);
    let sessions = state.sessions.read().await;
    let session = sessions.get(&map.id).expect("session");
    assert_eq!(session.map.occluders.len(), 1);
    assert_eq!(session.pending.len(), 1);
}

#[tokio::test]
async fn import_uvtt_scales_walls_to_pixels() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let uvtt = json!({
        "resolution": { "map_size": { "x": 20, "y": 10 }, "pixels_per_grid": 70 },
        "line_of_sight": [[{ "x": 1, "y": 1 }, { "x": 3, "y": 1 }, { "x": 3, "y": 4 }]],
        "portals": [
            { "bounds": [{ "x": 5, "y": 5 }, { "x": 6, "y": 5 }], "closed": true },
            { "bounds": [{ "x": 7, "y": 5 }, { "x": 8, "y": 5 }], "closed": false }
        ]
    });

    let updated = import_uvtt(&state, map.id, &uvtt).await.expect("import");
    assert_eq!(updated.occluders.len(), 3);
    assert_eq!(updated.occluders[0], Segment::new(Point::new(70.0, 70.0), Point::new(210.0, 70.0)));

    let err = import_uvtt(&state, map.id, &json!({ "walls": [] })).await.expect_err("malformed");
    assert_eq!(err.error_code(), "E_WRONG_TYPE");
}

#[tokio::test]
async fn ambient_change_pushes_map_update() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let (tx, mut rx) = mpsc::channel(8);
    attach_player(&state, map.id, Uuid::new_v4(), tx).await.expect("attach");
    for _ in 0..4 {
        rx.recv().await.expect("resync");
    }

    set_ambient_light(&state, map.id, AmbientLight::Dark).await.expect("ambient");

    let msg = timeout(Duration::from_millis(200), rx.recv()).await.expect("timely").expect("message");
    let PlayerMessage::MapUpdate { map: pushed } = msg else {
        panic!("expected map-update, got {}", msg.kind());
    };
    assert_eq!(pushed.ambient_light, AmbientLight::Dark);
}

#[tokio::test]
async fn viewport_needs_open_map_and_positive_zoom() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let vp = Viewport { x: 120.0, y: 40.0, zoom: 2.0 };

    let err = set_viewport(&state, map.id, vp).await.expect_err("not open");
    assert_eq!(err.error_code(), "E_MAP_NOT_OPEN");

    let (tx, mut rx) = mpsc::channel(8);
    attach_player(&state, map.id, Uuid::new_v4(), tx).await.expect("attach");
    for _ in 0..4 {
        rx.recv().await.expect("resync");
    }

    let err = set_viewport(&state, map.id, Viewport { zoom: 0.0, ..vp }).await.expect_err("zero zoom");
    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");

    assert_eq!(set_viewport(&state, map.id, vp).await.expect("viewport"), vp);
    let msg = timeout(Duration::from_millis(200), rx.recv()).await.expect("timely").expect("message");
    assert_eq!(msg, PlayerMessage::ViewportUpdate { viewport: vp });
}

#[tokio::test]
async fn delete_map_cascades_and_closes_session() {
    let state = test_app_state();
    let map = seed_map(&state).await;
    let token = create_token(&state, map.id, &data(json!({ "name": "Orc", "x": 1.0, "y": 1.0 })))
        .await
        .expect("token");
    let (tx, _rx) = mpsc::channel(8);
    open_map(&state, map.id, Uuid::new_v4(), tx).await.expect("open");

    delete_map(&state, map.id).await.expect("delete");

    assert!(state.sessions.read().await.is_empty());
    assert!(state.store.get_token(token.id).await.is_err());
    assert_eq!(get_map(&state, map.id).await.expect_err("gone").error_code(), "E_NOT_FOUND");
}
