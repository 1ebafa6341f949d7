use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::geometry::{Point, Polygon};
use crate::model::{FogState, LightSource, LightType, RevealShape, RevealedArea, Token, VisionType};
use crate::visibility::Visibility;

fn map(fog_enabled: bool) -> MapRecord {
    MapRecord {
        id: Uuid::new_v4(),
        name: "Crypt".into(),
        width_px: 200,
        height_px: 100,
        grid_size_px: 50,
        feet_per_square: 5.0,
        ambient_light: AmbientLight::Dim,
        fog_enabled,
        occluders: Vec::new(),
    }
}

fn token(map_id: Uuid, name: &str, token_type: TokenType, visible: bool) -> Token {
    Token {
        id: Uuid::new_v4(),
        map_id,
        name: name.into(),
        token_type,
        size: TokenSize::Medium,
        x: 25.0,
        y: 25.0,
        visible_to_players: visible,
        color: Some("#FF0000".into()),
        monster_id: None,
        character_id: None,
        vision_type: VisionType::Darkvision,
        vision_range_ft: Some(60.0),
        notes: Some("secretly a lich".into()),
    }
}

fn session_with(fog_enabled: bool, tokens: Vec<Token>) -> MapSession {
    let m = map(fog_enabled);
    let fog = FogState { map_id: m.id, fog_enabled, revealed_areas: Vec::new() };
    MapSession::new(m, tokens, Vec::new(), fog)
}

fn attach(session: &mut MapSession, capacity: usize) -> mpsc::Receiver<PlayerMessage> {
    let (tx, rx) = mpsc::channel(capacity);
    session.players.insert(Uuid::new_v4(), tx);
    rx
}

#[test]
fn hidden_tokens_never_reach_players() {
    let map_id = Uuid::new_v4();
    let shown = token(map_id, "Goblin", TokenType::Monster, true);
    let hidden = token(map_id, "Assassin", TokenType::Monster, false);
    let session = session_with(false, vec![shown.clone(), hidden.clone()]);

    let tokens = player_tokens(&session.registry);
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].id, shown.id);

    let json = serde_json::to_string(&PlayerMessage::TokensUpdate { tokens }).expect("serialize");
    assert!(!json.contains(&hidden.id.to_string()));
    assert!(!json.contains("Assassin"));
}

#[test]
fn player_tokens_strip_notes_and_vision() {
    let session = session_with(false, vec![token(Uuid::new_v4(), "Aria", TokenType::Pc, true)]);
    let value = serde_json::to_value(&player_tokens(&session.registry)[0]).expect("serialize");
    let obj = value.as_object().expect("object");
    assert!(!obj.contains_key("notes"));
    assert!(!obj.contains_key("vision_type"));
    assert!(!obj.contains_key("vision_range_ft"));
    assert!(!obj.contains_key("visible_to_players"));
    assert_eq!(obj["token_type"], "pc");
}

#[test]
fn player_map_omits_occluders() {
    let session = session_with(false, Vec::new());
    let value = serde_json::to_value(player_map(&session.map)).expect("serialize");
    assert!(value.get("occluders").is_none());
    assert_eq!(value["ambient_light"], "dim");
}

#[test]
fn fog_disabled_sends_no_mask() {
    let session = session_with(false, Vec::new());
    assert_eq!(fog_snapshot(&session, 10).render(), PlayerFog::Disabled);
}

#[test]
fn fog_mask_covers_revealed_areas_only() {
    let mut session = session_with(true, Vec::new());
    session.fog.revealed_areas.push(RevealedArea {
        id: Uuid::new_v4(),
        map_id: session.map.id,
        shape: RevealShape::Rect,
        x: 0.0,
        y: 0.0,
        width: 50.0,
        height: 50.0,
    });

    let PlayerFog::Masked(mask) = fog_snapshot(&session, 10).render() else {
        panic!("expected a mask");
    };
    assert_eq!((mask.cols, mask.rows), (20, 10));
    assert!(mask.is_visible(0, 0));
    assert!(mask.is_visible(4, 4));
    assert!(!mask.is_visible(10, 5));
}

#[test]
fn fog_mask_includes_visible_pc_sight_but_not_monsters() {
    let map_id = Uuid::new_v4();
    let pc = token(map_id, "Aria", TokenType::Pc, true);
    let monster = token(map_id, "Ogre", TokenType::Monster, true);
    let mut session = session_with(true, vec![pc.clone(), monster.clone()]);

    let square = |x0: f64| {
        Polygon::new(vec![
            Point::new(x0, 0.0),
            Point::new(x0 + 40.0, 0.0),
            Point::new(x0 + 40.0, 40.0),
            Point::new(x0, 40.0),
        ])
    };
    session.visibility.insert(
        EmitterId::Token(pc.id),
        Visibility { emitter: EmitterId::Token(pc.id), polygon: square(0.0), bright: None },
    );
    session.visibility.insert(
        EmitterId::Token(monster.id),
        Visibility { emitter: EmitterId::Token(monster.id), polygon: square(100.0), bright: None },
    );

    let PlayerFog::Masked(mask) = fog_snapshot(&session, 10).render() else {
        panic!("expected a mask");
    };
    assert!(mask.is_visible(1, 1));
    assert!(!mask.is_visible(11, 1));
}

fn square(x0: f64, y0: f64, side: f64) -> Polygon {
    Polygon::new(vec![
        Point::new(x0, y0),
        Point::new(x0 + side, y0),
        Point::new(x0 + side, y0 + side),
        Point::new(x0, y0 + side),
    ])
}

#[test]
fn torch_carried_by_hidden_token_stays_dark() {
    let map_id = Uuid::new_v4();
    let mut lurker = token(map_id, "Lurker", TokenType::Monster, false);
    lurker.x = 175.0;
    lurker.y = 75.0;
    let torch = LightSource {
        id: Uuid::new_v4(),
        map_id,
        token_id: Some(lurker.id),
        name: "Torch".into(),
        light_type: LightType::Torch,
        x: 0.0,
        y: 0.0,
        bright_radius_ft: 20.0,
        dim_radius_ft: 40.0,
        color: None,
        active: true,
    };
    let m = map(true);
    let fog = FogState { map_id: m.id, fog_enabled: true, revealed_areas: Vec::new() };
    let mut session = MapSession::new(m, vec![lurker.clone()], vec![torch.clone()], fog);
    let emitter = EmitterId::Light(torch.id);
    session.visibility.insert(emitter, Visibility { emitter, polygon: square(150.0, 50.0, 50.0), bright: None });

    assert!(!feeds_player_fog(&session, emitter));
    let PlayerFog::Masked(mask) = fog_snapshot(&session, 10).render() else {
        panic!("expected a mask");
    };
    assert!(!mask.is_visible(17, 7));

    // Revealing the carrier lights its surroundings again.
    session.registry.upsert_token(Token { visible_to_players: true, ..lurker });
    assert!(feeds_player_fog(&session, emitter));
    let PlayerFog::Masked(mask) = fog_snapshot(&session, 10).render() else {
        panic!("expected a mask");
    };
    assert!(mask.is_visible(17, 7));
}

#[test]
fn full_resync_is_map_tokens_fog_viewport() {
    let session = session_with(true, Vec::new());
    let fog = fog_snapshot(&session, 10).render();
    let kinds: Vec<_> = full_resync(&session, Some(fog)).iter().map(PlayerMessage::kind).collect();
    assert_eq!(kinds, ["map-update", "tokens-update", "fog-update", "viewport-update"]);
}

#[test]
fn full_resync_without_mask_skips_fog() {
    let session = session_with(true, Vec::new());
    let kinds: Vec<_> = full_resync(&session, None).iter().map(PlayerMessage::kind).collect();
    assert_eq!(kinds, ["map-update", "tokens-update", "viewport-update"]);
}

#[test]
fn unchanged_token_set_is_not_resent() {
    let map_id = Uuid::new_v4();
    let mut session = session_with(false, vec![token(map_id, "Aria", TokenType::Pc, true)]);
    let mut rx = attach(&mut session, 8);

    push_tokens(&mut session);
    assert_eq!(rx.try_recv().expect("first push").kind(), "tokens-update");

    session.registry.upsert_token(token(map_id, "Shade", TokenType::Monster, false));
    push_tokens(&mut session);
    assert!(rx.try_recv().is_err());
}

#[test]
fn identical_mask_is_delivered_once() {
    let mut session = session_with(true, Vec::new());
    let mut rx = attach(&mut session, 8);

    let fog = fog_snapshot(&session, 10).render();
    deliver_fog(&mut session, fog.clone());
    assert_eq!(rx.try_recv().expect("first mask").kind(), "fog-update");

    deliver_fog(&mut session, fog);
    assert!(rx.try_recv().is_err());
}

#[test]
fn message_tag_is_kebab_case() {
    let msg = PlayerMessage::ViewportUpdate { viewport: Viewport::default() };
    let value = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(value["type"], msg.kind());
    assert_eq!(value["viewport"]["zoom"], 1.0);
}

#[tokio::test]
async fn push_delivers_to_every_player() {
    let mut session = session_with(false, Vec::new());
    let mut a = attach(&mut session, 4);
    let mut b = attach(&mut session, 4);

    push_viewport(&session);

    for rx in [&mut a, &mut b] {
        let msg = timeout(Duration::from_millis(200), rx.recv()).await.expect("timely").expect("message");
        assert_eq!(msg.kind(), "viewport-update");
    }
}

#[tokio::test]
async fn full_channel_drops_without_blocking_others() {
    let mut session = session_with(false, Vec::new());
    let mut slow = attach(&mut session, 1);
    let mut fast = attach(&mut session, 8);

    push_viewport(&session);
    push_map(&session);

    let first = timeout(Duration::from_millis(200), slow.recv()).await.expect("timely").expect("message");
    assert_eq!(first.kind(), "viewport-update");
    assert!(slow.try_recv().is_err());

    let kinds = [
        timeout(Duration::from_millis(200), fast.recv()).await.expect("timely").expect("message").kind(),
        timeout(Duration::from_millis(200), fast.recv()).await.expect("timely").expect("message").kind(),
    ];
    assert_eq!(kinds, ["viewport-update", "map-update"]);
}

#[test]
fn closed_channel_is_ignored() {
    let mut session = session_with(false, Vec::new());
    let rx = attach(&mut session, 4);
    drop(rx);
    push_tokens(&mut session);
}

#[tokio::test]
async fn gm_broadcast_skips_excluded_client() {
    let mut session = session_with(false, Vec::new());
    let sender = Uuid::new_v4();
    let (tx_a, mut rx_a) = mpsc::channel(4);
    let (tx_b, mut rx_b) = mpsc::channel(4);
    session.gm_clients.insert(sender, tx_a);
    session.gm_clients.insert(Uuid::new_v4(), tx_b);

    let frame = Frame::request("vision:update", crate::frame::Data::new());
    broadcast_gm_session(&session, &frame, Some(sender));

    let got = timeout(Duration::from_millis(200), rx_b.recv()).await.expect("timely").expect("frame");
    assert_eq!(got.syscall, "vision:update");
    assert!(rx_a.try_recv().is_err());
}
