use super::*;
use crate::model::{AmbientLight, LightType, TokenSize, TokenType, VisionType};

fn map() -> MapRecord {
    MapRecord {
        id: Uuid::new_v4(),
        name: "Crypt".into(),
        width_px: 300,
        height_px: 400,
        grid_size_px: 70,
        feet_per_square: 5.0,
        ambient_light: AmbientLight::Dark,
        fog_enabled: true,
        occluders: Vec::new(),
    }
}

fn token(map_id: Uuid, token_type: TokenType, range: Option<f64>) -> Token {
    Token {
        id: Uuid::new_v4(),
        map_id,
        name: "t".into(),
        token_type,
        size: TokenSize::Medium,
        x: 10.0,
        y: 10.0,
        visible_to_players: true,
        color: None,
        monster_id: None,
        character_id: None,
        vision_type: VisionType::Normal,
        vision_range_ft: range,
        notes: None,
    }
}

fn light(map_id: Uuid, active: bool) -> LightSource {
    LightSource {
        id: Uuid::new_v4(),
        map_id,
        token_id: None,
        name: "Torch".into(),
        light_type: LightType::Torch,
        x: 100.0,
        y: 100.0,
        bright_radius_ft: 20.0,
        dim_radius_ft: 40.0,
        color: Some("#FFAA00".into()),
        active,
    }
}

#[test]
fn move_token_touches_only_position() {
    let m = map();
    let a = token(m.id, TokenType::Pc, Some(30.0));
    let b = token(m.id, TokenType::Npc, None);
    let mut registry = MapRegistry::hydrate(vec![a.clone(), b.clone()], Vec::new());

    assert!(registry.move_token(a.id, 500.0, 500.0));
    assert_eq!(registry.token(a.id), Some(&Token { x: 500.0, y: 500.0, ..a }));
    assert_eq!(registry.token(b.id), Some(&b));
    assert!(!registry.move_token(Uuid::new_v4(), 1.0, 1.0));
}

#[test]
fn tokens_iterate_in_insertion_order() {
    let m = map();
    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let tokens = ids.iter().map(|id| Token { id: *id, ..token(m.id, TokenType::Marker, None) }).collect();
    let registry = MapRegistry::hydrate(tokens, Vec::new());
    let listed: Vec<Uuid> = registry.tokens().map(|t| t.id).collect();
    assert_eq!(listed, ids);
}

#[test]
fn overlay_wins_over_persisted_flag() {
    let m = map();
    let off = light(m.id, false);
    let mut registry = MapRegistry::hydrate(Vec::new(), vec![off.clone()]);
    assert!(registry.emitter(&m, EmitterId::Light(off.id)).is_none());

    assert!(registry.set_light_active(off.id, true));
    assert!(registry.light_views()[0].effective_active);
    assert!(!registry.light(off.id).unwrap().active, "persisted flag untouched");
    assert!(registry.emitter(&m, EmitterId::Light(off.id)).is_some());

    assert_eq!(registry.clear_light_override(off.id), Some(true));
    assert!(registry.emitter(&m, EmitterId::Light(off.id)).is_none());
}

#[test]
fn override_for_unknown_light_is_refused() {
    let mut registry = MapRegistry::default();
    assert!(!registry.set_light_active(Uuid::new_v4(), true));
    assert!(registry.overlay().is_empty());
}

#[test]
fn removing_light_drops_its_override() {
    let m = map();
    let l = light(m.id, true);
    let mut registry = MapRegistry::hydrate(Vec::new(), vec![l.clone()]);
    registry.set_light_active(l.id, false);
    registry.remove_light(l.id);
    assert!(registry.overlay().is_empty());
}

#[test]
fn emitter_ranges_convert_feet_to_pixels() {
    let m = map();
    let scout = token(m.id, TokenType::Npc, Some(30.0));
    let torch = light(m.id, true);
    let registry = MapRegistry::hydrate(vec![scout.clone()], vec![torch.clone()]);

    let t = registry.emitter(&m, EmitterId::Token(scout.id)).unwrap();
    assert!((t.range_px - 420.0).abs() < 1e-9);
    assert_eq!(t.bright_px, None);

    let l = registry.emitter(&m, EmitterId::Light(torch.id)).unwrap();
    assert!((l.range_px - 560.0).abs() < 1e-9);
    assert!((l.bright_px.unwrap() - 280.0).abs() < 1e-9);
}

#[test]
fn pc_without_range_sees_map_diagonal() {
    let m = map();
    let pc = token(m.id, TokenType::Pc, None);
    let marker = token(m.id, TokenType::Marker, None);
    let registry = MapRegistry::hydrate(vec![pc.clone(), marker.clone()], Vec::new());

    let spec = registry.emitter(&m, EmitterId::Token(pc.id)).unwrap();
    assert!((spec.range_px - 500.0).abs() < 1e-9);
    assert!(registry.emitter(&m, EmitterId::Token(marker.id)).is_none());
    assert_eq!(registry.emitters(&m).len(), 1);
}

#[test]
fn carried_light_follows_token() {
    let m = map();
    let bearer = token(m.id, TokenType::Pc, None);
    let mut torch = light(m.id, true);
    torch.token_id = Some(bearer.id);
    let mut registry = MapRegistry::hydrate(vec![bearer.clone()], vec![torch.clone()]);

    registry.move_token(bearer.id, 250.0, 300.0);
    let spec = registry.emitter(&m, EmitterId::Light(torch.id)).unwrap();
    assert_eq!(spec.origin, Point::new(250.0, 300.0));
    assert_eq!(registry.carried_lights(bearer.id), vec![torch.id]);

    registry.remove_token(bearer.id);
    let spec = registry.emitter(&m, EmitterId::Light(torch.id)).unwrap();
    assert_eq!(spec.origin, Point::new(100.0, 100.0));
}

#[test]
fn clear_lights_returns_ids() {
    let m = map();
    let a = light(m.id, true);
    let b = light(m.id, false);
    let mut registry = MapRegistry::hydrate(Vec::new(), vec![a.clone(), b.clone()]);
    registry.set_light_active(b.id, true);
    assert_eq!(registry.clear_lights(), vec![a.id, b.id]);
    assert_eq!(registry.lights().count(), 0);
    assert!(registry.overlay().is_empty());
}
