use super::*;

fn stored(area: NewRevealedArea) -> RevealedArea {
    RevealedArea {
        id: Uuid::new_v4(),
        map_id: area.map_id,
        shape: area.shape,
        x: area.x,
        y: area.y,
        width: area.width,
        height: area.height,
    }
}

#[test]
fn circle_is_stored_as_bounding_box() {
    let area = NewRevealedArea::circle(Uuid::new_v4(), Circle::new(200.0, 200.0, 50.0));
    assert_eq!(area.shape, RevealShape::Circle);
    assert!((area.x - 150.0).abs() < f64::EPSILON);
    assert!((area.y - 150.0).abs() < f64::EPSILON);
    assert!((area.width - 100.0).abs() < f64::EPSILON);
    assert!((area.height - 100.0).abs() < f64::EPSILON);
}

#[test]
fn circle_geometry_survives_storage() {
    let area = stored(NewRevealedArea::circle(Uuid::new_v4(), Circle::new(200.0, 200.0, 50.0)));
    assert_eq!(area.circle(), Some(Circle::new(200.0, 200.0, 50.0)));
    assert!(area.contains(Point::new(200.0, 240.0)));
    // The bounding box corner is not revealed.
    assert!(!area.contains(Point::new(152.0, 152.0)));
}

#[test]
fn rect_area_has_no_circle() {
    let area = stored(NewRevealedArea::rect(Uuid::new_v4(), Rect::new(0.0, 0.0, 100.0, 100.0)));
    assert_eq!(area.circle(), None);
    assert!(area.contains(Point::new(99.0, 99.0)));
}

#[test]
fn validate_rejects_negative_extent() {
    let area = NewRevealedArea::rect(Uuid::new_v4(), Rect::new(0.0, 0.0, -1.0, 10.0));
    assert!(matches!(area.validate(), Err(ValidationError::OutOfRange { field: "width", .. })));
}

#[test]
fn validate_rejects_nan_radius() {
    let area = NewRevealedArea::circle(Uuid::new_v4(), Circle::new(0.0, 0.0, f64::NAN));
    assert!(area.validate().is_err());
}

#[test]
fn fog_state_union_query() {
    let map_id = Uuid::new_v4();
    let state = FogState {
        map_id,
        fog_enabled: true,
        revealed_areas: vec![
            stored(NewRevealedArea::rect(map_id, Rect::new(0.0, 0.0, 10.0, 10.0))),
            stored(NewRevealedArea::circle(map_id, Circle::new(100.0, 100.0, 5.0))),
        ],
    };
    assert!(state.is_revealed(Point::new(5.0, 5.0)));
    assert!(state.is_revealed(Point::new(100.0, 103.0)));
    assert!(!state.is_revealed(Point::new(50.0, 50.0)));
}

#[test]
fn shape_parses_and_rejects() {
    assert_eq!("circle".parse::<RevealShape>(), Ok(RevealShape::Circle));
    assert!("hexagon".parse::<RevealShape>().is_err());
}
