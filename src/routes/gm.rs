//! GM websocket: the command interface.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming GM frames → parse + dispatch by syscall prefix
//! - Frames from map peers and the vision worker → forward to client
//!
//! Handler functions are pure business logic: they parse arguments, call a
//! service, and return an `Outcome`. The dispatch layer owns all outbound
//! concerns: the reply to the sender and the copy to GM peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `map:open` attaches the connection to a map session
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Close → part the open map (evicts the session if it was the last)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status, to_data};
use crate::geometry::{Circle, Rect};
use crate::model::map::parse_occluders;
use crate::model::{AmbientLight, LightType, ValidationError, opt_bool, opt_f64, opt_str, req_f64, req_uuid};
use crate::services::{self, sync};
use crate::state::{AppState, Viewport};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Done+data to the sender, a copy to every other GM on `map_id`.
    Broadcast { map_id: Uuid, data: Data },
    /// Done+data to the sender only.
    Reply(Data),
    /// Empty done to the sender only.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.gm_channel_capacity);

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, "gm ws: client connected");

    let mut current_map: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let frames = process_inbound_text(&state, &mut current_map, client_id, &client_tx, &text).await;
                        for frame in frames {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(map_id) = current_map {
        services::map::part_gm(&state, map_id, client_id).await;
    }
    info!(%client_id, "gm ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Kept separate from the transport so tests drive it directly.
async fn process_inbound_text(
    state: &AppState,
    current_map: &mut Option<Uuid>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "gm ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };
    if req.status != Status::Request {
        return vec![req.error("only request frames are accepted")];
    }
    if is_high_rate(&req.syscall) {
        debug!(%client_id, id = %req.id, syscall = %req.syscall, "gm ws: recv frame");
    } else {
        info!(%client_id, id = %req.id, syscall = %req.syscall, "gm ws: recv frame");
    }

    let prefix = req.prefix();
    let result = match prefix {
        "map" => handle_map(state, current_map, client_id, client_tx, &req).await,
        "token" => handle_token(state, *current_map, &req).await,
        "light" => handle_light(state, *current_map, &req).await,
        "fog" => handle_fog(state, *current_map, &req).await,
        "vision" => handle_vision(state, *current_map, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Broadcast { map_id, data }) => {
            let sender_frame = req.done_with(data).with_map_id(map_id);
            // Peers get a copy without parent_id (they didn't originate the request).
            let mut peer_frame = sender_frame.clone();
            peer_frame.id = Uuid::new_v4();
            peer_frame.parent_id = None;
            sync::broadcast_gm(state, map_id, &peer_frame, Some(client_id)).await;
            vec![sender_frame]
        }
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Lift a parse result into the handler's error channel.
fn arg<T>(req: &Frame, value: Result<T, ValidationError>) -> Result<T, Frame> {
    value.map_err(|e| req.error_from(&e))
}

/// The map a command addresses: frame `map_id`, then `data.map_id`, then
/// the connection's open map.
fn target_map(req: &Frame, current_map: Option<Uuid>) -> Result<Uuid, Frame> {
    if let Some(map_id) = req.map_id {
        return Ok(map_id);
    }
    match arg(req, crate::model::opt_uuid(&req.data, "map_id"))? {
        Some(map_id) => Ok(map_id),
        None => current_map.ok_or_else(|| req.error_from(&ValidationError::Missing("map_id"))),
    }
}

fn entity_id(req: &Frame) -> Result<Uuid, Frame> {
    arg(req, req_uuid(&req.data, "id"))
}

fn position(req: &Frame) -> Result<(f64, f64), Frame> {
    Ok((arg(req, req_f64(&req.data, "x"))?, arg(req, req_f64(&req.data, "y"))?))
}

fn list_data(key: &str, items: &impl serde::Serialize) -> Data {
    Data::from([(key.to_string(), serde_json::to_value(items).unwrap_or_default())])
}

// =============================================================================
// MAP HANDLERS
// =============================================================================

async fn handle_map(
    state: &AppState,
    current_map: &mut Option<Uuid>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let op = req.op();
    match op {
        "create" => {
            let map = services::map::create_map(state, &req.data).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&map)))
        }
        "get" => {
            let map_id = target_map(req, *current_map)?;
            let map = services::map::get_map(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&map)))
        }
        "delete" => {
            let map_id = target_map(req, *current_map)?;
            services::map::delete_map(state, map_id).await.map_err(|e| req.error_from(&e))?;
            if *current_map == Some(map_id) {
                *current_map = None;
            }
            Ok(Outcome::Done)
        }
        "open" => {
            let map_id = target_map(req, None)?;
            if let Some(old) = current_map.take() {
                services::map::part_gm(state, old, client_id).await;
            }
            let snapshot =
                services::map::open_map(state, map_id, client_id, client_tx.clone()).await.map_err(|e| req.error_from(&e))?;
            *current_map = Some(map_id);
            Ok(Outcome::Reply(to_data(&snapshot)))
        }
        "occluders" => {
            let map_id = target_map(req, *current_map)?;
            let value = req.data.get("occluders").ok_or_else(|| req.error_from(&ValidationError::Missing("occluders")))?;
            let segments = arg(req, parse_occluders(value))?;
            let map = services::map::set_occluders(state, map_id, &segments).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&map) })
        }
        "import-uvtt" => {
            let map_id = target_map(req, *current_map)?;
            let uvtt = req.data.get("uvtt").ok_or_else(|| req.error_from(&ValidationError::Missing("uvtt")))?;
            let map = services::map::import_uvtt(state, map_id, uvtt).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&map) })
        }
        "ambient" => {
            let map_id = target_map(req, *current_map)?;
            let raw = arg(req, opt_str(&req.data, "ambient_light"))?
                .ok_or_else(|| req.error_from(&ValidationError::Missing("ambient_light")))?;
            let ambient: AmbientLight = arg(req, raw.parse())?;
            let map = services::map::set_ambient_light(state, map_id, ambient).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&map) })
        }
        "viewport" => {
            let map_id = target_map(req, *current_map)?;
            let (x, y) = position(req)?;
            let zoom = arg(req, opt_f64(&req.data, "zoom"))?.unwrap_or(1.0);
            let viewport =
                services::map::set_viewport(state, map_id, Viewport { x, y, zoom }).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&viewport) })
        }
        _ => Err(req.error(format!("unknown map op: {op}"))),
    }
}

// =============================================================================
// TOKEN HANDLERS
// =============================================================================

async fn handle_token(state: &AppState, current_map: Option<Uuid>, req: &Frame) -> Result<Outcome, Frame> {
    use services::token;

    let op = req.op();
    match op {
        "create" => {
            let map_id = target_map(req, current_map)?;
            let t = token::create_token(state, map_id, &req.data).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&t) })
        }
        "get" => {
            let t = token::get_token(state, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&t)))
        }
        "list" => {
            let map_id = target_map(req, current_map)?;
            let tokens = token::list_tokens(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(list_data("tokens", &tokens)))
        }
        "update" => {
            let t = token::update_token(state, entity_id(req)?, &req.data).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id: t.map_id, data: to_data(&t) })
        }
        "move" => {
            let id = entity_id(req)?;
            let (x, y) = position(req)?;
            let t = token::update_token_position(state, id, x, y).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id: t.map_id, data: to_data(&t) })
        }
        "toggle-visibility" => {
            let t = token::toggle_token_visibility(state, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id: t.map_id, data: to_data(&t) })
        }
        "delete" => {
            let t = token::delete_token(state, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            let data = Data::from([("id".to_string(), serde_json::json!(t.id))]);
            Ok(Outcome::Broadcast { map_id: t.map_id, data })
        }
        _ => Err(req.error(format!("unknown token op: {op}"))),
    }
}

// =============================================================================
// LIGHT HANDLERS
// =============================================================================

async fn handle_light(state: &AppState, current_map: Option<Uuid>, req: &Frame) -> Result<Outcome, Frame> {
    use services::light;

    let op = req.op();
    match op {
        "create" => {
            let map_id = target_map(req, current_map)?;
            let view = light::create_light(state, map_id, &req.data).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&view) })
        }
        "torch" | "lantern" => {
            let map_id = target_map(req, current_map)?;
            let (x, y) = position(req)?;
            let light_type = if op == "torch" { LightType::Torch } else { LightType::Lantern };
            let view = light::create_preset(state, map_id, light_type, x, y).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&view) })
        }
        "list" => {
            let map_id = target_map(req, current_map)?;
            let lights = light::list_lights(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(list_data("lights", &lights)))
        }
        "update" => {
            let view = light::update_light(state, entity_id(req)?, &req.data).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id: view.light.map_id, data: to_data(&view) })
        }
        "move" => {
            let id = entity_id(req)?;
            let (x, y) = position(req)?;
            let view = light::move_light(state, id, x, y).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id: view.light.map_id, data: to_data(&view) })
        }
        "delete" => {
            let l = light::delete_light(state, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            let data = Data::from([("id".to_string(), serde_json::json!(l.id))]);
            Ok(Outcome::Broadcast { map_id: l.map_id, data })
        }
        "delete-all" => {
            let map_id = target_map(req, current_map)?;
            let count = light::delete_all_lights(state, map_id).await.map_err(|e| req.error_from(&e))?;
            let data = Data::from([("deleted".to_string(), serde_json::json!(count))]);
            Ok(Outcome::Broadcast { map_id, data })
        }
        "set-active" => {
            let map_id = target_map(req, current_map)?;
            let id = entity_id(req)?;
            let active = arg(req, opt_bool(&req.data, "active"))?
                .ok_or_else(|| req.error_from(&ValidationError::Missing("active")))?;
            let view = light::set_light_active(state, map_id, id, active).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&view) })
        }
        "clear-override" => {
            let map_id = target_map(req, current_map)?;
            let view = light::clear_light_override(state, map_id, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&view) })
        }
        _ => Err(req.error(format!("unknown light op: {op}"))),
    }
}

// =============================================================================
// FOG HANDLERS
// =============================================================================

async fn handle_fog(state: &AppState, current_map: Option<Uuid>, req: &Frame) -> Result<Outcome, Frame> {
    use services::fog;

    let op = req.op();
    let enabled_data = |enabled: bool| Data::from([("fog_enabled".to_string(), serde_json::json!(enabled))]);
    match op {
        "get" => {
            let map_id = target_map(req, current_map)?;
            let fog_state = fog::get_fog_state(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&fog_state)))
        }
        "toggle" => {
            let map_id = target_map(req, current_map)?;
            let enabled = fog::toggle_fog(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: enabled_data(enabled) })
        }
        "enable" => {
            let map_id = target_map(req, current_map)?;
            let enabled = fog::enable_fog(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: enabled_data(enabled) })
        }
        "disable" => {
            let map_id = target_map(req, current_map)?;
            let enabled = fog::disable_fog(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: enabled_data(enabled) })
        }
        "reveal-rect" => {
            let map_id = target_map(req, current_map)?;
            let (x, y) = position(req)?;
            let width = arg(req, req_f64(&req.data, "width"))?;
            let height = arg(req, req_f64(&req.data, "height"))?;
            let area = fog::reveal_rect(state, map_id, Rect::new(x, y, width, height)).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&area) })
        }
        "reveal-circle" => {
            let map_id = target_map(req, current_map)?;
            let cx = arg(req, req_f64(&req.data, "cx"))?;
            let cy = arg(req, req_f64(&req.data, "cy"))?;
            let radius = arg(req, req_f64(&req.data, "radius"))?;
            let area = fog::reveal_circle(state, map_id, Circle::new(cx, cy, radius)).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&area) })
        }
        "reveal-all" => {
            let map_id = target_map(req, current_map)?;
            let area = fog::reveal_all(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { map_id, data: to_data(&area) })
        }
        "delete-area" => {
            let area = fog::delete_revealed_area(state, entity_id(req)?).await.map_err(|e| req.error_from(&e))?;
            let data = Data::from([("id".to_string(), serde_json::json!(area.id))]);
            Ok(Outcome::Broadcast { map_id: area.map_id, data })
        }
        "reset" => {
            let map_id = target_map(req, current_map)?;
            let count = fog::reset_fog(state, map_id).await.map_err(|e| req.error_from(&e))?;
            let data = Data::from([("deleted".to_string(), serde_json::json!(count))]);
            Ok(Outcome::Broadcast { map_id, data })
        }
        _ => Err(req.error(format!("unknown fog op: {op}"))),
    }
}

// =============================================================================
// VISION HANDLERS
// =============================================================================

async fn handle_vision(state: &AppState, current_map: Option<Uuid>, req: &Frame) -> Result<Outcome, Frame> {
    let op = req.op();
    match op {
        "get" => {
            let map_id = target_map(req, current_map)?;
            let polygons = services::vision::get_visibility(state, map_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(list_data("visibility", &polygons)))
        }
        _ => Err(req.error(format!("unknown vision op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Syscalls sent once per drag step or worker tick; logged at debug.
fn is_high_rate(syscall: &str) -> bool {
    matches!(syscall, "token:move" | "light:move" | "vision:update")
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "gm ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "gm ws: send frame status=Error");
    } else if is_high_rate(&frame.syscall) {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "gm ws: send frame");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "gm ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "gm_test.rs"]
mod tests;
