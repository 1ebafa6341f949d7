//! Command business logic.
//!
//! Every mutation follows one path: validate the payload, take the map's
//! command lock, write through the repository, then, only if the map has a
//! live session, apply the stored row to the registry, mark affected
//! emitters for recompute, and push the filtered result to player surfaces.

pub mod fog;
pub mod light;
pub mod map;
pub mod sync;
pub mod token;
pub mod vision;

use uuid::Uuid;

use crate::model::MapRecord;
use crate::state::{AppState, MapSession};
use crate::store::StoreError;

/// Find the open map whose session satisfies `holds`.
pub(crate) async fn live_map_of(state: &AppState, holds: impl Fn(&MapSession) -> bool) -> Option<Uuid> {
    let sessions = state.sessions.read().await;
    sessions.iter().find(|(_, s)| holds(s)).map(|(id, _)| *id)
}

/// The map record, from the live session when open, else the repository.
pub(crate) async fn map_record(state: &AppState, map_id: Uuid) -> Result<MapRecord, StoreError> {
    {
        let sessions = state.sessions.read().await;
        if let Some(session) = sessions.get(&map_id) {
            return Ok(session.map.clone());
        }
    }
    state.store.get_map(map_id).await
}
