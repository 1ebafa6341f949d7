//! Vision worker: debounced visibility recomputation.
//!
//! DESIGN
//! ======
//! Commands only mark emitters dirty. A background task wakes every
//! `vision_tick_ms`, and for every live session:
//!
//! 1. takes the pending set under the sessions lock and resolves each
//!    emitter to a spec stamped with its current generation,
//! 2. releases the lock and computes all specs on the blocking pool
//!    (rayon fans the batch out across cores),
//! 3. re-takes the lock and applies a result only if the emitter's
//!    generation is unchanged.
//!
//! A result computed against an older position is dropped whole; the
//! newer change already queued the emitter again. Many drags inside one
//! tick therefore cost one computation at the last position.
//!
//! ERROR HANDLING
//! ==============
//! The computation is pure and cannot fail. A panicked blocking task is
//! logged and its emitters are queued again.

use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};
use uuid::Uuid;

use super::map::MapError;
use super::sync;
use crate::frame::{Data, Frame};
use crate::geometry::{Rect, Segment};
use crate::state::AppState;
use crate::visibility::{EmitterId, EmitterSpec, Visibility, compute_batch};

/// Spawn the background vision task. Returns a handle for shutdown.
pub fn spawn_vision_task(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(state.config.vision_tick_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            recompute_pending(&state).await;
        }
    })
}

/// Work for one map, detached from the session.
pub(crate) struct VisionJob {
    pub map_id: Uuid,
    pub bounds: Rect,
    pub occluders: Vec<Segment>,
    pub specs: Vec<EmitterSpec>,
    pub generations: Vec<u64>,
    /// Emitters dropped at snapshot time (deleted or no longer emitting).
    pub forgotten: bool,
}

/// Drain every session's pending set into jobs.
pub(crate) async fn snapshot_pending(state: &AppState) -> Vec<VisionJob> {
    let mut sessions = state.sessions.write().await;
    let mut jobs = Vec::new();
    for (map_id, session) in sessions.iter_mut() {
        if session.pending.is_empty() {
            continue;
        }
        let pending: Vec<EmitterId> = session.pending.drain().collect();
        let mut job = VisionJob {
            map_id: *map_id,
            bounds: session.map.bounds(),
            occluders: session.map.occluders.clone(),
            specs: Vec::with_capacity(pending.len()),
            generations: Vec::with_capacity(pending.len()),
            forgotten: false,
        };
        for id in pending {
            match session.registry.emitter(&session.map, id) {
                Some(spec) => {
                    job.generations.push(session.generation(id));
                    job.specs.push(spec);
                }
                None => {
                    job.forgotten |= session.visibility.contains_key(&id);
                    session.forget_emitter(id);
                }
            }
        }
        jobs.push(job);
    }
    jobs
}

/// Apply computed results, discarding stale ones. Returns the number of
/// polygons applied.
pub(crate) async fn apply_results(state: &AppState, jobs: Vec<VisionJob>, results: Vec<Vec<Visibility>>) -> usize {
    let mut applied = 0;
    let mut sessions = state.sessions.write().await;
    for (job, results) in jobs.into_iter().zip(results) {
        let Some(session) = sessions.get_mut(&job.map_id) else {
            continue;
        };
        let mut changed: Vec<Visibility> = Vec::new();
        for (vis, generation) in results.into_iter().zip(job.generations) {
            if session.generation(vis.emitter) != generation {
                debug!(map_id = %job.map_id, emitter = ?vis.emitter, "discarding stale visibility");
                continue;
            }
            session.visibility.insert(vis.emitter, vis.clone());
            changed.push(vis);
        }
        if changed.is_empty() && !job.forgotten {
            continue;
        }
        applied += changed.len();

        let frame = Frame::request("vision:update", Data::new())
            .with_map_id(job.map_id)
            .with_data("visibility", serde_json::to_value(&changed).unwrap_or_default());
        sync::broadcast_gm_session(session, &frame, None);
        if job.forgotten || changed.iter().any(|v| sync::feeds_player_fog(session, v.emitter)) {
            sync::push_fog(state, session);
        }
    }
    applied
}

/// One worker pass. Returns the number of polygons applied.
pub async fn recompute_pending(state: &AppState) -> usize {
    let jobs = snapshot_pending(state).await;
    if jobs.is_empty() {
        return 0;
    }

    let segments = state.config.vision_circle_segments;
    let inputs: Vec<_> = jobs.iter().map(|j| (j.specs.clone(), j.bounds, j.occluders.clone())).collect();
    let computed = tokio::task::spawn_blocking(move || {
        inputs
            .iter()
            .map(|(specs, bounds, occluders)| compute_batch(specs, *bounds, occluders, segments))
            .collect::<Vec<_>>()
    })
    .await;

    match computed {
        Ok(results) => apply_results(state, jobs, results).await,
        Err(e) => {
            error!(error = %e, "visibility computation failed; re-queueing");
            let mut sessions = state.sessions.write().await;
            for job in jobs {
                if let Some(session) = sessions.get_mut(&job.map_id) {
                    let ids: HashSet<EmitterId> = job.specs.iter().map(|s| s.id).collect();
                    session.pending.extend(ids);
                }
            }
            0
        }
    }
}

/// Current polygons of an open map.
///
/// # Errors
///
/// `NotOpen` without a live session.
pub async fn get_visibility(state: &AppState, map_id: Uuid) -> Result<Vec<Visibility>, MapError> {
    let sessions = state.sessions.read().await;
    let session = sessions.get(&map_id).ok_or(MapError::NotOpen(map_id))?;
    Ok(session.registry.emitter_ids().into_iter().filter_map(|id| session.visibility.get(&id).cloned()).collect())
}

#[cfg(test)]
#[path = "vision_test.rs"]
mod tests;
