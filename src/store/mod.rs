//! Entity repository: durable CRUD for maps, tokens, lights and fog.
//!
//! DESIGN
//! ======
//! `EntityStore` is the single writer of durable rows. `PgStore` backs it
//! with Postgres; `MemoryStore` enforces the same keys and constraints in
//! process for tests and database-less runs. Every write is one statement
//! or one transaction, so a failed call leaves prior state untouched.
//!
//! ERROR HANDLING
//! ==============
//! Missing rows, dangling references and rejected values surface as
//! distinct `StoreError` variants. Driver errors are classified by
//! `DatabaseError::kind()` so a foreign-key violation from Postgres and one
//! caught by the memory store look the same to callers.

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::geometry::Segment;
use crate::model::{
    AmbientLight, FogState, LightSource, MapRecord, NewLightSource, NewMap, NewRevealedArea, NewToken, RevealedArea,
    Token, TokenSummary,
};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        if let sqlx::Error::Database(db) = &err {
            match db.kind() {
                ErrorKind::ForeignKeyViolation => return Self::ForeignKey(db.message().to_string()),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation | ErrorKind::UniqueViolation => {
                    return Self::Constraint(db.message().to_string());
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::ForeignKey(_) => "E_FOREIGN_KEY",
            Self::Constraint(_) => "E_CONSTRAINT",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TRAIT
// =============================================================================

/// Durable repository for every record the core persists.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    // --- maps ---------------------------------------------------------------

    async fn create_map(&self, map: &NewMap) -> StoreResult<MapRecord>;
    async fn get_map(&self, id: Uuid) -> StoreResult<MapRecord>;
    /// Delete a map and, by cascade, everything placed on it.
    async fn delete_map(&self, id: Uuid) -> StoreResult<()>;
    async fn set_occluders(&self, id: Uuid, occluders: &[Segment]) -> StoreResult<MapRecord>;
    async fn set_ambient_light(&self, id: Uuid, ambient: AmbientLight) -> StoreResult<MapRecord>;

    // --- tokens -------------------------------------------------------------

    async fn create_token(&self, token: &NewToken) -> StoreResult<Token>;
    async fn get_token(&self, id: Uuid) -> StoreResult<Token>;
    /// Tokens on a map with monster/character display names resolved.
    async fn list_tokens(&self, map_id: Uuid) -> StoreResult<Vec<TokenSummary>>;
    /// Write every mutable column of `token`.
    async fn update_token(&self, token: &Token) -> StoreResult<Token>;
    /// Position-only write; no other column is touched.
    async fn update_token_position(&self, id: Uuid, x: f64, y: f64) -> StoreResult<Token>;
    async fn toggle_token_visibility(&self, id: Uuid) -> StoreResult<Token>;
    /// Returns the deleted row.
    async fn delete_token(&self, id: Uuid) -> StoreResult<Token>;

    // --- light sources ------------------------------------------------------

    async fn create_light(&self, light: &NewLightSource) -> StoreResult<LightSource>;
    async fn get_light(&self, id: Uuid) -> StoreResult<LightSource>;
    async fn list_lights(&self, map_id: Uuid) -> StoreResult<Vec<LightSource>>;
    async fn update_light(&self, light: &LightSource) -> StoreResult<LightSource>;
    async fn move_light(&self, id: Uuid, x: f64, y: f64) -> StoreResult<LightSource>;
    /// Returns the deleted row.
    async fn delete_light(&self, id: Uuid) -> StoreResult<LightSource>;
    /// Returns the number of rows removed.
    async fn delete_all_lights(&self, map_id: Uuid) -> StoreResult<u64>;

    // --- fog ----------------------------------------------------------------

    async fn insert_revealed_area(&self, area: &NewRevealedArea) -> StoreResult<RevealedArea>;
    async fn get_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea>;
    async fn list_revealed_areas(&self, map_id: Uuid) -> StoreResult<Vec<RevealedArea>>;
    /// Returns the deleted row.
    async fn delete_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea>;
    /// Returns the number of rows removed.
    async fn delete_all_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64>;
    async fn count_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64>;
    async fn get_fog_state(&self, map_id: Uuid) -> StoreResult<FogState>;
    /// Returns the flag as stored.
    async fn set_fog_enabled(&self, map_id: Uuid, enabled: bool) -> StoreResult<bool>;
    /// Flip the flag atomically and return the new value.
    async fn toggle_fog_enabled(&self, map_id: Uuid) -> StoreResult<bool>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
