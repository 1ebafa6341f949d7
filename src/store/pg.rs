//! Postgres-backed entity repository.

use std::str::FromStr;

use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{EntityStore, StoreError, StoreResult};
use crate::geometry::Segment;
use crate::model::{
    AmbientLight, FogState, LightSource, MapRecord, NewLightSource, NewMap, NewRevealedArea, NewToken, RevealedArea,
    Token, TokenSummary, ValidationError,
};

// =============================================================================
// ROW MAPPING
// =============================================================================

const MAP_COLUMNS: &str =
    "id, name, width_px, height_px, grid_size_px, feet_per_square, ambient_light, fog_enabled, occluders";

type MapRow = (Uuid, String, i32, i32, i32, f64, String, bool, Json<Vec<Segment>>);

const TOKEN_COLUMNS: &str = "id, map_id, name, token_type, size, x, y, visible_to_players, color, \
                             monster_id, character_id, vision_type, vision_range_ft, notes";

type TokenRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    f64,
    f64,
    bool,
    Option<String>,
    Option<Uuid>,
    Option<Uuid>,
    String,
    Option<f64>,
    Option<String>,
);

type TokenSummaryRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    f64,
    f64,
    bool,
    Option<String>,
    Option<Uuid>,
    Option<Uuid>,
    String,
    Option<f64>,
    Option<String>,
    Option<String>,
    Option<String>,
);

const LIGHT_COLUMNS: &str =
    "id, map_id, token_id, name, light_type, x, y, bright_radius_ft, dim_radius_ft, color, active";

type LightRow = (Uuid, Uuid, Option<Uuid>, String, String, f64, f64, f64, f64, Option<String>, bool);

const AREA_COLUMNS: &str = "id, map_id, shape, x, y, width, height";

type AreaRow = (Uuid, Uuid, String, f64, f64, f64, f64);

/// Parse an enumerated text column. A value the enum does not know means
/// the row violates the schema's intent.
fn column<T: FromStr<Err = ValidationError>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(|e: ValidationError| StoreError::Constraint(e.to_string()))
}

fn map_from_row(row: MapRow) -> StoreResult<MapRecord> {
    let (id, name, width_px, height_px, grid_size_px, feet_per_square, ambient, fog_enabled, occluders) = row;
    Ok(MapRecord {
        id,
        name,
        width_px,
        height_px,
        grid_size_px,
        feet_per_square,
        ambient_light: column(&ambient)?,
        fog_enabled,
        occluders: occluders.0,
    })
}

fn token_from_row(row: TokenRow) -> StoreResult<Token> {
    let (id, map_id, name, token_type, size, x, y, visible_to_players, color, monster_id, character_id, vision, range, notes) =
        row;
    Ok(Token {
        id,
        map_id,
        name,
        token_type: column(&token_type)?,
        size: column(&size)?,
        x,
        y,
        visible_to_players,
        color,
        monster_id,
        character_id,
        vision_type: column(&vision)?,
        vision_range_ft: range,
        notes,
    })
}

fn summary_from_row(row: TokenSummaryRow) -> StoreResult<TokenSummary> {
    let (id, map_id, name, token_type, size, x, y, visible, color, monster_id, character_id, vision, range, notes, mn, cn) =
        row;
    let token = token_from_row((
        id,
        map_id,
        name,
        token_type,
        size,
        x,
        y,
        visible,
        color,
        monster_id,
        character_id,
        vision,
        range,
        notes,
    ))?;
    Ok(TokenSummary { token, monster_name: mn, character_name: cn })
}

fn light_from_row(row: LightRow) -> StoreResult<LightSource> {
    let (id, map_id, token_id, name, light_type, x, y, bright_radius_ft, dim_radius_ft, color, active) = row;
    Ok(LightSource {
        id,
        map_id,
        token_id,
        name,
        light_type: column(&light_type)?,
        x,
        y,
        bright_radius_ft,
        dim_radius_ft,
        color,
        active,
    })
}

fn area_from_row(row: AreaRow) -> StoreResult<RevealedArea> {
    let (id, map_id, shape, x, y, width, height) = row;
    Ok(RevealedArea { id, map_id, shape: column(&shape)?, x, y, width, height })
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_map(&self, sql: &str, id: Uuid) -> StoreResult<MapRecord> {
        let row = sqlx::query_as::<_, MapRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::not_found("map", id))?;
        map_from_row(row)
    }

    async fn fetch_token(&self, sql: &str, id: Uuid) -> StoreResult<Token> {
        let row = sqlx::query_as::<_, TokenRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::not_found("token", id))?;
        token_from_row(row)
    }

    async fn fetch_light(&self, sql: &str, id: Uuid) -> StoreResult<LightSource> {
        let row = sqlx::query_as::<_, LightRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::not_found("light source", id))?;
        light_from_row(row)
    }

    async fn fetch_area(&self, sql: &str, id: Uuid) -> StoreResult<RevealedArea> {
        let row = sqlx::query_as::<_, AreaRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::not_found("revealed area", id))?;
        area_from_row(row)
    }
}

#[async_trait::async_trait]
impl EntityStore for PgStore {
    // --- maps ---------------------------------------------------------------

    async fn create_map(&self, map: &NewMap) -> StoreResult<MapRecord> {
        let row = sqlx::query_as::<_, MapRow>(&format!(
            "INSERT INTO maps (id, name, width_px, height_px, grid_size_px, feet_per_square, ambient_light, fog_enabled) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {MAP_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&map.name)
        .bind(map.width_px)
        .bind(map.height_px)
        .bind(map.grid_size_px)
        .bind(map.feet_per_square)
        .bind(map.ambient_light.as_str())
        .bind(map.fog_enabled)
        .fetch_one(&self.pool)
        .await?;
        map_from_row(row)
    }

    async fn get_map(&self, id: Uuid) -> StoreResult<MapRecord> {
        self.fetch_map(&format!("SELECT {MAP_COLUMNS} FROM maps WHERE id = $1"), id).await
    }

    async fn delete_map(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM maps WHERE id = $1").bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("map", id));
        }
        Ok(())
    }

    async fn set_occluders(&self, id: Uuid, occluders: &[Segment]) -> StoreResult<MapRecord> {
        let row = sqlx::query_as::<_, MapRow>(&format!(
            "UPDATE maps SET occluders = $2, updated_at = now() WHERE id = $1 RETURNING {MAP_COLUMNS}"
        ))
        .bind(id)
        .bind(Json(occluders))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("map", id))?;
        map_from_row(row)
    }

    async fn set_ambient_light(&self, id: Uuid, ambient: AmbientLight) -> StoreResult<MapRecord> {
        let row = sqlx::query_as::<_, MapRow>(&format!(
            "UPDATE maps SET ambient_light = $2, updated_at = now() WHERE id = $1 RETURNING {MAP_COLUMNS}"
        ))
        .bind(id)
        .bind(ambient.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("map", id))?;
        map_from_row(row)
    }

    // --- tokens -------------------------------------------------------------

    async fn create_token(&self, token: &NewToken) -> StoreResult<Token> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "INSERT INTO tokens ({TOKEN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(token.map_id)
        .bind(&token.name)
        .bind(token.token_type.as_str())
        .bind(token.size.as_str())
        .bind(token.x)
        .bind(token.y)
        .bind(token.visible_to_players)
        .bind(&token.color)
        .bind(token.monster_id)
        .bind(token.character_id)
        .bind(token.vision_type.as_str())
        .bind(token.vision_range_ft)
        .bind(&token.notes)
        .fetch_one(&self.pool)
        .await?;
        token_from_row(row)
    }

    async fn get_token(&self, id: Uuid) -> StoreResult<Token> {
        self.fetch_token(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1"), id).await
    }

    async fn list_tokens(&self, map_id: Uuid) -> StoreResult<Vec<TokenSummary>> {
        let rows = sqlx::query_as::<_, TokenSummaryRow>(
            "SELECT t.id, t.map_id, t.name, t.token_type, t.size, t.x, t.y, t.visible_to_players, t.color, \
                    t.monster_id, t.character_id, t.vision_type, t.vision_range_ft, t.notes, m.name, c.name \
             FROM tokens t \
             LEFT JOIN monsters m ON m.id = t.monster_id \
             LEFT JOIN characters c ON c.id = t.character_id \
             WHERE t.map_id = $1 \
             ORDER BY t.created_at ASC, t.id ASC",
        )
        .bind(map_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(summary_from_row).collect()
    }

    async fn update_token(&self, token: &Token) -> StoreResult<Token> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "UPDATE tokens SET name = $2, token_type = $3, size = $4, x = $5, y = $6, visible_to_players = $7, \
                 color = $8, monster_id = $9, character_id = $10, vision_type = $11, vision_range_ft = $12, \
                 notes = $13, updated_at = now() \
             WHERE id = $1 RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(token.id)
        .bind(&token.name)
        .bind(token.token_type.as_str())
        .bind(token.size.as_str())
        .bind(token.x)
        .bind(token.y)
        .bind(token.visible_to_players)
        .bind(&token.color)
        .bind(token.monster_id)
        .bind(token.character_id)
        .bind(token.vision_type.as_str())
        .bind(token.vision_range_ft)
        .bind(&token.notes)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("token", token.id))?;
        token_from_row(row)
    }

    async fn update_token_position(&self, id: Uuid, x: f64, y: f64) -> StoreResult<Token> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "UPDATE tokens SET x = $2, y = $3, updated_at = now() WHERE id = $1 RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(id)
        .bind(x)
        .bind(y)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("token", id))?;
        token_from_row(row)
    }

    async fn toggle_token_visibility(&self, id: Uuid) -> StoreResult<Token> {
        self.fetch_token(
            &format!(
                "UPDATE tokens SET visible_to_players = NOT visible_to_players, updated_at = now() \
                 WHERE id = $1 RETURNING {TOKEN_COLUMNS}"
            ),
            id,
        )
        .await
    }

    async fn delete_token(&self, id: Uuid) -> StoreResult<Token> {
        self.fetch_token(&format!("DELETE FROM tokens WHERE id = $1 RETURNING {TOKEN_COLUMNS}"), id).await
    }

    // --- light sources ------------------------------------------------------

    async fn create_light(&self, light: &NewLightSource) -> StoreResult<LightSource> {
        let row = sqlx::query_as::<_, LightRow>(&format!(
            "INSERT INTO light_sources ({LIGHT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {LIGHT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(light.map_id)
        .bind(light.token_id)
        .bind(&light.name)
        .bind(light.light_type.as_str())
        .bind(light.x)
        .bind(light.y)
        .bind(light.bright_radius_ft)
        .bind(light.dim_radius_ft)
        .bind(&light.color)
        .bind(light.active)
        .fetch_one(&self.pool)
        .await?;
        light_from_row(row)
    }

    async fn get_light(&self, id: Uuid) -> StoreResult<LightSource> {
        self.fetch_light(&format!("SELECT {LIGHT_COLUMNS} FROM light_sources WHERE id = $1"), id).await
    }

    async fn list_lights(&self, map_id: Uuid) -> StoreResult<Vec<LightSource>> {
        let rows = sqlx::query_as::<_, LightRow>(&format!(
            "SELECT {LIGHT_COLUMNS} FROM light_sources WHERE map_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(map_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(light_from_row).collect()
    }

    async fn update_light(&self, light: &LightSource) -> StoreResult<LightSource> {
        let row = sqlx::query_as::<_, LightRow>(&format!(
            "UPDATE light_sources SET token_id = $2, name = $3, light_type = $4, x = $5, y = $6, \
                 bright_radius_ft = $7, dim_radius_ft = $8, color = $9, active = $10, updated_at = now() \
             WHERE id = $1 RETURNING {LIGHT_COLUMNS}"
        ))
        .bind(light.id)
        .bind(light.token_id)
        .bind(&light.name)
        .bind(light.light_type.as_str())
        .bind(light.x)
        .bind(light.y)
        .bind(light.bright_radius_ft)
        .bind(light.dim_radius_ft)
        .bind(&light.color)
        .bind(light.active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("light source", light.id))?;
        light_from_row(row)
    }

    async fn move_light(&self, id: Uuid, x: f64, y: f64) -> StoreResult<LightSource> {
        let row = sqlx::query_as::<_, LightRow>(&format!(
            "UPDATE light_sources SET x = $2, y = $3, updated_at = now() WHERE id = $1 RETURNING {LIGHT_COLUMNS}"
        ))
        .bind(id)
        .bind(x)
        .bind(y)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("light source", id))?;
        light_from_row(row)
    }

    async fn delete_light(&self, id: Uuid) -> StoreResult<LightSource> {
        self.fetch_light(&format!("DELETE FROM light_sources WHERE id = $1 RETURNING {LIGHT_COLUMNS}"), id)
            .await
    }

    async fn delete_all_lights(&self, map_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM light_sources WHERE map_id = $1")
            .bind(map_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- fog ----------------------------------------------------------------

    async fn insert_revealed_area(&self, area: &NewRevealedArea) -> StoreResult<RevealedArea> {
        let row = sqlx::query_as::<_, AreaRow>(&format!(
            "INSERT INTO fog_revealed_areas ({AREA_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {AREA_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(area.map_id)
        .bind(area.shape.as_str())
        .bind(area.x)
        .bind(area.y)
        .bind(area.width)
        .bind(area.height)
        .fetch_one(&self.pool)
        .await?;
        area_from_row(row)
    }

    async fn get_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea> {
        self.fetch_area(&format!("SELECT {AREA_COLUMNS} FROM fog_revealed_areas WHERE id = $1"), id).await
    }

    async fn list_revealed_areas(&self, map_id: Uuid) -> StoreResult<Vec<RevealedArea>> {
        let rows = sqlx::query_as::<_, AreaRow>(&format!(
            "SELECT {AREA_COLUMNS} FROM fog_revealed_areas WHERE map_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(map_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(area_from_row).collect()
    }

    async fn delete_revealed_area(&self, id: Uuid) -> StoreResult<RevealedArea> {
        self.fetch_area(&format!("DELETE FROM fog_revealed_areas WHERE id = $1 RETURNING {AREA_COLUMNS}"), id)
            .await
    }

    async fn delete_all_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM fog_revealed_areas WHERE map_id = $1")
            .bind(map_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_revealed_areas(&self, map_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fog_revealed_areas WHERE map_id = $1")
            .bind(map_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn get_fog_state(&self, map_id: Uuid) -> StoreResult<FogState> {
        let mut tx = self.pool.begin().await?;
        let fog_enabled = sqlx::query_scalar::<_, bool>("SELECT fog_enabled FROM maps WHERE id = $1")
            .bind(map_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::not_found("map", map_id))?;
        let rows = sqlx::query_as::<_, AreaRow>(&format!(
            "SELECT {AREA_COLUMNS} FROM fog_revealed_areas WHERE map_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(map_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let revealed_areas = rows.into_iter().map(area_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok(FogState { map_id, fog_enabled, revealed_areas })
    }

    async fn set_fog_enabled(&self, map_id: Uuid, enabled: bool) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("UPDATE maps SET fog_enabled = $2, updated_at = now() WHERE id = $1 RETURNING fog_enabled")
            .bind(map_id)
            .bind(enabled)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::not_found("map", map_id))
    }

    async fn toggle_fog_enabled(&self, map_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "UPDATE maps SET fog_enabled = NOT fog_enabled, updated_at = now() WHERE id = $1 RETURNING fog_enabled",
        )
        .bind(map_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::not_found("map", map_id))
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "pg_test.rs"]
mod tests;
