//! Runtime configuration loaded from environment variables.
//!
//! Every knob has a default; unparseable values fall back to it.

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_PLAYER_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_GM_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_VISION_TICK_MS: u64 = 16;
const DEFAULT_VISION_CIRCLE_SEGMENTS: usize = crate::visibility::DEFAULT_CIRCLE_SEGMENTS;
const DEFAULT_FOG_MASK_CELL_PX: u32 = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres URL. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    /// Outbound queue depth per player surface.
    pub player_channel_capacity: usize,
    /// Outbound queue depth per GM connection.
    pub gm_channel_capacity: usize,
    /// Debounce interval of the vision worker.
    pub vision_tick_ms: u64,
    pub vision_circle_segments: usize,
    /// Edge length of one fog mask cell, in map pixels.
    pub fog_mask_cell_px: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_PORT,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            player_channel_capacity: DEFAULT_PLAYER_CHANNEL_CAPACITY,
            gm_channel_capacity: DEFAULT_GM_CHANNEL_CAPACITY,
            vision_tick_ms: DEFAULT_VISION_TICK_MS,
            vision_circle_segments: DEFAULT_VISION_CIRCLE_SEGMENTS,
            fog_mask_cell_px: DEFAULT_FOG_MASK_CELL_PX,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            port: env_parse("PORT", DEFAULT_PORT),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            player_channel_capacity: env_parse("PLAYER_CHANNEL_CAPACITY", DEFAULT_PLAYER_CHANNEL_CAPACITY).max(1),
            gm_channel_capacity: env_parse("GM_CHANNEL_CAPACITY", DEFAULT_GM_CHANNEL_CAPACITY).max(1),
            vision_tick_ms: env_parse("VISION_TICK_MS", DEFAULT_VISION_TICK_MS).max(1),
            vision_circle_segments: env_parse("VISION_CIRCLE_SEGMENTS", DEFAULT_VISION_CIRCLE_SEGMENTS).max(3),
            fog_mask_cell_px: env_parse("FOG_MASK_CELL_PX", DEFAULT_FOG_MASK_CELL_PX).max(1),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
