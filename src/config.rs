//! Tabletop configuration
//!
//! Every field has a default, so a partial JSON file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletopConfig {
    /// Side length of the square token grid (cells are `0..grid_size^2`)
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,

    /// How long a roll shakes before its value is revealed
    #[serde(default = "default_shake_ms")]
    pub shake_ms: u64,

    /// How long a revealed value stays up before returning to idle
    #[serde(default = "default_reveal_ms")]
    pub reveal_ms: u64,

    /// Stroke batching window
    #[serde(default = "default_stroke_flush_ms")]
    pub stroke_flush_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_room_ttl_days")]
    pub default_room_ttl_days: u32,

    #[serde(default = "default_max_room_ttl_days")]
    pub max_room_ttl_days: u32,

    // === Server ===
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Size of the raster used to export a room's drawing
    #[serde(default = "default_canvas_width")]
    pub canvas_width: u32,

    #[serde(default = "default_canvas_height")]
    pub canvas_height: u32,

    // === Remote store ===
    /// Backoff schedule for reconnecting a remote store; exhausted means give up
    #[serde(default = "default_reconnect_delays_ms")]
    pub reconnect_delays_ms: Vec<u64>,
}

fn default_grid_size() -> u32 {
    60
}

fn default_shake_ms() -> u64 {
    1_800
}

fn default_reveal_ms() -> u64 {
    1_500
}

fn default_stroke_flush_ms() -> u64 {
    100
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_room_ttl_days() -> u32 {
    1
}

fn default_max_room_ttl_days() -> u32 {
    30
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_canvas_width() -> u32 {
    1_200
}

fn default_canvas_height() -> u32 {
    1_200
}

fn default_reconnect_delays_ms() -> Vec<u64> {
    vec![200, 500, 1_000, 2_000, 4_000, 8_000, 15_000, 30_000]
}

impl Default for TabletopConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            shake_ms: default_shake_ms(),
            reveal_ms: default_reveal_ms(),
            stroke_flush_ms: default_stroke_flush_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_room_ttl_days: default_room_ttl_days(),
            max_room_ttl_days: default_max_room_ttl_days(),
            bind_addr: default_bind_addr(),
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
            reconnect_delays_ms: default_reconnect_delays_ms(),
        }
    }
}

impl TabletopConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.grid_size == 0 || self.grid_size.checked_mul(self.grid_size).is_none() {
            return Err(SyncError::Config(format!(
                "grid_size {} is out of range",
                self.grid_size
            )));
        }
        if self.stroke_flush_ms == 0 || self.sweep_interval_secs == 0 {
            return Err(SyncError::Config("intervals must be non-zero".into()));
        }
        if self.default_room_ttl_days == 0 || self.default_room_ttl_days > self.max_room_ttl_days
        {
            return Err(SyncError::Config(format!(
                "default_room_ttl_days {} must be within 1..={}",
                self.default_room_ttl_days, self.max_room_ttl_days
            )));
        }
        Ok(())
    }

    /// Number of addressable cells on the board
    pub fn cell_count(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    pub fn shake_duration(&self) -> Duration {
        Duration::from_millis(self.shake_ms)
    }

    pub fn reveal_duration(&self) -> Duration {
        Duration::from_millis(self.reveal_ms)
    }

    pub fn stroke_flush_interval(&self) -> Duration {
        Duration::from_millis(self.stroke_flush_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}
