// config.rs — raster-fill configuration
//
// Describes one raster evaluation: pixel dimensions, the world-space window
// it covers, how many accessors share the work and whether cache-boundary
// instructions are memoized. Deserialized from camelCase JSON with defaults
// for every field.

use crate::eval::error::ConfigError;
use serde::{Deserialize, Serialize};

fn default_size() -> usize {
    256
}

fn default_max() -> f64 {
    1.0
}

fn default_accessors() -> usize {
    rayon::current_num_threads()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterConfig {
    #[serde(default = "default_size")]
    pub width: usize,
    #[serde(default = "default_size")]
    pub height: usize,
    #[serde(default)]
    pub x_min: f64,
    #[serde(default = "default_max")]
    pub x_max: f64,
    #[serde(default)]
    pub y_min: f64,
    #[serde(default = "default_max")]
    pub y_max: f64,
    /// When set, samples are 3D at this depth.
    #[serde(default)]
    pub z: Option<f64>,
    /// Concurrent evaluators. Rows are split evenly between them.
    #[serde(default = "default_accessors")]
    pub accessors: usize,
    /// Memoize cache-boundary instructions across samples.
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            width: default_size(),
            height: default_size(),
            x_min: 0.0,
            x_max: default_max(),
            y_min: 0.0,
            y_max: default_max(),
            z: None,
            accessors: default_accessors(),
            use_cache: true,
        }
    }
}

impl RasterConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reject configurations that cannot produce a raster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyRaster { width: self.width, height: self.height });
        }
        if self.accessors == 0 {
            return Err(ConfigError::NoAccessors);
        }
        let finite = [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .chain(self.z.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::NonFiniteWindow);
        }
        Ok(())
    }

    /// Number of accessors actually used: never more than there are rows.
    pub fn effective_accessors(&self) -> usize {
        self.accessors.clamp(1, self.height.max(1))
    }

    /// World-space sample position of pixel (col, row), taken at the cell
    /// centre.
    pub fn sample_position(&self, col: usize, row: usize) -> (f64, f64) {
        let sx = (self.x_max - self.x_min) / self.width as f64;
        let sy = (self.y_max - self.y_min) / self.height as f64;
        (
            self.x_min + (col as f64 + 0.5) * sx,
            self.y_min + (row as f64 + 0.5) * sy,
        )
    }
}
