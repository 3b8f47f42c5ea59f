//! Configuration for query compilation and mapping.
//!
//! All configuration types deserialize with defaults for missing fields, so a partial
//! configuration file is enough:
//!
//! ```ignore
//! let config: StencilConfig = serde_json::from_str(r#"{"query": {"marker": "@"}}"#)?;
//! assert_eq!(config.query.template_cache_size, 1024);
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{StencilError, StencilResult},
    marshal::MapperConfig,
    template::{DEFAULT_MARKER, check_marker},
};

/// Default number of parsed templates kept by a [`QueryFactory`](crate::query::QueryFactory).
pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 1024;

/// Configuration for a [`QueryFactory`](crate::query::QueryFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// The placeholder marker character.
    pub marker: char,
    /// Maximum number of parsed templates to keep. `0` disables the cache.
    pub template_cache_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            template_cache_size: DEFAULT_TEMPLATE_CACHE_SIZE,
        }
    }
}

impl QueryConfig {
    /// Checks that the configuration can be used.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Initialization`] if the marker collides with template notation.
    pub fn validate(&self) -> StencilResult<()> {
        check_marker(self.marker).map_err(StencilError::Initialization)
    }
}

/// Complete configuration of a [`Stencil`](crate::store::Stencil).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StencilConfig {
    pub query: QueryConfig,
    pub mapper: MapperConfig,
}
