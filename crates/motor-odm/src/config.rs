//! Global ODM configuration
//!
//! Process-wide settings read by querysets at execution time.
//!
//! # Usage
//! ```
//! use motor_odm::config::{configure, get_config};
//!
//! configure(Some(500), None, None);
//! assert_eq!(get_config().default_limit, 500);
//! # configure(Some(1000), None, None);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::warn;

/// Result limit applied by `find_all` when the queryset sets none
pub const DEFAULT_LIMIT: i64 = 1000;

/// Global ODM configuration
///
/// Protected by RwLock: concurrent reads, exclusive writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdmConfig {
    /// Limit used by `find_all` when none is set on the queryset
    pub default_limit: i64,

    /// Whether to reject translated filters containing JavaScript operators
    pub validate_queries: bool,

    /// Reference depth used by eager loading when none is set on the queryset
    pub reference_depth: usize,
}

impl Default for OdmConfig {
    fn default() -> Self {
        OdmConfig {
            default_limit: DEFAULT_LIMIT,
            validate_queries: true,
            reference_depth: 1,
        }
    }
}

static GLOBAL_CONFIG: RwLock<OdmConfig> = RwLock::new(OdmConfig {
    default_limit: DEFAULT_LIMIT,
    validate_queries: true,
    reference_depth: 1,
});

/// Gets the current configuration
pub fn get_config() -> OdmConfig {
    match GLOBAL_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replaces the configuration
pub fn set_config(config: OdmConfig) {
    match GLOBAL_CONFIG.write() {
        Ok(mut global) => *global = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// Updates the given settings, leaving the others unchanged
pub fn configure(
    default_limit: Option<i64>,
    validate_queries: Option<bool>,
    reference_depth: Option<usize>,
) {
    let mut config = get_config();

    if let Some(limit) = default_limit {
        config.default_limit = limit;
    }

    if let Some(validate) = validate_queries {
        config.validate_queries = validate;
        if !validate {
            warn!("query validation is disabled; filters may carry JavaScript operators");
        }
    }

    if let Some(depth) = reference_depth {
        config.reference_depth = depth.max(1);
    }

    set_config(config);
}
