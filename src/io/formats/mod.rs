//! Built-in format adapters.
//!
//! Each adapter implements [`FormatAdapter`]; [`default_adapters`] returns the
//! set a fresh [`super::AdapterRegistry`] is seeded with.

pub mod csv;
mod document;
pub mod json;
pub mod yaml;

use std::sync::Arc;

use super::traits::FormatAdapter;

pub use self::csv::CsvAdapter;
pub use self::json::JsonAdapter;
pub use self::yaml::YamlAdapter;

/// The built-in CSV/TSV, JSON and YAML adapters.
#[must_use]
pub fn default_adapters() -> Vec<Arc<dyn FormatAdapter>> {
    vec![
        Arc::new(CsvAdapter::new()),
        Arc::new(JsonAdapter::new()),
        Arc::new(YamlAdapter::new()),
    ]
}
