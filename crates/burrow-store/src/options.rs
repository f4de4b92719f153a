//! Open options and text-search configuration.

use serde_json::Value;

use crate::error::StoreError;

/// Options recognized on [`Store::open`](crate::Store::open).
///
/// Parsed from a JSON object; unknown keys are ignored.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// LMDB map size in bytes.
    pub mapsize: usize,
    /// Writer pool size.
    pub ingester_threads: usize,
    /// Backend-specific flags, passed through opaquely.
    pub flags: u64,
    /// Initial capacity of each writer's scratch buffer.
    pub writer_scratch_buffer_size: usize,
    /// Skip id verification on ingest.
    pub ingest_skip_validation: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            mapsize: 1024 * 1024 * 1024,
            ingester_threads: 4,
            flags: 0,
            writer_scratch_buffer_size: 4 * 1024,
            ingest_skip_validation: false,
        }
    }
}

impl StoreOptions {
    /// Parses options from JSON. `None` or empty input yields defaults.
    pub fn from_json(json: Option<&str>) -> Result<Self, StoreError> {
        let mut opts = Self::default();
        let Some(json) = json.filter(|j| !j.trim().is_empty()) else {
            return Ok(opts);
        };
        let value: Value = serde_json::from_str(json)
            .map_err(|e| StoreError::DbOpen(format!("bad options json: {e}")))?;
        let Value::Object(map) = value else {
            return Err(StoreError::DbOpen("options must be an object".into()));
        };
        for (key, value) in map {
            match key.as_str() {
                "mapsize" => opts.mapsize = as_usize(&key, &value)?,
                "ingester_threads" => opts.ingester_threads = as_usize(&key, &value)?.max(1),
                "flags" => opts.flags = as_u64(&key, &value)?,
                "writer_scratch_buffer_size" => {
                    opts.writer_scratch_buffer_size = as_usize(&key, &value)?;
                }
                "ingest_skip_validation" => {
                    opts.ingest_skip_validation = value.as_bool().ok_or_else(|| {
                        StoreError::DbOpen(format!("option {key} must be a bool"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(opts)
    }
}

fn as_u64(key: &str, value: &Value) -> Result<u64, StoreError> {
    value
        .as_u64()
        .ok_or_else(|| StoreError::DbOpen(format!("option {key} must be a non-negative integer")))
}

fn as_usize(key: &str, value: &Value) -> Result<usize, StoreError> {
    Ok(as_u64(key, value)? as usize)
}

/// Result ordering for full-text search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Parsed `{limit, order}` config for text search.
#[derive(Debug, Clone, Copy)]
pub struct TextSearchConfig {
    /// Result cap, in `[1, 1024]`.
    pub limit: usize,
    /// Result ordering.
    pub order: Order,
}

impl Default for TextSearchConfig {
    fn default() -> Self {
        Self {
            limit: 128,
            order: Order::Desc,
        }
    }
}

impl TextSearchConfig {
    /// Parses the config. `None` or empty input yields defaults.
    pub fn from_json(json: Option<&str>) -> Result<Self, StoreError> {
        let mut cfg = Self::default();
        let Some(json) = json.filter(|j| !j.trim().is_empty()) else {
            return Ok(cfg);
        };
        let value: Value = serde_json::from_str(json)
            .map_err(|e| StoreError::TextSearch(format!("bad config json: {e}")))?;
        if let Some(limit) = value.get("limit") {
            let limit = limit
                .as_u64()
                .filter(|l| (1..=1024).contains(l))
                .ok_or_else(|| {
                    StoreError::TextSearch("limit must be an integer in [1, 1024]".into())
                })?;
            cfg.limit = limit as usize;
        }
        if let Some(order) = value.get("order") {
            cfg.order = match order.as_str() {
                Some("asc") => Order::Asc,
                Some("desc") => Order::Desc,
                _ => return Err(StoreError::TextSearch("order must be asc or desc".into())),
            };
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_on_empty() {
        let opts = StoreOptions::from_json(None).unwrap();
        assert_eq!(opts.ingester_threads, 4);
        assert!(!opts.ingest_skip_validation);
    }

    #[test]
    fn unknown_keys_ignored() {
        let opts =
            StoreOptions::from_json(Some(r#"{"mapsize":1048576,"future_knob":true}"#)).unwrap();
        assert_eq!(opts.mapsize, 1_048_576);
    }

    #[test]
    fn zero_ingesters_clamped() {
        let opts = StoreOptions::from_json(Some(r#"{"ingester_threads":0}"#)).unwrap();
        assert_eq!(opts.ingester_threads, 1);
    }

    #[test]
    fn search_config_bounds() {
        assert!(TextSearchConfig::from_json(Some(r#"{"limit":0}"#)).is_err());
        assert!(TextSearchConfig::from_json(Some(r#"{"limit":1025}"#)).is_err());
        assert!(TextSearchConfig::from_json(Some(r#"{"order":"sideways"}"#)).is_err());
        let cfg = TextSearchConfig::from_json(Some(r#"{"limit":5,"order":"asc"}"#)).unwrap();
        assert_eq!(cfg.limit, 5);
        assert_eq!(cfg.order, Order::Asc);
    }

    #[test]
    fn search_defaults() {
        let cfg = TextSearchConfig::from_json(None).unwrap();
        assert_eq!(cfg.limit, 128);
        assert_eq!(cfg.order, Order::Desc);
    }
}
