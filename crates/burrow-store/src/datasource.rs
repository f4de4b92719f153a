//! Bridge between the store and the reconciliation session.

use std::sync::Arc;

use burrow_negentropy::datasource::{Datasource, Item};
use burrow_negentropy::error::Error as NegentropyError;

use crate::backend::Backend;

/// Feeds `(created_at, id)` pairs from a store backend into a
/// reconciliation session. Each `begin_iter` takes a fresh snapshot, so a
/// session's pass sees a consistent set even while writers make progress.
pub struct StoreDatasource {
    backend: Arc<dyn Backend>,
    snapshot: Option<(Vec<Item>, usize)>,
}

impl StoreDatasource {
    pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            snapshot: None,
        }
    }
}

impl Datasource for StoreDatasource {
    fn begin_iter(&mut self) -> Result<(), NegentropyError> {
        let items = self
            .backend
            .reconcile_items()
            .map_err(|e| NegentropyError::Datasource(e.to_string()))?;
        self.snapshot = Some((items, 0));
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<Item>, NegentropyError> {
        let (items, cursor) = self
            .snapshot
            .as_mut()
            .ok_or_else(|| NegentropyError::Datasource("next_item outside iteration".into()))?;
        let item = items.get(*cursor).copied();
        if item.is_some() {
            *cursor += 1;
        }
        Ok(item)
    }

    fn end_iter(&mut self) -> Result<(), NegentropyError> {
        self.snapshot = None;
        Ok(())
    }
}
