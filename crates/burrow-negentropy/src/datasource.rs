//! Datasource abstraction the session iterates over.

use crate::error::Error;

/// One reconcilable item: an event's timestamp and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    /// Second-precision creation time.
    pub created_at: u64,
    /// 32-byte event id.
    pub id: [u8; 32],
}

impl Item {
    /// Convenience constructor.
    pub fn new(created_at: u64, id: [u8; 32]) -> Self {
        Self { created_at, id }
    }
}

/// Iteration contract the session drives.
///
/// `begin_iter` may snapshot; iteration order does not matter, the session
/// sorts materialized items by `(created_at ASC, id ASC)` itself. The
/// session calls `end_iter` exactly once per successful `begin_iter`.
pub trait Datasource {
    /// Starts an iteration pass.
    fn begin_iter(&mut self) -> Result<(), Error>;
    /// Next item, or `None` at the end.
    fn next_item(&mut self) -> Result<Option<Item>, Error>;
    /// Finishes the pass, releasing any snapshot.
    fn end_iter(&mut self) -> Result<(), Error>;
}

/// In-memory datasource over a vector of items.
#[derive(Debug, Clone, Default)]
pub struct VecDatasource {
    items: Vec<Item>,
    cursor: Option<usize>,
}

impl VecDatasource {
    /// Wraps `items`; order is irrelevant.
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    /// Adds one item.
    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }
}

impl Datasource for VecDatasource {
    fn begin_iter(&mut self) -> Result<(), Error> {
        self.cursor = Some(0);
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<Item>, Error> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| Error::Datasource("next_item outside iteration".into()))?;
        let item = self.items.get(*cursor).copied();
        if item.is_some() {
            *cursor += 1;
        }
        Ok(item)
    }

    fn end_iter(&mut self) -> Result<(), Error> {
        self.cursor = None;
        Ok(())
    }
}

/// Materializes and sorts a snapshot of `source`.
pub(crate) fn snapshot<D: Datasource>(source: &mut D) -> Result<Vec<Item>, Error> {
    source.begin_iter()?;
    let mut items = Vec::new();
    loop {
        match source.next_item() {
            Ok(Some(item)) => items.push(item),
            Ok(None) => break,
            Err(e) => {
                let _ = source.end_iter();
                return Err(e);
            }
        }
    }
    source.end_iter()?;
    items.sort_unstable_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(items)
}
