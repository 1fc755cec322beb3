//! Last known state of the four output channels.

use parking_lot::RwLock;

use crate::protocol::{PinChannel, PinTable};

/// Shared pin table. `replace_all` and `update` swap every slot under one write lock, so readers see
/// either the old table or the new one, never a mix.
#[derive(Debug, Default)]
pub struct PinStore {
    table: RwLock<PinTable>,
}

impl PinStore {
    /// Store seeded with placeholder channels.
    pub fn new() -> Self {
        Self::with_table(PinTable::placeholder())
    }

    pub fn with_table(table: PinTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// None if `index >= NUM_CHANNELS`.
    pub fn get(&self, index: usize) -> Option<PinChannel> {
        self.table.read().0.get(index).cloned()
    }

    pub fn snapshot(&self) -> PinTable {
        self.table.read().clone()
    }

    pub fn replace_all(&self, table: PinTable) {
        *self.table.write() = table;
    }

    /// Read-modify-write under a single write lock. `f` returns the table to swap in, or None
    /// to leave the current one. Returns whether a table was swapped in.
    pub fn update(&self, f: impl FnOnce(&PinTable) -> Option<PinTable>) -> bool {
        let mut table = self.table.write();
        match f(&table) {
            Some(next) => {
                *table = next;
                true
            }
            None => false,
        }
    }
}
