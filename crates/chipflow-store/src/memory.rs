use std::collections::BTreeMap;
use std::sync::Mutex;

use chipflow_core::types::{
    ChipKey, ChipRow, PixelKey, PixelRow, SegmentRow, TileKey, TileModelRow,
};
use chrono::NaiveDate;

use crate::{Row, Statement, Storage, StoreError, Table};

#[derive(Debug, Default)]
struct Tables {
    chips: BTreeMap<ChipKey, ChipRow>,
    pixels: BTreeMap<PixelKey, PixelRow>,
    segments: BTreeMap<(PixelKey, NaiveDate), SegmentRow>,
    tiles: BTreeMap<TileKey, TileModelRow>,
}

impl Tables {
    fn apply(&mut self, statement: &Statement) {
        match statement {
            Statement::DeletePartition { table, key } => self.delete_partition(*table, *key),
            Statement::InsertChip(row) => {
                self.chips.insert(row.key(), row.clone());
            }
            Statement::InsertPixel(row) => {
                self.pixels.insert(row.key(), row.clone());
            }
            Statement::InsertSegment(row) => {
                self.segments.insert(row.key(), row.clone());
            }
            Statement::UpsertTile(row) => {
                self.tiles.insert(row.key(), row.clone());
            }
            Statement::SelectSegments(_) | Statement::SelectTile(_) => {}
        }
    }

    fn delete_partition(&mut self, table: Table, key: ChipKey) {
        match table {
            Table::Chip => {
                self.chips.remove(&key);
            }
            Table::Pixel => self.pixels.retain(|k, _| k.chip() != key),
            Table::Segment => self.segments.retain(|(k, _), _| k.chip() != key),
            Table::Tile => {}
        }
    }
}

fn validate(statement: &Statement) -> Result<(), StoreError> {
    match statement {
        Statement::DeletePartition {
            table: Table::Tile, ..
        } => Err(StoreError::Unsupported(
            "tile models are replaced by upsert, not deleted by chip".to_string(),
        )),
        _ => Ok(()),
    }
}

/// In-process storage engine with primary-key upsert semantics per table.
///
/// Used by tests and by the development server; contents do not survive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub chips: usize,
    pub pixels: usize,
    pub segments: usize,
    pub tiles: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_counts(&self) -> Result<RowCounts, StoreError> {
        let t = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(RowCounts {
            chips: t.chips.len(),
            pixels: t.pixels.len(),
            segments: t.segments.len(),
            tiles: t.tiles.len(),
        })
    }
}

impl Storage for MemoryStore {
    fn execute(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        validate(statement)?;
        let mut t = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        match statement {
            Statement::SelectSegments(key) => Ok(t
                .segments
                .iter()
                .filter(|((k, _), _)| k.chip() == *key)
                .map(|(_, row)| Row::Segment(row.clone()))
                .collect()),
            Statement::SelectTile(key) => Ok(t
                .tiles
                .get(key)
                .map(|row| vec![Row::Tile(row.clone())])
                .unwrap_or_default()),
            write => {
                t.apply(write);
                Ok(Vec::new())
            }
        }
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        for s in statements {
            validate(s)?;
            if s.is_read() {
                return Err(StoreError::Unsupported(format!(
                    "read statement on table '{}' inside a batch",
                    s.table().name()
                )));
            }
        }
        let mut t = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        for s in statements {
            t.apply(s);
        }
        tracing::debug!(statements = statements.len(), "applied batch");
        Ok(())
    }
}
