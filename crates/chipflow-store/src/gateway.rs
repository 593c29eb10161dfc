use std::sync::Arc;

use chipflow_core::types::{ChangeModelRecord, ChipKey, SegmentRow, TileKey, TileModelRow};

use crate::{Row, Statement, Storage, StoreError, Table};

/// Partition-scoped reads and writes used by both workflows.
///
/// Detection results are written delete-then-insert: `purge_chip` removes every chip, pixel and
/// segment row of a chip in one batch, so a re-run replaces rather than appends. Tile models are
/// upserted.
#[derive(Clone)]
pub struct PersistenceGateway {
    storage: Arc<dyn Storage>,
}

impl PersistenceGateway {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn purge_chip(&self, key: ChipKey) -> Result<(), StoreError> {
        self.storage.execute_batch(&[
            Statement::delete(Table::Chip, key),
            Statement::delete(Table::Pixel, key),
            Statement::delete(Table::Segment, key),
        ])
    }

    pub fn insert_chips(&self, records: &[ChangeModelRecord]) -> Result<(), StoreError> {
        self.write(records, |r| Statement::InsertChip(r.chip_row()))
    }

    pub fn insert_pixels(&self, records: &[ChangeModelRecord]) -> Result<(), StoreError> {
        self.write(records, |r| Statement::InsertPixel(r.pixel_row()))
    }

    pub fn insert_segments(&self, records: &[ChangeModelRecord]) -> Result<(), StoreError> {
        self.write(records, |r| Statement::InsertSegment(r.segment_row()))
    }

    /// Chip rows, then pixel rows, then segment rows; stops at the first failed batch.
    pub fn save_detections(&self, records: &[ChangeModelRecord]) -> Result<(), StoreError> {
        self.insert_chips(records)?;
        self.insert_pixels(records)?;
        self.insert_segments(records)
    }

    pub fn segments(&self, key: ChipKey) -> Result<Vec<SegmentRow>, StoreError> {
        let rows = self.storage.execute(&Statement::SelectSegments(key))?;
        rows.into_iter()
            .map(|row| match row {
                Row::Segment(s) => Ok(s),
                other => Err(unexpected_row(Table::Segment, &other)),
            })
            .collect()
    }

    pub fn save_tile_model(&self, key: TileKey, model: Vec<u8>) -> Result<(), StoreError> {
        self.storage
            .execute(&Statement::UpsertTile(TileModelRow {
                tx: key.tx,
                ty: key.ty,
                model,
            }))
            .map(|_| ())
    }

    pub fn tile_model(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError> {
        let rows = self.storage.execute(&Statement::SelectTile(key))?;
        match rows.into_iter().next() {
            None => Ok(None),
            Some(Row::Tile(row)) => Ok(Some(row.model)),
            Some(other) => Err(unexpected_row(Table::Tile, &other)),
        }
    }

    fn write<F>(&self, records: &[ChangeModelRecord], statement: F) -> Result<(), StoreError>
    where
        F: Fn(&ChangeModelRecord) -> Statement,
    {
        if records.is_empty() {
            return Ok(());
        }
        let batch: Vec<Statement> = records.iter().map(statement).collect();
        self.storage.execute_batch(&batch)
    }
}

fn unexpected_row(table: Table, row: &Row) -> StoreError {
    StoreError::Backend(format!(
        "unexpected row from {} table: {row:?}",
        table.name()
    ))
}
