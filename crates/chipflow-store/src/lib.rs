#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod gateway;
pub mod memory;

use chipflow_core::types::{ChipKey, ChipRow, PixelRow, SegmentRow, TileKey, TileModelRow};
use thiserror::Error;

pub use gateway::PersistenceGateway;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Chip,
    Pixel,
    Segment,
    Tile,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Chip => "chip",
            Table::Pixel => "pixel",
            Table::Segment => "segment",
            Table::Tile => "tile",
        }
    }
}

/// A unit of work understood by a storage backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Removes every row of `table` belonging to one chip.
    DeletePartition { table: Table, key: ChipKey },
    InsertChip(ChipRow),
    InsertPixel(PixelRow),
    InsertSegment(SegmentRow),
    SelectSegments(ChipKey),
    /// Insert-or-replace; there is exactly one model per tile.
    UpsertTile(TileModelRow),
    SelectTile(TileKey),
}

impl Statement {
    pub fn delete(table: Table, key: ChipKey) -> Self {
        Statement::DeletePartition { table, key }
    }

    pub fn table(&self) -> Table {
        match self {
            Statement::DeletePartition { table, .. } => *table,
            Statement::InsertChip(_) => Table::Chip,
            Statement::InsertPixel(_) => Table::Pixel,
            Statement::InsertSegment(_) | Statement::SelectSegments(_) => Table::Segment,
            Statement::UpsertTile(_) | Statement::SelectTile(_) => Table::Tile,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Statement::SelectSegments(_) | Statement::SelectTile(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Segment(SegmentRow),
    Tile(TileModelRow),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage state poisoned")]
    Poisoned,
}

/// Storage engine contract.
///
/// Calls are synchronous; async callers run them on the blocking pool. A batch is applied
/// all-or-nothing by backends that can, and must at least be scoped to a single partition.
pub trait Storage: Send + Sync + 'static {
    fn execute(&self, statement: &Statement) -> Result<Vec<Row>, StoreError>;
    fn execute_batch(&self, statements: &[Statement]) -> Result<(), StoreError>;
}
