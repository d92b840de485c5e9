//! Checkpoint storage seams.
//!
//! Every executed activity materializes each output port into a checkpoint unless its
//! output was consumed directly by a fused or piped successor.

mod memory;

pub use memory::InMemoryStorage;

use crate::activity::ActivityId;
use crate::error::StorageError;
use crate::types::TupleType;
use crate::value::Tuple;

/// Reads the tuples of a checkpoint in insertion order.
pub trait CheckpointReader: Iterator<Item = Tuple> + Send {
    fn tuple_type(&self) -> &TupleType;

    /// Total number of tuples in the checkpoint, independent of the read position.
    fn tuple_count(&self) -> i64;
}

/// Writes tuples into a new checkpoint. Nothing becomes visible before `close` succeeds.
pub trait CheckpointWriter: Send {
    fn tuple_type(&self) -> &TupleType;

    fn write(&mut self, tuple: Tuple) -> Result<(), StorageError>;

    fn written(&self) -> u64;

    /// Commits the checkpoint.
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// Access to checkpoints and to named entities of the underlying stores.
pub trait StorageManager: Send + Sync {
    fn read_checkpoint(
        &self,
        activity_id: ActivityId,
        port: usize,
    ) -> Result<Box<dyn CheckpointReader>, StorageError>;

    fn create_writer(
        &self,
        activity_id: ActivityId,
        port: usize,
        tuple_type: TupleType,
    ) -> Result<Box<dyn CheckpointWriter>, StorageError>;

    fn has_checkpoint(&self, activity_id: ActivityId, port: usize) -> bool;

    fn checkpoint_type(&self, activity_id: ActivityId, port: usize) -> Option<TupleType>;

    fn checkpoint_count(&self, activity_id: ActivityId, port: usize) -> Option<i64>;

    fn drop_checkpoints(&self, activity_id: ActivityId);

    fn read_entity(&self, name: &str) -> Result<Box<dyn CheckpointReader>, StorageError>;

    fn entity_type(&self, name: &str) -> Option<TupleType>;
}
