use super::{CheckpointReader, CheckpointWriter, StorageManager};
use crate::activity::ActivityId;
use crate::error::StorageError;
use crate::types::TupleType;
use crate::value::Tuple;
use ahash::AHashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug)]
struct Table {
    tuple_type: TupleType,
    rows: Vec<Tuple>,
}

type CheckpointKey = (ActivityId, usize);

#[derive(Debug, Default)]
struct Inner {
    checkpoints: RwLock<AHashMap<CheckpointKey, Arc<Table>>>,
    entities: RwLock<AHashMap<String, Arc<Table>>>,
}

/// Keeps checkpoints and entities in memory. Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named entity that extract activities can read.
    pub fn add_entity(
        &self,
        name: impl Into<String>,
        tuple_type: TupleType,
        rows: Vec<Tuple>,
    ) -> Result<(), StorageError> {
        for row in &rows {
            tuple_type.check_tuple(row).map_err(StorageError::TypeMismatch)?;
        }
        let mut entities = write_lock(&self.inner.entities);
        entities.insert(name.into(), Arc::new(Table { tuple_type, rows }));
        Ok(())
    }

    /// All tuples of a checkpoint, mainly for inspection.
    pub fn checkpoint_rows(&self, activity_id: ActivityId, port: usize) -> Option<Vec<Tuple>> {
        read_lock(&self.inner.checkpoints)
            .get(&(activity_id, port))
            .map(|t| t.rows.clone())
    }

    pub fn checkpoint_total(&self) -> usize {
        read_lock(&self.inner.checkpoints).len()
    }

    fn commit(&self, key: CheckpointKey, table: Table) -> Result<(), StorageError> {
        let mut checkpoints = write_lock(&self.inner.checkpoints);
        if checkpoints.contains_key(&key) {
            return Err(StorageError::CheckpointExists {
                activity_id: key.0,
                port: key.1,
            });
        }
        debug!(activity = %key.0, port = key.1, rows = table.rows.len(), "Committed checkpoint");
        checkpoints.insert(key, Arc::new(table));
        Ok(())
    }
}

// A poisoned lock only means another thread panicked while holding it; the maps stay usable.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl StorageManager for InMemoryStorage {
    fn read_checkpoint(
        &self,
        activity_id: ActivityId,
        port: usize,
    ) -> Result<Box<dyn CheckpointReader>, StorageError> {
        let table = read_lock(&self.inner.checkpoints)
            .get(&(activity_id, port))
            .cloned()
            .ok_or(StorageError::CheckpointNotFound { activity_id, port })?;
        Ok(Box::new(MemoryReader { table, position: 0 }))
    }

    fn create_writer(
        &self,
        activity_id: ActivityId,
        port: usize,
        tuple_type: TupleType,
    ) -> Result<Box<dyn CheckpointWriter>, StorageError> {
        if self.has_checkpoint(activity_id, port) {
            return Err(StorageError::CheckpointExists { activity_id, port });
        }
        Ok(Box::new(MemoryWriter {
            storage: self.clone(),
            key: (activity_id, port),
            tuple_type,
            rows: Vec::new(),
        }))
    }

    fn has_checkpoint(&self, activity_id: ActivityId, port: usize) -> bool {
        read_lock(&self.inner.checkpoints).contains_key(&(activity_id, port))
    }

    fn checkpoint_type(&self, activity_id: ActivityId, port: usize) -> Option<TupleType> {
        read_lock(&self.inner.checkpoints)
            .get(&(activity_id, port))
            .map(|t| t.tuple_type.clone())
    }

    fn checkpoint_count(&self, activity_id: ActivityId, port: usize) -> Option<i64> {
        read_lock(&self.inner.checkpoints)
            .get(&(activity_id, port))
            .map(|t| t.rows.len() as i64)
    }

    fn drop_checkpoints(&self, activity_id: ActivityId) {
        write_lock(&self.inner.checkpoints).retain(|(id, _), _| *id != activity_id);
    }

    fn read_entity(&self, name: &str) -> Result<Box<dyn CheckpointReader>, StorageError> {
        let table = read_lock(&self.inner.entities)
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::EntityNotFound(name.to_string()))?;
        Ok(Box::new(MemoryReader { table, position: 0 }))
    }

    fn entity_type(&self, name: &str) -> Option<TupleType> {
        read_lock(&self.inner.entities)
            .get(name)
            .map(|t| t.tuple_type.clone())
    }
}

struct MemoryReader {
    table: Arc<Table>,
    position: usize,
}

impl Iterator for MemoryReader {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let row = self.table.rows.get(self.position)?.clone();
        self.position += 1;
        Some(row)
    }
}

impl CheckpointReader for MemoryReader {
    fn tuple_type(&self) -> &TupleType {
        &self.table.tuple_type
    }

    fn tuple_count(&self) -> i64 {
        self.table.rows.len() as i64
    }
}

struct MemoryWriter {
    storage: InMemoryStorage,
    key: CheckpointKey,
    tuple_type: TupleType,
    rows: Vec<Tuple>,
}

impl CheckpointWriter for MemoryWriter {
    fn tuple_type(&self) -> &TupleType {
        &self.tuple_type
    }

    fn write(&mut self, tuple: Tuple) -> Result<(), StorageError> {
        self.tuple_type
            .check_tuple(&tuple)
            .map_err(StorageError::TypeMismatch)?;
        self.rows.push(tuple);
        Ok(())
    }

    fn written(&self) -> u64 {
        self.rows.len() as u64
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryWriter {
            storage,
            key,
            tuple_type,
            rows,
        } = *self;
        storage.commit(key, Table { tuple_type, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType};
    use crate::value::Value;
    use uuid::Uuid;

    fn int_type() -> TupleType {
        TupleType::relational(vec![Field::new("id", FieldType::BigInt)])
    }

    #[test]
    fn test_writer_commits_on_close_only() {
        let storage = InMemoryStorage::new();
        let id = Uuid::new_v4();
        let mut writer = storage.create_writer(id, 0, int_type()).unwrap();
        writer.write(vec![Value::Int(1)]).unwrap();
        assert!(!storage.has_checkpoint(id, 0));
        writer.close().unwrap();

        let reader = storage.read_checkpoint(id, 0).unwrap();
        assert_eq!(reader.tuple_count(), 1);
        assert_eq!(reader.collect::<Vec<_>>(), vec![vec![Value::Int(1)]]);
    }

    #[test]
    fn test_writer_rejects_mismatching_tuples() {
        let storage = InMemoryStorage::new();
        let mut writer = storage.create_writer(Uuid::new_v4(), 0, int_type()).unwrap();
        assert!(matches!(
            writer.write(vec![Value::Text("x".into())]),
            Err(StorageError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_drop_checkpoints() {
        let storage = InMemoryStorage::new();
        let id = Uuid::new_v4();
        storage.create_writer(id, 0, int_type()).unwrap().close().unwrap();
        assert!(storage.create_writer(id, 0, int_type()).is_err());
        storage.drop_checkpoints(id);
        assert!(!storage.has_checkpoint(id, 0));
    }
}
