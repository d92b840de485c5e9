//! Pipes connecting pipelined activities.
//!
//! An internal edge of a piped submission is a bounded channel. A pipe reading an external
//! input wraps a checkpoint reader, and the output of the submission root wraps a checkpoint
//! writer.

use crate::error::StorageError;
use crate::storage::{CheckpointReader, CheckpointWriter};
use crate::types::TupleType;
use crate::value::Tuple;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

enum Source {
    Channel(Receiver<Tuple>),
    Reader(Box<dyn CheckpointReader>),
    Finished,
}

/// The receiving end of a pipe. Iterate it to receive tuples.
pub struct InputPipe {
    source: Source,
    tuple_type: TupleType,
    received: u64,
}

impl InputPipe {
    pub fn from_reader(reader: Box<dyn CheckpointReader>) -> Self {
        let tuple_type = reader.tuple_type().clone();
        Self {
            source: Source::Reader(reader),
            tuple_type,
            received: 0,
        }
    }

    pub fn tuple_type(&self) -> &TupleType {
        &self.tuple_type
    }

    /// Number of tuples received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Total tuple count if the pipe reads from a checkpoint.
    pub fn tuple_count(&self) -> Option<i64> {
        match &self.source {
            Source::Reader(reader) => Some(reader.tuple_count()),
            _ => None,
        }
    }

    /// Stops consuming. The producer's next `put` returns `false`.
    pub fn finish_iteration(&mut self) {
        self.source = Source::Finished;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.source, Source::Finished)
    }
}

impl Iterator for InputPipe {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let next = match &mut self.source {
            Source::Channel(rx) => rx.recv().ok(),
            Source::Reader(reader) => reader.next(),
            Source::Finished => None,
        };
        if next.is_some() {
            self.received += 1;
        }
        next
    }
}

enum Sink {
    Channel(Sender<Tuple>),
    Writer(Box<dyn CheckpointWriter>),
}

/// The sending end of a pipe.
pub struct OutputPipe {
    sink: Sink,
    tuple_type: TupleType,
    interrupt: Arc<AtomicBool>,
    sent: u64,
    closed: bool,
    error: Option<StorageError>,
}

impl OutputPipe {
    pub fn from_writer(writer: Box<dyn CheckpointWriter>, interrupt: Arc<AtomicBool>) -> Self {
        let tuple_type = writer.tuple_type().clone();
        Self {
            sink: Sink::Writer(writer),
            tuple_type,
            interrupt,
            sent: 0,
            closed: false,
            error: None,
        }
    }

    pub fn tuple_type(&self) -> &TupleType {
        &self.tuple_type
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Sends a tuple downstream. Returns `false` if no more tuples are accepted, because the
    /// consumer finished, the execution was interrupted or the tuple could not be stored.
    /// The producer must stop once `false` was returned.
    pub fn put(&mut self, tuple: Tuple) -> bool {
        if self.closed {
            return false;
        }
        if self.interrupt.load(Ordering::Relaxed) {
            self.closed = true;
            return false;
        }
        if let Err(message) = self.tuple_type.check_tuple(&tuple) {
            self.fail(StorageError::TypeMismatch(message));
            return false;
        }
        let accepted = match &mut self.sink {
            Sink::Channel(tx) => tx.send(tuple).is_ok(),
            Sink::Writer(writer) => match writer.write(tuple) {
                Ok(()) => true,
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            },
        };
        if accepted {
            self.sent += 1;
        } else {
            self.closed = true;
        }
        accepted
    }

    fn fail(&mut self, error: StorageError) {
        self.error = Some(error);
        self.closed = true;
    }

    pub(crate) fn take_error(&mut self) -> Option<StorageError> {
        self.error.take()
    }

    /// Commits the output if it is backed by a checkpoint writer.
    pub(crate) fn close(self) -> Result<u64, StorageError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Sink::Writer(writer) = self.sink {
            writer.close()?;
        }
        Ok(self.sent)
    }
}

/// Creates a bounded channel pipe. With `capacity == 0` every `put` waits for the consumer.
pub(crate) fn channel(
    capacity: usize,
    tuple_type: TupleType,
    interrupt: Arc<AtomicBool>,
) -> (OutputPipe, InputPipe) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let output = OutputPipe {
        sink: Sink::Channel(tx),
        tuple_type: tuple_type.clone(),
        interrupt,
        sent: 0,
        closed: false,
        error: None,
    };
    let input = InputPipe {
        source: Source::Channel(rx),
        tuple_type,
        received: 0,
    };
    (output, input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType};
    use crate::value::Value;
    use std::thread;

    fn int_type() -> TupleType {
        TupleType::relational(vec![Field::new("id", FieldType::BigInt)])
    }

    #[test]
    fn test_put_fails_after_consumer_finishes() {
        let (mut output, mut input) = channel(0, int_type(), Arc::new(AtomicBool::new(false)));
        let producer = thread::spawn(move || {
            let mut attempts = 0;
            for i in 0..100 {
                attempts += 1;
                if !output.put(vec![Value::Int(i)]) {
                    break;
                }
            }
            attempts
        });
        let first: Vec<_> = input.by_ref().take(3).collect();
        input.finish_iteration();
        assert_eq!(first.len(), 3);
        assert_eq!(producer.join().unwrap(), 4);
    }

    #[test]
    fn test_put_rejects_wrong_arity() {
        let (mut output, _input) = channel(1, int_type(), Arc::new(AtomicBool::new(false)));
        assert!(!output.put(vec![]));
        assert!(matches!(output.take_error(), Some(StorageError::TypeMismatch(_))));
    }

    #[test]
    fn test_interrupt_stops_producer() {
        let interrupt = Arc::new(AtomicBool::new(true));
        let (mut output, _input) = channel(1, int_type(), interrupt);
        assert!(!output.put(vec![Value::Int(1)]));
    }
}
