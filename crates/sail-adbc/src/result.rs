use std::fmt;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::warn;

use crate::codec::{batch_body_length, rows_to_record_batch};
use crate::connection::{CloseSignal, CursorSlot};
use crate::error::{DriverError, DriverResult};

enum StreamState {
    Open(CursorSlot),
    Exhausted,
    Closed,
}

/// A pull-based reader of columnar batches over a backend cursor.
///
/// The stream is the only reader of its cursor. The connection may still close
/// the cursor when it is closed itself. Batches are produced in cursor
/// order, one row group per [`ResultStream::load_next_batch`] call, and the
/// sequence cannot be restarted.
pub struct ResultStream {
    state: StreamState,
    schema: SchemaRef,
    batch_size: usize,
    current: Option<RecordBatch>,
    bytes_read: u64,
    /// Closing any of these revokes the stream.
    signals: Vec<CloseSignal>,
}

impl ResultStream {
    pub(crate) fn new(
        cursor: CursorSlot,
        schema: SchemaRef,
        batch_size: usize,
        signals: Vec<CloseSignal>,
    ) -> Self {
        Self {
            state: StreamState::Open(cursor),
            schema,
            batch_size,
            current: None,
            bytes_read: 0,
            signals,
        }
    }

    /// The schema of every batch in the stream.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// The cumulative body size in bytes of all batches loaded so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// The batch loaded by the last successful call to [`Self::load_next_batch`].
    pub fn current_batch(&self) -> Option<&RecordBatch> {
        self.current.as_ref()
    }

    /// Loads the next batch from the backend.
    /// Returns `false` once the cursor is exhausted, and keeps returning `false` afterward.
    pub async fn load_next_batch(&mut self) -> DriverResult<bool> {
        if self.signals.iter().any(CloseSignal::is_closed) {
            self.release()?;
            return Err(DriverError::invalid_state(
                "load_next_batch: the result stream has been revoked",
            ));
        }
        let slot = match &self.state {
            StreamState::Open(slot) => slot.clone(),
            StreamState::Exhausted => {
                self.current = None;
                return Ok(false);
            }
            StreamState::Closed => {
                return Err(DriverError::invalid_state(
                    "load_next_batch: the result stream is closed",
                ))
            }
        };
        let mut guard = slot.lock().await;
        let Some(cursor) = guard.as_mut() else {
            // The connection or the statement has already closed the cursor.
            self.current = None;
            self.state = StreamState::Closed;
            return Err(DriverError::invalid_state(
                "load_next_batch: the result stream has been revoked",
            ));
        };
        let rows = cursor.fetch_next_rowset(self.batch_size).await?;
        if rows.is_empty() {
            self.current = None;
            self.state = StreamState::Exhausted;
            if let Some(mut cursor) = guard.take() {
                cursor.close()?;
            }
            return Ok(false);
        }
        drop(guard);
        let batch = rows_to_record_batch(self.schema.clone(), &rows)?;
        self.bytes_read += batch_body_length(&batch) as u64;
        self.current = Some(batch);
        Ok(true)
    }

    /// Releases the backend cursor. Calling this more than once is a no-op.
    pub fn close(&mut self) -> DriverResult<()> {
        self.release()
    }

    fn release(&mut self) -> DriverResult<()> {
        self.current = None;
        match std::mem::replace(&mut self.state, StreamState::Closed) {
            StreamState::Open(slot) => slot.try_release(),
            StreamState::Exhausted | StreamState::Closed => Ok(()),
        }
    }

    /// Adapts the stream to a [`futures::Stream`] of batches.
    /// The cursor is released when the stream ends or is dropped.
    pub fn into_stream(self) -> BoxStream<'static, DriverResult<RecordBatch>> {
        futures::stream::try_unfold(self, |mut stream| async move {
            if !stream.load_next_batch().await? {
                stream.close()?;
                return Ok(None);
            }
            let batch = stream.current.take().ok_or_else(|| {
                DriverError::invalid_state("load_next_batch: no batch was loaded")
            })?;
            Ok::<_, DriverError>(Some((batch, stream)))
        })
        .boxed()
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            StreamState::Open(_) => "open",
            StreamState::Exhausted => "exhausted",
            StreamState::Closed => "closed",
        };
        f.debug_struct("ResultStream")
            .field("state", &state)
            .field("schema", &self.schema)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to close result cursor: {e}");
        }
    }
}
