use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arrow::datatypes::SchemaRef;
use log::{debug, warn};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::backend::{BackendCursor, BackendSession};
use crate::config::{ConnectionOptions, DriverConfig};
use crate::error::{DriverError, DriverResult};
use crate::partition::PartitionDescriptor;
use crate::result::ResultStream;
use crate::statement::Statement;
use crate::types::schema_from_columns;

/// A flag shared between a resource and everything derived from it.
#[derive(Debug, Clone, Default)]
pub(crate) struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    /// Marks the signal closed and returns whether it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type CursorCell = Mutex<Option<Box<dyn BackendCursor>>>;

/// A backend cursor shared by its holder and the connection that opened it.
/// Whoever releases it first closes it. The slot is empty afterward.
#[derive(Clone)]
pub(crate) struct CursorSlot(Arc<CursorCell>);

impl CursorSlot {
    pub(crate) fn new(cursor: Box<dyn BackendCursor>) -> Self {
        Self(Arc::new(Mutex::new(Some(cursor))))
    }

    /// Locks the slot for a fetch. The cursor is gone once released.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Box<dyn BackendCursor>>> {
        self.0.lock().await
    }

    /// Closes the cursor, waiting for an in-flight fetch to finish.
    pub(crate) async fn release(&self) -> DriverResult<()> {
        let cursor = self.0.lock().await.take();
        match cursor {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        }
    }

    /// Closes the cursor unless a fetch is holding it.
    /// A busy cursor is left to its holder, which is revoked separately.
    pub(crate) fn try_release(&self) -> DriverResult<()> {
        match self.0.try_lock() {
            Ok(mut guard) => match guard.take() {
                Some(mut cursor) => cursor.close(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

/// The state shared by a connection and the statements it creates.
pub(crate) struct SessionState {
    session: Mutex<Option<Box<dyn BackendSession>>>,
    /// Every cursor opened on the session that may still be live.
    cursors: Mutex<Vec<Weak<CursorCell>>>,
    pub(crate) closed: CloseSignal,
    pub(crate) config: Arc<DriverConfig>,
    pub(crate) options: ConnectionOptions,
}

/// Exclusive use of the backend session.
pub(crate) type SessionGuard<'a> = MappedMutexGuard<'a, Box<dyn BackendSession>>;

impl SessionState {
    pub(crate) fn ensure_open(&self, operation: &str) -> DriverResult<()> {
        if self.closed.is_closed() {
            Err(DriverError::invalid_state(format!(
                "{operation}: the connection is closed"
            )))
        } else {
            Ok(())
        }
    }

    /// Acquires exclusive use of the backend session.
    pub(crate) async fn session(&self, operation: &str) -> DriverResult<SessionGuard<'_>> {
        self.ensure_open(operation)?;
        let guard = self.session.lock().await;
        MutexGuard::try_map(guard, |session| session.as_mut()).map_err(|_| {
            DriverError::invalid_state(format!("{operation}: the connection is closed"))
        })
    }

    /// Registers a cursor so that closing the connection closes it too.
    ///
    /// The caller must still hold the session guard the cursor was opened with,
    /// so that a concurrent close cannot miss the cursor.
    pub(crate) async fn track(
        &self,
        _session: &SessionGuard<'_>,
        cursor: Box<dyn BackendCursor>,
    ) -> CursorSlot {
        let slot = CursorSlot::new(cursor);
        let mut cursors = self.cursors.lock().await;
        cursors.retain(|cell| cell.strong_count() > 0);
        cursors.push(Arc::downgrade(&slot.0));
        slot
    }

    fn live_cursors(cursors: &mut Vec<Weak<CursorCell>>) -> Vec<CursorSlot> {
        cursors
            .drain(..)
            .filter_map(|cell| cell.upgrade().map(CursorSlot))
            .collect()
    }

    /// Resolves a cursor's result schema, closing the cursor if the schema is unsupported.
    pub(crate) async fn result_schema(&self, slot: &CursorSlot) -> DriverResult<SchemaRef> {
        let schema = {
            let cursor = slot.lock().await;
            match cursor.as_ref() {
                Some(cursor) => {
                    schema_from_columns(cursor.columns(), &self.config.session_time_zone)
                }
                None => Err(DriverError::invalid_state("the result cursor is closed")),
            }
        };
        if schema.is_err() {
            slot.release().await?;
        }
        schema
    }
}

/// A connection owning exactly one backend session.
///
/// All statements created by the connection share its session.
/// Closing the connection revokes every statement and result stream derived from it.
pub struct Connection {
    state: Arc<SessionState>,
}

impl Connection {
    pub(crate) fn new(
        session: Box<dyn BackendSession>,
        options: ConnectionOptions,
        config: Arc<DriverConfig>,
    ) -> Self {
        Self {
            state: Arc::new(SessionState {
                session: Mutex::new(Some(session)),
                cursors: Mutex::new(Vec::new()),
                closed: CloseSignal::default(),
                config,
                options,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.state.options.target
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_closed()
    }

    /// Creates a statement. This does not touch the backend.
    pub fn new_statement(&self) -> DriverResult<Statement> {
        self.state.ensure_open("new_statement")?;
        Ok(Statement::new(self.state.clone()))
    }

    /// Opens a result stream over one partition of a partitioned result.
    /// The descriptor may have been produced by another connection.
    pub async fn read_partition(
        &self,
        partition: &PartitionDescriptor,
    ) -> DriverResult<ResultStream> {
        let mut session = self.state.session("read_partition").await?;
        debug!("reading {partition} from {}", self.target());
        let cursor = session.read_partition(partition).await?;
        let slot = self.state.track(&session, cursor).await;
        drop(session);
        let schema = self.state.result_schema(&slot).await?;
        Ok(ResultStream::new(
            slot,
            schema,
            self.state.config.batch_size,
            vec![self.state.closed.clone()],
        ))
    }

    /// Closes every statement and result stream derived from this connection,
    /// then the backend session. Calling this more than once is a no-op.
    ///
    /// All cursors and the session are closed even if one of them fails.
    /// The first failure is returned.
    pub async fn close(&self) -> DriverResult<()> {
        if self.state.closed.close() {
            return Ok(());
        }
        // Waits for an operation in progress to register its cursor.
        let session = self.state.session.lock().await.take();
        let cursors = SessionState::live_cursors(&mut *self.state.cursors.lock().await);
        let mut result = Ok(());
        for cursor in cursors {
            result = result.and(cursor.release().await);
        }
        if let Some(mut session) = session {
            debug!(
                "closing session for {} after releasing its cursors",
                self.target()
            );
            result = result.and(session.close());
        }
        result
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("options", &self.state.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state.closed.close() {
            return;
        }
        match self.state.cursors.try_lock() {
            Ok(mut cursors) => {
                for cursor in SessionState::live_cursors(&mut cursors) {
                    if let Err(e) = cursor.try_release() {
                        warn!("failed to close result cursor for {}: {e}", self.target());
                    }
                }
            }
            Err(_) => warn!(
                "cursors for {} are being registered and were not closed on drop",
                self.target()
            ),
        }
        match self.state.session.try_lock() {
            Ok(mut guard) => {
                if let Some(mut session) = guard.take() {
                    if let Err(e) = session.close() {
                        warn!("failed to close session for {}: {e}", self.target());
                    }
                }
            }
            Err(_) => warn!(
                "session for {} is in use and was not closed on drop",
                self.target()
            ),
        }
    }
}
