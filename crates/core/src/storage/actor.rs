//! Storage actor
//!
//! A SQLite connection may only be used by one thread at a time. The actor
//! moves the connection onto a dedicated worker thread and hands out a
//! cloneable handle. Callers submit requests over an unbounded queue, each
//! with its own oneshot reply channel; the worker runs them strictly in
//! arrival order, one at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use super::catalog::{Command, Query};
use super::migrations;
use crate::config::StorageConfig;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce(&Connection) + Send>;

enum Request {
    Run { name: &'static str, job: Job },
    Shutdown,
}

struct Shared {
    tx: mpsc::UnboundedSender<Request>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap, cloneable handle to the storage worker
#[derive(Clone)]
pub struct StorageActor {
    shared: Arc<Shared>,
}

impl StorageActor {
    /// Open the database described by `config`, create the schema and start
    /// the worker. Any failure here leaves no worker running.
    #[instrument(skip(config), fields(path = %config.file.display()))]
    pub fn open(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(&config.file)?;
        configure(&conn, config)?;
        migrations::run_migrations(&mut conn)?;
        Self::spawn(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations::run_migrations(&mut conn)?;
        Self::spawn(conn)
    }

    fn spawn(conn: Connection) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let worker_closed = closed.clone();
        let worker = thread::Builder::new()
            .name("sensorlog-storage".into())
            .spawn(move || worker_loop(conn, rx, worker_closed))?;

        Ok(Self {
            shared: Arc::new(Shared {
                tx,
                closed,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Run a data-mutating statement, returning the number of affected rows
    pub async fn execute(&self, command: Command, params: Vec<Value>) -> Result<usize> {
        self.submit(command.name, move |conn| {
            let mut stmt = conn.prepare_cached(command.sql)?;
            Ok(stmt.execute(params_from_iter(params.iter()))?)
        })
        .await
    }

    /// Run a read-only statement and decode every row with the query's decoder
    pub async fn fetch<T>(&self, query: Query<T>, params: Vec<Value>) -> Result<Vec<T>>
    where
        T: Send + 'static,
    {
        self.submit(query.name, move |conn| {
            let mut stmt = conn.prepare_cached(query.sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), query.decode)?;
            Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
        })
        .await
    }

    /// Stop the worker. Requests still queued and all later requests fail
    /// with [`Error::StorageClosed`]. Safe to call more than once.
    pub fn stop(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The worker may already be gone; the closed flag covers that case.
        let _ = self.shared.tx.send(Request::Shutdown);
        info!("Storage stop requested");
    }

    /// Stop the worker and wait until it has closed the connection
    pub async fn shutdown(&self) {
        self.stop();

        let handle = match self.shared.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => debug!("Storage worker joined"),
                Ok(Err(_)) => error!("Storage worker panicked"),
                Err(e) => error!(error = %e, "Failed to join storage worker"),
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    async fn submit<R, F>(&self, name: &'static str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(Error::StorageClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // Caller may have given up waiting; the result is discarded then.
            let _ = reply_tx.send(f(conn));
        });

        self.shared
            .tx
            .send(Request::Run { name, job })
            .map_err(|_| Error::StorageClosed)?;

        match reply_rx.await {
            Ok(result) => result,
            // Reply dropped without an answer: either the worker discarded the
            // request on shutdown, or the request itself panicked.
            Err(_) if self.is_stopped() => Err(Error::StorageClosed),
            Err(_) => Err(Error::StorageAborted(name.to_string())),
        }
    }
}

/// Apply connection-level settings before the schema is touched
fn configure(conn: &Connection, config: &StorageConfig) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    for (pragma, value) in &config.pragmas {
        debug!(pragma = %pragma, value = %value, "Applying pragma");
        conn.pragma_update(None, pragma, value)?;
    }
    Ok(())
}

/// Main loop for the worker thread
fn worker_loop(
    conn: Connection,
    mut rx: mpsc::UnboundedReceiver<Request>,
    closed: Arc<AtomicBool>,
) {
    info!("Storage worker started");

    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Run { name, job } => {
                if closed.load(Ordering::Acquire) {
                    // Dropping the job drops its reply sender.
                    debug!(statement = name, "Discarding request after stop");
                    continue;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&conn)));
                if outcome.is_err() {
                    error!(statement = name, "Storage request panicked");
                }
            }
            Request::Shutdown => break,
        }
    }

    rx.close();
    let mut discarded = 0usize;
    while let Ok(request) = rx.try_recv() {
        if let Request::Run { .. } = request {
            discarded += 1;
        }
    }
    if discarded > 0 {
        debug!(discarded, "Discarded queued requests on shutdown");
    }

    if let Err((_, e)) = conn.close() {
        warn!(error = %e, "Failed to close database cleanly");
    }
    info!("Storage worker stopped");
}
