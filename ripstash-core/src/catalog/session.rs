use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::error::Result;

/// One open transaction plus its queue of post-commit side-effects.
///
/// Callbacks registered with [`on_commit`](Self::on_commit) fire in
/// registration order, only after the underlying commit succeeds.
/// Rolling back (or dropping) the session discards them. This is the
/// mechanism that keeps blob-file deletion consistent with row
/// deletion: if the transaction never commits, the file stays put and
/// is still reachable through its row.
pub struct CatalogSession {
    tx: Transaction<'static, Sqlite>,
    commit_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl CatalogSession {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self {
            tx,
            commit_callbacks: Vec::new(),
        }
    }

    /// The connection queries in this session execute against.
    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Registers a side-effect to run after a successful commit.
    ///
    /// Callbacks must not fail the transaction; anything fallible inside
    /// them logs its own errors.
    pub fn on_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.commit_callbacks.push(Box::new(callback));
    }

    /// Commits the transaction, then drains the callback queue.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        for callback in self.commit_callbacks {
            callback();
        }
        Ok(())
    }

    /// Rolls back the transaction and discards pending callbacks.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
