use std::sync::Mutex;

use chrono::{DateTime, Utc};
use querybeat_core::{ConnectionConfig, ConnectionId, NewConnection, TaskDefinition, TaskId};
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::{connections, tasks};

/// Thread-safe handle over the connection and task catalog.
///
/// Wraps a single SQLite connection in a `Mutex`. Task creation and removal
/// go through the schedule registry, which owns the matching triggers; this
/// manager covers connections, reads, and execution bookkeeping.
pub struct CatalogManager {
    db: Mutex<Connection>,
}

impl CatalogManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    // --- connections -------------------------------------------------------

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create_connection(&self, new: &NewConnection) -> Result<ConnectionConfig> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        let created = connections::insert(&db, new)?;
        info!(connection_id = created.id, "connection created");
        Ok(created)
    }

    /// Return the connection with the same name, or create it.
    ///
    /// An existing row is returned unchanged even if the other fields differ.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn get_or_create_connection(&self, new: &NewConnection) -> Result<ConnectionConfig> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        if let Some(existing) = connections::find_by_name(&db, &new.name)? {
            debug!(connection_id = existing.id, "reusing connection by name");
            return Ok(existing);
        }
        connections::insert(&db, new)
    }

    pub fn get_connection(&self, id: ConnectionId) -> Result<Option<ConnectionConfig>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        connections::get(&db, id)
    }

    pub fn find_connection(&self, name: &str) -> Result<Option<ConnectionConfig>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        connections::find_by_name(&db, name)
    }

    pub fn list_connections(&self) -> Result<Vec<ConnectionConfig>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        connections::list(&db)
    }

    /// Replace every field of a connection. Tasks pick the change up on
    /// their next attempt.
    #[instrument(skip(self, new))]
    pub fn update_connection(
        &self,
        id: ConnectionId,
        new: &NewConnection,
    ) -> Result<ConnectionConfig> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        let updated = connections::update(&db, id, new)?;
        info!(connection_id = id, "connection updated");
        Ok(updated)
    }

    /// Delete a connection that no task references.
    #[instrument(skip(self))]
    pub fn delete_connection(&self, id: ConnectionId) -> Result<()> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        connections::delete(&db, id)?;
        info!(connection_id = id, "connection deleted");
        Ok(())
    }

    // --- tasks -------------------------------------------------------------

    pub fn get_task(&self, id: TaskId) -> Result<Option<TaskDefinition>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        tasks::get(&db, id)
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskDefinition>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        tasks::list(&db)
    }

    /// Fresh read of a task and the source it points at.
    pub fn load_for_execution(
        &self,
        id: TaskId,
    ) -> Result<Option<(TaskDefinition, ConnectionConfig)>> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        tasks::load_with_connection(&db, id)
    }

    pub fn touch_last_run(&self, id: TaskId, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().expect("catalog db mutex poisoned");
        tasks::touch_last_run(&db, id, at)
    }
}
