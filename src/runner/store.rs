//! Durable task queue and result log for one crawl server
//!
//! Backed by SQLite so queued tasks survive a process restart. Results are
//! handed to the dispatcher with pop-once semantics: each `TaskResult` is
//! returned exactly once and then considered claimed.

use crate::task::{Task, TaskResult};
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

/// Task store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The website is already queued on this server
    #[error("website {website_id} is already queued")]
    Duplicate { website_id: i64 },

    #[error("task database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            CREATE TABLE IF NOT EXISTS task_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                website_id INTEGER NOT NULL UNIQUE,
                url TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 1,
                callback_type TEXT,
                callback_args TEXT,
                upload_token TEXT
            );
            CREATE TABLE IF NOT EXISTS task_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                website_id INTEGER NOT NULL,
                status_code TEXT NOT NULL,
                file_count INTEGER NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                claimed INTEGER NOT NULL DEFAULT 0
            );
        ",
        )?;
        Ok(Self { conn })
    }

    /// Durably enqueues a task
    pub fn put_task(&self, task: &Task) -> StoreResult<()> {
        let result = self.conn.execute(
            "INSERT INTO task_queue
             (website_id, url, priority, callback_type, callback_args, upload_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.website_id,
                task.url,
                task.priority,
                task.callback_type,
                task.callback_args,
                task.upload_token
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    website_id: task.website_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Dequeues the next task: highest priority first, FIFO within a priority
    pub fn pop_task(&mut self) -> StoreResult<Option<Task>> {
        let tx = self.conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT id, website_id, url, priority, callback_type, callback_args, upload_token
                 FROM task_queue ORDER BY priority DESC, id ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        Task {
                            website_id: row.get(1)?,
                            url: row.get(2)?,
                            priority: row.get(3)?,
                            callback_type: row.get(4)?,
                            callback_args: row.get(5)?,
                            upload_token: row.get(6)?,
                        },
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let task = match row {
            Some((id, task)) => {
                tx.execute("DELETE FROM task_queue WHERE id = ?1", params![id])?;
                Some(task)
            }
            None => None,
        };

        tx.commit()?;
        Ok(task)
    }

    /// Read-only view of all queued tasks, in pop order
    pub fn get_tasks(&self) -> StoreResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT website_id, url, priority, callback_type, callback_args, upload_token
             FROM task_queue ORDER BY priority DESC, id ASC",
        )?;
        let tasks = stmt
            .query_map([], |row| {
                Ok(Task {
                    website_id: row.get(0)?,
                    url: row.get(1)?,
                    priority: row.get(2)?,
                    callback_type: row.get(3)?,
                    callback_args: row.get(4)?,
                    upload_token: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Atomically drains the whole pending queue (server evacuation)
    pub fn pop_all_tasks(&mut self) -> StoreResult<Vec<Task>> {
        let tx = self.conn.transaction()?;
        let tasks = {
            let mut stmt = tx.prepare(
                "SELECT website_id, url, priority, callback_type, callback_args, upload_token
                 FROM task_queue ORDER BY priority DESC, id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Task {
                    website_id: row.get(0)?,
                    url: row.get(1)?,
                    priority: row.get(2)?,
                    callback_type: row.get(3)?,
                    callback_args: row.get(4)?,
                    upload_token: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM task_queue", [])?;
        tx.commit()?;
        Ok(tasks)
    }

    /// Records a completed job's result
    pub fn log_result(&self, result: &TaskResult) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO task_results
             (website_id, status_code, file_count, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.website_id,
                result.status_code,
                result.file_count,
                result.start_time,
                result.end_time
            ],
        )?;
        Ok(())
    }

    /// Returns results not yet handed to the dispatcher and marks them claimed
    pub fn pop_completed_results(&mut self) -> StoreResult<Vec<TaskResult>> {
        let tx = self.conn.transaction()?;
        let results = {
            let mut stmt = tx.prepare(
                "SELECT website_id, status_code, file_count, start_time, end_time
                 FROM task_results WHERE claimed = 0 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(TaskResult {
                    website_id: row.get(0)?,
                    status_code: row.get(1)?,
                    file_count: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("UPDATE task_results SET claimed = 1 WHERE claimed = 0", [])?;
        tx.commit()?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(website_id: i64, priority: i64) -> Task {
        Task {
            website_id,
            url: format!("http://site{}.example/", website_id),
            priority,
            callback_type: None,
            callback_args: None,
            upload_token: None,
        }
    }

    fn result(website_id: i64) -> TaskResult {
        TaskResult {
            website_id,
            status_code: "success".to_string(),
            file_count: 3,
            start_time: 100,
            end_time: 160,
        }
    }

    #[test]
    fn test_pop_respects_priority_then_fifo() {
        let mut store = TaskStore::new_in_memory().unwrap();
        store.put_task(&task(1, 1)).unwrap();
        store.put_task(&task(2, 5)).unwrap();
        store.put_task(&task(3, 5)).unwrap();

        assert_eq!(store.pop_task().unwrap().unwrap().website_id, 2);
        assert_eq!(store.pop_task().unwrap().unwrap().website_id, 3);
        assert_eq!(store.pop_task().unwrap().unwrap().website_id, 1);
        assert!(store.pop_task().unwrap().is_none());
    }

    #[test]
    fn test_duplicate_website_rejected() {
        let store = TaskStore::new_in_memory().unwrap();
        store.put_task(&task(7, 1)).unwrap();
        assert!(matches!(
            store.put_task(&task(7, 2)),
            Err(StoreError::Duplicate { website_id: 7 })
        ));
    }

    #[test]
    fn test_pop_all_drains_queue() {
        let mut store = TaskStore::new_in_memory().unwrap();
        store.put_task(&task(1, 1)).unwrap();
        store.put_task(&task(2, 2)).unwrap();

        let drained = store.pop_all_tasks().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].website_id, 2);
        assert!(store.get_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_results_are_popped_once() {
        let mut store = TaskStore::new_in_memory().unwrap();
        store.log_result(&result(1)).unwrap();
        store.log_result(&result(2)).unwrap();

        let first = store.pop_completed_results().unwrap();
        assert_eq!(first.len(), 2);
        assert!(store.pop_completed_results().unwrap().is_empty());

        store.log_result(&result(3)).unwrap();
        let second = store.pop_completed_results().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].website_id, 3);
    }

    #[test]
    fn test_round_trip_preserves_callback_fields() {
        let mut store = TaskStore::new_in_memory().unwrap();
        let mut original = task(4, 1);
        original.callback_type = Some("webhook".to_string());
        original.callback_args = Some(r#"{"url":"http://hook.example/"}"#.to_string());
        store.put_task(&original).unwrap();

        assert_eq!(store.pop_task().unwrap().unwrap(), original);
    }
}
