use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::task;
use crate::error::{Result, EvalError};

/// SQLite handle shared by the corpus retrievers and the result store.
///
/// Holds only the path; every call opens its own connection on a blocking thread,
/// so the handle is cheap to clone into worker tasks. Handles from
/// [`Db::open_existing`] are read-only and never change the file's journal mode.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
    read_only: bool,
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // WAL so readers (retrieval workers) never block the report writer
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA busy_timeout = 5000;"
    )?;
    Ok(())
}

impl Db {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            read_only: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a database that must already exist (the external corpus index).
    pub fn open_existing<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.is_file() {
            return Err(EvalError::Configuration(format!(
                "corpus index not found: {}. Point [corpus].db_path at a built index.",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    fn connect(path: &Path, read_only: bool) -> Result<Connection> {
        if read_only {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
            Ok(conn)
        } else {
            let conn = Connection::open(path)?;
            apply_pragmas(&conn)?;
            Ok(conn)
        }
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let read_only = self.read_only;
        task::spawn_blocking(move || {
            let mut conn = Self::connect(&path, read_only)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| EvalError::Search(format!("database task failed: {}", e)))?
    }
}

pub mod migrate;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_db_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);

        let result = db
            .with_connection(|conn| {
                conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                    .map_err(EvalError::Database)?;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "WAL");
            Ok::<(), EvalError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_open_existing_is_read_only_and_keeps_journal_mode() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("corpus.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE chunks (id INTEGER PRIMARY KEY, content TEXT NOT NULL);
                 INSERT INTO chunks (content) VALUES ('alpha'), ('beta');",
            )
            .unwrap();
        }

        let db = Db::open_existing(&db_path).unwrap();
        assert!(db.read_only);

        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 2);

        let write = db
            .with_connection(|conn| {
                conn.execute("INSERT INTO chunks (content) VALUES ('gamma')", [])?;
                Ok(())
            })
            .await;
        assert!(write.is_err());

        let conn = Connection::open(&db_path).unwrap();
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "delete");
        assert!(!temp_dir.path().join("corpus.db-wal").exists());
    }

    #[test]
    fn test_open_existing_rejects_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Db::open_existing(temp_dir.path().join("missing.db")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("missing.db"));
    }
}
