use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("capture writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A persisted liveness capture.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CaptureRecord {
    pub id: String,
    pub session: String,
    pub filename: String,
    pub path: String,
    pub created_at: String,
}

/// Captured liveness frames on disk plus a SQLite ledger of them.
///
/// Frames are written as `captured_image_{n}.png`, where `n` is one more than
/// the number of entries already in the capture directory. Names are claimed
/// with `create_new`, so an existing file is never overwritten; a taken name
/// bumps `n` until a free one is found.
#[derive(Clone)]
pub struct CaptureStore {
    dir: PathBuf,
    conn: Connection,
    naming: Arc<Mutex<()>>,
}

impl CaptureStore {
    /// Open (or create) the capture directory and ledger database.
    pub async fn open(dir: &Path, db_path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS captures (
                     id TEXT PRIMARY KEY,
                     session TEXT NOT NULL,
                     filename TEXT NOT NULL,
                     path TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_captures_session ON captures(session);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            dir: dir.to_path_buf(),
            conn,
            naming: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a captured frame and record it in the ledger.
    ///
    /// If the ledger insert fails the written file is removed again, so the
    /// directory and ledger stay consistent.
    pub async fn save(&self, session: &str, image: &RgbImage) -> Result<CaptureRecord, StoreError> {
        let png = encode_png(image)?;

        // Serialise naming so two sessions never race for the same number.
        let _guard = self.naming.lock().await;
        let dir = self.dir.clone();
        let (filename, path) =
            tokio::task::spawn_blocking(move || write_next_capture(&dir, &png)).await??;

        let record = CaptureRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session: session.to_string(),
            filename,
            path: path.to_string_lossy().into_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let row = record.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO captures (id, session, filename, path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![row.id, row.session, row.filename, row.path, row.created_at],
                )?;
                Ok(())
            })
            .await;

        if let Err(e) = inserted {
            tracing::error!(error = %e, path = %path.display(), "ledger insert failed; removing capture file");
            std::fs::remove_file(&path).ok();
            return Err(e.into());
        }

        Ok(record)
    }

    /// Captures recorded for a session, oldest first.
    pub async fn list_by_session(&self, session: &str) -> Result<Vec<CaptureRecord>, StoreError> {
        let session = session.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session, filename, path, created_at
                     FROM captures WHERE session = ?1 ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map([&session], |row| {
                    Ok(CaptureRecord {
                        id: row.get(0)?,
                        session: row.get(1)?,
                        filename: row.get(2)?,
                        path: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count captures across all sessions.
    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM captures", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, StoreError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Claim the next free `captured_image_{n}.png` in `dir` and write `bytes`.
fn write_next_capture(dir: &Path, bytes: &[u8]) -> Result<(String, PathBuf), StoreError> {
    let existing = std::fs::read_dir(dir)
        .map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .count();
    let mut n = existing + 1;

    loop {
        let filename = format!("captured_image_{n}.png");
        let path = dir.join(&filename);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(source) = file.write_all(bytes).and_then(|_| file.flush()) {
                    drop(file);
                    std::fs::remove_file(&path).ok();
                    return Err(StoreError::Io { path, source });
                }
                return Ok((filename, path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(source) => return Err(StoreError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "blinkproofd-store-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[tokio::test]
    async fn test_sequential_names() {
        let dir = scratch_dir("seq");
        let store = CaptureStore::open(&dir, Path::new(":memory:")).await.unwrap();
        let img = RgbImage::new(3, 3);

        let first = store.save("s1", &img).await.unwrap();
        let second = store.save("s2", &img).await.unwrap();
        assert_eq!(first.filename, "captured_image_1.png");
        assert_eq!(second.filename, "captured_image_2.png");
        assert!(Path::new(&second.path).is_file());

        let decoded = image::open(&first.path).unwrap();
        assert_eq!(decoded.width(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_name_counts_existing_entries_and_skips_taken() {
        let dir = scratch_dir("taken");
        std::fs::create_dir_all(&dir).unwrap();
        // One unrelated file -> next name is _2, which is also taken -> _3.
        std::fs::write(dir.join("captured_image_2.png"), b"x").unwrap();

        let store = CaptureStore::open(&dir, Path::new(":memory:")).await.unwrap();
        let record = store.save("s", &RgbImage::new(2, 2)).await.unwrap();
        assert_eq!(record.filename, "captured_image_3.png");
        assert_eq!(std::fs::read(dir.join("captured_image_2.png")).unwrap(), b"x");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_ledger_lists_per_session() {
        let dir = scratch_dir("ledger");
        let store = CaptureStore::open(&dir, Path::new(":memory:")).await.unwrap();
        let img = RgbImage::new(2, 2);

        store.save("alice", &img).await.unwrap();
        store.save("bob", &img).await.unwrap();
        store.save("alice", &img).await.unwrap();

        let alice = store.list_by_session("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].filename, "captured_image_1.png");
        assert_eq!(alice[1].filename, "captured_image_3.png");
        assert!(store.list_by_session("carol").await.unwrap().is_empty());
        assert_eq!(store.count_all().await.unwrap(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_saves_get_distinct_names() {
        let dir = scratch_dir("concurrent");
        let store = CaptureStore::open(&dir, Path::new(":memory:")).await.unwrap();
        let img = RgbImage::new(4, 4);

        let (a, b, c, d) = tokio::join!(
            store.save("s1", &img),
            store.save("s2", &img),
            store.save("s3", &img),
            store.save("s4", &img),
        );
        let mut names: Vec<String> = [a, b, c, d]
            .into_iter()
            .map(|r| r.unwrap().filename)
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "captured_image_1.png",
                "captured_image_2.png",
                "captured_image_3.png",
                "captured_image_4.png"
            ]
        );
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 4);
        assert_eq!(store.count_all().await.unwrap(), 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unwritable_dir_reports_io_error() {
        let dir = scratch_dir("broken");
        let store = CaptureStore::open(&dir, Path::new(":memory:")).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();

        let err = store.save("s", &RgbImage::new(2, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(store.count_all().await.unwrap(), 0);

        let _ = std::fs::remove_file(&dir);
    }
}
