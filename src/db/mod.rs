//! Photo store: the single writer of persisted photo rows.
//!
//! Every public operation runs as one unit against a mutex-guarded SQLite
//! connection; writes run inside their own transaction so a failure rolls
//! back only that call. There is no cross-call locking: callers that
//! interleave (the rotation engine and on-demand HTTP requests) must treat
//! each call as independent.

mod photo;
mod schema;

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use photo::{Photo, PhotoKey, StoreStats};
pub use schema::{MIGRATIONS, SCHEMA};

use photo::{format_timestamp, parse_timestamp};

const PHOTO_COLUMNS: &str = "id, filename, original_path, display_path, uploaded_at, \
                             converted, last_displayed, display_count";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = conn.execute(migration, []);
        }
        tracing::debug!("Photo store initialized");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock can not leave a half-applied
        // transaction behind, so the connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Inserts and lookups
    // ========================================================================

    /// Record a new upload. Fails with `DuplicatePhoto` when the filename is
    /// already known; the existing row is left untouched.
    pub fn insert(&self, filename: &str, original_path: &Path) -> Result<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = format_timestamp(&chrono::Utc::now());

        let result = tx.execute(
            "INSERT INTO photos (filename, original_path, uploaded_at) VALUES (?, ?, ?)",
            params![filename, original_path.to_string_lossy(), now],
        );

        match result {
            Ok(_) => {
                let id = tx.last_insert_rowid();
                tx.commit()?;
                tracing::info!(photo_id = id, filename, "Added photo");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::warn!(filename, "Photo already exists");
                Err(Error::DuplicatePhoto(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get<'a>(&self, key: impl Into<PhotoKey<'a>>) -> Result<Photo> {
        let key = key.into();
        let conn = self.lock();
        let photo = match key {
            PhotoKey::Id(id) => conn
                .query_row(
                    &format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS),
                    [id],
                    photo_from_row,
                )
                .optional()?,
            PhotoKey::Filename(filename) => conn
                .query_row(
                    &format!("SELECT {} FROM photos WHERE filename = ?", PHOTO_COLUMNS),
                    [filename],
                    photo_from_row,
                )
                .optional()?,
        };
        photo.ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// All photos, newest upload first.
    pub fn list(&self) -> Result<Vec<Photo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM photos ORDER BY uploaded_at DESC, id DESC",
            PHOTO_COLUMNS
        ))?;
        let photos = stmt
            .query_map([], photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    // ========================================================================
    // Conversion queue
    // ========================================================================

    /// Oldest photo still waiting for conversion.
    pub fn next_unconverted(&self) -> Result<Option<Photo>> {
        self.next_unconverted_excluding(&[])
    }

    /// Oldest photo still waiting for conversion whose id is not in `skip`.
    /// Lets a conversion pass move past photos that already failed in it.
    pub fn next_unconverted_excluding(&self, skip: &[i64]) -> Result<Option<Photo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM photos WHERE converted = 0 ORDER BY uploaded_at ASC, id ASC",
            PHOTO_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let photo = photo_from_row(row)?;
            if !skip.contains(&photo.id) {
                return Ok(Some(photo));
            }
        }
        Ok(None)
    }

    /// Pick the bitmap path for a photo and record it on the row.
    ///
    /// A row that already has a path keeps it. Otherwise the first candidate
    /// no other row owns is claimed, in the same transaction as the check, so
    /// concurrent callers can never be handed the same file. `candidates`
    /// may be endless; it is only consumed until a free path turns up.
    pub fn reserve_display_path(
        &self,
        id: i64,
        candidates: impl IntoIterator<Item = PathBuf>,
    ) -> Result<PathBuf> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing: Option<Option<String>> = tx
            .query_row("SELECT display_path FROM photos WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match existing {
            None => return Err(Error::NotFound(PhotoKey::Id(id).to_string())),
            Some(Some(path)) => return Ok(PathBuf::from(path)),
            Some(None) => {}
        }

        for candidate in candidates {
            let value = candidate.to_string_lossy();
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM photos WHERE display_path = ?)",
                [value.as_ref()],
                |row| row.get(0),
            )?;
            if !taken {
                tx.execute(
                    "UPDATE photos SET display_path = ? WHERE id = ?",
                    params![value, id],
                )?;
                tx.commit()?;
                tracing::debug!(photo_id = id, path = %candidate.display(), "Reserved display path");
                return Ok(candidate);
            }
        }

        Err(Error::NotFound(format!("free display path for {}", PhotoKey::Id(id))))
    }

    pub fn mark_converted(&self, id: i64, display_path: &Path) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET converted = 1, display_path = ? WHERE id = ?",
            params![display_path.to_string_lossy(), id],
        )?;
        if updated == 0 {
            tracing::warn!(photo_id = id, "Cannot mark unknown photo as converted");
            return Err(Error::NotFound(PhotoKey::Id(id).to_string()));
        }
        tx.commit()?;
        tracing::info!(photo_id = id, "Marked photo as converted");
        Ok(())
    }

    pub fn pending_conversions(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM photos WHERE converted = 0", [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    // ========================================================================
    // Display rotation
    // ========================================================================

    /// The converted photo shown least often; among equals the one shown
    /// longest ago, never-shown photos first, then the lowest id.
    pub fn next_for_display(&self) -> Result<Option<Photo>> {
        let conn = self.lock();
        let photo = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {}
                    FROM photos
                    WHERE converted = 1
                    ORDER BY display_count ASC, last_displayed ASC NULLS FIRST, id ASC
                    LIMIT 1
                    "#,
                    PHOTO_COLUMNS
                ),
                [],
                photo_from_row,
            )
            .optional()?;
        Ok(photo)
    }

    /// Count one successful display. `last_displayed` never moves backwards,
    /// even if the wall clock does.
    pub fn record_display(&self, id: i64) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = format_timestamp(&chrono::Utc::now());
        let updated = tx.execute(
            r#"
            UPDATE photos
            SET display_count = display_count + 1,
                last_displayed = CASE
                    WHEN last_displayed IS NULL OR last_displayed < ?1 THEN ?1
                    ELSE last_displayed
                END
            WHERE id = ?2
            "#,
            params![now, id],
        )?;
        if updated == 0 {
            tracing::warn!(photo_id = id, "Cannot record display of unknown photo");
            return Err(Error::NotFound(PhotoKey::Id(id).to_string()));
        }
        tx.commit()?;
        tracing::info!(photo_id = id, "Updated display count");
        Ok(())
    }

    // ========================================================================
    // Removal and statistics
    // ========================================================================

    /// Remove a row. Returns whether a row was actually removed.
    pub fn delete<'a>(&self, key: impl Into<PhotoKey<'a>>) -> Result<bool> {
        let key = key.into();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let removed = match key {
            PhotoKey::Id(id) => tx.execute("DELETE FROM photos WHERE id = ?", [id])?,
            PhotoKey::Filename(filename) => {
                tx.execute("DELETE FROM photos WHERE filename = ?", [filename])?
            }
        };
        tx.commit()?;
        if removed > 0 {
            tracing::info!("Deleted {}", key);
        }
        Ok(removed > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();
        let (total, converted, last_display) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN converted = 1 THEN 1 ELSE 0 END), 0),
                MAX(last_displayed)
            FROM photos
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;

        let last_display = last_display
            .map(|value| parse_timestamp(&value).map_err(|e| timestamp_error(2, e)))
            .transpose()?;

        Ok(StoreStats {
            total: total as u64,
            converted: converted as u64,
            last_display,
        })
    }
}

fn timestamp_error(idx: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let uploaded_at: String = row.get(4)?;
    let last_displayed: Option<String> = row.get(6)?;

    Ok(Photo {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_path: row.get::<_, String>(2)?.into(),
        display_path: row.get::<_, Option<String>>(3)?.map(Into::into),
        uploaded_at: parse_timestamp(&uploaded_at).map_err(|e| timestamp_error(4, e))?,
        converted: row.get(5)?,
        last_displayed: last_displayed
            .map(|value| parse_timestamp(&value).map_err(|e| timestamp_error(6, e)))
            .transpose()?,
        display_count: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn store() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn add_converted(db: &Database, name: &str) -> i64 {
        let id = db.insert(name, &PathBuf::from(format!("originals/{}", name))).unwrap();
        db.mark_converted(id, &PathBuf::from(format!("display/{}.bmp", name)))
            .unwrap();
        id
    }

    #[test]
    fn test_insert_defaults() {
        let db = store();
        let id = db.insert("a.jpg", Path::new("originals/a.jpg")).unwrap();

        let photo = db.get(id).unwrap();
        assert_eq!(photo.filename, "a.jpg");
        assert_eq!(photo.original_path, PathBuf::from("originals/a.jpg"));
        assert!(!photo.converted);
        assert_eq!(photo.display_path, None);
        assert_eq!(photo.display_count, 0);
        assert_eq!(photo.last_displayed, None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let db = store();
        let id = db.insert("a.jpg", Path::new("originals/a.jpg")).unwrap();
        db.mark_converted(id, Path::new("display/a.bmp")).unwrap();

        let err = db.insert("a.jpg", Path::new("elsewhere/a.jpg")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePhoto(ref name) if name == "a.jpg"));

        let photos = db.list().unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].original_path, PathBuf::from("originals/a.jpg"));
        assert!(photos[0].converted);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let db = store();
        let first = db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        assert!(db.delete(first).unwrap());
        let second = db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_get_missing() {
        let db = store();
        assert!(matches!(db.get(PhotoKey::Id(42)), Err(Error::NotFound(_))));
        assert!(matches!(db.get("nope.png"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let db = store();
        db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        db.insert("b.jpg", Path::new("b.jpg")).unwrap();
        db.insert("c.jpg", Path::new("c.jpg")).unwrap();

        let names: Vec<_> = db.list().unwrap().into_iter().map(|p| p.filename).collect();
        assert_eq!(names, vec!["c.jpg", "b.jpg", "a.jpg"]);
    }

    #[test]
    fn test_next_unconverted_oldest_first() {
        let db = store();
        let a = db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        let b = db.insert("b.jpg", Path::new("b.jpg")).unwrap();

        assert_eq!(db.next_unconverted().unwrap().map(|p| p.id), Some(a));
        assert_eq!(db.next_unconverted_excluding(&[a]).unwrap().map(|p| p.id), Some(b));

        db.mark_converted(a, Path::new("display/a.bmp")).unwrap();
        assert_eq!(db.next_unconverted().unwrap().map(|p| p.id), Some(b));
        assert_eq!(db.pending_conversions().unwrap(), 1);

        db.mark_converted(b, Path::new("display/b.bmp")).unwrap();
        assert_eq!(db.next_unconverted().unwrap(), None);
    }

    #[test]
    fn test_reserve_display_path_skips_claimed_names() {
        let db = store();
        let a = db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        let b = db.insert("a.png", Path::new("a.png")).unwrap();
        let candidates = || ["display/a.bmp", "display/a-2.bmp"].map(PathBuf::from);
        let reserve = |id| db.reserve_display_path(id, candidates()).unwrap();

        assert_eq!(reserve(a), PathBuf::from("display/a.bmp"));
        assert_eq!(reserve(b), PathBuf::from("display/a-2.bmp"));

        // A reserved row keeps its path and stays unconverted until marked
        assert_eq!(reserve(a), PathBuf::from("display/a.bmp"));
        assert!(!db.get(a).unwrap().converted);
        assert_eq!(db.pending_conversions().unwrap(), 2);

        assert!(matches!(
            db.reserve_display_path(99, candidates()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_display_path_is_unique() {
        let db = store();
        let a = db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        let b = db.insert("b.jpg", Path::new("b.jpg")).unwrap();
        db.mark_converted(a, Path::new("display/shared.bmp")).unwrap();

        let err = db.mark_converted(b, Path::new("display/shared.bmp")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!db.get(b).unwrap().converted);
    }

    #[test]
    fn test_mark_converted_unknown_id() {
        let db = store();
        let err = db.mark_converted(99, Path::new("display/x.bmp")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_unconverted_not_eligible_for_display() {
        let db = store();
        db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        assert_eq!(db.next_for_display().unwrap(), None);
    }

    #[test]
    fn test_fair_rotation() {
        let db = store();
        let ids: Vec<i64> = ["a.jpg", "b.jpg", "c.jpg", "d.jpg"]
            .iter()
            .map(|name| add_converted(&db, name))
            .collect();

        let mut first_round = Vec::new();
        for _ in 0..ids.len() {
            let photo = db.next_for_display().unwrap().unwrap();
            db.record_display(photo.id).unwrap();
            first_round.push(photo.id);
        }
        assert_eq!(first_round, ids);

        // Every count is now 1: the second round follows last_displayed order
        let mut second_round = Vec::new();
        for _ in 0..ids.len() {
            let photo = db.next_for_display().unwrap().unwrap();
            db.record_display(photo.id).unwrap();
            second_round.push(photo.id);
        }
        assert_eq!(second_round, first_round);
    }

    #[test]
    fn test_fresh_photo_shown_before_repeats() {
        let db = store();
        let a = add_converted(&db, "a.jpg");
        db.record_display(a).unwrap();

        let b = add_converted(&db, "b.jpg");
        assert_eq!(db.next_for_display().unwrap().map(|p| p.id), Some(b));
    }

    #[test]
    fn test_display_monotonicity() {
        let db = store();
        let id = add_converted(&db, "a.jpg");

        let mut previous = None;
        for k in 1..=5 {
            db.record_display(id).unwrap();
            let photo = db.get(id).unwrap();
            assert_eq!(photo.display_count, k);
            let shown = photo.last_displayed.unwrap();
            if let Some(prev) = previous {
                assert!(shown >= prev);
            }
            previous = Some(shown);
        }
    }

    #[test]
    fn test_record_display_unknown_id() {
        let db = store();
        assert!(matches!(db.record_display(5), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_by_filename() {
        let db = store();
        db.insert("a.jpg", Path::new("a.jpg")).unwrap();

        assert!(db.delete("a.jpg").unwrap());
        assert!(!db.delete("a.jpg").unwrap());
        assert!(matches!(db.get("a.jpg"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_stats() {
        let db = store();
        assert_eq!(db.stats().unwrap(), StoreStats::default());

        let a = add_converted(&db, "a.jpg");
        db.insert("b.jpg", Path::new("b.jpg")).unwrap();
        db.record_display(a).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.converted, 1);
        assert_eq!(stats.last_display, db.get(a).unwrap().last_displayed);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("photos.db");

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        db.insert("a.jpg", Path::new("a.jpg")).unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        assert_eq!(db.list().unwrap().len(), 1);
    }
}
