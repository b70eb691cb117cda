use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::models::{Listing, ListingRecord};

pub const DEFAULT_PENDING_LIMIT: usize = 10;
/// Failed deliveries after which a listing is no longer retried.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "listing-watch") {
            proj_dirs.data_dir().join("listings.db")
        } else {
            PathBuf::from("listings.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                title TEXT,
                price TEXT,
                url TEXT,
                keyword TEXT,
                region TEXT,
                image_url TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                notified INTEGER NOT NULL DEFAULT 0,
                delivery_attempts INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_listings_keyword ON listings(keyword);
            "#,
        )?;
        self.migrate()
    }

    /// Brings stores created before delivery attempts were tracked up to date.
    fn migrate(&self) -> Result<()> {
        let has_attempts: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('listings') WHERE name = 'delivery_attempts'",
            [],
            |row| row.get(0),
        )?;
        if !has_attempts {
            self.conn
                .execute(
                    "ALTER TABLE listings ADD COLUMN delivery_attempts INTEGER NOT NULL DEFAULT 0",
                    [],
                )
                .context("Failed to add delivery_attempts column")?;
        }
        Ok(())
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM listings WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns false when a listing with the same id is already stored.
    pub fn insert(&self, listing: &Listing) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO listings (id, title, price, url, keyword, region, image_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                listing.id,
                listing.title,
                listing.price,
                listing.url,
                listing.keyword,
                listing.region,
                listing.image_url
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to insert listing"),
        }
    }

    /// Unnotified listings still worth retrying, least-tried first so a
    /// listing that keeps failing cannot crowd out the rest.
    pub fn pending_notifications(&self, limit: usize) -> Result<Vec<ListingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, price, url, keyword, region, image_url, created_at, notified,
                    delivery_attempts
             FROM listings
             WHERE notified = 0 AND delivery_attempts < ?1
             ORDER BY delivery_attempts, created_at, rowid
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![MAX_DELIVERY_ATTEMPTS, limit], Self::row_to_record)?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list pending notifications")
    }

    pub fn mark_notified(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE listings SET notified = 1 WHERE id = ?1 AND notified = 0",
            [id],
        )?;
        Ok(())
    }

    /// Returns the number of failed deliveries recorded so far.
    pub fn record_failed_delivery(&self, id: &str) -> Result<u32> {
        self.conn.execute(
            "UPDATE listings SET delivery_attempts = delivery_attempts + 1
             WHERE id = ?1 AND notified = 0",
            [id],
        )?;
        let attempts = self
            .conn
            .query_row(
                "SELECT delivery_attempts FROM listings WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts.unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> Result<Option<ListingRecord>> {
        let result = self.conn.query_row(
            "SELECT id, title, price, url, keyword, region, image_url, created_at, notified,
                    delivery_attempts
             FROM listings WHERE id = ?1",
            [id],
            Self::row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close database")
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ListingRecord> {
        Ok(ListingRecord {
            id: row.get(0)?,
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            price: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            url: row.get(3)?,
            keyword: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            region: row.get(5)?,
            image_url: row.get(6)?,
            created_at: row.get(7)?,
            notified: row.get(8)?,
            delivery_attempts: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, title: &str) -> Listing {
        Listing {
            id: id.to_string(),
            title: title.to_string(),
            price: "1500000".to_string(),
            url: Some(format!("https://www.ouedkniss.com/ann/{}", id)),
            keyword: "Transporter".to_string(),
            region: Some("Alger".to_string()),
            image_url: None,
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = listing("123", "Van for sale");
        let second = listing("123", "Something else entirely");

        assert!(db.insert(&first).unwrap());
        assert!(!db.insert(&second).unwrap());
        assert_eq!(db.count().unwrap(), 1);

        let stored = db.get("123").unwrap().unwrap();
        assert_eq!(stored.to_listing(), first);
        assert!(!stored.notified);
        assert!(!stored.created_at.is_empty());
    }

    #[test]
    fn test_exists() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.exists("42").unwrap());
        db.insert(&listing("42", "Caravelle T5")).unwrap();
        assert!(db.exists("42").unwrap());
        assert!(!db.exists("43").unwrap());
    }

    #[test]
    fn test_mark_notified_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        db.insert(&listing("7", "Multivan")).unwrap();

        db.mark_notified("7").unwrap();
        assert!(db.get("7").unwrap().unwrap().notified);

        // Second mark and a re-insert attempt leave it set
        db.mark_notified("7").unwrap();
        assert!(!db.insert(&listing("7", "Multivan")).unwrap());
        assert!(db.get("7").unwrap().unwrap().notified);

        // Unknown ids are ignored
        db.mark_notified("does-not-exist").unwrap();
    }

    #[test]
    fn test_pending_notifications_respects_limit_and_flag() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..15 {
            db.insert(&listing(&i.to_string(), "Kombi")).unwrap();
        }
        db.mark_notified("0").unwrap();
        db.mark_notified("1").unwrap();

        let pending = db.pending_notifications(DEFAULT_PENDING_LIMIT).unwrap();
        assert_eq!(pending.len(), 10);
        assert!(pending.iter().all(|r| !r.notified));
        assert!(pending.iter().all(|r| r.id != "0" && r.id != "1"));
        assert_eq!(pending[0].id, "2");

        let all = db.pending_notifications(100).unwrap();
        assert_eq!(all.len(), 13);
    }

    #[test]
    fn test_failed_deliveries_sink_and_expire() {
        let db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            db.insert(&listing(id, "Kombi")).unwrap();
        }

        assert_eq!(db.record_failed_delivery("a").unwrap(), 1);
        let order: Vec<String> = db
            .pending_notifications(10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(db.get("a").unwrap().unwrap().delivery_attempts, 1);

        for _ in 1..MAX_DELIVERY_ATTEMPTS {
            db.record_failed_delivery("a").unwrap();
        }
        let pending = db.pending_notifications(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.id != "a"));
        // Still stored, so it is never treated as new again
        assert!(db.exists("a").unwrap());

        assert_eq!(db.record_failed_delivery("missing").unwrap(), 0);
    }

    #[test]
    fn test_other_constraint_failures_are_errors() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_all BEFORE INSERT ON listings
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        assert!(db.insert(&listing("1", "Caravelle")).is_err());
        assert!(!db.exists("1").unwrap());
    }

    #[test]
    fn test_init_adds_attempts_column_to_older_stores() {
        let db = Database {
            conn: Connection::open_in_memory().unwrap(),
            path: PathBuf::from(":memory:"),
        };
        db.conn
            .execute_batch(
                "CREATE TABLE listings (
                    id TEXT PRIMARY KEY, title TEXT, price TEXT, url TEXT, keyword TEXT,
                    region TEXT, image_url TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    notified INTEGER NOT NULL DEFAULT 0
                 );
                 INSERT INTO listings (id, title) VALUES ('old', 'T5');",
            )
            .unwrap();

        db.init().unwrap();
        db.init().unwrap();
        assert_eq!(db.get("old").unwrap().unwrap().delivery_attempts, 0);
        assert_eq!(db.pending_notifications(10).unwrap().len(), 1);
    }

    #[test]
    fn test_optional_fields_round_trip_as_none() {
        let db = Database::open_in_memory().unwrap();
        let mut bare = listing("9", "T6");
        bare.url = None;
        bare.region = None;
        db.insert(&bare).unwrap();

        let stored = db.get("9").unwrap().unwrap();
        assert_eq!(stored.url, None);
        assert_eq!(stored.region, None);
        assert_eq!(stored.image_url, None);
        assert!(db.get("10").unwrap().is_none());
    }

    #[test]
    fn test_keyword_index_exists() {
        let db = Database::open_in_memory().unwrap();
        let found: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_listings_keyword'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listings.db");

        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        db.insert(&listing("555", "Golf")).unwrap();
        db.mark_notified("555").unwrap();
        db.close().unwrap();

        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        assert!(db.exists("555").unwrap());
        assert!(db.get("555").unwrap().unwrap().notified);
        assert!(!db.insert(&listing("555", "Golf")).unwrap());
    }
}
