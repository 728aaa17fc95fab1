use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::classify::CATEGORIES;
use crate::enrich::EnrichedRecord;
use crate::hash::fingerprint;
use crate::session::CandidateRecord;

/// Category-name → id map, loaded once when the repository opens. The
/// vocabulary is static for the lifetime of a run.
pub struct CategoryCache {
    ids: HashMap<String, i64>,
}

impl CategoryCache {
    fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, name FROM categories")?;
        let ids = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { ids })
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied()
    }
}

/// Durable store of popup listings keyed by (name, content hash) for dedup.
/// The table's unique constraint is on `name` alone, so a listing whose
/// content changed updates its row in place instead of growing a second one.
pub struct Repository {
    conn: Connection,
    categories: CategoryCache,
}

impl Repository {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("failed to open {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        let categories = CategoryCache::load(&conn)?;
        Ok(Self { conn, categories })
    }

    /// Drop every candidate whose (name, fingerprint) pair is already
    /// persisted. Loads the full pair set once and filters in memory; the
    /// listing universe is small enough that this beats per-row lookups.
    pub fn filter_new(&self, batch: Vec<CandidateRecord>) -> Result<Vec<CandidateRecord>> {
        if batch.is_empty() {
            return Ok(batch);
        }

        let mut stmt = self.conn.prepare("SELECT name, hash FROM stores")?;
        let existing = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(batch
            .into_iter()
            .filter(|record| {
                let hash = fingerprint(
                    &record.name,
                    &record.address,
                    record.start_date.as_deref(),
                    record.end_date.as_deref(),
                );
                !existing.contains(&(record.name.clone(), hash))
            })
            .collect())
    }

    /// Persist a page batch in one transaction: store rows (insert or
    /// conflict-update on name), id resolution, image rows, category
    /// assignments. Any failure rolls the whole batch back.
    pub fn upsert(&mut self, batch: &[EnrichedRecord]) -> Result<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let categories = &self.categories;
        let tx = self.conn.transaction()?;
        let ids;
        {
            let mut store_stmt = tx.prepare(
                "INSERT INTO stores
                 (name, address, lat, lon, start_date, end_date, description, site_link,
                  weekly_view_count, favorite_count, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9)
                 ON CONFLICT(name) DO UPDATE SET
                   address = excluded.address,
                   lat = excluded.lat,
                   lon = excluded.lon,
                   start_date = excluded.start_date,
                   end_date = excluded.end_date,
                   description = excluded.description,
                   site_link = excluded.site_link,
                   hash = excluded.hash,
                   updated_at = datetime('now')",
            )?;
            for record in batch {
                let hash = fingerprint(
                    &record.name,
                    &record.address,
                    record.start_date.as_deref(),
                    record.end_date.as_deref(),
                );
                store_stmt.execute(rusqlite::params![
                    record.name,
                    record.address,
                    record.lat,
                    record.lon,
                    record.start_date,
                    record.end_date,
                    record.description,
                    record.site_link,
                    hash,
                ])?;
            }

            let mut id_stmt = tx.prepare("SELECT id FROM stores WHERE name = ?1")?;
            ids = batch
                .iter()
                .map(|record| id_stmt.query_row([&record.name], |row| row.get::<_, i64>(0)))
                .collect::<Result<Vec<_>, _>>()?;

            let mut image_stmt = tx.prepare(
                "INSERT OR IGNORE INTO images (popup_id, image_url) VALUES (?1, ?2)",
            )?;
            let mut assign_stmt = tx.prepare(
                "INSERT OR IGNORE INTO category_assignments (popup_id, category_id)
                 VALUES (?1, ?2)",
            )?;
            for (id, record) in ids.iter().zip(batch) {
                for url in &record.images {
                    image_stmt.execute(rusqlite::params![id, url])?;
                }
                for name in &record.categories {
                    // Names outside the seeded vocabulary are skipped.
                    if let Some(category_id) = categories.id_of(name) {
                        assign_stmt.execute(rusqlite::params![id, category_id])?;
                    }
                }
            }
        }
        tx.commit()?;

        info!("persisted batch of {} listings", batch.len());
        Ok(ids)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let stores: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM stores", [], |r| r.get(0))?;
        let images: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?;
        let assignments: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM category_assignments", [], |r| {
                    r.get(0)
                })?;

        let mut stmt = self.conn.prepare(
            "SELECT c.name, COUNT(ca.popup_id)
             FROM categories c
             LEFT JOIN category_assignments ca ON ca.category_id = c.id
             GROUP BY c.id
             ORDER BY c.id",
        )?;
        let by_category = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, usize)>, _>>()?;

        Ok(StoreStats {
            stores,
            images,
            assignments,
            by_category,
        })
    }
}

pub struct StoreStats {
    pub stores: usize,
    pub images: usize,
    pub assignments: usize,
    pub by_category: Vec<(String, usize)>,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stores (
            id                INTEGER PRIMARY KEY,
            name              TEXT UNIQUE NOT NULL,
            address           TEXT NOT NULL DEFAULT '',
            lat               REAL NOT NULL DEFAULT 0,
            lon               REAL NOT NULL DEFAULT 0,
            start_date        TEXT,
            end_date          TEXT,
            description       TEXT NOT NULL DEFAULT '',
            site_link         TEXT NOT NULL DEFAULT '',
            weekly_view_count INTEGER NOT NULL DEFAULT 0,
            favorite_count    INTEGER NOT NULL DEFAULT 0,
            hash              TEXT NOT NULL,
            created_at        TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_stores_hash ON stores(hash);

        CREATE TABLE IF NOT EXISTS images (
            id        INTEGER PRIMARY KEY,
            popup_id  INTEGER NOT NULL REFERENCES stores(id),
            image_url TEXT NOT NULL,
            UNIQUE(popup_id, image_url)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS category_assignments (
            popup_id    INTEGER NOT NULL REFERENCES stores(id),
            category_id INTEGER NOT NULL REFERENCES categories(id),
            UNIQUE(popup_id, category_id)
        );
        CREATE INDEX IF NOT EXISTS idx_assignments_category
            ON category_assignments(category_id);
        ",
    )?;

    let mut seed = conn.prepare("INSERT OR IGNORE INTO categories (name) VALUES (?1)")?;
    for name in CATEGORIES {
        seed.execute([name])?;
    }
    Ok(())
}

// ── Tests ──
