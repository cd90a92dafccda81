//! SQLite-backed index store.
//!
//! One table keyed by normalized absolute path, plus a small `meta` table
//! holding the schema version, the last started and last completed
//! generations, and the roots recorded at `init`.
//!
//! # Crash safety
//!
//! Every mutation runs inside a transaction. Scan upserts are committed in
//! batches, so an interrupted scan keeps what it already committed and loses
//! only the uncommitted tail. Completing a generation (carry-forward, sweep,
//! generation bump) is a single transaction: it happens entirely or not at
//! all.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use super::entry::FileRecord;
use super::pattern::PatternMatcher;
use crate::error::{DuplerError, Result};
use crate::scanner::path_utils;
use crate::scanner::Fingerprint;

/// Version of the on-disk layout.
pub const SCHEMA_VERSION: i64 = 1;

/// Records fetched per page by the lazy sequences.
const PAGE_SIZE: usize = 256;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    path        TEXT PRIMARY KEY NOT NULL,
    size        INTEGER NOT NULL,
    mtime_ns    INTEGER NOT NULL,
    prehash     BLOB,
    fingerprint BLOB,
    generation  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_size ON files(size, prehash);
CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint, size);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const COLUMNS: &str = "path, size, mtime_ns, prehash, fingerprint, generation";

const UPSERT: &str = "
INSERT INTO files (path, size, mtime_ns, prehash, fingerprint, generation)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(path) DO UPDATE SET
    size = excluded.size,
    mtime_ns = excluded.mtime_ns,
    prehash = excluded.prehash,
    fingerprint = excluded.fingerprint,
    generation = excluded.generation";

const META_SCHEMA_VERSION: &str = "schema_version";
const META_GENERATION: &str = "generation";
const META_STARTED: &str = "started_generation";
const META_ROOTS: &str = "roots";

/// Which digest column a [`DigestUpdate`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// Size-keyed prefix digest.
    Prehash,
    /// Full-content fingerprint.
    Full,
}

/// A computed digest for a record, applied only if the record still has
/// the size and mtime it was hashed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestUpdate {
    /// Record key
    pub path: PathBuf,
    /// Size the digest was computed for
    pub size: u64,
    /// Mtime the digest was computed for
    pub mtime_ns: i64,
    /// Target column
    pub kind: DigestKind,
    /// The digest
    pub digest: Fingerprint,
}

/// A (fingerprint, size) pair shared by two or more records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    /// Shared content fingerprint
    pub fingerprint: Fingerprint,
    /// Shared size in bytes
    pub size: u64,
    /// Number of records at the time the key was read
    pub count: usize,
}

impl GroupKey {
    /// Bytes freed by keeping a single copy.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size
            .saturating_mul(u64::try_from(self.count.saturating_sub(1)).unwrap_or(u64::MAX))
    }
}

/// Counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    /// Number of records
    pub records: u64,
    /// Records carrying a full fingerprint
    pub fingerprinted: u64,
    /// Sum of record sizes
    pub total_bytes: u64,
}

/// Persistent index of file records.
pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore").field("path", &self.path).finish()
    }
}

impl IndexStore {
    /// Create a fresh, empty index at `path`.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.configure_pragmas()?;
        store.initialize()?;
        log::debug!("Created index at {}", path.display());
        Ok(store)
    }

    /// Open an existing index.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::CorruptIndex`] if the file is missing, is not
    /// a SQLite database, or has an unexpected schema version.
    pub fn open(path: &Path) -> Result<Self> {
        let corrupt = |reason: String| DuplerError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(corrupt("index file is missing".to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| corrupt(e.to_string()))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store
            .configure_pragmas()
            .map_err(|e| corrupt(e.to_string()))?;
        store.check_schema()?;
        Ok(store)
    }

    /// Open an existing index for reading only.
    ///
    /// The connection cannot write, so the journal mode is left as the
    /// writer set it.
    ///
    /// # Errors
    ///
    /// As [`IndexStore::open`].
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let corrupt = |reason: String| DuplerError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(corrupt("index file is missing".to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| corrupt(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| corrupt(e.to_string()))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.check_schema()?;
        Ok(store)
    }

    /// Create an empty in-memory index.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Remove the index file and its WAL side files, if present.
    ///
    /// # Errors
    ///
    /// Fails if an existing file cannot be removed.
    pub fn destroy(path: &Path) -> Result<()> {
        let mut candidates = vec![path.to_path_buf()];
        for suffix in ["-wal", "-shm"] {
            let mut side = path.as_os_str().to_os_string();
            side.push(suffix);
            candidates.push(PathBuf::from(side));
        }
        for file in candidates {
            match std::fs::remove_file(&file) {
                Ok(()) => log::debug!("Removed {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DuplerError::io(file, e)),
            }
        }
        Ok(())
    }

    /// Location of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure_pragmas(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        log::trace!("SQLite pragmas configured (WAL mode)");
        Ok(())
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        set_meta(&self.conn, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        set_meta(&self.conn, META_GENERATION, "0")?;
        set_meta(&self.conn, META_STARTED, "0")?;
        set_meta(&self.conn, META_ROOTS, "[]")?;
        Ok(())
    }

    fn check_schema(&self) -> Result<()> {
        let corrupt = |reason: String| DuplerError::CorruptIndex {
            path: self.path.clone(),
            reason,
        };

        let version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| corrupt(e.to_string()))?;

        match version.as_deref().map(str::parse::<i64>) {
            Some(Ok(SCHEMA_VERSION)) => {}
            Some(Ok(found)) => {
                return Err(corrupt(format!(
                    "schema version {found}, expected {SCHEMA_VERSION}"
                )))
            }
            Some(Err(_)) | None => return Err(corrupt("schema version missing".to_string())),
        }

        self.conn
            .prepare(&format!("SELECT {COLUMNS} FROM files LIMIT 0"))
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(())
    }

    fn meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // ==================== Generations ====================

    /// The last completed scan generation (0 before the first scan).
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::CorruptIndex`] if the stored value is unreadable.
    pub fn completed_generation(&self) -> Result<u64> {
        let raw = self.meta(META_GENERATION)?.unwrap_or_else(|| "0".to_string());
        raw.parse().map_err(|_| DuplerError::CorruptIndex {
            path: self.path.clone(),
            reason: format!("invalid generation '{raw}'"),
        })
    }

    /// Reserve the generation for a new scan pass.
    ///
    /// Generations are never reused: an interrupted pass still consumes its
    /// number, so records it stamped are older than the next pass and get
    /// swept if the next pass does not see them again.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error, or `CorruptIndex` for an unreadable counter.
    pub fn begin_generation(&mut self) -> Result<u64> {
        let completed = self.completed_generation()?;
        let started = match self.meta(META_STARTED)? {
            Some(raw) => raw.parse::<u64>().map_err(|_| DuplerError::CorruptIndex {
                path: self.path.clone(),
                reason: format!("invalid started generation '{raw}'"),
            })?,
            None => 0,
        };
        let generation = started.max(completed) + 1;

        let tx = self.conn.transaction()?;
        set_meta(&tx, META_STARTED, &generation.to_string())?;
        tx.commit()?;
        log::debug!("Started generation {}", generation);
        Ok(generation)
    }

    /// Delete every record last seen before `generation`.
    ///
    /// All-or-nothing: runs in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error; nothing is deleted in that case.
    pub fn sweep(&mut self, generation: u64) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM files WHERE generation < ?1",
            params![to_sql_int(generation)],
        )?;
        tx.commit()?;
        log::debug!("Swept {} records older than generation {}", removed, generation);
        Ok(removed)
    }

    /// Finish a scan pass.
    ///
    /// In one transaction: records older than `generation` that lie outside
    /// `scope` are carried forward to `generation`; the remaining older
    /// records are deleted; `generation` becomes the completed generation.
    /// With `scope = None` every older record is swept.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error; the index is left unchanged in that case.
    pub fn complete_generation(&mut self, generation: u64, scope: Option<&[PathBuf]>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let gen = to_sql_int(generation);

        let removed = match scope {
            None => tx.execute("DELETE FROM files WHERE generation < ?1", params![gen])?,
            Some(roots) => {
                let stale: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT path FROM files WHERE generation < ?1")?;
                    let rows = stmt.query_map(params![gen], |row| row.get(0))?;
                    rows.collect::<rusqlite::Result<_>>()?
                };

                let mut removed = 0;
                let mut carried = 0;
                {
                    let mut delete = tx.prepare_cached("DELETE FROM files WHERE path = ?1")?;
                    let mut carry =
                        tx.prepare_cached("UPDATE files SET generation = ?2 WHERE path = ?1")?;
                    for path in &stale {
                        if path_utils::is_within(Path::new(path), roots) {
                            removed += delete.execute(params![path])?;
                        } else {
                            carried += carry.execute(params![path, gen])?;
                        }
                    }
                }
                log::debug!("Carried forward {} records outside the scanned roots", carried);
                removed
            }
        };

        set_meta(&tx, META_GENERATION, &generation.to_string())?;
        tx.commit()?;
        log::debug!("Completed generation {} ({} records swept)", generation, removed);
        Ok(removed)
    }

    // ==================== Roots ====================

    /// Roots recorded at `init`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::CorruptIndex`] if the stored list is unreadable.
    pub fn roots(&self) -> Result<Vec<PathBuf>> {
        let raw = self.meta(META_ROOTS)?.unwrap_or_else(|| "[]".to_string());
        serde_json::from_str(&raw).map_err(|e| DuplerError::CorruptIndex {
            path: self.path.clone(),
            reason: format!("invalid roots: {e}"),
        })
    }

    /// Record the default scan roots.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn set_roots(&self, roots: &[PathBuf]) -> Result<()> {
        let raw = serde_json::to_string(roots).map_err(|e| DuplerError::CorruptIndex {
            path: self.path.clone(),
            reason: format!("unencodable roots: {e}"),
        })?;
        set_meta(&self.conn, META_ROOTS, &raw)?;
        Ok(())
    }

    // ==================== Records ====================

    /// Insert or replace a record, keyed by path.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error or a non-UTF-8 path.
    pub fn upsert(&self, record: &FileRecord) -> Result<()> {
        upsert_on(&self.conn, record)
    }

    /// Fetch the record for `path`.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn get(&self, path: &Path) -> Result<Option<FileRecord>> {
        let Some(key) = path.to_str() else {
            return Ok(None);
        };
        let record = self
            .conn
            .prepare_cached(&format!("SELECT {COLUMNS} FROM files WHERE path = ?1"))?
            .query_row(params![key], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// Delete the record for `path`. Returns true if a record was removed.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let Some(key) = path.to_str() else {
            return Ok(false);
        };
        let removed = self
            .conn
            .prepare_cached("DELETE FROM files WHERE path = ?1")?
            .execute(params![key])?;
        Ok(removed > 0)
    }

    /// Delete several records in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error; nothing is deleted in that case.
    pub fn delete_paths(&mut self, paths: &[PathBuf]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM files WHERE path = ?1")?;
            for path in paths {
                if let Some(key) = path.to_str() {
                    removed += stmt.execute(params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Commit one scan batch: upserts, then digest updates, then removals.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error; the whole batch is rolled back.
    pub fn apply_batch(
        &mut self,
        upserts: &[FileRecord],
        digests: &[DigestUpdate],
        removals: &[PathBuf],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for record in upserts {
            upsert_on(&tx, record)?;
        }
        {
            let mut prehash = tx.prepare_cached(
                "UPDATE files SET prehash = ?1 WHERE path = ?2 AND size = ?3 AND mtime_ns = ?4",
            )?;
            let mut full = tx.prepare_cached(
                "UPDATE files SET fingerprint = ?1 WHERE path = ?2 AND size = ?3 AND mtime_ns = ?4",
            )?;
            for update in digests {
                let Some(key) = update.path.to_str() else {
                    continue;
                };
                let stmt = match update.kind {
                    DigestKind::Prehash => &mut prehash,
                    DigestKind::Full => &mut full,
                };
                stmt.execute(params![
                    &update.digest.as_bytes()[..],
                    key,
                    to_sql_int(update.size),
                    update.mtime_ns
                ])?;
            }
            let mut delete = tx.prepare_cached("DELETE FROM files WHERE path = ?1")?;
            for path in removals {
                if let Some(key) = path.to_str() {
                    delete.execute(params![key])?;
                }
            }
        }
        tx.commit()?;
        log::trace!(
            "Committed batch: {} upserts, {} digests, {} removals",
            upserts.len(),
            digests.len(),
            removals.len()
        );
        Ok(())
    }

    /// Record and byte counts.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn counts(&self) -> Result<IndexCounts> {
        let counts = self.conn.query_row(
            "SELECT COUNT(*), COUNT(fingerprint), COALESCE(SUM(size), 0) FROM files",
            [],
            |row| {
                Ok(IndexCounts {
                    records: from_sql_int(row.get(0)?),
                    fingerprinted: from_sql_int(row.get(1)?),
                    total_bytes: from_sql_int(row.get(2)?),
                })
            },
        )?;
        Ok(counts)
    }

    // ==================== Fingerprint policy ====================

    /// Non-empty records lacking a prehash whose size is shared by another record.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn records_needing_prehash(&self) -> Result<Vec<FileRecord>> {
        self.collect_records(&format!(
            "SELECT {COLUMNS} FROM files
             WHERE prehash IS NULL AND size > 0 AND size IN (
                 SELECT size FROM files WHERE size > 0
                 GROUP BY size HAVING COUNT(*) >= 2)
             ORDER BY path"
        ))
    }

    /// Records lacking a fingerprint whose (size, prehash) is shared by another record.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn records_needing_fingerprint(&self) -> Result<Vec<FileRecord>> {
        self.collect_records(&format!(
            "SELECT {COLUMNS} FROM files AS f
             WHERE f.fingerprint IS NULL AND f.prehash IS NOT NULL AND f.size > 0
               AND EXISTS (
                 SELECT 1 FROM files AS g
                 WHERE g.size = f.size AND g.prehash = f.prehash AND g.path <> f.path)
             ORDER BY f.path"
        ))
    }

    fn collect_records(&self, sql: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ==================== Lazy sequences ====================

    /// All records, ordered by path, fetched page by page.
    #[must_use]
    pub fn records(&self) -> Records<'_> {
        Records::new(self, None)
    }

    /// Records whose path matches `matcher`, ordered by path.
    ///
    /// Filtering happens in Rust over path-ordered pages; the database's
    /// `LIKE` is never involved.
    #[must_use]
    pub fn query_by_pattern<'a>(&'a self, matcher: &'a PatternMatcher) -> Records<'a> {
        Records::new(self, Some(matcher))
    }

    /// Every (fingerprint, size) shared by at least two non-empty records,
    /// in presentation order: descending reclaimable bytes, then
    /// fingerprint, then size.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn duplicate_keys(&self) -> Result<Vec<GroupKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, size, COUNT(*) FROM files
             WHERE fingerprint IS NOT NULL AND size > 0
             GROUP BY fingerprint, size HAVING COUNT(*) >= 2
             ORDER BY size * (COUNT(*) - 1) DESC, fingerprint, size",
        )?;
        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(0)?;
            let size: i64 = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok((blob, size, count))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (blob, size, count) = row?;
            let Some(fingerprint) = Fingerprint::from_slice(&blob) else {
                log::warn!("Ignoring malformed fingerprint ({} bytes)", blob.len());
                continue;
            };
            keys.push(GroupKey {
                fingerprint,
                size: from_sql_int(size),
                count: usize::try_from(count).unwrap_or(0),
            });
        }
        Ok(keys)
    }

    /// Current members of a group, ordered by mtime then path.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error.
    pub fn group_members(&self, fingerprint: &Fingerprint, size: u64) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM files
             WHERE fingerprint = ?1 AND size = ?2
             ORDER BY mtime_ns, path"
        ))?;
        let rows = stmt.query_map(
            params![&fingerprint.as_bytes()[..], to_sql_int(size)],
            row_to_record,
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Lazy sequence of duplicate groups in the order of
    /// [`IndexStore::duplicate_keys`].
    ///
    /// Keys are read up front; members are fetched as each group is reached,
    /// so records deleted meanwhile are not returned and a group that drops
    /// below two members is skipped.
    ///
    /// # Errors
    ///
    /// Fails on any SQLite error while reading the keys.
    pub fn groups_by_fingerprint(&self) -> Result<FingerprintGroups<'_>> {
        Ok(FingerprintGroups {
            store: self,
            keys: self.duplicate_keys()?.into_iter(),
        })
    }

    fn page_after(&self, after: Option<&str>) -> Result<Vec<FileRecord>> {
        let limit = to_sql_int(PAGE_SIZE as u64);
        let records: Vec<FileRecord> = match after {
            None => {
                let mut stmt = self.conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM files ORDER BY path LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], row_to_record)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            Some(after) => {
                let mut stmt = self.conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM files WHERE path > ?1 ORDER BY path LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![after, limit], row_to_record)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        Ok(records)
    }
}

/// Path-ordered, page-at-a-time record sequence.
pub struct Records<'a> {
    store: &'a IndexStore,
    matcher: Option<&'a PatternMatcher>,
    after: Option<String>,
    buffer: std::vec::IntoIter<FileRecord>,
    exhausted: bool,
}

impl<'a> Records<'a> {
    fn new(store: &'a IndexStore, matcher: Option<&'a PatternMatcher>) -> Self {
        Self {
            store,
            matcher,
            after: None,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.next() {
                if self.matcher.map_or(true, |m| m.matches_path(&record.path)) {
                    return Some(Ok(record));
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            match self.store.page_after(self.after.as_deref()) {
                Ok(page) => {
                    self.exhausted = page.len() < PAGE_SIZE;
                    if let Some(last) = page.last() {
                        self.after = Some(last.path.to_string_lossy().into_owned());
                    }
                    self.buffer = page.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy sequence returned by [`IndexStore::groups_by_fingerprint`].
pub struct FingerprintGroups<'a> {
    store: &'a IndexStore,
    keys: std::vec::IntoIter<GroupKey>,
}

impl FingerprintGroups<'_> {
    /// Keys not yet reached, including any that will turn out dissolved.
    #[must_use]
    pub fn remaining_keys(&self) -> usize {
        self.keys.len()
    }
}

impl Iterator for FingerprintGroups<'_> {
    type Item = Result<(GroupKey, Vec<FileRecord>)>;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            match self.store.group_members(&key.fingerprint, key.size) {
                Ok(members) if members.len() >= 2 => return Some(Ok((key, members))),
                Ok(_) => {
                    log::debug!("Group {} dissolved before it was reached", key.fingerprint.short());
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

fn upsert_on(conn: &Connection, record: &FileRecord) -> Result<()> {
    let key = record.path.to_str().ok_or_else(|| {
        DuplerError::io(
            &record.path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "path is not valid UTF-8"),
        )
    })?;
    conn.prepare_cached(UPSERT)?.execute(params![
        key,
        to_sql_int(record.size),
        record.mtime_ns,
        record.prehash.as_ref().map(|d| &d.as_bytes()[..]),
        record.fingerprint.as_ref().map(|d| &d.as_bytes()[..]),
        to_sql_int(record.generation),
    ])?;
    Ok(())
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(0)?;
    let prehash: Option<Vec<u8>> = row.get(3)?;
    let fingerprint: Option<Vec<u8>> = row.get(4)?;
    Ok(FileRecord {
        path: PathBuf::from(path),
        size: from_sql_int(row.get(1)?),
        mtime_ns: row.get(2)?,
        prehash: prehash.as_deref().and_then(Fingerprint::from_slice),
        fingerprint: fingerprint.as_deref().and_then(Fingerprint::from_slice),
        generation: from_sql_int(row.get(5)?),
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
