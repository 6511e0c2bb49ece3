//! Persistent text-to-token cache backed by SQLite.
//!
//! Keys are normalized text (lower-cased, trimmed); values are the raw
//! tokenizer output stored as little-endian `i64` blobs. The store carries a
//! version in its `metadata` table and is rebuilt whenever that version does
//! not match [`CACHE_VERSION`].
//!
//! Every operation opens its own connection. Writes within the process are
//! serialized by a mutex; writers in other processes are arbitrated by
//! SQLite's own locking (WAL plus a busy timeout).
//!
//! Rebuilds drop and recreate the tables inside one transaction, so readers
//! holding connections keep seeing a consistent store. A store that turns
//! unreadable behind an open handle is rebuilt on the next operation.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rayon::prelude::*;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::OptimizationState;
use crate::error::{VocalizeError, VocalizeResult};

/// Version written to and expected in the store's metadata
pub const CACHE_VERSION: &str = "1.0";

/// Rows inserted per statement batch during bulk population
pub const POPULATE_BATCH_SIZE: usize = 100;

/// Token id as produced by the tokenizer
pub type Token = i64;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS token_cache (
        text TEXT PRIMARY KEY,
        tokens BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_text ON token_cache(text);
";

static OPEN_CACHES: Lazy<Mutex<HashMap<PathBuf, Weak<CacheState>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Cache key for `text`
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
}

fn decode_tokens(blob: &[u8]) -> Option<Vec<Token>> {
    if blob.len() % 8 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                Token::from_le_bytes(bytes)
            })
            .collect(),
    )
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(3))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

// Errors that mean the file or schema is gone, as opposed to a busy or I/O
// failure that a rebuild would not fix.
fn is_damaged(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || msg.as_deref().is_some_and(|m| m.contains("no such table"))
        }
        _ => false,
    }
}

fn build_time() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Counters reported by [`TokenCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenCacheStats {
    /// Number of cached texts
    pub entry_count: u64,
    /// Sum of stored token blob sizes
    pub stored_bytes: u64,
    /// Size of the store on disk, WAL included
    pub file_size_bytes: u64,
    /// Whether the cache is enabled
    pub enabled: bool,
}

/// Outcome of [`TokenCache::populate_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    /// Rows newly inserted
    pub inserted: usize,
    /// Texts the tokenizer rejected
    pub failed: usize,
}

#[derive(Debug)]
struct CacheState {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Drop for CacheState {
    fn drop(&mut self) {
        let mut open = OPEN_CACHES.lock();
        if open.get(&self.path).is_some_and(|w| w.strong_count() == 0) {
            open.remove(&self.path);
        }
    }
}

/// Handle to the process's token cache.
///
/// Clones share state. [`TokenCache::open`] on a path that is already open
/// in this process returns a handle to the same state instead of
/// reinitializing the store.
#[derive(Debug, Clone)]
pub struct TokenCache {
    state: Option<Arc<CacheState>>,
}

impl TokenCache {
    /// Open the cache if `optimizations` enables it.
    ///
    /// Failures to open degrade to a disabled cache with a warning, since a
    /// missing cache only costs tokenization time.
    #[must_use]
    pub fn open(path: impl AsRef<Path>, optimizations: OptimizationState) -> Self {
        if !optimizations.token_cache_enabled {
            debug!("Token cache disabled by configuration");
            return Self::disabled();
        }
        match Self::try_open(path.as_ref()) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Token cache unavailable, continuing without it: {}", e);
                Self::disabled()
            }
        }
    }

    /// Open or bootstrap the store at `path`, regardless of configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created.
    pub fn try_open(path: &Path) -> VocalizeResult<Self> {
        let mut open = OPEN_CACHES.lock();
        if let Some(state) = open.get(path).and_then(Weak::upgrade) {
            Self::heal(&state)?;
            return Ok(Self { state: Some(state) });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if Self::is_valid_store(path) {
            info!("Using existing token cache (v{})", CACHE_VERSION);
        } else {
            info!("Token cache not found or outdated. Building cache at {}", path.display());
            Self::reset_store(path)?;
        }

        let state = Arc::new(CacheState {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        });
        open.insert(path.to_path_buf(), Arc::downgrade(&state));
        Ok(Self { state: Some(state) })
    }

    /// A cache that never hits and ignores writes
    #[must_use]
    pub const fn disabled() -> Self {
        Self { state: None }
    }

    /// Whether lookups can hit
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Store location, `None` when disabled
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.state.as_deref().map(|s| s.path.as_path())
    }

    /// Whether two handles share the same underlying state
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn is_valid_store(path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        let check = || -> rusqlite::Result<bool> {
            let conn = Connection::open(path)?;
            let tables: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('metadata', 'token_cache')",
                [],
                |row| row.get(0),
            )?;
            if tables != 2 {
                return Ok(false);
            }
            let version: Option<String> = conn
                .query_row("SELECT value FROM metadata WHERE key = 'version'", [], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(version.as_deref() == Some(CACHE_VERSION))
        };
        match check() {
            Ok(valid) => valid,
            Err(e) => {
                warn!("Cache validation error: {}", e);
                false
            }
        }
    }

    /// Empty the store at the current version, in place when possible.
    fn reset_store(path: &Path) -> VocalizeResult<()> {
        match Self::reset_in_place(path) {
            Ok(()) => Ok(()),
            Err(e) if is_damaged(&e) => {
                warn!("Token cache at {} is unreadable ({}), replacing it", path.display(), e);
                Self::replace_store_file(path)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset_in_place(path: &Path) -> rusqlite::Result<()> {
        let mut conn = open_connection(path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DROP TABLE IF EXISTS token_cache;
             DROP TABLE IF EXISTS metadata;",
        )?;
        tx.execute_batch(SCHEMA)?;
        Self::stamp_version(&tx)?;
        tx.commit()
    }

    // Only for files SQLite cannot open at all.
    fn replace_store_file(path: &Path) -> VocalizeResult<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(VocalizeError::corrupt_cache(format!(
                        "Cannot replace damaged token cache {}: {e}",
                        path.display()
                    )))
                }
            }
        }

        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Self::stamp_version(&conn)?;
        Ok(())
    }

    fn stamp_version(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('version', ?1)",
            params![CACHE_VERSION],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('build_time', ?1)",
            params![build_time()],
        )?;
        Ok(())
    }

    /// Rebuild the store behind `state` unless it is still valid.
    fn heal(state: &CacheState) -> VocalizeResult<()> {
        let _guard = state.write_lock.lock();
        if Self::is_valid_store(&state.path) {
            return Ok(());
        }
        warn!("Token cache at {} is damaged or outdated, rebuilding", state.path.display());
        Self::reset_store(&state.path)
    }

    /// Run `op`; if the store turns out to be damaged, rebuild it and retry
    /// once. `op` must not hold the write lock when it returns.
    fn with_healing<T>(
        state: &CacheState,
        op: impl Fn() -> rusqlite::Result<T>,
    ) -> VocalizeResult<T> {
        match op() {
            Err(e) if is_damaged(&e) => {
                warn!("Token cache operation failed ({}), rebuilding store", e);
                Self::heal(state)?;
                Ok(op()?)
            }
            other => Ok(other?),
        }
    }

    /// Cached tokens for `text`.
    ///
    /// Disabled caches, misses, storage errors and undecodable rows all
    /// return `None`.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<Vec<Token>> {
        let state = self.state.as_ref()?;
        let key = normalize_text(text);

        let lookup = || -> rusqlite::Result<Option<Vec<u8>>> {
            let conn = open_connection(&state.path)?;
            conn.query_row(
                "SELECT tokens FROM token_cache WHERE text = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        };

        match Self::with_healing(state, lookup) {
            Ok(Some(blob)) => {
                let tokens = decode_tokens(&blob);
                if tokens.is_none() {
                    warn!("Undecodable token cache entry for '{}'", key);
                }
                tokens
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup error: {}", e);
                None
            }
        }
    }

    /// Insert or replace the tokens for `text`. A no-op when disabled.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn put(&self, text: &str, tokens: &[Token]) -> VocalizeResult<()> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let key = normalize_text(text);
        let blob = encode_tokens(tokens);

        Self::with_healing(state, || {
            let _guard = state.write_lock.lock();
            let conn = open_connection(&state.path)?;
            conn.execute(
                "INSERT OR REPLACE INTO token_cache (text, tokens) VALUES (?1, ?2)",
                params![key, blob],
            )?;
            Ok(())
        })
    }

    /// Entry count and sizes
    #[must_use]
    pub fn stats(&self) -> TokenCacheStats {
        let Some(state) = self.state.as_ref() else {
            return TokenCacheStats::default();
        };

        let query = || -> rusqlite::Result<(i64, i64)> {
            let conn = open_connection(&state.path)?;
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(tokens)), 0) FROM token_cache",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        };
        let (entries, bytes) = query().unwrap_or_else(|e| {
            warn!("Stats error: {}", e);
            (0, 0)
        });

        let mut wal = state.path.as_os_str().to_owned();
        wal.push("-wal");
        let file_size_bytes = [state.path.as_os_str().to_owned(), wal]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        TokenCacheStats {
            entry_count: u64::try_from(entries).unwrap_or(0),
            stored_bytes: u64::try_from(bytes).unwrap_or(0),
            file_size_bytes,
            enabled: true,
        }
    }

    /// Value stored under `key` in the metadata table
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<String> {
        let state = self.state.as_ref()?;
        let conn = open_connection(&state.path).ok()?;
        conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()
    }

    /// Remove every entry; schema and metadata are kept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn clear(&self) -> VocalizeResult<()> {
        let Some(state) = self.state.as_ref() else {
            debug!("Token cache is disabled");
            return Ok(());
        };
        Self::with_healing(state, || {
            let _guard = state.write_lock.lock();
            open_connection(&state.path)?.execute("DELETE FROM token_cache", [])
        })?;
        info!("Token cache cleared");
        Ok(())
    }

    /// Empty the store and stamp it with the current version.
    ///
    /// Tables are recreated in one transaction; the file itself is only
    /// replaced when SQLite cannot read it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reset.
    pub fn rebuild(&self) -> VocalizeResult<()> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let _guard = state.write_lock.lock();
        info!("Rebuilding token cache at {}", state.path.display());
        Self::reset_store(&state.path)
    }

    /// Bulk-insert precomputed entries without overwriting existing ones.
    ///
    /// Runs in a single transaction and records `word_count` and
    /// `build_time`. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the transaction fails; nothing is
    /// inserted in that case.
    pub fn populate<I>(&self, entries: I) -> VocalizeResult<usize>
    where
        I: IntoIterator<Item = (String, Vec<Token>)>,
    {
        let Some(state) = self.state.as_ref() else {
            return Ok(0);
        };
        let entries: Vec<(String, Vec<Token>)> = entries.into_iter().collect();

        let inserted = Self::with_healing(state, || {
            let _guard = state.write_lock.lock();
            let mut conn = open_connection(&state.path)?;
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO token_cache (text, tokens) VALUES (?1, ?2)",
                )?;
                for batch in entries.chunks(POPULATE_BATCH_SIZE) {
                    for (text, tokens) in batch {
                        inserted +=
                            stmt.execute(params![normalize_text(text), encode_tokens(tokens)])?;
                    }
                    debug!("Inserted batch of {} entries", batch.len());
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('word_count', ?1)",
                params![entries.len().to_string()],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('build_time', ?1)",
                params![build_time()],
            )?;
            tx.commit()?;
            Ok(inserted)
        })?;

        info!("Token cache populated: {} new of {} entries", inserted, entries.len());
        Ok(inserted)
    }

    /// Tokenize `texts` in parallel and bulk-insert the results.
    ///
    /// Texts the tokenizer rejects are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub fn populate_with<F>(&self, texts: &[String], tokenize: F) -> VocalizeResult<PopulateReport>
    where
        F: Fn(&str) -> VocalizeResult<Vec<Token>> + Sync,
    {
        if !self.is_enabled() {
            return Ok(PopulateReport::default());
        }

        let results: Vec<Result<(String, Vec<Token>), String>> = texts
            .par_iter()
            .map(|text| {
                tokenize(text.as_str())
                    .map(|tokens| (text.clone(), tokens))
                    .map_err(|e| {
                        debug!("Failed to tokenize '{}': {}", text, e);
                        text.clone()
                    })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("Failed to tokenize {} of {} texts", failed, texts.len());
        }
        let inserted = self.populate(results.into_iter().flatten())?;
        Ok(PopulateReport { inserted, failed })
    }
}

/// Built-in phrases, number words and common vocabulary used to seed a
/// fresh cache, normalized and deduplicated.
#[must_use]
pub fn seed_vocabulary() -> Vec<String> {
    let mut words: BTreeSet<String> = BTreeSet::new();
    words.extend(COMMON_PHRASES.iter().map(|p| normalize_text(p)));
    words.extend(number_words());
    words.extend(EXTRA_VOCABULARY.iter().map(|w| normalize_text(w)));
    words.retain(|w| !w.is_empty());
    words.into_iter().collect()
}

const COMMON_PHRASES: &[&str] = &[
    // Greetings
    "hello", "hi", "hey", "hello world", "good morning", "good afternoon", "good evening",
    "good night", "goodbye", "bye", "see you later", "see you soon", "take care",
    "have a nice day", "have a good day",
    // Politeness
    "thank you", "thanks", "thank you very much", "thanks a lot", "you're welcome",
    "you are welcome", "excuse me", "sorry", "i'm sorry", "i am sorry", "pardon me", "please",
    "no problem",
    // Questions
    "how are you", "how do you do", "what's your name", "what is your name",
    "where are you from", "what time is it", "what's the time", "how much is it",
    "how much does it cost", "can you help me", "do you speak english",
    "where is the bathroom", "where is",
    // Responses
    "yes", "no", "maybe", "sure", "okay", "ok", "alright", "fine", "i don't know",
    "i do not know", "i understand", "i see", "that's right", "that is right", "exactly",
    "of course",
    // Time
    "today", "tomorrow", "yesterday", "now", "later", "soon", "this morning", "this afternoon",
    "this evening", "tonight",
    // Actions
    "let's go", "let us go", "come here", "go away", "wait", "stop", "start", "continue", "help",
    "look", "listen",
    // Assistants
    "hey assistant", "hello assistant", "test", "testing", "one two three", "can you hear me",
    "is this working",
    // States
    "i'm happy", "i am happy", "i'm sad", "i am sad", "i'm tired", "i am tired", "i'm hungry",
    "i am hungry",
    // Pangrams and tongue twisters
    "the quick brown fox jumps over the lazy dog",
    "how much wood would a woodchuck chuck",
    "she sells seashells by the seashore",
];

const UNITS: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 8] = [
    "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const ORDINALS: [&str; 20] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth", "eleventh", "twelfth", "thirteenth", "fourteenth", "fifteenth", "sixteenth",
    "seventeenth", "eighteenth", "nineteenth", "twentieth",
];

const NUMERIC_EXPRESSIONS: &[&str] = &[
    "a dozen", "half a dozen", "a couple", "a few", "several", "once", "twice", "three times",
    "percent", "percentage", "dollar", "dollars", "cent", "cents", "euro", "euros", "pound",
    "pounds", "yen",
];

const EXTRA_VOCABULARY: &[&str] = &[
    // Days and months
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "weekend",
    "weekday", "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december", "spring", "summer", "fall", "autumn",
    "winter",
    // Names
    "james", "john", "robert", "michael", "william", "david", "richard", "joseph", "thomas",
    "christopher", "daniel", "matthew", "donald", "anthony", "paul", "mark", "george", "steven",
    "kenneth", "andrew", "mary", "patricia", "jennifer", "linda", "elizabeth", "barbara", "susan",
    "jessica", "sarah", "karen", "nancy", "betty", "helen", "sandra", "donna", "carol", "ruth",
    "sharon", "michelle", "laura",
    // Everyday words
    "red", "blue", "green", "yellow", "orange", "purple", "black", "white", "gray", "pink", "dog",
    "cat", "bird", "fish", "horse", "cow", "pig", "chicken", "sheep", "mouse", "bread", "milk",
    "cheese", "apple", "banana", "coffee", "tea", "water", "juice", "pizza", "be", "have", "do",
    "say", "go", "get", "make", "know", "think", "take", "good", "bad", "big", "small", "hot",
    "cold", "new", "old", "happy", "sad", "i", "you", "he", "she", "it", "we", "they", "me",
    "him", "her",
];

fn number_words() -> BTreeSet<String> {
    let mut words: BTreeSet<String> = UNITS.iter().chain(TENS.iter()).map(ToString::to_string).collect();

    for ten in TENS {
        for unit in &UNITS[1..10] {
            words.insert(format!("{ten} {unit}"));
            words.insert(format!("{ten}-{unit}"));
        }
    }

    for scale in ["hundred", "thousand", "million", "billion", "trillion"] {
        words.insert(scale.to_string());
    }
    for unit in &UNITS[1..10] {
        words.insert(format!("{unit} hundred"));
        words.insert(format!("{unit} thousand"));
    }

    words.extend(ORDINALS.iter().map(ToString::to_string));

    // Days of the month
    for day in 1..32 {
        words.insert(day.to_string());
        words.insert(format!("the {day}"));
    }
    for year in 2020..2026 {
        words.insert(year.to_string());
        words.insert(format!("twenty {}", year % 100));
    }

    words.extend(NUMERIC_EXPRESSIONS.iter().map(ToString::to_string));
    words
}
