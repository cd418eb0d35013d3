//! `SQLite` history datastore with FTS5 full-text search.

use super::{CommitRecord, ConversationRecord, HistoryDocument, IngestStats};
use crate::models::{DiscoveredItem, ItemKind, SearchFilters, Turn};
use crate::storage::sqlite::{acquire_lock, open_connection, open_in_memory, sql_error, timed};
use crate::storage::traits::{SearchBackend, ThreadStore};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite_history";

/// Content excerpt length handed to judges, in characters.
const EXCERPT_CHARS: usize = 1200;

/// Relevance hint for an exact commit-hash match.
const HASH_MATCH_HINT: f32 = 1.0;

/// Relevance hint for structured (non-ranked) matches.
const STRUCTURED_HINT: f32 = 0.6;

/// Prefix of thread ids synthesized for commits with no conversation.
const COMMIT_THREAD_PREFIX: &str = "commit:";

/// Escapes `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// Builds an FTS5 query that ORs every whitespace-separated term as a quoted
/// phrase. Returns `None` when the text has no terms.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<_> = text.split_whitespace().collect();
    if terms.is_empty() {
        return None;
    }
    let estimated_len = terms.iter().map(|t| t.len() + 6).sum::<usize>();
    let mut query = String::with_capacity(estimated_len);
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            query.push_str(" OR ");
        }
        query.push('"');
        for c in term.chars() {
            if c == '"' {
                query.push_str("\"\"");
            } else {
                query.push(c);
            }
        }
        query.push('"');
    }
    Some(query)
}

/// Maps an FTS5 `bm25()` score (more negative is better) into `(0, 1)`.
#[allow(clippy::cast_possible_truncation)]
fn normalize_bm25(score: f64) -> f32 {
    let positive_score = -score;
    let sigmoid = 1.0 / (1.0 + (-0.5 * positive_score).exp());
    sigmoid.clamp(0.0, 1.0) as f32
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

fn turn_item_id(conversation_id: &str, index: usize) -> String {
    format!("turn:{conversation_id}:{index}")
}

fn commit_item_id(hash: &str) -> String {
    format!("commit:{hash}")
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            scope_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            started_at TEXT
        );
        CREATE TABLE IF NOT EXISTS turns (
            id INTEGER PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            idx INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            occurred_at TEXT,
            UNIQUE (conversation_id, idx)
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(content);
        CREATE TABLE IF NOT EXISTS commits (
            id INTEGER PRIMARY KEY,
            hash TEXT NOT NULL UNIQUE,
            scope_id TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            committed_at TEXT,
            subject TEXT NOT NULL DEFAULT '',
            message TEXT NOT NULL DEFAULT '',
            conversation_id TEXT
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS commits_fts USING fts5(subject, message);
        CREATE TABLE IF NOT EXISTS commit_files (
            commit_id INTEGER NOT NULL REFERENCES commits(id),
            path TEXT NOT NULL,
            PRIMARY KEY (commit_id, path)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_scope ON conversations(scope_id);
        CREATE INDEX IF NOT EXISTS idx_commits_scope ON commits(scope_id);
        CREATE INDEX IF NOT EXISTS idx_commit_files_path ON commit_files(path);",
    )
    .map_err(sql_error("create_history_tables"))
}

/// `SQLite`-backed corpus of conversations and commits.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

struct CommitRow {
    hash: String,
    author: String,
    committed_at: Option<String>,
    subject: String,
    message: String,
    conversation_id: Option<String>,
    files: Option<String>,
    score: Option<f64>,
}

impl CommitRow {
    fn content(&self) -> String {
        let mut content = self.subject.clone();
        if !self.message.is_empty() {
            content.push_str("\n\n");
            content.push_str(&self.message);
        }
        if !self.author.is_empty() {
            content.push_str("\n\nAuthor: ");
            content.push_str(&self.author);
        }
        if let Some(files) = self.files.as_deref().filter(|f| !f.is_empty()) {
            content.push_str("\nFiles: ");
            content.push_str(&files.replace('\n', ", "));
        }
        content
    }

    fn thread_id(&self) -> String {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| format!("{COMMIT_THREAD_PREFIX}{}", self.hash))
    }

    fn into_item(self, hint: f32) -> DiscoveredItem {
        let relevance_hint = self.score.map_or(hint, normalize_bm25);
        DiscoveredItem {
            id: commit_item_id(&self.hash),
            thread_id: self.thread_id(),
            kind: ItemKind::Commit,
            title: self.subject.clone(),
            content: excerpt(&self.content()),
            relevance_hint,
            occurred_at: self.committed_at,
        }
    }
}

const COMMIT_COLUMNS: &str = "m.hash, m.author, m.committed_at, m.subject, m.message, m.conversation_id,
    (SELECT group_concat(path, char(10)) FROM commit_files cf WHERE cf.commit_id = m.id) AS files";

impl SqliteHistoryStore {
    /// Opens (or creates) the history database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be opened or
    /// initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Loads a document of conversations and commits in one transaction.
    ///
    /// Existing conversations and commits with the same identity are
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for records with an empty identity and
    /// [`Error::Backend`] if the write fails; nothing is written on error.
    #[instrument(skip(self, document), fields(
        operation = "ingest",
        backend = BACKEND,
        conversations = document.conversations.len(),
        commits = document.commits.len()
    ))]
    pub fn ingest(&self, document: &HistoryDocument) -> Result<IngestStats> {
        timed(BACKEND, "ingest", || {
            let conn = acquire_lock(&self.conn);
            conn.execute("BEGIN IMMEDIATE", [])
                .map_err(sql_error("begin_transaction"))?;

            let result = (|| {
                let mut stats = IngestStats::default();
                for conversation in &document.conversations {
                    stats.turns += write_conversation(&conn, conversation)?;
                    stats.conversations += 1;
                }
                for commit in &document.commits {
                    write_commit(&conn, commit)?;
                    stats.commits += 1;
                }
                Ok(stats)
            })();

            if result.is_ok() {
                conn.execute("COMMIT", [])
                    .map_err(sql_error("commit_transaction"))?;
            } else {
                let _ = conn.execute("ROLLBACK", []);
            }
            result
        })
    }

    /// Upserts one conversation, returning the number of turns written.
    ///
    /// # Errors
    ///
    /// See [`Self::ingest`].
    pub fn record_conversation(&self, conversation: &ConversationRecord) -> Result<usize> {
        let document = HistoryDocument {
            conversations: vec![conversation.clone()],
            commits: Vec::new(),
        };
        self.ingest(&document).map(|stats| stats.turns)
    }

    fn query_turns(
        conn: &Connection,
        fts: Option<&str>,
        scope_id: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<DiscoveredItem>> {
        let mut clauses = Vec::new();
        let mut params: Vec<String> = Vec::new();

        let (from, score, order) = if let Some(fts) = fts {
            params.push(fts.to_string());
            clauses.push(format!("turns_fts MATCH ?{}", params.len()));
            (
                "turns_fts f JOIN turns t ON t.id = f.rowid",
                "bm25(turns_fts)",
                "score",
            )
        } else {
            ("turns t", "NULL", "t.occurred_at, t.id")
        };
        if !scope_id.is_empty() {
            params.push(scope_id.to_string());
            clauses.push(format!("c.scope_id = ?{}", params.len()));
        }
        if let Some(conversation_id) = &filters.conversation_id {
            params.push(conversation_id.clone());
            clauses.push(format!("t.conversation_id = ?{}", params.len()));
        }
        if let Some(since) = &filters.since {
            params.push(since.clone());
            clauses.push(format!("substr(t.occurred_at, 1, 10) >= ?{}", params.len()));
        }
        if let Some(until) = &filters.until {
            params.push(until.clone());
            clauses.push(format!("substr(t.occurred_at, 1, 10) <= ?{}", params.len()));
        }
        params.push(limit.to_string());
        let limit_param = params.len();
        let where_clause = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let sql = format!(
            "SELECT t.conversation_id, t.idx, c.title, t.content, t.occurred_at, {score} AS score
             FROM {from}
             JOIN conversations c ON c.id = t.conversation_id
             WHERE {where_clause}
             ORDER BY {order}
             LIMIT ?{limit_param}"
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_error("prepare_turn_search"))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let conversation_id: String = row.get(0)?;
                let index: i64 = row.get(1)?;
                let title: String = row.get(2)?;
                let content: String = row.get(3)?;
                let occurred_at: Option<String> = row.get(4)?;
                let score: Option<f64> = row.get(5)?;
                let index = usize::try_from(index).unwrap_or(0);
                Ok(DiscoveredItem {
                    id: turn_item_id(&conversation_id, index),
                    thread_id: conversation_id,
                    kind: ItemKind::Turn,
                    title,
                    content: excerpt(&content),
                    relevance_hint: score.map_or(STRUCTURED_HINT, normalize_bm25),
                    occurred_at,
                })
            })
            .map_err(sql_error("execute_turn_search"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("read_turn_row"))
    }

    fn query_commits(
        conn: &Connection,
        fts: Option<&str>,
        scope_id: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<DiscoveredItem>> {
        let mut clauses = Vec::new();
        let mut params: Vec<String> = Vec::new();

        let (from, score, order) = if let Some(fts) = fts {
            params.push(fts.to_string());
            clauses.push(format!("commits_fts MATCH ?{}", params.len()));
            (
                "commits_fts f JOIN commits m ON m.id = f.rowid",
                "bm25(commits_fts)",
                "score",
            )
        } else {
            ("commits m", "NULL", "m.committed_at DESC, m.id")
        };
        if !scope_id.is_empty() {
            params.push(scope_id.to_string());
            clauses.push(format!("m.scope_id = ?{}", params.len()));
        }
        if let Some(hash) = &filters.commit_hash {
            params.push(format!("{}%", escape_like_wildcards(hash)));
            clauses.push(format!("m.hash LIKE ?{} ESCAPE '\\'", params.len()));
        }
        if let Some(author) = &filters.author {
            params.push(format!("%{}%", escape_like_wildcards(author)));
            clauses.push(format!("m.author LIKE ?{} ESCAPE '\\'", params.len()));
        }
        if let Some(since) = &filters.since {
            params.push(since.clone());
            clauses.push(format!("substr(m.committed_at, 1, 10) >= ?{}", params.len()));
        }
        if let Some(until) = &filters.until {
            params.push(until.clone());
            clauses.push(format!("substr(m.committed_at, 1, 10) <= ?{}", params.len()));
        }
        if let Some(path) = &filters.file_path {
            params.push(format!("%{}%", escape_like_wildcards(path)));
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM commit_files cf WHERE cf.commit_id = m.id AND cf.path LIKE ?{} ESCAPE '\\')",
                params.len()
            ));
        }
        if let Some(conversation_id) = &filters.conversation_id {
            params.push(conversation_id.clone());
            clauses.push(format!("m.conversation_id = ?{}", params.len()));
        }
        params.push(limit.to_string());
        let limit_param = params.len();
        let where_clause = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let sql = format!(
            "SELECT {COMMIT_COLUMNS}, {score} AS score
             FROM {from}
             WHERE {where_clause}
             ORDER BY {order}
             LIMIT ?{limit_param}"
        );
        let hint = if filters.commit_hash.is_some() {
            HASH_MATCH_HINT
        } else {
            STRUCTURED_HINT
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(sql_error("prepare_commit_search"))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), Self::row_to_commit)
            .map_err(sql_error("execute_commit_search"))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(sql_error("read_commit_row"))?.into_item(hint));
        }
        Ok(items)
    }

    fn row_to_commit(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
        Ok(CommitRow {
            hash: row.get(0)?,
            author: row.get(1)?,
            committed_at: row.get(2)?,
            subject: row.get(3)?,
            message: row.get(4)?,
            conversation_id: row.get(5)?,
            files: row.get(6)?,
            score: row.get(7)?,
        })
    }
}

fn write_conversation(conn: &Connection, conversation: &ConversationRecord) -> Result<usize> {
    if conversation.id.trim().is_empty() {
        return Err(Error::InvalidInput(
            "conversation id must not be empty".to_string(),
        ));
    }
    conn.execute(
        "DELETE FROM turns_fts WHERE rowid IN (SELECT id FROM turns WHERE conversation_id = ?1)",
        params![conversation.id],
    )
    .map_err(sql_error("clear_turns_fts"))?;
    conn.execute(
        "DELETE FROM turns WHERE conversation_id = ?1",
        params![conversation.id],
    )
    .map_err(sql_error("clear_turns"))?;
    conn.execute(
        "INSERT INTO conversations (id, scope_id, title, started_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            scope_id = excluded.scope_id,
            title = excluded.title,
            started_at = excluded.started_at",
        params![
            conversation.id,
            conversation.scope_id,
            conversation.title,
            conversation.started_at
        ],
    )
    .map_err(sql_error("upsert_conversation"))?;

    for (index, turn) in conversation.turns.iter().enumerate() {
        let occurred_at = turn
            .occurred_at
            .as_ref()
            .or(conversation.started_at.as_ref());
        conn.execute(
            "INSERT INTO turns (conversation_id, idx, role, content, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id,
                i64::try_from(index).unwrap_or(i64::MAX),
                turn.role,
                turn.content,
                occurred_at
            ],
        )
        .map_err(sql_error("insert_turn"))?;
        conn.execute(
            "INSERT INTO turns_fts (rowid, content) VALUES (?1, ?2)",
            params![conn.last_insert_rowid(), turn.content],
        )
        .map_err(sql_error("insert_turn_fts"))?;
    }
    Ok(conversation.turns.len())
}

fn write_commit(conn: &Connection, commit: &CommitRecord) -> Result<()> {
    if commit.hash.trim().is_empty() {
        return Err(Error::InvalidInput(
            "commit hash must not be empty".to_string(),
        ));
    }
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM commits WHERE hash = ?1",
            params![commit.hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_error("find_commit"))?;
    if let Some(id) = existing {
        conn.execute("DELETE FROM commit_files WHERE commit_id = ?1", params![id])
            .map_err(sql_error("clear_commit_files"))?;
        conn.execute("DELETE FROM commits_fts WHERE rowid = ?1", params![id])
            .map_err(sql_error("clear_commit_fts"))?;
        conn.execute("DELETE FROM commits WHERE id = ?1", params![id])
            .map_err(sql_error("clear_commit"))?;
    }

    conn.execute(
        "INSERT INTO commits (hash, scope_id, author, committed_at, subject, message, conversation_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            commit.hash,
            commit.scope_id,
            commit.author,
            commit.committed_at,
            commit.subject,
            commit.message,
            commit.conversation_id
        ],
    )
    .map_err(sql_error("insert_commit"))?;
    let commit_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO commits_fts (rowid, subject, message) VALUES (?1, ?2, ?3)",
        params![commit_id, commit.subject, commit.message],
    )
    .map_err(sql_error("insert_commit_fts"))?;
    for path in &commit.files {
        conn.execute(
            "INSERT OR IGNORE INTO commit_files (commit_id, path) VALUES (?1, ?2)",
            params![commit_id, path],
        )
        .map_err(sql_error("insert_commit_file"))?;
    }
    Ok(())
}

impl SearchBackend for SqliteHistoryStore {
    /// Structured filters (hash, author, file) select commits. A date range
    /// selects commits and turns in the range. Otherwise the text is ranked
    /// against turns and commit messages with BM25.
    #[instrument(
        skip(self, query_text, filters),
        fields(operation = "search", backend = BACKEND, query_length = query_text.len(), scope = scope_id, limit = limit)
    )]
    fn search(
        &self,
        query_text: &str,
        scope_id: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<DiscoveredItem>> {
        timed(BACKEND, "search", || {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let conn = acquire_lock(&self.conn);
            let fts = fts_query(query_text);
            let structured = filters.commit_hash.is_some()
                || filters.author.is_some()
                || filters.file_path.is_some();
            let dated = filters.since.is_some() || filters.until.is_some();

            let mut items = Vec::new();
            if structured {
                items.extend(Self::query_commits(&conn, None, scope_id, filters, limit)?);
            } else if dated {
                items.extend(Self::query_commits(&conn, None, scope_id, filters, limit)?);
                items.extend(Self::query_turns(
                    &conn,
                    fts.as_deref(),
                    scope_id,
                    filters,
                    limit,
                )?);
            } else if let Some(fts) = fts.as_deref() {
                items.extend(Self::query_turns(&conn, Some(fts), scope_id, filters, limit)?);
                items.extend(Self::query_commits(
                    &conn,
                    Some(fts),
                    scope_id,
                    filters,
                    limit,
                )?);
            }

            items.sort_by(|a, b| b.relevance_hint.total_cmp(&a.relevance_hint));
            items.truncate(limit);
            Ok(items)
        })
    }
}

impl ThreadStore for SqliteHistoryStore {
    #[instrument(skip(self), fields(operation = "full_thread", backend = BACKEND))]
    fn full_thread(&self, thread_id: &str) -> Result<Vec<Turn>> {
        timed(BACKEND, "full_thread", || {
            let conn = acquire_lock(&self.conn);

            if let Some(hash) = thread_id.strip_prefix(COMMIT_THREAD_PREFIX) {
                let sql = format!("SELECT {COMMIT_COLUMNS}, NULL FROM commits m WHERE m.hash = ?1");
                let commit = conn
                    .query_row(&sql, params![hash], Self::row_to_commit)
                    .optional()
                    .map_err(sql_error("load_commit_thread"))?;
                return Ok(commit
                    .map(|row| Turn {
                        thread_id: thread_id.to_string(),
                        index: 0,
                        role: "commit".to_string(),
                        content: row.content(),
                        occurred_at: row.committed_at.clone(),
                    })
                    .into_iter()
                    .collect());
            }

            let mut stmt = conn
                .prepare_cached(
                    "SELECT idx, role, content, occurred_at FROM turns
                     WHERE conversation_id = ?1 ORDER BY idx",
                )
                .map_err(sql_error("prepare_full_thread"))?;
            let rows = stmt
                .query_map(params![thread_id], |row| {
                    let index: i64 = row.get(0)?;
                    Ok(Turn {
                        thread_id: thread_id.to_string(),
                        index: usize::try_from(index).unwrap_or(0),
                        role: row.get(1)?,
                        content: row.get(2)?,
                        occurred_at: row.get(3)?,
                    })
                })
                .map_err(sql_error("load_full_thread"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("read_turn_row"))
        })
    }
}
