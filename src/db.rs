use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::record::OccupationRecord;

const DEFAULT_DB_PATH: &str = "data/rome.sqlite";

/// Open the record sink. The path comes from `ROME_DB` when set.
pub fn connect() -> Result<Connection> {
    let path = std::env::var("ROME_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    if let Some(dir) = Path::new(&path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(&path)
        .with_context(|| format!("failed to open database {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS occupations (
            code       TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            doc        TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

pub fn exists(conn: &Connection, code: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM occupations WHERE code = ?1")?;
    Ok(stmt.exists([code])?)
}

/// Insert a freshly scraped record. A primary-key violation surfaces as a
/// rusqlite constraint error; callers classify it with [`is_duplicate`].
pub fn insert(conn: &Connection, record: &OccupationRecord) -> Result<(), rusqlite::Error> {
    let doc = serde_json::to_string(record).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })?;
    conn.execute(
        "INSERT INTO occupations (code, title, doc) VALUES (?1, ?2, ?3)",
        rusqlite::params![record.classification_code, record.title, doc],
    )?;
    Ok(())
}

/// True when `err` is a unique/primary-key violation. In a sequential run
/// this only means the code was already processed.
pub fn is_duplicate(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Lexicographically maximal code in the sink, the resumption anchor.
pub fn find_max_code(conn: &Connection) -> Result<Option<String>> {
    let max: Option<String> =
        conn.query_row("SELECT MAX(code) FROM occupations", [], |r| r.get(0))?;
    Ok(max)
}

/// Stored missions list for an already-processed code.
pub fn missions(conn: &Connection, code: &str) -> Result<Vec<String>> {
    let doc: String = conn.query_row(
        "SELECT doc FROM occupations WHERE code = ?1",
        [code],
        |r| r.get(0),
    )?;
    let value: Value = serde_json::from_str(&doc)?;
    let missions = value
        .get("missions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(missions)
}

/// Patch named fields into a stored document and drop legacy fields, in one
/// atomic UPDATE (SQLite json_patch + json_remove).
pub fn upsert_fields(
    conn: &Connection,
    code: &str,
    set: &Map<String, Value>,
    unset: &[&str],
) -> Result<()> {
    for name in unset {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid field name '{}'", name);
        }
    }
    let removals: String = unset.iter().map(|n| format!(", '$.{}'", n)).collect();
    let sql = format!(
        "UPDATE occupations SET doc = json_remove(json_patch(doc, ?1){}) WHERE code = ?2",
        removals
    );
    let patch = Value::Object(set.clone()).to_string();
    let updated = conn.execute(&sql, rusqlite::params![patch, code])?;
    ensure!(updated == 1, "no record for code {}", code);
    Ok(())
}

/// All `(code, doc)` pairs in code order, for the backfill stages.
pub fn fetch_all(conn: &Connection) -> Result<Vec<(String, Value)>> {
    let mut stmt = conn.prepare("SELECT code, doc FROM occupations ORDER BY code")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(code, doc)| Ok((code, serde_json::from_str(&doc)?)))
        .collect()
}

/// Records the skills stage has not patched yet.
pub fn fetch_without_skills(
    conn: &Connection,
    limit: Option<usize>,
) -> Result<Vec<(String, Value)>> {
    let sql = format!(
        "SELECT code, doc FROM occupations
         WHERE json_extract(doc, '$.hard_skills') IS NULL
         ORDER BY code{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(code, doc)| Ok((code, serde_json::from_str(&doc)?)))
        .collect()
}

pub struct Stats {
    pub total: usize,
    pub with_skills: usize,
    pub with_domain: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM occupations", [], |r| r.get(0))?;
    let with_skills: usize = conn.query_row(
        "SELECT COUNT(*) FROM occupations WHERE json_extract(doc, '$.hard_skills') IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let with_domain: usize = conn.query_row(
        "SELECT COUNT(*) FROM occupations WHERE json_extract(doc, '$.domain') IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        with_skills,
        with_domain,
    })
}
