//! Durable store implementation on SQLite via `rusqlite`.
//!
//! One connection behind a mutex; every method is a short synchronous
//! critical section with no await inside. Uniqueness of sessions and
//! conversions per `(split_test_id, visitor_id)` is enforced by the schema,
//! and a conflicting insert resolves to [`Inserted::Existing`].
//!
//! Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision,
//! `Z` suffix) so lexicographic order matches time order.

use super::{Inserted, SplitTestStore};
use crate::experiment::{
    ContentVersionId, Conversion, NewConversion, NewPageView, NewSplitTest, NewVariant,
    NewVisitorSession, PageId, PageView, RecordId, SplitTest, TestId, TestType, Variant,
    VariantId, VisitorId, VisitorSession, WebsiteId,
};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS split_tests(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    test_type TEXT NOT NULL,
    goal_page_id INTEGER,
    is_active INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_split_tests_page ON split_tests(page_id, is_active);
CREATE TABLE IF NOT EXISTS test_variants(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES split_tests(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    content_version_id INTEGER NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_variants_test ON test_variants(test_id);
CREATE TABLE IF NOT EXISTS visitor_sessions(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    split_test_id INTEGER NOT NULL REFERENCES split_tests(id) ON DELETE CASCADE,
    variant_id INTEGER NOT NULL,
    visitor_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(split_test_id, visitor_id)
);
CREATE INDEX IF NOT EXISTS idx_visitor_sessions_variant ON visitor_sessions(split_test_id, variant_id);
CREATE TABLE IF NOT EXISTS conversions(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    split_test_id INTEGER NOT NULL REFERENCES split_tests(id) ON DELETE CASCADE,
    variant_id INTEGER NOT NULL,
    visitor_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(split_test_id, visitor_id)
);
CREATE INDEX IF NOT EXISTS idx_conversions_variant ON conversions(split_test_id, variant_id);
CREATE TABLE IF NOT EXISTS pages(
    page_id INTEGER PRIMARY KEY,
    website_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pages_website ON pages(website_id);
CREATE TABLE IF NOT EXISTS page_views(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL,
    visitor_id TEXT NOT NULL,
    user_agent TEXT,
    ip_address TEXT,
    referrer TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_page_views_page_time ON page_views(page_id, created_at);
";

const TEST_COLUMNS: &str =
    "id, page_id, name, test_type, goal_page_id, is_active, start_date, end_date, created_at";
const VARIANT_COLUMNS: &str = "id, test_id, name, content_version_id, weight, created_at";
const EVENT_COLUMNS: &str = "id, split_test_id, variant_id, visitor_id, created_at";
const VIEW_COLUMNS: &str = "id, page_id, visitor_id, user_agent, ip_address, referrer, created_at";

/// SQLite-backed split-test store.
///
/// # Example
///
/// ```rust
/// use splitpage::experiment::{PageId, SplitTest, TestType};
/// use splitpage::store::{SplitTestStore, SqliteStore};
///
/// # async fn example() -> splitpage::Result<()> {
/// let store = SqliteStore::open_in_memory()?;
/// let test = store
///     .insert_test(SplitTest::builder(PageId(4), "Pricing", TestType::Design).build())
///     .await?;
/// assert_eq!(store.get_test(test.id()).await?, Some(test));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or the schema fails to apply.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns error if the schema fails to apply.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("sqlite connection mutex poisoned".to_string()))
    }
}

fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(idx, &row.get::<_, String>(idx)?)
}

fn opt_ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(idx, &raw))
        .transpose()
}

fn id_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn test_from_row(row: &Row<'_>) -> rusqlite::Result<SplitTest> {
    let raw_type: String = row.get(3)?;
    let test_type = raw_type
        .parse::<TestType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(SplitTest {
        id: TestId(id_from_sql(row, 0)?),
        page_id: PageId(id_from_sql(row, 1)?),
        name: row.get(2)?,
        test_type,
        goal_page_id: row.get::<_, Option<i64>>(4)?.map(|v| PageId(v as u64)),
        is_active: row.get(5)?,
        start_date: ts_from_sql(row, 6)?,
        end_date: opt_ts_from_sql(row, 7)?,
        created_at: ts_from_sql(row, 8)?,
    })
}

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: VariantId(id_from_sql(row, 0)?),
        test_id: TestId(id_from_sql(row, 1)?),
        name: row.get(2)?,
        content_version_id: ContentVersionId(id_from_sql(row, 3)?),
        weight: row.get(4)?,
        created_at: ts_from_sql(row, 5)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<VisitorSession> {
    Ok(VisitorSession {
        id: RecordId(id_from_sql(row, 0)?),
        split_test_id: TestId(id_from_sql(row, 1)?),
        variant_id: VariantId(id_from_sql(row, 2)?),
        visitor_id: VisitorId::new(row.get::<_, String>(3)?),
        created_at: ts_from_sql(row, 4)?,
    })
}

fn conversion_from_row(row: &Row<'_>) -> rusqlite::Result<Conversion> {
    Ok(Conversion {
        id: RecordId(id_from_sql(row, 0)?),
        split_test_id: TestId(id_from_sql(row, 1)?),
        variant_id: VariantId(id_from_sql(row, 2)?),
        visitor_id: VisitorId::new(row.get::<_, String>(3)?),
        created_at: ts_from_sql(row, 4)?,
    })
}

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<PageView> {
    Ok(PageView {
        id: RecordId(id_from_sql(row, 0)?),
        page_id: PageId(id_from_sql(row, 1)?),
        visitor_id: VisitorId::new(row.get::<_, String>(2)?),
        user_agent: row.get(3)?,
        ip_address: row.get(4)?,
        referrer: row.get(5)?,
        created_at: ts_from_sql(row, 6)?,
    })
}

fn find_event<T>(
    conn: &Connection,
    table: &str,
    test_id: TestId,
    visitor_id: &VisitorId,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let sql =
        format!("SELECT {EVENT_COLUMNS} FROM {table} WHERE split_test_id = ?1 AND visitor_id = ?2");
    Ok(conn
        .query_row(&sql, params![test_id.get() as i64, visitor_id.as_str()], map)
        .optional()?)
}

// Writes the row unless (test, visitor) is taken; returns the new row id.
fn insert_event(
    conn: &Connection,
    table: &str,
    test_id: TestId,
    variant_id: VariantId,
    visitor_id: &VisitorId,
    created_at: DateTime<Utc>,
) -> Result<Option<u64>> {
    let sql = format!(
        "INSERT INTO {table}(split_test_id, variant_id, visitor_id, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(split_test_id, visitor_id) DO NOTHING"
    );
    let changed = conn.execute(
        &sql,
        params![
            test_id.get() as i64,
            variant_id.get() as i64,
            visitor_id.as_str(),
            ts_to_sql(created_at)
        ],
    )?;
    Ok((changed == 1).then(|| conn.last_insert_rowid() as u64))
}

fn count_events(conn: &Connection, table: &str, test_id: TestId, variant_id: VariantId) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE split_test_id = ?1 AND variant_id = ?2");
    let count: i64 = conn.query_row(
        &sql,
        params![test_id.get() as i64, variant_id.get() as i64],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

impl SplitTestStore for SqliteStore {
    async fn insert_test(&self, test: NewSplitTest) -> Result<SplitTest> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO split_tests(page_id, name, test_type, goal_page_id, is_active, start_date, end_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?6)",
            params![
                test.page_id.get() as i64,
                test.name,
                test.test_type.as_str(),
                test.goal_page_id.map(|p| p.get() as i64),
                test.is_active,
                ts_to_sql(test.created_at),
            ],
        )?;
        Ok(test.into_record(TestId(conn.last_insert_rowid() as u64)))
    }

    async fn get_test(&self, test_id: TestId) -> Result<Option<SplitTest>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {TEST_COLUMNS} FROM split_tests WHERE id = ?1"),
                params![test_id.get() as i64],
                test_from_row,
            )
            .optional()?)
    }

    async fn active_test_for_page(
        &self,
        page_id: PageId,
        test_type: Option<TestType>,
    ) -> Result<Option<SplitTest>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {TEST_COLUMNS} FROM split_tests
                     WHERE page_id = ?1 AND is_active = 1 AND (?2 IS NULL OR test_type = ?2)
                     ORDER BY id LIMIT 1"
                ),
                params![page_id.get() as i64, test_type.map(TestType::as_str)],
                test_from_row,
            )
            .optional()?)
    }

    async fn update_test(&self, test: &SplitTest) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE split_tests SET name = ?2, goal_page_id = ?3, is_active = ?4, start_date = ?5, end_date = ?6
             WHERE id = ?1",
            params![
                test.id().get() as i64,
                test.name(),
                test.goal_page_id().map(|p| p.get() as i64),
                test.is_active(),
                ts_to_sql(test.start_date()),
                test.end_date().map(ts_to_sql),
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("split test", test.id()));
        }
        Ok(())
    }

    async fn delete_test(&self, test_id: TestId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = test_id.get() as i64;
        tx.execute("DELETE FROM conversions WHERE split_test_id = ?1", params![id])?;
        tx.execute("DELETE FROM visitor_sessions WHERE split_test_id = ?1", params![id])?;
        tx.execute("DELETE FROM test_variants WHERE test_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM split_tests WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn insert_variant(&self, variant: NewVariant) -> Result<Variant> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM split_tests WHERE id = ?1",
                params![variant.test_id.get() as i64],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(Error::not_found("split test", variant.test_id));
        }
        conn.execute(
            "INSERT INTO test_variants(test_id, name, content_version_id, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                variant.test_id.get() as i64,
                variant.name,
                variant.content_version_id.get() as i64,
                variant.weight,
                ts_to_sql(variant.created_at),
            ],
        )?;
        Ok(variant.into_record(VariantId(conn.last_insert_rowid() as u64)))
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {VARIANT_COLUMNS} FROM test_variants WHERE id = ?1"),
                params![variant_id.get() as i64],
                variant_from_row,
            )
            .optional()?)
    }

    async fn variants_for_test(&self, test_id: TestId) -> Result<Vec<Variant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VARIANT_COLUMNS} FROM test_variants WHERE test_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![test_id.get() as i64], variant_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn find_session(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> Result<Option<VisitorSession>> {
        let conn = self.conn()?;
        find_event(&conn, "visitor_sessions", test_id, visitor_id, session_from_row)
    }

    async fn insert_session(&self, session: NewVisitorSession) -> Result<Inserted<VisitorSession>> {
        let conn = self.conn()?;
        let inserted = insert_event(
            &conn,
            "visitor_sessions",
            session.split_test_id,
            session.variant_id,
            &session.visitor_id,
            session.created_at,
        )?;
        if let Some(id) = inserted {
            return Ok(Inserted::Created(session.into_record(RecordId(id))));
        }
        find_event(
            &conn,
            "visitor_sessions",
            session.split_test_id,
            &session.visitor_id,
            session_from_row,
        )?
        .map(Inserted::Existing)
        .ok_or_else(|| Error::Storage("visitor session conflict without a stored row".to_string()))
    }

    async fn count_sessions(&self, test_id: TestId, variant_id: VariantId) -> Result<u64> {
        let conn = self.conn()?;
        count_events(&conn, "visitor_sessions", test_id, variant_id)
    }

    async fn find_conversion(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Conversion>> {
        let conn = self.conn()?;
        find_event(&conn, "conversions", test_id, visitor_id, conversion_from_row)
    }

    async fn insert_conversion(&self, conversion: NewConversion) -> Result<Inserted<Conversion>> {
        let conn = self.conn()?;
        let inserted = insert_event(
            &conn,
            "conversions",
            conversion.split_test_id,
            conversion.variant_id,
            &conversion.visitor_id,
            conversion.created_at,
        )?;
        if let Some(id) = inserted {
            return Ok(Inserted::Created(conversion.into_record(RecordId(id))));
        }
        find_event(
            &conn,
            "conversions",
            conversion.split_test_id,
            &conversion.visitor_id,
            conversion_from_row,
        )?
        .map(Inserted::Existing)
        .ok_or_else(|| Error::Storage("conversion conflict without a stored row".to_string()))
    }

    async fn count_conversions(&self, test_id: TestId, variant_id: VariantId) -> Result<u64> {
        let conn = self.conn()?;
        count_events(&conn, "conversions", test_id, variant_id)
    }

    async fn register_page(&self, website_id: WebsiteId, page_id: PageId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pages(page_id, website_id) VALUES (?1, ?2)
             ON CONFLICT(page_id) DO UPDATE SET website_id = excluded.website_id",
            params![page_id.get() as i64, website_id.get() as i64],
        )?;
        Ok(())
    }

    async fn pages_for_website(&self, website_id: WebsiteId) -> Result<Vec<PageId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT page_id FROM pages WHERE website_id = ?1 ORDER BY page_id")?;
        let rows = stmt.query_map(params![website_id.get() as i64], |row| {
            id_from_sql(row, 0).map(PageId)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn insert_page_view(&self, view: NewPageView) -> Result<PageView> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO page_views(page_id, visitor_id, user_agent, ip_address, referrer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                view.page_id.get() as i64,
                view.visitor_id.as_str(),
                view.user_agent,
                view.ip_address,
                view.referrer,
                ts_to_sql(view.created_at),
            ],
        )?;
        Ok(view.into_record(RecordId(conn.last_insert_rowid() as u64)))
    }

    async fn page_views_since(
        &self,
        page_ids: &[PageId],
        since: DateTime<Utc>,
    ) -> Result<Vec<PageView>> {
        if page_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..page_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let mut values = Vec::with_capacity(page_ids.len() + 1);
        values.push(Value::Text(ts_to_sql(since)));
        values.extend(page_ids.iter().map(|p| Value::Integer(p.get() as i64)));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIEW_COLUMNS} FROM page_views
             WHERE created_at >= ?1 AND page_id IN ({placeholders})
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), view_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
