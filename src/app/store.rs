use std::path::Path;

use rusqlite::Connection;

use crate::app::error::AppError;
use crate::app::snapshot::{Category, MemorySnapshot};

const SAMPLES_TABLE: &str = "mem_samples";

/// Append-only sample log. One physical database per installation; sessions
/// and campaigns share it and are told apart by the `session` and `campaign`
/// columns. Rows are never updated or deleted.
pub struct SampleStore {
    connection: Connection,
    trace_id: String,
}

/// One persisted sample as the reporting stage sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub ts: String,
    pub uid: String,
    pub oom_adj: String,
    pub activity: String,
    pub foreground: bool,
    pub process_label: String,
    pub uss: f64,
    pub rss: f64,
    pub pss: f64,
    pub swap: f64,
    pub graphics: f64,
    pub opss: f64,
    pub vm_size_mb: f64,
}

fn category_columns() -> String {
    Category::ALL
        .iter()
        .map(|category| category.column())
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_table_sql() -> String {
    let category_defs = Category::ALL
        .iter()
        .map(|category| format!("{} REAL NOT NULL DEFAULT 0", category.column()))
        .collect::<Vec<_>>()
        .join(",\n               ");
    format!(
        "CREATE TABLE IF NOT EXISTS {SAMPLES_TABLE} (
               id INTEGER PRIMARY KEY,
               session TEXT NOT NULL,
               campaign TEXT NOT NULL,
               ts TEXT NOT NULL,
               uid TEXT NOT NULL,
               oom_adj TEXT NOT NULL,
               activity TEXT NOT NULL,
               foreground INTEGER NOT NULL,
               process_label TEXT NOT NULL,
               {category_defs},
               uss REAL NOT NULL,
               rss REAL NOT NULL,
               pss REAL NOT NULL,
               swap REAL NOT NULL,
               graphics REAL NOT NULL,
               opss REAL NOT NULL,
               vm_size REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_{SAMPLES_TABLE}_session
               ON {SAMPLES_TABLE}(session, ts);"
    )
}

impl SampleStore {
    pub fn open(path: &Path, trace_id: &str) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                AppError::storage(format!("Failed to create store directory: {err}"), trace_id)
            })?;
        }
        let connection = Connection::open(path)
            .map_err(|err| AppError::storage(format!("Failed to open store: {err}"), trace_id))?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|err| AppError::from_sqlite(err, trace_id))?;
        Ok(Self {
            connection,
            trace_id: trace_id.to_string(),
        })
    }

    /// Idempotent; called at the start of every session.
    pub fn ensure_schema(&self) -> Result<(), AppError> {
        self.connection
            .execute_batch(&create_table_sql())
            .map_err(|err| AppError::from_sqlite(err, &self.trace_id))
    }

    pub fn insert(
        &self,
        session: &str,
        campaign: &str,
        snapshot: &MemorySnapshot,
    ) -> Result<(), AppError> {
        let mut values: Vec<rusqlite::types::Value> = vec![
            session.to_string().into(),
            campaign.to_string().into(),
            snapshot.remark.taken_at.clone().into(),
            snapshot.remark.uid.clone().into(),
            snapshot.remark.oom_adj.clone().into(),
            snapshot.remark.activity.clone().into(),
            (snapshot.remark.foreground as i64).into(),
            snapshot.remark.process_label.clone().into(),
        ];
        for category in Category::ALL {
            values.push(snapshot.categories.get(category).into());
        }
        values.push(snapshot.summary.uss.into());
        values.push(snapshot.summary.rss.into());
        values.push(snapshot.summary.pss.into());
        values.push(snapshot.summary.swap.into());
        values.push(snapshot.summary.graphics.into());
        // opss is stored explicitly so reporting never recomputes it.
        values.push(snapshot.summary.opss.into());
        values.push(snapshot.vm_size_mb.into());

        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {SAMPLES_TABLE} (session, campaign, ts, uid, oom_adj, activity, \
             foreground, process_label, {}, uss, rss, pss, swap, graphics, opss, vm_size) \
             VALUES ({placeholders})",
            category_columns()
        );

        self.connection
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|err| AppError::from_sqlite(err, &self.trace_id))?;
        Ok(())
    }

    /// All rows of one session, partitioned (foreground, background) by the
    /// classification recorded at insert time, timestamp ascending.
    pub fn query_by_session(
        &self,
        session: &str,
    ) -> Result<(Vec<SampleRow>, Vec<SampleRow>), AppError> {
        let sql = format!(
            "SELECT ts, uid, oom_adj, activity, foreground, process_label, \
             uss, rss, pss, swap, graphics, opss, vm_size \
             FROM {SAMPLES_TABLE} WHERE session = ?1 ORDER BY ts ASC, id ASC"
        );
        let mut stmt = self
            .connection
            .prepare(&sql)
            .map_err(|err| AppError::from_sqlite(err, &self.trace_id))?;
        let rows_iter = stmt
            .query_map([session], |row| {
                Ok(SampleRow {
                    ts: row.get(0)?,
                    uid: row.get(1)?,
                    oom_adj: row.get(2)?,
                    activity: row.get(3)?,
                    foreground: row.get::<_, i64>(4)? != 0,
                    process_label: row.get(5)?,
                    uss: row.get(6)?,
                    rss: row.get(7)?,
                    pss: row.get(8)?,
                    swap: row.get(9)?,
                    graphics: row.get(10)?,
                    opss: row.get(11)?,
                    vm_size_mb: row.get(12)?,
                })
            })
            .map_err(|err| AppError::from_sqlite(err, &self.trace_id))?;

        let mut foreground = Vec::new();
        let mut background = Vec::new();
        for row in rows_iter {
            let row = row.map_err(|err| AppError::from_sqlite(err, &self.trace_id))?;
            if row.foreground {
                foreground.push(row);
            } else {
                background.push(row);
            }
        }
        Ok((foreground, background))
    }

    pub fn session_row_count(&self, session: &str) -> Result<u64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM {SAMPLES_TABLE} WHERE session = ?1");
        self.connection
            .query_row(&sql, [session], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
            .map_err(|err| AppError::from_sqlite(err, &self.trace_id))
    }
}
