use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior};

use laps::IndexedSeries;

use crate::types::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_info (
    session_id TEXT PRIMARY KEY,
    track_name TEXT,
    track_config TEXT,
    session_type TEXT,
    session_date TEXT,
    session_time TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_session_info_when ON session_info(session_date DESC, session_time DESC);

CREATE TABLE IF NOT EXISTS weather (
    session_id TEXT PRIMARY KEY REFERENCES session_info(session_id) ON DELETE CASCADE,
    track_air_temp TEXT,
    track_surface_temp TEXT,
    skies TEXT,
    wind_speed TEXT,
    relative_humidity TEXT
);

CREATE TABLE IF NOT EXISTS driver (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES session_info(session_id) ON DELETE CASCADE,
    driver_name TEXT,
    car_name TEXT,
    car_number TEXT,
    team_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_driver_session ON driver(session_id);

CREATE TABLE IF NOT EXISTS attribute_values (
    session_id TEXT NOT NULL REFERENCES session_info(session_id) ON DELETE CASCADE,
    attribute TEXT NOT NULL,
    value TEXT NOT NULL,
    value_len INTEGER NOT NULL,
    PRIMARY KEY (session_id, attribute)
);
"#;

const SESSION_COLUMNS: &str =
    "session_id, track_name, track_config, session_type, session_date, session_time, created_at";

/// Telemetry storage with connection-per-call pattern.
/// Each method opens a fresh connection with WAL mode and foreign keys enabled.
pub struct TelemetryDb {
    path: PathBuf,
}

impl TelemetryDb {
    /// Open database at path, creating if necessary
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let db = Self { path };
        db.initialize()?;
        Ok(db)
    }

    /// Create a uniquely named database in the temp directory.
    /// Each call creates a new database - suitable for tests.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_name = format!("telemdb_{}_{}.db", std::process::id(), unique_id);
        Self::open(std::env::temp_dir().join(db_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection with WAL mode, busy timeout and foreign keys
    pub fn conn(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database: {:?}", self.path))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Ok(conn)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Create a session with its weather, drivers and series in one transaction
    pub fn insert_session(
        &self,
        session: &NewSession,
        series: &[(String, IndexedSeries)],
    ) -> Result<SessionInfo> {
        let id = session.session_id.clone().unwrap_or_default();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO session_info (session_id, track_name, track_config, session_type, session_date, session_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &id.0,
                &session.track_name,
                &session.track_config,
                &session.session_type,
                &session.session_date,
                &session.session_time,
            ),
        )
        .with_context(|| format!("Failed to insert session {}", id))?;

        if let Some(weather) = &session.weather {
            tx.execute(
                "INSERT INTO weather (session_id, track_air_temp, track_surface_temp, skies, wind_speed, relative_humidity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    &id.0,
                    &weather.track_air_temp,
                    &weather.track_surface_temp,
                    &weather.skies,
                    &weather.wind_speed,
                    &weather.relative_humidity,
                ),
            )?;
        }

        for driver in &session.drivers {
            tx.execute(
                "INSERT INTO driver (session_id, driver_name, car_name, car_number, team_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    &id.0,
                    &driver.driver_name,
                    &driver.car_name,
                    &driver.car_number,
                    &driver.team_name,
                ),
            )?;
        }

        for (attribute, values) in series {
            upsert_series(&tx, &id.0, attribute, values)?;
        }

        tx.commit()?;

        self.get_session(&id.0)?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created session"))
    }

    /// Get a session row by ID
    pub fn get_session(&self, id: &str) -> Result<Option<SessionInfo>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM session_info WHERE session_id = ?1");
        conn.query_row(&sql, [id], session_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// All sessions, most recent date and time first
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM session_info
             ORDER BY session_date DESC, session_time DESC, created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], session_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Session with weather and drivers
    pub fn get_session_detail(&self, id: &str) -> Result<Option<SessionDetail>> {
        let Some(session_info) = self.get_session(id)? else {
            return Ok(None);
        };
        let conn = self.conn()?;

        let weather = conn
            .query_row(
                "SELECT track_air_temp, track_surface_temp, skies, wind_speed, relative_humidity
                 FROM weather WHERE session_id = ?1",
                [id],
                |row| {
                    Ok(Weather {
                        track_air_temp: row.get(0)?,
                        track_surface_temp: row.get(1)?,
                        skies: row.get(2)?,
                        wind_speed: row.get(3)?,
                        relative_humidity: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let mut stmt = conn.prepare(
            "SELECT driver_name, car_name, car_number, team_name
             FROM driver WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let drivers = stmt
            .query_map([id], |row| {
                Ok(Driver {
                    driver_name: row.get(0)?,
                    car_name: row.get(1)?,
                    car_number: row.get(2)?,
                    team_name: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionDetail {
            session_info,
            weather,
            drivers,
        }))
    }

    /// Delete a session and everything recorded for it.
    ///
    /// Returns `None` when the session does not exist.
    pub fn delete_session(&self, id: &str) -> Result<Option<DeletedRecords>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM session_info WHERE session_id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        // Dependents go first so the counts reflect rows actually removed
        let deleted = DeletedRecords {
            weather: tx.execute("DELETE FROM weather WHERE session_id = ?1", [id])?,
            drivers: tx.execute("DELETE FROM driver WHERE session_id = ?1", [id])?,
            attribute_values: tx
                .execute("DELETE FROM attribute_values WHERE session_id = ?1", [id])?,
            session_info: tx.execute("DELETE FROM session_info WHERE session_id = ?1", [id])?,
        };

        tx.commit()?;
        Ok(Some(deleted))
    }

    /// Stored series for one attribute, undecoded
    pub fn get_series_raw(&self, session_id: &str, attribute: &str) -> Result<Option<StoredSeries>> {
        let conn = self.conn()?;
        select_series(&conn, session_id, attribute)
    }

    /// Stored series for one attribute, decoded
    pub fn get_series(&self, session_id: &str, attribute: &str) -> Result<Option<IndexedSeries>> {
        let Some(stored) = self.get_series_raw(session_id, attribute)? else {
            return Ok(None);
        };
        let series = stored
            .decode()
            .with_context(|| format!("Failed to decode series {attribute} for session {session_id}"))?;
        Ok(Some(series))
    }

    /// Insert or replace one attribute series
    pub fn put_series(&self, session_id: &str, attribute: &str, series: &IndexedSeries) -> Result<()> {
        let conn = self.conn()?;
        upsert_series(&conn, session_id, attribute, series)
    }

    /// Insert or replace several series; either all are written or none
    pub fn put_series_batch(&self, session_id: &str, series: &[(String, IndexedSeries)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (attribute, values) in series {
            upsert_series(&tx, session_id, attribute, values)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Attribute names with a stored series, alphabetically
    pub fn list_attributes(&self, session_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        select_attributes(&conn, session_id)
    }

    /// Read-modify-write of a session's series under one write lock.
    ///
    /// The transaction begins `IMMEDIATE`, so concurrent updates of the same
    /// database run one after another and each sees the previous one's
    /// writes. Returning `Err` from `update` rolls back everything it wrote.
    pub fn update_series<T, E, F>(&self, session_id: &str, update: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&SeriesUpdate<'_>) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin series update")?;

        let value = update(&SeriesUpdate {
            conn: &tx,
            session_id,
        })?;

        tx.commit().context("Failed to commit series update")?;
        Ok(value)
    }
}

/// Series access inside [`TelemetryDb::update_series`].
pub struct SeriesUpdate<'a> {
    conn: &'a Connection,
    session_id: &'a str,
}

impl SeriesUpdate<'_> {
    pub fn session_id(&self) -> &str {
        self.session_id
    }

    pub fn get_series_raw(&self, attribute: &str) -> Result<Option<StoredSeries>> {
        select_series(self.conn, self.session_id, attribute)
    }

    pub fn list_attributes(&self) -> Result<Vec<String>> {
        select_attributes(self.conn, self.session_id)
    }

    pub fn put_series(&self, attribute: &str, series: &IndexedSeries) -> Result<()> {
        upsert_series(self.conn, self.session_id, attribute, series)
    }
}

fn select_series(conn: &Connection, session_id: &str, attribute: &str) -> Result<Option<StoredSeries>> {
    conn.query_row(
        "SELECT session_id, attribute, value, value_len
         FROM attribute_values WHERE session_id = ?1 AND attribute = ?2",
        (session_id, attribute),
        |row| {
            Ok(StoredSeries {
                session_id: SessionId(row.get(0)?),
                attribute: row.get(1)?,
                value: row.get(2)?,
                value_len: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

fn select_attributes(conn: &Connection, session_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT attribute FROM attribute_values WHERE session_id = ?1 ORDER BY attribute ASC",
    )?;
    let rows = stmt.query_map([session_id], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn upsert_series(
    conn: &Connection,
    session_id: &str,
    attribute: &str,
    series: &IndexedSeries,
) -> Result<()> {
    let value = series.encode();
    let value_len = value.len() as i64;
    conn.execute(
        "INSERT INTO attribute_values (session_id, attribute, value, value_len) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, attribute) DO UPDATE SET value = excluded.value, value_len = excluded.value_len",
        (session_id, attribute, &value, value_len),
    )
    .with_context(|| format!("Failed to store series {attribute} for session {session_id}"))?;
    Ok(())
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionInfo> {
    Ok(SessionInfo {
        session_id: SessionId(row.get(0)?),
        track_name: row.get(1)?,
        track_config: row.get(2)?,
        session_type: row.get(3)?,
        session_date: row.get(4)?,
        session_time: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use laps::Sample;
    use pretty_assertions::assert_eq;

    fn sample_session(id: &str, date: &str) -> NewSession {
        NewSession {
            session_id: Some(SessionId::from(id)),
            track_name: Some("Road Atlanta".to_string()),
            session_type: Some("Practice".to_string()),
            session_date: Some(date.to_string()),
            session_time: Some("14:00:00".to_string()),
            weather: Some(Weather {
                track_air_temp: Some("75F".to_string()),
                track_surface_temp: Some("85F".to_string()),
                ..Default::default()
            }),
            drivers: vec![
                Driver {
                    driver_name: Some("Driver 1".to_string()),
                    car_name: Some("Porsche".to_string()),
                    ..Default::default()
                },
                Driver {
                    driver_name: Some("Driver 2".to_string()),
                    car_name: Some("Mercedes".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn lap_series() -> Vec<(String, IndexedSeries)> {
        vec![
            ("Lap".to_string(), IndexedSeries::from_values([1i64, 1, 2, 2])),
            ("Speed".to_string(), IndexedSeries::from_values([40.5, 41.0, 42.5, 43.0])),
        ]
    }

    #[test]
    fn test_open_in_memory() {
        let db = TelemetryDb::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='attribute_values'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_session_id_generation() {
        assert_ne!(SessionId::new(), SessionId::new());

        let db = TelemetryDb::in_memory().unwrap();
        let created = db.insert_session(&NewSession::default(), &[]).unwrap();
        assert_eq!(created.session_id.as_str().len(), 36);
    }

    #[test]
    fn test_session_lifecycle() {
        let db = TelemetryDb::in_memory().unwrap();
        let created = db
            .insert_session(&sample_session("abc-123", "2024-05-01"), &lap_series())
            .unwrap();
        assert_eq!(created.session_id.as_str(), "abc-123");
        assert_eq!(created.track_name.as_deref(), Some("Road Atlanta"));

        let detail = db.get_session_detail("abc-123").unwrap().unwrap();
        assert_eq!(detail.drivers.len(), 2);
        assert_eq!(detail.drivers[0].car_name.as_deref(), Some("Porsche"));
        assert_eq!(
            detail.weather.unwrap().track_air_temp.as_deref(),
            Some("75F")
        );

        assert_eq!(db.list_attributes("abc-123").unwrap(), vec!["Lap", "Speed"]);
        assert!(db.get_session_detail("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("older", "2024-01-01"), &[]).unwrap();
        db.insert_session(&sample_session("newer", "2024-06-01"), &[]).unwrap();

        let ids: Vec<String> = db
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id.0)
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn test_series_roundtrip_keeps_value_len() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &lap_series()).unwrap();

        let stored = db.get_series_raw("s1", "Speed").unwrap().unwrap();
        assert_eq!(stored.value, "[40.5,41.0,42.5,43.0]");
        assert_eq!(stored.value_len, stored.value.len() as i64);
        assert_eq!(stored.decode().unwrap().get(2), Some(&Sample::Float(42.5)));

        let shorter = IndexedSeries::from_values([1.0]);
        db.put_series("s1", "Speed", &shorter).unwrap();
        let stored = db.get_series_raw("s1", "Speed").unwrap().unwrap();
        assert_eq!(stored.value, "[1.0]");
        assert_eq!(stored.value_len, 5);

        assert!(db.get_series_raw("s1", "RPM").unwrap().is_none());
        assert!(db.get_series("s1", "RPM").unwrap().is_none());
        assert_eq!(
            db.get_series("s1", "Lap").unwrap(),
            Some(IndexedSeries::from_values([1i64, 1, 2, 2]))
        );
    }

    #[test]
    fn test_get_series_reports_undecodable_value() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &[]).unwrap();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO attribute_values (session_id, attribute, value, value_len)
                 VALUES ('s1', 'Lap', 'not json', 8)",
                [],
            )
            .unwrap();

        assert!(db.get_series("s1", "Lap").is_err());
        assert_eq!(db.get_series_raw("s1", "Lap").unwrap().unwrap().value, "not json");
    }

    #[test]
    fn test_put_series_batch_is_atomic() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &lap_series()).unwrap();

        // Unknown session violates the foreign key and rolls everything back
        let result = db.put_series_batch(
            "ghost",
            &[("Speed".to_string(), IndexedSeries::from_values([1i64]))],
        );
        assert!(result.is_err());
        assert!(db.list_attributes("ghost").unwrap().is_empty());

        db.put_series_batch(
            "s1",
            &[
                ("Speed".to_string(), IndexedSeries::from_values([9i64])),
                ("Gear".to_string(), IndexedSeries::from_values([3i64])),
            ],
        )
        .unwrap();
        assert_eq!(
            db.list_attributes("s1").unwrap(),
            vec!["Gear", "Lap", "Speed"]
        );
    }

    #[test]
    fn test_update_series_rolls_back_on_error() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &lap_series()).unwrap();

        let result: Result<()> = db.update_series("s1", |update| {
            update.put_series("Lap", &IndexedSeries::from_values([7i64]))?;
            update.put_series("Gear", &IndexedSeries::from_values([3i64]))?;
            anyhow::bail!("abandon update")
        });
        assert!(result.is_err());
        assert_eq!(
            db.get_series("s1", "Lap").unwrap(),
            Some(IndexedSeries::from_values([1i64, 1, 2, 2]))
        );
        assert!(db.get_series_raw("s1", "Gear").unwrap().is_none());

        let attributes: Result<Vec<String>> = db.update_series("s1", |update| {
            update.put_series("Gear", &IndexedSeries::from_values([3i64]))?;
            update.list_attributes()
        });
        assert_eq!(attributes.unwrap(), vec!["Gear", "Lap", "Speed"]);
    }

    #[test]
    fn test_concurrent_updates_see_each_other() {
        use std::sync::{Arc, Barrier};

        let db = Arc::new(TelemetryDb::in_memory().unwrap());
        db.insert_session(&sample_session("s1", "2024-05-01"), &[]).unwrap();
        db.put_series("s1", "Count", &IndexedSeries::from_values([0i64])).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..10 {
                        let result: Result<()> = db.update_series("s1", |update| {
                            let stored = update.get_series_raw("Count")?.unwrap();
                            let count = stored.decode()?.get(0).and_then(|s| s.as_integer()).unwrap();
                            std::thread::sleep(std::time::Duration::from_millis(2));
                            update.put_series("Count", &IndexedSeries::from_values([count + 1]))
                        });
                        result.unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(
            db.get_series("s1", "Count").unwrap(),
            Some(IndexedSeries::from_values([20i64]))
        );
    }

    #[test]
    fn test_delete_session_cascades() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &lap_series()).unwrap();

        let deleted = db.delete_session("s1").unwrap().unwrap();
        assert_eq!(
            deleted,
            DeletedRecords {
                session_info: 1,
                weather: 1,
                drivers: 2,
                attribute_values: 2,
            }
        );
        assert!(db.get_session("s1").unwrap().is_none());
        assert!(db.get_series_raw("s1", "Lap").unwrap().is_none());
        assert!(db.delete_session("s1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_session_id_fails_without_partial_rows() {
        let db = TelemetryDb::in_memory().unwrap();
        db.insert_session(&sample_session("s1", "2024-05-01"), &[]).unwrap();

        let again = db.insert_session(&sample_session("s1", "2024-05-02"), &lap_series());
        assert!(again.is_err());
        assert!(db.list_attributes("s1").unwrap().is_empty());
        assert_eq!(db.get_session_detail("s1").unwrap().unwrap().drivers.len(), 2);
    }
}
