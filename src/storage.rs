use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::now_s;
use crate::payload::TelemetrySnapshot;

/// The three append-only logs of the detection event store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLog {
    Gps,
    Accelerometer,
    Gyroscope,
}

impl EventLog {
    pub const ALL: [EventLog; 3] = [EventLog::Gps, EventLog::Accelerometer, EventLog::Gyroscope];

    pub fn as_str(self) -> &'static str {
        match self {
            EventLog::Gps => "gps",
            EventLog::Accelerometer => "accelerometer",
            EventLog::Gyroscope => "gyroscope",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "gps" => Ok(EventLog::Gps),
            "accelerometer" => Ok(EventLog::Accelerometer),
            "gyroscope" => Ok(EventLog::Gyroscope),
            other => Err(anyhow!("corrupt event log: unknown log '{}'", other)),
        }
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only store of raw posted payloads.
///
/// Entries are kept exactly as received; decoding is the reader's job so a
/// stricter or looser reader never needs a migration.
pub trait EventLogStore {
    /// `header_id` is the `Detection-ID` the upload arrived with.
    fn append(&mut self, log: EventLog, header_id: &str, payload: &Value) -> Result<()>;

    /// All three logs, each in append order.
    fn snapshot(&mut self) -> Result<TelemetrySnapshot>;

    fn count(&mut self, log: EventLog) -> Result<usize>;
}

pub struct SqliteEventLogStore {
    conn: Connection,
}

impl SqliteEventLogStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS event_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              log TEXT NOT NULL,
              header_detection_id TEXT NOT NULL,
              received_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_event_log_log ON event_log(log);
            "#,
        )?;
        Ok(())
    }
}

impl EventLogStore for SqliteEventLogStore {
    fn append(&mut self, log: EventLog, header_id: &str, payload: &Value) -> Result<()> {
        let received_at = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("receive time exceeds i64 range"))?;
        let payload_json = serde_json::to_string(payload)?;
        self.conn.execute(
            r#"
            INSERT INTO event_log(log, header_detection_id, received_at, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![log.as_str(), header_id, received_at, payload_json],
        )?;
        Ok(())
    }

    fn snapshot(&mut self) -> Result<TelemetrySnapshot> {
        let rows = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, log, payload_json FROM event_log ORDER BY id ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let log_name: String = row.get(1)?;
                let payload: String = row.get(2)?;
                out.push((id, log_name, payload));
            }
            out
        };

        let mut snapshot = TelemetrySnapshot::default();
        for (id, log_name, payload) in rows {
            let event_log = EventLog::parse(&log_name)?;
            push_entry(&mut snapshot, event_log, id, &payload);
        }
        Ok(snapshot)
    }

    fn count(&mut self, log: EventLog) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE log = ?1",
            params![log.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

/// A row that no longer parses is reported and left out; the rest of the
/// snapshot is still served.
fn push_entry(snapshot: &mut TelemetrySnapshot, event_log: EventLog, id: i64, payload: &str) {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            log::error!("JSON decoding error in {} log entry {}: {}", event_log, id, e);
            return;
        }
    };
    match event_log {
        EventLog::Gps => snapshot.gps_log.push(value),
        EventLog::Accelerometer => snapshot.accelerometer_log.push(value),
        EventLog::Gyroscope => snapshot.gyroscope_log.push(value),
    }
}

#[derive(Clone, Debug)]
struct InMemoryEventEntry {
    log: EventLog,
    payload_json: String,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryEventLogStore {
    entries: Vec<InMemoryEventEntry>,
}

impl EventLogStore for InMemoryEventLogStore {
    fn append(&mut self, log: EventLog, _header_id: &str, payload: &Value) -> Result<()> {
        let payload_json = serde_json::to_string(payload)?;
        self.entries.push(InMemoryEventEntry { log, payload_json });
        Ok(())
    }

    fn snapshot(&mut self) -> Result<TelemetrySnapshot> {
        let mut snapshot = TelemetrySnapshot::default();
        for (idx, entry) in self.entries.iter().enumerate() {
            push_entry(&mut snapshot, entry.log, idx as i64, &entry.payload_json);
        }
        Ok(snapshot)
    }

    fn count(&mut self, log: EventLog) -> Result<usize> {
        Ok(self.entries.iter().filter(|e| e.log == log).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fill(store: &mut dyn EventLogStore) -> Result<()> {
        store.append(
            EventLog::Gps,
            "1",
            &json!({"detection_id": "1", "latitude": 1.0, "longitude": 2.0}),
        )?;
        store.append(
            EventLog::Accelerometer,
            "1",
            &json!({"type": "accelerometer", "detection_id": "1", "x": 1.0, "y": 2.0, "z": 3.0}),
        )?;
        store.append(
            EventLog::Gyroscope,
            "1",
            &json!({"type": "gyroscope", "detection_id": "1", "x": 0.1, "y": 0.2, "z": 0.3}),
        )?;
        store.append(
            EventLog::Accelerometer,
            "2",
            &json!({"type": "accelerometer", "detection_id": "2", "x": 4.0, "y": 5.0, "z": 6.0}),
        )?;
        Ok(())
    }

    fn check(store: &mut dyn EventLogStore) -> Result<()> {
        let snapshot = store.snapshot()?;
        assert_eq!(snapshot.gps_log.len(), 1);
        assert_eq!(snapshot.accelerometer_log.len(), 2);
        assert_eq!(snapshot.gyroscope_log.len(), 1);
        assert_eq!(snapshot.accelerometer_log[1]["detection_id"], "2");
        assert_eq!(store.count(EventLog::Accelerometer)?, 2);
        assert_eq!(store.count(EventLog::Gps)?, 1);
        Ok(())
    }

    #[test]
    fn sqlite_store_keeps_logs_apart_in_append_order() -> Result<()> {
        let mut store = SqliteEventLogStore::open(":memory:")?;
        fill(&mut store)?;
        check(&mut store)
    }

    #[test]
    fn in_memory_store_keeps_logs_apart_in_append_order() -> Result<()> {
        let mut store = InMemoryEventLogStore::default();
        fill(&mut store)?;
        check(&mut store)
    }

    #[test]
    fn sqlite_store_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pothole.db");
        let path = path.to_string_lossy().to_string();
        {
            let mut store = SqliteEventLogStore::open(&path)?;
            fill(&mut store)?;
        }
        let mut store = SqliteEventLogStore::open(&path)?;
        check(&mut store)
    }

    #[test]
    fn corrupt_rows_are_skipped() -> Result<()> {
        let mut store = SqliteEventLogStore::open(":memory:")?;
        fill(&mut store)?;
        store.conn.execute(
            "INSERT INTO event_log(log, header_detection_id, received_at, payload_json) VALUES ('gps', '3', 0, '{not json')",
            [],
        )?;
        let snapshot = store.snapshot()?;
        assert_eq!(snapshot.gps_log.len(), 1);
        Ok(())
    }
}
