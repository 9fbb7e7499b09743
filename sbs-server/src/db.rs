//! SQLite message log in WAL mode, indexed by aircraft and time.
//!
//! Every parsed message the pipeline accepts while persistence is on lands
//! here as one row. Writes go through a bounded channel to a blocking writer
//! task so the feed never waits on the disk.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sbs_core::pipeline::MessageLog;
use sbs_core::types::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    icao TEXT NOT NULL,
    kind TEXT NOT NULL,
    transmission_type INTEGER,
    call_sign TEXT,
    altitude REAL,
    ground_speed REAL,
    track REAL,
    lat REAL,
    lon REAL,
    vertical_rate INTEGER,
    squawk INTEGER,
    on_ground INTEGER,
    generated_at REAL,
    received_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_icao ON messages(icao);
CREATE INDEX IF NOT EXISTS idx_messages_received ON messages(received_at);
"#;

/// Rows drained from the channel per transaction.
const WRITE_BATCH: usize = 256;

fn epoch(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
}

/// SQLite database holding the message log.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    pub fn insert_message(&self, msg: &Message) -> SqlResult<()> {
        insert(&self.conn, msg)
    }

    /// Insert a batch in one transaction.
    pub fn insert_batch(&mut self, msgs: &[Message]) -> SqlResult<usize> {
        let tx = self.conn.transaction()?;
        for msg in msgs {
            insert(&tx, msg)?;
        }
        tx.commit()?;
        Ok(msgs.len())
    }

    pub fn count_messages(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap_or(0)
    }

    /// Distinct aircraft seen in the log.
    pub fn count_aircraft(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(DISTINCT icao) FROM messages", [], |r| r.get(0))
            .unwrap_or(0)
    }

    /// Message totals per kind, most frequent first.
    pub fn counts_by_kind(&self) -> SqlResult<Vec<KindCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, COUNT(*) AS n FROM messages GROUP BY kind ORDER BY n DESC, kind",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(KindCount {
                kind: r.get(0)?,
                count: r.get(1)?,
            })
        })?;
        rows.collect()
    }

    /// Most recent messages for one aircraft, newest first.
    pub fn messages_for(&self, icao_hex: &str, limit: i64) -> SqlResult<Vec<MessageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT icao, kind, transmission_type, call_sign, altitude, ground_speed, track,
                    lat, lon, vertical_rate, squawk, on_ground, generated_at, received_at
             FROM messages WHERE icao = ?1 ORDER BY received_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![icao_hex, limit], |r| {
            Ok(MessageRow {
                icao: r.get(0)?,
                kind: r.get(1)?,
                transmission_type: r.get(2)?,
                call_sign: r.get(3)?,
                altitude: r.get(4)?,
                ground_speed: r.get(5)?,
                track: r.get(6)?,
                lat: r.get(7)?,
                lon: r.get(8)?,
                vertical_rate: r.get(9)?,
                squawk: r.get(10)?,
                on_ground: r.get::<_, Option<i32>>(11)?.map(|v| v != 0),
                generated_at: r.get::<_, Option<f64>>(12)?.and_then(from_epoch),
                received_at: from_epoch(r.get(13)?).unwrap_or_default(),
            })
        })?;
        rows.collect()
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            messages: self.count_messages(),
            aircraft: self.count_aircraft(),
            by_kind: self.counts_by_kind().unwrap_or_default(),
        }
    }
}

fn insert(conn: &Connection, msg: &Message) -> SqlResult<()> {
    let icao = icao_to_string(msg.icao());
    let kind = msg.kind().code();
    let generated = msg.generated_at().map(epoch);
    let received = epoch(msg.received_at());

    match msg {
        Message::Transmission(m) => {
            conn.execute(
                "INSERT INTO messages (icao, kind, transmission_type, call_sign, altitude,
                     ground_speed, track, lat, lon, vertical_rate, squawk, on_ground,
                     generated_at, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    icao,
                    kind,
                    m.transmission_type.code(),
                    m.call_sign,
                    m.altitude,
                    m.ground_speed,
                    m.track,
                    m.position.map(|p| p.latitude()),
                    m.position.map(|p| p.longitude()),
                    m.vertical_rate,
                    m.squawk,
                    m.on_ground,
                    generated,
                    received,
                ],
            )?;
        }
        _ => {
            conn.execute(
                "INSERT INTO messages (icao, kind, call_sign, generated_at, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![icao, kind, msg.call_sign(), generated, received],
            )?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct MessageRow {
    pub icao: String,
    pub kind: String,
    pub transmission_type: Option<u8>,
    pub call_sign: Option<String>,
    pub altitude: Option<f32>,
    pub ground_speed: Option<f32>,
    pub track: Option<f32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<u16>,
    pub on_ground: Option<bool>,
    pub generated_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct KindCount {
    pub kind: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DbStats {
    pub messages: i64,
    pub aircraft: i64,
    pub by_kind: Vec<KindCount>,
}

// ---------------------------------------------------------------------------
// Channel-backed log
// ---------------------------------------------------------------------------

/// `MessageLog` that hands messages to a background SQLite writer.
///
/// `record` never blocks: a full or closed channel is reported as
/// `SbsError::Log` and the message is dropped.
pub struct ChannelLog {
    tx: mpsc::Sender<Message>,
}

impl MessageLog for ChannelLog {
    fn record(&self, msg: &Message) -> Result<()> {
        self.tx
            .try_send(msg.clone())
            .map_err(|e| SbsError::Log(e.to_string()))
    }
}

/// Open the database and start the writer task.
///
/// The task ends once every `ChannelLog` clone is dropped and the channel
/// has drained.
pub fn spawn_writer(db_path: &str, capacity: usize) -> SqlResult<(ChannelLog, JoinHandle<()>)> {
    let mut db = Database::open(db_path)?;
    let (tx, mut rx) = mpsc::channel::<Message>(capacity);
    info!("message log: {db_path}");

    let handle = tokio::task::spawn_blocking(move || {
        let mut batch = Vec::with_capacity(WRITE_BATCH);
        while let Some(first) = rx.blocking_recv() {
            batch.push(first);
            while batch.len() < WRITE_BATCH {
                match rx.try_recv() {
                    Ok(msg) => batch.push(msg),
                    Err(_) => break,
                }
            }
            if let Err(e) = db.insert_batch(&batch) {
                warn!("dropped {} logged messages: {e}", batch.len());
            }
            batch.clear();
        }
        info!("message log writer stopped");
    });

    Ok((ChannelLog { tx }, handle))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
