//! Ingest pipeline: filter, transform, track, and optionally log each record.
//!
//! The pipeline owns the counters and the aircraft table for its lifetime.
//! The message log is an external collaborator behind `MessageLog`; its
//! failures are reported and swallowed so ingestion keeps going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::tracker::Tracker;
use crate::transform::{should_forward, Counts, Payload, Transformer};
use crate::types::*;

/// Durable store for every successfully parsed message.
pub trait MessageLog: Send + Sync {
    fn record(&self, msg: &Message) -> Result<()>;
}

/// What happened to one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Absent or blank, dropped before classification and not counted.
    Filtered,
    /// Counted as invalid.
    Invalid,
    /// Parsed, applied to the tracker, and offered to the log.
    Accepted,
}

/// `Outcome` plus the parsed message or the reason it was rejected.
#[derive(Debug)]
pub enum Ingested {
    Filtered,
    Invalid(SbsError),
    Accepted(Message),
}

impl Ingested {
    pub fn outcome(&self) -> Outcome {
        match self {
            Ingested::Filtered => Outcome::Filtered,
            Ingested::Invalid(_) => Outcome::Invalid,
            Ingested::Accepted(_) => Outcome::Accepted,
        }
    }
}

pub struct Pipeline {
    transformer: Transformer,
    tracker: Arc<Tracker>,
    log: Option<Arc<dyn MessageLog>>,
    persist: AtomicBool,
}

impl Pipeline {
    pub fn new(
        transformer: Transformer,
        tracker: Arc<Tracker>,
        log: Option<Arc<dyn MessageLog>>,
        persist: bool,
    ) -> Self {
        info!("message persistence: {persist}");
        Pipeline {
            transformer,
            tracker,
            log,
            persist: AtomicBool::new(persist),
        }
    }

    /// Pipeline without a message log.
    pub fn in_memory(transformer: Transformer) -> Self {
        Pipeline::new(transformer, Arc::new(Tracker::new()), None, false)
    }

    /// Run one payload through the whole chain.
    pub fn ingest(&self, payload: Option<Payload<'_>>) -> Outcome {
        self.ingest_detailed(payload).outcome()
    }

    /// Same as `ingest`, handing back the message or the parse error.
    pub fn ingest_detailed(&self, payload: Option<Payload<'_>>) -> Ingested {
        if !should_forward(payload.as_ref()) {
            return Ingested::Filtered;
        }

        let msg = match self.transformer.transform(payload) {
            Ok(msg) => msg,
            Err(e) => return Ingested::Invalid(e),
        };
        debug!("{msg:?}");

        if let Message::Transmission(m) = &msg {
            if m.transmission_type == TransmissionType::AirbornePosition && m.position.is_none() {
                warn!(
                    icao = %icao_to_string(&m.icao),
                    "airborne position message without a position"
                );
            }
        }

        self.tracker.apply(&msg);

        if self.persist_enabled() {
            if let Some(log) = &self.log {
                if let Err(e) = log.record(&msg) {
                    warn!("failed to log message for {}: {e}", icao_to_string(msg.icao()));
                }
            }
        }

        Ingested::Accepted(msg)
    }

    /// Count a record the transport could not hand over intact.
    pub fn reject(&self, err: SbsError) -> Outcome {
        self.transformer.reject(&err);
        Outcome::Invalid
    }

    pub fn persist_enabled(&self) -> bool {
        self.persist.load(Ordering::Relaxed)
    }

    /// Turn message logging on or off without interrupting ingestion.
    pub fn set_persist(&self, persist: bool) {
        info!("persist messages: {persist}");
        self.persist.store(persist, Ordering::Relaxed);
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn counts(&self) -> Counts {
        self.transformer.counts()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use crate::tracker::DEFAULT_STALENESS;

    const T: &str = "2024/05/01";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn clock(secs: u32) -> String {
        format!("12:{:02}:{:02}.000", secs / 60, secs % 60)
    }

    fn position_line(icao: &str, lat: f64, lon: f64, secs: u32) -> String {
        let c = clock(secs);
        format!("MSG,3,111,11111,{icao},111111,{T},{c},{T},{c},,37000,,,{lat},{lon},,,0,0,0,0")
    }

    fn id_line(icao: &str, cs: &str, secs: u32) -> String {
        let c = clock(secs);
        format!("ID,,111,11111,{icao},111111,{T},{c},{T},{c},{cs}")
    }

    fn feed(p: &Pipeline, line: &str) -> Outcome {
        p.ingest(Some(Payload::Bytes(line.as_bytes())))
    }

    #[derive(Default)]
    struct RecordingLog {
        messages: Mutex<Vec<Message>>,
        fail: bool,
    }

    impl MessageLog for RecordingLog {
        fn record(&self, msg: &Message) -> Result<()> {
            if self.fail {
                return Err(SbsError::Log("disk full".into()));
            }
            self.messages.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    fn logged_pipeline(persist: bool) -> (Pipeline, Arc<RecordingLog>) {
        let log = Arc::new(RecordingLog::default());
        let p = Pipeline::new(
            Transformer::default(),
            Arc::new(Tracker::new()),
            Some(log.clone() as Arc<dyn MessageLog>),
            persist,
        );
        (p, log)
    }

    #[test]
    fn test_scenario_position_is_live() {
        let p = Pipeline::in_memory(Transformer::default());
        assert_eq!(feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0)), Outcome::Accepted);

        let snap = p.tracker().snapshot(at(1), Duration::from_secs(120));
        assert_eq!(snap.len(), 1);
        assert_eq!(icao_to_string(&snap[0].icao), "4CA2B1");
        assert_eq!(snap[0].position.latitude(), 51.5);
        assert_eq!(snap[0].position.longitude(), -0.12);
    }

    #[test]
    fn test_scenario_identity_without_position() {
        let p = Pipeline::in_memory(Transformer::default());
        assert_eq!(feed(&p, &id_line("4CA2B1", "BAW123", 0)), Outcome::Accepted);
        assert!(p.tracker().snapshot(at(1), DEFAULT_STALENESS).is_empty());
        assert_eq!(p.counts().valid, 1);
    }

    #[test]
    fn test_scenario_position_then_identity() {
        let p = Pipeline::in_memory(Transformer::default());
        feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0));
        feed(&p, &id_line("4CA2B1", "BAW123", 1));

        let snap = p.tracker().snapshot(at(2), DEFAULT_STALENESS);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].position.latitude(), 51.5);
        assert_eq!(snap[0].call_sign.as_deref(), Some("BAW123"));
    }

    #[test]
    fn test_scenario_stale_then_upsert() {
        let p = Pipeline::in_memory(Transformer::default());
        feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0));

        assert!(p.tracker().snapshot(at(121), DEFAULT_STALENESS).is_empty());
        assert_eq!(p.tracker().len(), 1);

        feed(&p, &position_line("4CA2B1", 52.0, -1.0, 130));
        let snap = p.tracker().snapshot(at(131), DEFAULT_STALENESS);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].first_seen, at(0));
        assert_eq!(snap[0].position.latitude(), 52.0);
    }

    #[test]
    fn test_blank_payloads_are_filtered_not_counted() {
        let p = Pipeline::in_memory(Transformer::default());
        assert_eq!(p.ingest(None), Outcome::Filtered);
        assert_eq!(p.ingest(Some(Payload::Text("  \r\n"))), Outcome::Filtered);
        assert_eq!(p.counts(), Counts::default());
    }

    #[test]
    fn test_malformed_records_count_invalid() {
        let p = Pipeline::in_memory(Transformer::default());
        let bad = [
            "MSG,3,111,11111,4CA2B1".to_string(),
            position_line("4CA2B1", 51.5, -0.12, 0).replace(",-0.12,", ",,"),
            position_line("4CA2B1", 51.5, -0.12, 0).replace(",37000,", ",high,"),
            "CLK,,,,,,,,,".to_string(),
        ];
        for line in &bad {
            assert_eq!(feed(&p, line), Outcome::Invalid, "{line}");
        }
        assert_eq!(p.counts(), Counts { valid: 0, invalid: 4 });
        assert!(p.tracker().is_empty());
    }

    #[test]
    fn test_ingest_detailed_returns_message_or_error() {
        let p = Pipeline::in_memory(Transformer::default());
        feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0));

        match p.ingest_detailed(Some(Payload::Text(&id_line("4CA2B1", "BAW123", 1)))) {
            Ingested::Accepted(msg) => assert_eq!(msg.call_sign(), Some("BAW123")),
            other => panic!("expected accepted, got {other:?}"),
        }
        assert!(matches!(
            p.ingest_detailed(Some(Payload::Text("SEL,,1"))),
            Ingested::Invalid(SbsError::UnknownKind(_))
        ));
        assert!(matches!(p.ingest_detailed(None), Ingested::Filtered));

        assert_eq!(p.counts(), Counts { valid: 2, invalid: 1 });
        assert_eq!(p.tracker().get(&[0x4C, 0xA2, 0xB1]).unwrap().call_sign.as_deref(), Some("BAW123"));
    }

    #[test]
    fn test_reject_counts_invalid_without_tracking() {
        let p = Pipeline::in_memory(Transformer::default());
        assert_eq!(p.reject(SbsError::Oversize(1024)), Outcome::Invalid);
        assert_eq!(p.counts(), Counts { valid: 0, invalid: 1 });
        assert!(p.tracker().is_empty());
    }

    #[test]
    fn test_log_receives_valid_messages_only() {
        let (p, log) = logged_pipeline(true);
        feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0));
        feed(&p, "garbage");
        feed(&p, &id_line("4CA2B1", "BAW123", 1));

        let logged = log.messages.lock().unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].call_sign(), Some("BAW123"));
    }

    #[test]
    fn test_persist_toggle() {
        let (p, log) = logged_pipeline(false);
        assert!(!p.persist_enabled());
        feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0));
        assert!(log.messages.lock().unwrap().is_empty());
        // tracking continues with persistence off
        assert_eq!(p.tracker().len(), 1);

        p.set_persist(true);
        assert!(p.persist_enabled());
        feed(&p, &position_line("4CA2B1", 51.6, -0.12, 1));
        assert_eq!(log.messages.lock().unwrap().len(), 1);

        p.set_persist(false);
        feed(&p, &position_line("4CA2B1", 51.7, -0.12, 2));
        assert_eq!(log.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_log_failure_is_not_fatal() {
        let log = Arc::new(RecordingLog {
            messages: Mutex::new(Vec::new()),
            fail: true,
        });
        let p = Pipeline::new(
            Transformer::default(),
            Arc::new(Tracker::new()),
            Some(log as Arc<dyn MessageLog>),
            true,
        );
        assert_eq!(feed(&p, &position_line("4CA2B1", 51.5, -0.12, 0)), Outcome::Accepted);
        assert_eq!(p.tracker().len(), 1);
        assert_eq!(p.counts().valid, 1);
    }
}
