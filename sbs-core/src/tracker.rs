//! Per-aircraft latest-known state, folded from parsed messages.
//!
//! Pure logic, no I/O. Aircraft enter the table on their first airborne
//! position and are never removed: staleness is applied when a snapshot is
//! taken, not by eviction.
//!
//! Each entry sits behind its own mutex so updates for one address are
//! serialized while different addresses proceed in parallel. Snapshots
//! clone the entry handles first and then copy entries one at a time, so a
//! reader never holds more than a single entry lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error};

use crate::types::*;

/// Aircraft whose last update is older than this are left out of snapshots.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Latest known state of one aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftState {
    #[serde(serialize_with = "serialize_icao")]
    pub icao: Icao,
    pub position: Position,
    pub altitude: Option<f32>,
    pub call_sign: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Positions that moved `last_update` forward, the first one included.
    pub position_count: u64,
}

impl AircraftState {
    fn new(icao: Icao, position: Position, altitude: Option<f32>, timestamp: DateTime<Utc>) -> Self {
        AircraftState {
            icao,
            position,
            altitude,
            call_sign: None,
            first_seen: timestamp,
            last_update: timestamp,
            position_count: 1,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_update
    }

    /// True if the last update falls strictly inside `window` before `now`.
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match cutoff(now, window) {
            Some(cutoff) => self.last_update > cutoff,
            None => true,
        }
    }
}

// `None` when the window reaches past the representable range.
fn cutoff(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

fn lock(slot: &Mutex<AircraftState>) -> MutexGuard<'_, AircraftState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Keyed table of aircraft state. The tracker is the only writer.
#[derive(Default)]
pub struct Tracker {
    aircraft: DashMap<Icao, Arc<Mutex<AircraftState>>>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker {
            aircraft: DashMap::new(),
        }
    }

    /// Fold one message into the table.
    ///
    /// Airborne positions create or overwrite an entry; call signs from ID
    /// and surveillance-ID records only update entries that already exist.
    /// Everything else leaves the table alone.
    pub fn apply(&self, msg: &Message) {
        match msg {
            Message::Transmission(m) => match m.transmission_type {
                TransmissionType::AirbornePosition => {
                    if let Some(pos) = m.position {
                        self.update_position(m.icao, pos, m.altitude, m.received_at);
                    }
                }
                TransmissionType::SurveillanceId => {
                    self.update_call_sign(&m.icao, m.call_sign.as_deref());
                }
                TransmissionType::IdentificationAndCategory
                | TransmissionType::SurfacePosition
                | TransmissionType::AirborneVelocity
                | TransmissionType::SurveillanceAltitude
                | TransmissionType::AirToAir
                | TransmissionType::AllCallReply => {}
            },
            Message::Id(m) => self.update_call_sign(&m.icao, m.call_sign.as_deref()),
            Message::Status(_) | Message::NewAircraft(_) => {}
        }
    }

    fn update_position(
        &self,
        icao: Icao,
        pos: Position,
        altitude: Option<f32>,
        timestamp: DateTime<Utc>,
    ) {
        if !pos.is_valid() {
            error!(
                icao = %icao_to_string(&icao),
                "out-of-range position reached the tracker, record dropped: {pos:?}"
            );
            return;
        }

        // shard read lock for known aircraft, write lock only to insert
        let known = self.aircraft.get(&icao).map(|e| e.value().clone());
        let slot = match known {
            Some(slot) => slot,
            None => match self.aircraft.entry(icao) {
                Entry::Occupied(e) => e.get().clone(),
                Entry::Vacant(e) => {
                    debug!(icao = %icao_to_string(&icao), "new aircraft");
                    e.insert(Arc::new(Mutex::new(AircraftState::new(
                        icao, pos, altitude, timestamp,
                    ))));
                    return;
                }
            },
        };

        let mut ac = lock(&slot);
        if timestamp < ac.last_update {
            debug!(
                icao = %icao_to_string(&icao),
                "ignoring position older than last update ({timestamp} < {})",
                ac.last_update
            );
            return;
        }
        if timestamp > ac.last_update {
            ac.position_count += 1;
        }
        ac.position = pos;
        if altitude.is_some() {
            ac.altitude = altitude;
        }
        ac.last_update = timestamp;
    }

    fn update_call_sign(&self, icao: &Icao, call_sign: Option<&str>) {
        let Some(cs) = call_sign.map(str::trim).filter(|cs| !cs.is_empty()) else {
            return;
        };
        // identity alone never starts tracking an aircraft
        let Some(slot) = self.aircraft.get(icao).map(|e| e.value().clone()) else {
            return;
        };
        lock(&slot).call_sign = Some(cs.to_string());
    }

    /// Aircraft updated strictly within `window` before `now`, most recent
    /// first. Older entries stay in the table.
    pub fn snapshot(&self, now: DateTime<Utc>, window: Duration) -> Vec<AircraftState> {
        let mut live: Vec<AircraftState> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let ac = lock(slot);
                ac.is_live(now, window).then(|| ac.clone())
            })
            .collect();
        live.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        live
    }

    /// Every tracked aircraft regardless of age, most recent first.
    pub fn all(&self) -> Vec<AircraftState> {
        let mut all: Vec<AircraftState> = self.slots().iter().map(|s| lock(s).clone()).collect();
        all.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        all
    }

    pub fn get(&self, icao: &Icao) -> Option<AircraftState> {
        let slot = self.aircraft.get(icao).map(|e| e.value().clone())?;
        let ac = lock(&slot).clone();
        Some(ac)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    // Shard locks are held only while the handles are cloned.
    fn slots(&self) -> Vec<Arc<Mutex<AircraftState>>> {
        self.aircraft.iter().map(|e| e.value().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
