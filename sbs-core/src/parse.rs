//! Parse BaseStation (SBS) text records into typed `Message` values.
//!
//! One record per line, comma separated. The first field selects the kind:
//!
//! ```text
//! MSG,3,111,11111,4CA2B1,111111,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000,,37000,,,51.5,-0.12,,,0,0,0,0
//! ID,,111,11111,4CA2B1,111111,2024/05/01,12:00:01.000,2024/05/01,12:00:01.000,BAW123
//! AIR,,111,11111,4CA2B1,111111,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000
//! STA,,111,11111,4CA2B1,111111,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000,PL
//! ```
//!
//! Empty fields mean "absent", never zero. Any field that is present but
//! unparseable fails the whole record.

use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::types::*;

const F_KIND: usize = 0;
const F_TRANSMISSION_TYPE: usize = 1;
const F_ICAO: usize = 4;
const F_DATE_GENERATED: usize = 6;
const F_TIME_GENERATED: usize = 7;
const F_DATE_LOGGED: usize = 8;
const F_TIME_LOGGED: usize = 9;
const F_CALL_SIGN: usize = 10;
const F_STATUS: usize = 10;
const F_ALTITUDE: usize = 11;
const F_GROUND_SPEED: usize = 12;
const F_TRACK: usize = 13;
const F_LATITUDE: usize = 14;
const F_LONGITUDE: usize = 15;
const F_VERTICAL_RATE: usize = 16;
const F_SQUAWK: usize = 17;
const F_ALERT: usize = 18;
const F_EMERGENCY: usize = 19;
const F_IDENT: usize = 20;
const F_ON_GROUND: usize = 21;

const DATE_FORMAT: &str = "%Y/%m/%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Parse one record, reading its date/time fields as UTC.
pub fn parse(line: &str) -> Result<Message> {
    parse_with_tz(line, &chrono_tz::UTC)
}

/// Parse one record whose date/time fields are local time in `tz`.
///
/// dump1090 and most BaseStation emitters write receiver-local time, so
/// feeds from a receiver not running on UTC need the zone to line up with
/// wall-clock snapshots.
pub fn parse_with_tz(line: &str, tz: &Tz) -> Result<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(',').collect();

    let code = fields[F_KIND].trim();
    let kind =
        MessageKind::from_code(code).ok_or_else(|| SbsError::UnknownKind(code.to_string()))?;

    if fields.len() != kind.field_count() {
        return Err(SbsError::FieldCountMismatch {
            kind: kind.code(),
            expected: kind.field_count(),
            actual: fields.len(),
        });
    }

    let icao = icao_from_hex(fields[F_ICAO].trim()).ok_or(SbsError::InvalidField("icao"))?;
    let generated_at = parse_datetime(
        fields[F_DATE_GENERATED],
        fields[F_TIME_GENERATED],
        tz,
        "generated_at",
    )?;
    let received_at = parse_datetime(fields[F_DATE_LOGGED], fields[F_TIME_LOGGED], tz, "received_at")?
        .ok_or(SbsError::InvalidField("received_at"))?;

    let msg = match kind {
        MessageKind::Status => {
            let status = StatusKind::from_code(fields[F_STATUS].trim())
                .ok_or(SbsError::InvalidField("status"))?;
            Message::Status(StatusMsg {
                icao,
                status,
                generated_at,
                received_at,
            })
        }
        MessageKind::NewAircraft => Message::NewAircraft(NewAircraftMsg {
            icao,
            generated_at,
            received_at,
        }),
        MessageKind::Id => Message::Id(IdMsg {
            icao,
            call_sign: call_sign(fields[F_CALL_SIGN]),
            generated_at,
            received_at,
        }),
        MessageKind::Transmission => {
            Message::Transmission(parse_transmission(&fields, icao, generated_at, received_at)?)
        }
    };

    Ok(msg)
}

fn parse_transmission(
    fields: &[&str],
    icao: Icao,
    generated_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
) -> Result<TransmissionMsg> {
    let transmission_type = fields[F_TRANSMISSION_TYPE]
        .trim()
        .parse::<u8>()
        .ok()
        .and_then(TransmissionType::from_code)
        .ok_or(SbsError::InvalidField("transmission_type"))?;

    let track = float_field(fields[F_TRACK], "track")?;
    if let Some(t) = track {
        if !(0.0..=360.0).contains(&t) {
            return Err(SbsError::InvalidField("track"));
        }
    }

    Ok(TransmissionMsg {
        icao,
        transmission_type,
        call_sign: call_sign(fields[F_CALL_SIGN]),
        altitude: float_field(fields[F_ALTITUDE], "altitude")?,
        ground_speed: float_field(fields[F_GROUND_SPEED], "ground_speed")?,
        track,
        position: position(fields[F_LATITUDE], fields[F_LONGITUDE])?,
        vertical_rate: number_field(fields[F_VERTICAL_RATE], "vertical_rate")?,
        squawk: number_field(fields[F_SQUAWK], "squawk")?,
        alert: flag_field(fields[F_ALERT], "alert")?,
        emergency: flag_field(fields[F_EMERGENCY], "emergency")?,
        ident_active: flag_field(fields[F_IDENT], "ident_active")?,
        on_ground: flag_field(fields[F_ON_GROUND], "on_ground")?,
        generated_at,
        received_at,
    })
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn call_sign(field: &str) -> Option<String> {
    let cs = field.trim();
    if cs.is_empty() {
        None
    } else {
        Some(cs.to_string())
    }
}

fn number_field<T: FromStr>(field: &str, name: &'static str) -> Result<Option<T>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<T>()
        .map(Some)
        .map_err(|_| SbsError::InvalidField(name))
}

// "NaN" and "inf" parse as f32, the feed never means them.
fn float_field(field: &str, name: &'static str) -> Result<Option<f32>> {
    match number_field::<f32>(field, name)? {
        Some(v) if !v.is_finite() => Err(SbsError::InvalidField(name)),
        v => Ok(v),
    }
}

/// Tri-state flag: empty is unknown, `-1` (or `1`) is set, `0` is clear.
fn flag_field(field: &str, name: &'static str) -> Result<Option<bool>> {
    match field.trim() {
        "" => Ok(None),
        "-1" | "1" => Ok(Some(true)),
        "0" => Ok(Some(false)),
        _ => Err(SbsError::InvalidField(name)),
    }
}

fn position(lat: &str, lon: &str) -> Result<Option<Position>> {
    let lat = number_field::<f64>(lat, "position")?;
    let lon = number_field::<f64>(lon, "position")?;
    match (lat, lon) {
        (Some(lat), Some(lon)) => Position::new(lat, lon).map(Some),
        (None, None) => Ok(None),
        _ => Err(SbsError::InvalidField("position")),
    }
}

fn parse_datetime(
    date: &str,
    time: &str,
    tz: &Tz,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    let (date, time) = (date.trim(), time.trim());
    if date.is_empty() && time.is_empty() {
        return Ok(None);
    }

    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| SbsError::InvalidField(name))?;
    let time = NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|_| SbsError::InvalidField(name))?;

    let local = match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => dt,
        // fall-back hour, either reading is good enough
        LocalResult::Ambiguous(_, later) => later,
        LocalResult::None => return Err(SbsError::InvalidField(name)),
    };
    Ok(Some(local.with_timezone(&Utc)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const POSITION: &str = "MSG,3,111,11111,4CA2B1,111111,2024/05/01,12:00:00.000,2024/05/01,12:00:00.250,,37000,,,51.5,-0.12,,,0,0,0,0";
    const IDENT: &str = "MSG,1,111,11111,AA2BC2,111111,2016/03/11,13:07:16.663,2016/03/11,13:07:16.626,UAL814  ,,,,,,,,,,,0";
    const VELOCITY: &str = "MSG,4,111,11111,AC1FCC,111111,2016/03/11,13:07:07.777,2016/03/11,13:07:07.713,,,316,106,,,1536,,,,,0";

    /// Build a record of `kind` with common fields filled and `set` applied.
    fn record(code: &str, n: usize, set: &[(usize, &str)]) -> String {
        let mut fields = vec![""; n];
        fields[F_KIND] = code;
        fields[F_ICAO] = "4CA2B1";
        fields[F_DATE_GENERATED] = "2024/05/01";
        fields[F_TIME_GENERATED] = "12:00:00.000";
        fields[F_DATE_LOGGED] = "2024/05/01";
        fields[F_TIME_LOGGED] = "12:00:00.000";
        for (i, v) in set {
            fields[*i] = *v;
        }
        fields.join(",")
    }

    fn transmission(line: &str) -> TransmissionMsg {
        match parse(line).expect("valid record") {
            Message::Transmission(m) => m,
            other => panic!("expected transmission, got {other:?}"),
        }
    }

    fn invalid_field(line: &str) -> &'static str {
        match parse(line) {
            Err(SbsError::InvalidField(name)) => name,
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_airborne_position() {
        let m = transmission(POSITION);
        assert_eq!(m.icao, [0x4C, 0xA2, 0xB1]);
        assert_eq!(m.transmission_type, TransmissionType::AirbornePosition);
        assert_eq!(m.altitude, Some(37000.0));
        let pos = m.position.unwrap();
        assert_eq!(pos.latitude(), 51.5);
        assert_eq!(pos.longitude(), -0.12);
        assert_eq!(m.alert, Some(false));
        assert_eq!(m.on_ground, Some(false));
        assert_eq!(m.call_sign, None);
        assert_eq!(m.ground_speed, None);
        assert_eq!(m.vertical_rate, None);
        assert_eq!(m.squawk, None);
    }

    #[test]
    fn test_timestamps() {
        let m = transmission(POSITION);
        assert_eq!(
            m.received_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::TimeDelta::milliseconds(250)
        );
        assert_eq!(
            m.generated_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_identification_trims_call_sign() {
        let m = transmission(IDENT);
        assert_eq!(m.transmission_type, TransmissionType::IdentificationAndCategory);
        assert_eq!(m.call_sign.as_deref(), Some("UAL814"));
        assert_eq!(m.on_ground, Some(false));
        assert_eq!(m.alert, None);
    }

    #[test]
    fn test_airborne_velocity() {
        let m = transmission(VELOCITY);
        assert_eq!(m.transmission_type, TransmissionType::AirborneVelocity);
        assert_eq!(m.ground_speed, Some(316.0));
        assert_eq!(m.track, Some(106.0));
        assert_eq!(m.vertical_rate, Some(1536));
        assert_eq!(m.position, None);
        assert_eq!(m.altitude, None);
    }

    #[test]
    fn test_all_transmission_fields() {
        let line = record(
            "MSG",
            22,
            &[
                (F_TRANSMISSION_TYPE, "6"),
                (F_CALL_SIGN, "BAW123"),
                (F_ALTITUDE, "12000"),
                (F_GROUND_SPEED, "250.5"),
                (F_TRACK, "359.9"),
                (F_LATITUDE, "-33.9"),
                (F_LONGITUDE, "151.2"),
                (F_VERTICAL_RATE, "-640"),
                (F_SQUAWK, "7700"),
                (F_ALERT, "-1"),
                (F_EMERGENCY, "-1"),
                (F_IDENT, "0"),
                (F_ON_GROUND, "1"),
            ],
        );
        let m = transmission(&line);
        assert_eq!(m.transmission_type, TransmissionType::SurveillanceId);
        assert_eq!(m.call_sign.as_deref(), Some("BAW123"));
        assert_eq!(m.altitude, Some(12000.0));
        assert_eq!(m.ground_speed, Some(250.5));
        assert_eq!(m.track, Some(359.9));
        assert_eq!(m.position, Some(Position::new(-33.9, 151.2).unwrap()));
        assert_eq!(m.vertical_rate, Some(-640));
        assert_eq!(m.squawk, Some(7700));
        assert_eq!(m.alert, Some(true));
        assert_eq!(m.emergency, Some(true));
        assert_eq!(m.ident_active, Some(false));
        assert_eq!(m.on_ground, Some(true));
    }

    #[test]
    fn test_blank_fields_are_absent() {
        let m = transmission(&record("MSG", 22, &[(F_TRANSMISSION_TYPE, "8")]));
        assert_eq!(m.transmission_type, TransmissionType::AllCallReply);
        assert_eq!(m.altitude, None);
        assert_eq!(m.ground_speed, None);
        assert_eq!(m.track, None);
        assert_eq!(m.position, None);
        assert_eq!(m.vertical_rate, None);
        assert_eq!(m.squawk, None);
        assert_eq!(m.alert, None);
        assert_eq!(m.emergency, None);
        assert_eq!(m.ident_active, None);
        assert_eq!(m.on_ground, None);
        assert_eq!(m.call_sign, None);
    }

    #[test]
    fn test_id_message() {
        let line = record("ID", 11, &[(F_CALL_SIGN, "BAW123  ")]);
        match parse(&line).unwrap() {
            Message::Id(m) => {
                assert_eq!(m.call_sign.as_deref(), Some("BAW123"));
                assert_eq!(m.icao, [0x4C, 0xA2, 0xB1]);
            }
            other => panic!("expected ID, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_id_call_sign() {
        let line = record("ID", 11, &[(F_CALL_SIGN, "   ")]);
        assert_eq!(parse(&line).unwrap().call_sign(), None);
    }

    #[test]
    fn test_new_aircraft_message() {
        let line = record("AIR", 10, &[]);
        assert!(matches!(parse(&line).unwrap(), Message::NewAircraft(_)));
    }

    #[test]
    fn test_status_message() {
        let line = record("STA", 11, &[(F_STATUS, "SL")]);
        match parse(&line).unwrap() {
            Message::Status(m) => assert_eq!(m.status, StatusKind::SignalLost),
            other => panic!("expected STA, got {other:?}"),
        }
        assert_eq!(invalid_field(&record("STA", 11, &[(F_STATUS, "ZZ")])), "status");
    }

    #[test]
    fn test_lowercase_icao_normalized() {
        let line = record("AIR", 10, &[(F_ICAO, "4ca2b1")]);
        assert_eq!(icao_to_string(parse(&line).unwrap().icao()), "4CA2B1");
    }

    #[test]
    fn test_crlf_stripped() {
        let line = format!("{}\r\n", record("AIR", 10, &[]));
        assert!(parse(&line).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(parse("SEL,,111,11111,4CA2B1"), Err(SbsError::UnknownKind(k)) if k == "SEL"));
        assert!(matches!(parse("Test message"), Err(SbsError::UnknownKind(_))));
        assert!(matches!(parse(""), Err(SbsError::UnknownKind(_))));
    }

    #[test]
    fn test_field_count_mismatch() {
        match parse(&record("MSG", 21, &[(F_TRANSMISSION_TYPE, "3")])) {
            Err(SbsError::FieldCountMismatch {
                kind,
                expected,
                actual,
            }) => {
                assert_eq!(kind, "MSG");
                assert_eq!(expected, 22);
                assert_eq!(actual, 21);
            }
            other => panic!("expected FieldCountMismatch, got {other:?}"),
        }
        assert!(matches!(
            parse(&record("ID", 12, &[])),
            Err(SbsError::FieldCountMismatch { .. })
        ));
    }

    #[test]
    fn test_partial_position_rejected() {
        let lat_only = record("MSG", 22, &[(F_TRANSMISSION_TYPE, "3"), (F_LATITUDE, "51.5")]);
        assert_eq!(invalid_field(&lat_only), "position");
        let lon_only = record("MSG", 22, &[(F_TRANSMISSION_TYPE, "3"), (F_LONGITUDE, "-0.12")]);
        assert_eq!(invalid_field(&lon_only), "position");
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let line = record(
            "MSG",
            22,
            &[(F_TRANSMISSION_TYPE, "3"), (F_LATITUDE, "91.0"), (F_LONGITUDE, "0.0")],
        );
        assert_eq!(invalid_field(&line), "position");
    }

    #[test]
    fn test_invalid_numeric_fields() {
        let cases = [
            (F_ALTITUDE, "high", "altitude"),
            (F_GROUND_SPEED, "NaN", "ground_speed"),
            (F_TRACK, "400", "track"),
            (F_VERTICAL_RATE, "1.5", "vertical_rate"),
            (F_SQUAWK, "-1", "squawk"),
            (F_ALERT, "yes", "alert"),
            (F_ON_GROUND, "2", "on_ground"),
        ];
        for (idx, value, name) in cases {
            let line = record("MSG", 22, &[(F_TRANSMISSION_TYPE, "4"), (idx, value)]);
            assert_eq!(invalid_field(&line), name, "field {idx} = {value:?}");
        }
    }

    #[test]
    fn test_invalid_transmission_type() {
        assert_eq!(invalid_field(&record("MSG", 22, &[(F_TRANSMISSION_TYPE, "9")])), "transmission_type");
        assert_eq!(invalid_field(&record("MSG", 22, &[])), "transmission_type");
    }

    #[test]
    fn test_invalid_icao() {
        assert_eq!(invalid_field(&record("AIR", 10, &[(F_ICAO, "")])), "icao");
        assert_eq!(invalid_field(&record("AIR", 10, &[(F_ICAO, "4CA2BZ")])), "icao");
    }

    #[test]
    fn test_invalid_timestamps() {
        assert_eq!(
            invalid_field(&record("AIR", 10, &[(F_DATE_LOGGED, ""), (F_TIME_LOGGED, "")])),
            "received_at"
        );
        assert_eq!(
            invalid_field(&record("AIR", 10, &[(F_TIME_LOGGED, "25:00:00.000")])),
            "received_at"
        );
        assert_eq!(
            invalid_field(&record("AIR", 10, &[(F_DATE_GENERATED, "01-05-2024")])),
            "generated_at"
        );
    }

    #[test]
    fn test_missing_generated_time_is_absent() {
        let line = record("AIR", 10, &[(F_DATE_GENERATED, ""), (F_TIME_GENERATED, "")]);
        assert_eq!(parse(&line).unwrap().generated_at(), None);
    }

    #[test]
    fn test_local_time_zone() {
        let tz: Tz = "Europe/London".parse().unwrap();
        // 2024-05-01 is BST (UTC+1)
        let msg = parse_with_tz(&record("AIR", 10, &[]), &tz).unwrap();
        assert_eq!(
            msg.received_at(),
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(parse(POSITION).unwrap(), parse(POSITION).unwrap());
    }
}
