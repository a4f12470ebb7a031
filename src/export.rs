//! Hashcat mode 22000 lines
//!
//! Handshake: `WPA*<type>*<ESSID>*<AP>*<STA>*<ANonce>*<EAPOL-M2>*<SNonce>`
//! PMKID: `WPA*01*<PMKID>*<AP>*<STA>*<ESSID>`
//!
//! Every field is uppercase hex without separators. Records that cannot be
//! rendered completely are rejected.

use thiserror::Error;

use crate::handshake::{HandshakeId, HandshakeRecord};
use crate::pmkid::{PmkidId, PmkidRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("no handshake {0}")]
    UnknownHandshake(HandshakeId),
    #[error("no PMKID {0}")]
    UnknownPmkid(PmkidId),
    #[error("handshake {0} is not complete")]
    Incomplete(HandshakeId),
    #[error("handshake {id} is missing its {field}")]
    MissingField { id: HandshakeId, field: &'static str },
    #[error("PMKID {0} is invalid")]
    InvalidPmkid(PmkidId),
}

/// Renders a complete handshake. Type is `01` for key descriptor version 1
/// (WPA/TKIP) and `02` otherwise.
pub fn handshake_line(record: &HandshakeRecord) -> Result<String, ExportError> {
    let id = record.id;
    if !record.is_complete() {
        return Err(ExportError::Incomplete(id));
    }
    let anonce = record
        .anonce
        .ok_or(ExportError::MissingField { id, field: "ANonce" })?;
    let snonce = record
        .snonce
        .ok_or(ExportError::MissingField { id, field: "SNonce" })?;
    if record.eapol_m2.is_empty() {
        return Err(ExportError::MissingField { id, field: "EAPOL M2" });
    }

    let kind = if record.key_version == 1 { "01" } else { "02" };
    Ok(format!(
        "WPA*{}*{}*{}*{}*{}*{}*{}",
        kind,
        hex::encode_upper(record.ssid.as_bytes()),
        record.ap.to_hex(),
        record.client.to_hex(),
        hex::encode_upper(&anonce),
        hex::encode_upper(&record.eapol_m2),
        hex::encode_upper(&snonce),
    ))
}

pub fn pmkid_line(record: &PmkidRecord) -> Result<String, ExportError> {
    if !record.is_valid() {
        return Err(ExportError::InvalidPmkid(record.id));
    }
    Ok(format!(
        "WPA*01*{}*{}*{}*{}",
        hex::encode_upper(&record.pmkid),
        record.ap.to_hex(),
        record.station.to_hex(),
        hex::encode_upper(record.ssid.as_bytes()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddr;
    use chrono::Utc;

    fn record() -> HandshakeRecord {
        HandshakeRecord {
            id: HandshakeId(3),
            ap: MacAddr([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]),
            client: MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            ssid: "ab".into(),
            channel: 6,
            seen: [true, true, false, false],
            anonce: Some([0x01; 32]),
            snonce: Some([0x02; 32]),
            mic: Some([0x00; 16]),
            eapol_m1: vec![],
            eapol_m2: vec![0x01, 0x03, 0x00, 0x5f],
            key_version: 2,
            replay_counter: 1,
            first_seen: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_handshake_line() {
        let line = handshake_line(&record()).unwrap();
        let expected = format!(
            "WPA*02*6162*102233445566*AABBCCDDEE01*{}*0103005F*{}",
            "01".repeat(32),
            "02".repeat(32)
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn test_wpa1_type() {
        let mut rec = record();
        rec.key_version = 1;
        assert!(handshake_line(&rec).unwrap().starts_with("WPA*01*"));
    }

    #[test]
    fn test_incomplete_rejected() {
        let mut rec = record();
        rec.seen = [true, false, false, false];
        assert_eq!(handshake_line(&rec), Err(ExportError::Incomplete(HandshakeId(3))));

        let mut rec = record();
        rec.anonce = None;
        assert_eq!(
            handshake_line(&rec),
            Err(ExportError::MissingField {
                id: HandshakeId(3),
                field: "ANonce"
            })
        );

        let mut rec = record();
        rec.eapol_m2.clear();
        assert!(handshake_line(&rec).is_err());
    }

    #[test]
    fn test_pmkid_line() {
        let rec = PmkidRecord {
            id: PmkidId(0),
            ap: MacAddr([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]),
            station: MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            pmkid: [0xab; 16],
            ssid: "lab".into(),
            channel: 1,
            rssi: -40,
            clientless: true,
            captured_at: Utc::now(),
        };
        assert_eq!(
            pmkid_line(&rec).unwrap(),
            format!("WPA*01*{}*102233445566*020000000001*6C6162", "AB".repeat(16))
        );

        let zero = PmkidRecord { pmkid: [0; 16], ..rec };
        assert_eq!(pmkid_line(&zero), Err(ExportError::InvalidPmkid(PmkidId(0))));
    }
}
