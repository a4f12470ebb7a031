//! PMKID extraction
//!
//! An AP that supports PMK caching puts a PMKID KDE into the key data of
//! handshake message 1. Records are captured either passively or by soliciting
//! M1 with a forged association request (clientless). Records never change
//! after insertion; an SSID learned later is resolved by the reader.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::ie::find_vendor_kde;
use crate::mac::MacAddr;

pub const PMKID_LEN: usize = 16;

/// IEEE 802.11 OUI used by RSN key data encapsulations.
pub const RSN_OUI: [u8; 3] = [0x00, 0x0f, 0xac];
pub const KDE_TYPE_PMKID: u8 = 0x04;

pub type Pmkid = [u8; PMKID_LEN];

/// Finds the PMKID KDE in EAPOL key data and returns its trailing 16 bytes.
/// All-zero PMKIDs are treated as absent.
pub fn extract_pmkid(key_data: &[u8]) -> Option<Pmkid> {
    let payload = find_vendor_kde(key_data, RSN_OUI, KDE_TYPE_PMKID)?;
    if payload.len() < PMKID_LEN {
        return None;
    }
    let pmkid: Pmkid = payload[payload.len() - PMKID_LEN..].try_into().ok()?;
    if pmkid.iter().all(|b| *b == 0) {
        return None;
    }
    Some(pmkid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PmkidId(pub usize);

impl fmt::Display for PmkidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pmkid#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PmkidRecord {
    pub id: PmkidId,
    pub ap: MacAddr,
    pub station: MacAddr,
    #[serde(serialize_with = "serialize_hex")]
    pub pmkid: Pmkid,
    pub ssid: String,
    pub channel: u8,
    pub rssi: i8,
    /// Solicited with the engine's forged station address.
    pub clientless: bool,
    pub captured_at: DateTime<Utc>,
}

impl PmkidRecord {
    pub fn is_valid(&self) -> bool {
        self.pmkid.iter().any(|b| *b != 0)
    }
}

fn serialize_hex<S: serde::Serializer>(pmkid: &Pmkid, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode_upper(pmkid))
}

/// Fields of a PMKID sighting, before it gets an id.
#[derive(Debug, Clone)]
pub struct PmkidCapture {
    pub ap: MacAddr,
    pub station: MacAddr,
    pub pmkid: Pmkid,
    pub ssid: String,
    pub channel: u8,
    pub rssi: i8,
    pub clientless: bool,
}

/// Append-only list of PMKIDs, deduplicated on (AP, station, PMKID).
#[derive(Debug, Default)]
pub struct PmkidStore {
    records: Vec<PmkidRecord>,
}

impl PmkidStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a capture unless the exact triple is already known. Returns the
    /// new id, or `None` for a duplicate.
    pub fn insert(&mut self, capture: PmkidCapture) -> Option<PmkidId> {
        let duplicate = self.records.iter().any(|r| {
            r.ap == capture.ap && r.station == capture.station && r.pmkid == capture.pmkid
        });
        if duplicate {
            debug!("Duplicate PMKID for AP {} station {}", capture.ap, capture.station);
            return None;
        }

        let id = PmkidId(self.records.len());
        let record = PmkidRecord {
            id,
            ap: capture.ap,
            station: capture.station,
            pmkid: capture.pmkid,
            ssid: capture.ssid,
            channel: capture.channel,
            rssi: capture.rssi,
            clientless: capture.clientless,
            captured_at: Utc::now(),
        };
        info!(
            "PMKID captured: {} AP {} station {}{}",
            if record.ssid.is_empty() { "<hidden>" } else { record.ssid.as_str() },
            record.ap,
            record.station,
            if record.clientless { " (clientless)" } else { "" }
        );
        self.records.push(record);
        Some(id)
    }

    pub fn get(&self, id: PmkidId) -> Option<&PmkidRecord> {
        self.records.get(id.0)
    }

    pub fn has_ap(&self, ap: MacAddr) -> bool {
        self.records.iter().any(|r| r.ap == ap)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PmkidRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
