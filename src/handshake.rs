//! WPA 4-way handshake tracking
//!
//! One [`HandshakeRecord`] per (client, AP) pair, created on the first EAPOL-Key
//! message of the pair and updated in place. A record is complete once it holds
//! {M1, M2} or {M2, M3}, and full once it holds all four messages. Both transitions
//! are reported exactly once.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::eapol::{KeyMessage, Message, MIC_LEN, NONCE_LEN};
use crate::mac::MacAddr;

/// Raw EAPOL copies are bounded to this many bytes.
pub const MAX_EAPOL_CAPTURE: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandshakeId(pub usize);

impl fmt::Display for HandshakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hs#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandshakeState {
    HasM1,
    HasM2,
    CompleteM1M2,
    CompleteM2M3,
    Full,
    /// Only M3 and/or M4, nothing exportable yet.
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRecord {
    pub id: HandshakeId,
    pub ap: MacAddr,
    pub client: MacAddr,
    pub ssid: String,
    pub channel: u8,
    /// Seen flags for M1..M4.
    pub seen: [bool; 4],
    #[serde(skip)]
    pub anonce: Option<[u8; NONCE_LEN]>,
    #[serde(skip)]
    pub snonce: Option<[u8; NONCE_LEN]>,
    #[serde(skip)]
    pub mic: Option<[u8; MIC_LEN]>,
    #[serde(skip)]
    pub eapol_m1: Vec<u8>,
    #[serde(skip)]
    pub eapol_m2: Vec<u8>,
    /// Key descriptor version (1 = WPA/TKIP, 2 = WPA2/CCMP, 3 = CMAC).
    pub key_version: u8,
    pub replay_counter: u64,
    pub first_seen: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HandshakeRecord {
    fn new(id: HandshakeId, ap: MacAddr, client: MacAddr, channel: u8) -> Self {
        Self {
            id,
            ap,
            client,
            ssid: String::new(),
            channel,
            seen: [false; 4],
            anonce: None,
            snonce: None,
            mic: None,
            eapol_m1: Vec::new(),
            eapol_m2: Vec::new(),
            key_version: 0,
            replay_counter: 0,
            first_seen: Utc::now(),
            completed_at: None,
        }
    }

    pub fn has(&self, message: Message) -> bool {
        self.seen[message.index()]
    }

    pub fn is_complete(&self) -> bool {
        let [m1, m2, m3, _] = self.seen;
        (m1 && m2) || (m2 && m3)
    }

    pub fn is_full(&self) -> bool {
        self.seen.iter().all(|seen| *seen)
    }

    pub fn state(&self) -> HandshakeState {
        let [m1, m2, m3, _] = self.seen;
        if self.is_full() {
            HandshakeState::Full
        } else if m1 && m2 {
            HandshakeState::CompleteM1M2
        } else if m2 && m3 {
            HandshakeState::CompleteM2M3
        } else if m1 {
            HandshakeState::HasM1
        } else if m2 {
            HandshakeState::HasM2
        } else {
            HandshakeState::Partial
        }
    }

    /// Complete and carrying every field an export line needs.
    pub fn is_exportable(&self) -> bool {
        self.is_complete()
            && self.anonce.is_some()
            && self.snonce.is_some()
            && !self.eapol_m2.is_empty()
    }

    fn absorb(&mut self, msg: &KeyMessage<'_>) {
        let key = &msg.key;
        if self.key_version == 0 {
            self.key_version = key.key_info.descriptor_version();
        }
        match msg.message {
            Message::M1 => {
                if self.anonce.is_none() {
                    self.anonce = Some(key.nonce);
                }
                if self.eapol_m1.is_empty() {
                    self.eapol_m1 = bounded_copy(key.frame);
                    self.replay_counter = key.replay_counter;
                }
            }
            Message::M2 => {
                if self.snonce.is_none() {
                    self.snonce = Some(key.nonce);
                    self.mic = Some(key.mic);
                    self.eapol_m2 = bounded_copy(key.frame);
                    self.replay_counter = key.replay_counter;
                }
            }
            Message::M3 => {
                // M3 repeats the ANonce, which covers a missed M1
                if self.anonce.is_none() {
                    self.anonce = Some(key.nonce);
                }
            }
            Message::M4 => {}
        }
        self.seen[msg.message.index()] = true;
    }
}

fn bounded_copy(frame: &[u8]) -> Vec<u8> {
    frame[..frame.len().min(MAX_EAPOL_CAPTURE)].to_vec()
}

/// Outcome of feeding one message to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerUpdate {
    pub id: HandshakeId,
    pub message: Message,
    pub created: bool,
    pub became_complete: bool,
    pub became_full: bool,
}

#[derive(Debug, Default)]
pub struct HandshakeTracker {
    records: Vec<HandshakeRecord>,
    index: HashMap<(MacAddr, MacAddr), HandshakeId>,
}

impl HandshakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a resolved EAPOL-Key message. `ssid` backfills the record's SSID
    /// when it is still unknown.
    pub fn record(&mut self, msg: &KeyMessage<'_>, channel: u8, ssid: &str) -> TrackerUpdate {
        let key = (msg.client, msg.ap);
        let (id, created) = match self.index.get(&key) {
            Some(id) => (*id, false),
            None => {
                let id = HandshakeId(self.records.len());
                self.records.push(HandshakeRecord::new(id, msg.ap, msg.client, channel));
                self.index.insert(key, id);
                (id, true)
            }
        };

        let record = &mut self.records[id.0];
        let was_complete = record.is_complete();
        let was_full = record.is_full();

        record.absorb(msg);
        if record.ssid.is_empty() && !ssid.is_empty() {
            record.ssid = ssid.to_string();
        }

        let became_complete = !was_complete && record.is_complete();
        let became_full = !was_full && record.is_full();

        debug!(
            "EAPOL {:?} {} -> {} ({:?})",
            msg.message,
            msg.ap,
            msg.client,
            record.state()
        );
        if became_complete {
            record.completed_at = Some(Utc::now());
            info!(
                "Handshake complete: {} AP {} client {} ({:?})",
                if record.ssid.is_empty() { "<hidden>" } else { record.ssid.as_str() },
                record.ap,
                record.client,
                record.state()
            );
        }
        if became_full {
            info!("Full 4-way handshake: AP {} client {}", record.ap, record.client);
        }

        TrackerUpdate {
            id,
            message: msg.message,
            created,
            became_complete,
            became_full,
        }
    }

    pub fn get(&self, id: HandshakeId) -> Option<&HandshakeRecord> {
        self.records.get(id.0)
    }

    pub fn find(&self, client: MacAddr, ap: MacAddr) -> Option<&HandshakeRecord> {
        self.index.get(&(client, ap)).and_then(|id| self.get(*id))
    }

    /// Backfills the SSID of every record for `ap` that does not have one yet.
    pub fn backfill_ssid(&mut self, ap: MacAddr, ssid: &str) {
        if ssid.is_empty() {
            return;
        }
        for record in self.records.iter_mut().filter(|r| r.ap == ap && r.ssid.is_empty()) {
            record.ssid = ssid.to_string();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandshakeRecord> {
        self.records.iter()
    }

    pub fn snapshot(&self) -> Vec<HandshakeRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
