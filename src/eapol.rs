//! EAPOL-Key parsing
//!
//! Recognises the LLC/SNAP-encapsulated EAPOL-Key frames of the WPA 4-way
//! handshake and works out which message a frame is and which side sent it.

use serde::Serialize;

use crate::frame::FrameEvent;
use crate::mac::MacAddr;

pub const ETHERTYPE_EAPOL: u16 = 0x888e;
pub const EAPOL_TYPE_KEY: u8 = 3;

pub const LLC_SNAP_LEN: usize = 8;
const LLC_SNAP_PREFIX: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];

/// EAPOL header (4) plus the fixed part of the key descriptor (95).
pub const EAPOL_KEY_MIN_LEN: usize = 99;

pub const DESCRIPTOR_RSN: u8 = 2;
pub const DESCRIPTOR_WPA: u8 = 254;

pub const NONCE_LEN: usize = 32;
pub const MIC_LEN: usize = 16;

// Offsets from the start of the EAPOL header.
const OFF_DESCRIPTOR: usize = 4;
const OFF_KEY_INFO: usize = 5;
const OFF_REPLAY: usize = 9;
const OFF_NONCE: usize = 17;
const OFF_MIC: usize = 81;
const OFF_KEY_DATA_LEN: usize = 97;
const OFF_KEY_DATA: usize = 99;

/// Strips the LLC/SNAP header of a data frame body if it announces EAPOL.
pub fn eapol_payload(body: &[u8]) -> Option<&[u8]> {
    if body.len() < LLC_SNAP_LEN || body[..6] != LLC_SNAP_PREFIX {
        return None;
    }
    if u16::from_be_bytes([body[6], body[7]]) != ETHERTYPE_EAPOL {
        return None;
    }
    Some(&body[LLC_SNAP_LEN..])
}

/// Key information field (big-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo(pub u16);

impl KeyInfo {
    pub const PAIRWISE: u16 = 0x0008;
    pub const INSTALL: u16 = 0x0040;
    pub const ACK: u16 = 0x0080;
    pub const MIC: u16 = 0x0100;
    pub const SECURE: u16 = 0x0200;

    /// 1 = HMAC-MD5/RC4 (WPA), 2 = HMAC-SHA1/AES, 3 = AES-128-CMAC.
    pub fn descriptor_version(&self) -> u8 {
        (self.0 & 0x0007) as u8
    }

    pub fn pairwise(&self) -> bool {
        self.0 & Self::PAIRWISE != 0
    }

    pub fn install(&self) -> bool {
        self.0 & Self::INSTALL != 0
    }

    pub fn ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub fn mic(&self) -> bool {
        self.0 & Self::MIC != 0
    }

    pub fn secure(&self) -> bool {
        self.0 & Self::SECURE != 0
    }

    /// Maps the ACK/MIC/Install bits to a message pattern.
    pub fn pattern(&self) -> Option<KeyPattern> {
        match (self.ack(), self.mic(), self.install()) {
            (true, false, false) => Some(KeyPattern::M1),
            (false, true, false) => Some(KeyPattern::M2OrM4),
            (true, true, true) => Some(KeyPattern::M3),
            _ => None,
        }
    }
}

/// Bit patterns of the handshake messages. M2 and M4 are indistinguishable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPattern {
    M1,
    M2OrM4,
    M3,
}

impl KeyPattern {
    /// M1 and M3 are sent by the authenticator.
    pub fn from_authenticator(&self) -> bool {
        matches!(self, KeyPattern::M1 | KeyPattern::M3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Message {
    M1,
    M2,
    M3,
    M4,
}

impl Message {
    pub fn index(&self) -> usize {
        match self {
            Message::M1 => 0,
            Message::M2 => 1,
            Message::M3 => 2,
            Message::M4 => 3,
        }
    }
}

/// Borrowed view of an EAPOL-Key frame.
#[derive(Debug, Clone, Copy)]
pub struct EapolKey<'a> {
    /// The EAPOL frame, cut to its declared length.
    pub frame: &'a [u8],
    pub descriptor_type: u8,
    pub key_info: KeyInfo,
    pub replay_counter: u64,
    pub nonce: [u8; NONCE_LEN],
    pub mic: [u8; MIC_LEN],
    /// Key data, clamped to what the frame actually holds.
    pub key_data: &'a [u8],
}

impl<'a> EapolKey<'a> {
    /// Parses an EAPOL frame (starting at the version byte). Non-key frames,
    /// unknown descriptors and frames shorter than the fixed key header yield `None`.
    pub fn parse(eapol: &'a [u8]) -> Option<Self> {
        if eapol.len() < EAPOL_KEY_MIN_LEN || eapol[1] != EAPOL_TYPE_KEY {
            return None;
        }
        let descriptor_type = eapol[OFF_DESCRIPTOR];
        if descriptor_type != DESCRIPTOR_RSN && descriptor_type != DESCRIPTOR_WPA {
            return None;
        }

        let declared = 4 + u16::from_be_bytes([eapol[2], eapol[3]]) as usize;
        let frame = &eapol[..declared.min(eapol.len())];
        if frame.len() < EAPOL_KEY_MIN_LEN {
            return None;
        }

        let key_info = KeyInfo(u16::from_be_bytes([frame[OFF_KEY_INFO], frame[OFF_KEY_INFO + 1]]));
        let replay_counter = u64::from_be_bytes(frame[OFF_REPLAY..OFF_REPLAY + 8].try_into().ok()?);
        let nonce: [u8; NONCE_LEN] = frame[OFF_NONCE..OFF_NONCE + NONCE_LEN].try_into().ok()?;
        let mic: [u8; MIC_LEN] = frame[OFF_MIC..OFF_MIC + MIC_LEN].try_into().ok()?;

        let key_data_len =
            u16::from_be_bytes([frame[OFF_KEY_DATA_LEN], frame[OFF_KEY_DATA_LEN + 1]]) as usize;
        let available = frame.len() - OFF_KEY_DATA;
        let key_data = &frame[OFF_KEY_DATA..OFF_KEY_DATA + key_data_len.min(available)];

        Some(Self {
            frame,
            descriptor_type,
            key_info,
            replay_counter,
            nonce,
            mic,
            key_data,
        })
    }

    pub fn nonce_is_zero(&self) -> bool {
        self.nonce.iter().all(|b| *b == 0)
    }
}

/// An EAPOL-Key frame resolved to a handshake message between an AP and a client.
#[derive(Debug, Clone, Copy)]
pub struct KeyMessage<'a> {
    pub ap: MacAddr,
    pub client: MacAddr,
    pub message: Message,
    pub key: EapolKey<'a>,
}

impl<'a> KeyMessage<'a> {
    /// Resolves direction and message number for a data frame carrying EAPOL-Key.
    ///
    /// Direction comes from the DS bits when exactly one is set, otherwise from
    /// the pattern (ACK-bearing messages are sent by the AP). A pattern that
    /// contradicts the DS direction is rejected. M2 and M4 share a pattern and
    /// both travel client to AP; M4 is recognised by its Secure bit or its
    /// all-zero nonce.
    pub fn resolve(event: &FrameEvent<'_>, key: EapolKey<'a>) -> Option<Self> {
        if !key.key_info.pairwise() {
            return None;
        }
        let pattern = key.key_info.pattern()?;

        let fc = event.header.frame_control;
        let from_ap = match (fc.to_ds(), fc.from_ds()) {
            (false, true) => true,
            (true, false) => false,
            _ => pattern.from_authenticator(),
        };
        if from_ap != pattern.from_authenticator() {
            return None;
        }

        let (ap, client) = if from_ap {
            (event.header.addr2, event.header.addr1)
        } else {
            (event.header.addr1, event.header.addr2)
        };
        if ap.is_multicast() || client.is_multicast() {
            return None;
        }

        let message = match pattern {
            KeyPattern::M1 => Message::M1,
            KeyPattern::M3 => Message::M3,
            KeyPattern::M2OrM4 if key.key_info.secure() || key.nonce_is_zero() => Message::M4,
            KeyPattern::M2OrM4 => Message::M2,
        };

        Some(Self {
            ap,
            client,
            message,
            key,
        })
    }
}
