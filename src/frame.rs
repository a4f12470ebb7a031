//! 802.11 frame classification
//!
//! Turns a raw buffer from the radio into a typed [`FrameEvent`]. Every buffer
//! comes from an untrusted transmitter, so each field is bounds-checked before
//! it is read and anything that does not fit is ignored.

use crate::mac::MacAddr;

/// Fixed MAC header: frame control, duration, three addresses, sequence control.
pub const MAC_HEADER_LEN: usize = 24;

pub const TYPE_MANAGEMENT: u8 = 0;
pub const TYPE_CONTROL: u8 = 1;
pub const TYPE_DATA: u8 = 2;

pub const SUBTYPE_ASSOC_REQUEST: u8 = 0x00;
pub const SUBTYPE_ASSOC_RESPONSE: u8 = 0x01;
pub const SUBTYPE_PROBE_REQUEST: u8 = 0x04;
pub const SUBTYPE_PROBE_RESPONSE: u8 = 0x05;
pub const SUBTYPE_BEACON: u8 = 0x08;
pub const SUBTYPE_DISASSOC: u8 = 0x0a;
pub const SUBTYPE_AUTH: u8 = 0x0b;
pub const SUBTYPE_DEAUTH: u8 = 0x0c;

/// Data subtypes with bit 3 set carry a 2-byte QoS control field.
const SUBTYPE_QOS_FLAG: u8 = 0x08;

/// Frame control field, kept as the little-endian wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl(u16);

impl FrameControl {
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn version(&self) -> u8 {
        (self.0 & 0x03) as u8
    }

    pub fn frame_type(&self) -> u8 {
        ((self.0 >> 2) & 0x03) as u8
    }

    pub fn subtype(&self) -> u8 {
        ((self.0 >> 4) & 0x0f) as u8
    }

    pub fn to_ds(&self) -> bool {
        self.0 & 0x0100 != 0
    }

    pub fn from_ds(&self) -> bool {
        self.0 & 0x0200 != 0
    }

    pub fn protected(&self) -> bool {
        self.0 & 0x4000 != 0
    }

    pub fn order(&self) -> bool {
        self.0 & 0x8000 != 0
    }
}

/// Parsed fixed MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub frame_control: FrameControl,
    pub duration: u16,
    /// Receiver address.
    pub addr1: MacAddr,
    /// Transmitter address.
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub seq_ctrl: u16,
}

impl MacHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < MAC_HEADER_LEN {
            return None;
        }
        Some(Self {
            frame_control: FrameControl::from_bytes([buf[0], buf[1]]),
            duration: u16::from_le_bytes([buf[2], buf[3]]),
            addr1: MacAddr::from_slice(&buf[4..10])?,
            addr2: MacAddr::from_slice(&buf[10..16])?,
            addr3: MacAddr::from_slice(&buf[16..22])?,
            seq_ctrl: u16::from_le_bytes([buf[22], buf[23]]),
        })
    }

    pub fn sequence_number(&self) -> u16 {
        self.seq_ctrl >> 4
    }
}

/// What a classified frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Beacon,
    ProbeRequest,
    ProbeResponse,
    Deauthentication,
    Disassociation,
    /// Any other management subtype.
    Management(u8),
    /// Any data subtype.
    Data(u8),
}

/// Receive metadata from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMeta {
    pub rssi: i8,
    pub channel: u8,
}

/// A classified frame. Borrows the receive buffer and lives only for dispatch.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    pub kind: FrameKind,
    pub header: MacHeader,
    pub rssi: i8,
    pub channel: u8,
    /// Frame body after the (possibly extended) MAC header.
    pub body: &'a [u8],
}

impl<'a> FrameEvent<'a> {
    pub fn frame_type(&self) -> u8 {
        self.header.frame_control.frame_type()
    }

    pub fn subtype(&self) -> u8 {
        self.header.frame_control.subtype()
    }

    pub fn source(&self) -> MacAddr {
        self.header.addr2
    }

    pub fn destination(&self) -> MacAddr {
        self.header.addr1
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number()
    }

    /// BSSID according to the DS bits; `None` for four-address (WDS) frames.
    pub fn bssid(&self) -> Option<MacAddr> {
        let fc = self.header.frame_control;
        match (fc.to_ds(), fc.from_ds()) {
            (false, false) => Some(self.header.addr3),
            (true, false) => Some(self.header.addr1),
            (false, true) => Some(self.header.addr2),
            (true, true) => None,
        }
    }

    pub fn is_management(&self) -> bool {
        !matches!(self.kind, FrameKind::Data(_))
    }
}

/// Classifies a raw frame. Control, extension and truncated frames yield `None`.
pub fn classify(buf: &[u8], meta: RxMeta) -> Option<FrameEvent<'_>> {
    let header = MacHeader::parse(buf)?;
    let fc = header.frame_control;
    if fc.version() != 0 {
        return None;
    }

    let (kind, header_len) = match fc.frame_type() {
        TYPE_MANAGEMENT => {
            let kind = match fc.subtype() {
                SUBTYPE_BEACON => FrameKind::Beacon,
                SUBTYPE_PROBE_REQUEST => FrameKind::ProbeRequest,
                SUBTYPE_PROBE_RESPONSE => FrameKind::ProbeResponse,
                SUBTYPE_DEAUTH => FrameKind::Deauthentication,
                SUBTYPE_DISASSOC => FrameKind::Disassociation,
                other => FrameKind::Management(other),
            };
            (kind, MAC_HEADER_LEN)
        }
        TYPE_DATA => (FrameKind::Data(fc.subtype()), data_header_len(fc)),
        _ => return None,
    };

    let body = buf.get(header_len..)?;
    Some(FrameEvent {
        kind,
        header,
        rssi: meta.rssi,
        channel: meta.channel,
        body,
    })
}

/// Data headers grow by addr4 (WDS), QoS control and HT control.
fn data_header_len(fc: FrameControl) -> usize {
    let mut len = MAC_HEADER_LEN;
    if fc.to_ds() && fc.from_ds() {
        len += 6;
    }
    if fc.subtype() & SUBTYPE_QOS_FLAG != 0 {
        len += 2;
        if fc.order() {
            len += 4;
        }
    }
    len
}
