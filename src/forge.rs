//! Management frame serializers
//!
//! Every builder checks the destination buffer before writing and returns the
//! number of bytes written. Multi-byte fields are little-endian.

use thiserror::Error;

use crate::frame::MAC_HEADER_LEN;
use crate::ie::{MAX_SSID_LEN, TAG_DS_PARAMETER, TAG_RSN, TAG_SSID, TAG_SUPPORTED_RATES};
use crate::mac::MacAddr;

pub const DEAUTH_LEN: usize = MAC_HEADER_LEN + 2;
/// Largest beacon the flood will ever emit.
pub const MAX_BEACON_LEN: usize = 128;
pub const MAX_FRAME_LEN: usize = 256;

const BEACON_FIXED_LEN: usize = MAC_HEADER_LEN + 12 + 2 + 10 + 3;
const ASSOC_FIXED_LEN: usize = MAC_HEADER_LEN + 4 + 2 + 10 + 22;

const FC_ASSOC_REQUEST: [u8; 2] = [0x00, 0x00];
const FC_BEACON: [u8; 2] = [0x80, 0x00];
const FC_DEAUTH: [u8; 2] = [0xc0, 0x00];

/// 100 TU.
const BEACON_INTERVAL: u16 = 0x0064;
const CAPABILITY_ESS: u16 = 0x0001;
const CAPABILITY_ESS_PRIVACY: u16 = 0x0011;
const LISTEN_INTERVAL: u16 = 10;

const BEACON_RATES: [u8; 8] = [0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24];
const ASSOC_RATES: [u8; 8] = [0x82, 0x84, 0x8b, 0x96, 0x24, 0x30, 0x48, 0x6c];

/// RSN element body: version 1, CCMP group, one CCMP pairwise, one PSK AKM, no capabilities.
const RSN_CCMP_PSK: [u8; 20] = [
    0x01, 0x00, // version
    0x00, 0x0f, 0xac, 0x04, // group cipher
    0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, // pairwise ciphers
    0x01, 0x00, 0x00, 0x0f, 0xac, 0x02, // AKM suites
    0x00, 0x00, // RSN capabilities
];

/// Reason 7: class 3 frame received from nonassociated station.
pub const REASON_CLASS3_FROM_NONASSOC: u16 = 7;
pub const REASON_UNSPECIFIED: u16 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForgeError {
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("SSID is {0} bytes, at most 32 allowed")]
    SsidTooLong(usize),
}

/// Sequential writer over a buffer whose capacity was already checked.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8], needed: usize) -> Result<Self, ForgeError> {
        if buf.len() < needed {
            return Err(ForgeError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        Ok(Self { buf, pos: 0 })
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn header(&mut self, fc: [u8; 2], addr1: MacAddr, addr2: MacAddr, addr3: MacAddr, seq: u16) {
        self.put(&fc);
        self.put_u16(0);
        self.put(addr1.octets());
        self.put(addr2.octets());
        self.put(addr3.octets());
        self.put_u16((seq & 0x0fff) << 4);
    }

    fn element(&mut self, tag: u8, value: &[u8]) {
        self.put(&[tag, value.len() as u8]);
        self.put(value);
    }

    fn finish(self) -> usize {
        self.pos
    }
}

fn check_ssid(ssid: &[u8]) -> Result<(), ForgeError> {
    if ssid.len() > MAX_SSID_LEN {
        return Err(ForgeError::SsidTooLong(ssid.len()));
    }
    Ok(())
}

/// Deauthentication frame (26 bytes).
pub fn deauth(
    buf: &mut [u8],
    dest: MacAddr,
    src: MacAddr,
    bssid: MacAddr,
    reason: u16,
    seq: u16,
) -> Result<usize, ForgeError> {
    let mut w = Writer::new(buf, DEAUTH_LEN)?;
    w.header(FC_DEAUTH, dest, src, bssid, seq);
    w.put_u16(reason);
    Ok(w.finish())
}

pub fn beacon_len(ssid: &[u8]) -> usize {
    BEACON_FIXED_LEN + ssid.len()
}

/// Broadcast beacon advertising an open ESS named `ssid` on `channel`.
/// Source and BSSID come from [`ssid_mac`].
pub fn beacon(
    buf: &mut [u8],
    ssid: &[u8],
    channel: u8,
    timestamp_us: u64,
    seq: u16,
) -> Result<usize, ForgeError> {
    check_ssid(ssid)?;
    let mut w = Writer::new(buf, beacon_len(ssid))?;
    let bssid = ssid_mac(ssid);
    w.header(FC_BEACON, MacAddr::BROADCAST, bssid, bssid, seq);
    w.put(&timestamp_us.to_le_bytes());
    w.put_u16(BEACON_INTERVAL);
    w.put_u16(CAPABILITY_ESS);
    w.element(TAG_SSID, ssid);
    w.element(TAG_SUPPORTED_RATES, &BEACON_RATES);
    w.element(TAG_DS_PARAMETER, &[channel]);
    Ok(w.finish())
}

pub fn association_request_len(ssid: &[u8]) -> usize {
    ASSOC_FIXED_LEN + ssid.len()
}

/// Association request from `sta` to `ap` advertising WPA2-PSK with CCMP, which
/// is what makes an AP put a PMKID into the following M1.
pub fn association_request(
    buf: &mut [u8],
    ap: MacAddr,
    sta: MacAddr,
    ssid: &[u8],
    seq: u16,
) -> Result<usize, ForgeError> {
    check_ssid(ssid)?;
    let mut w = Writer::new(buf, association_request_len(ssid))?;
    w.header(FC_ASSOC_REQUEST, ap, sta, ap, seq);
    w.put_u16(CAPABILITY_ESS_PRIVACY);
    w.put_u16(LISTEN_INTERVAL);
    w.element(TAG_SSID, ssid);
    w.element(TAG_SUPPORTED_RATES, &ASSOC_RATES);
    w.element(TAG_RSN, &RSN_CCMP_PSK);
    Ok(w.finish())
}

/// Locally administered unicast address derived from the SSID (FNV-1a 64).
pub fn ssid_mac(ssid: &[u8]) -> MacAddr {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in ssid {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let h = hash.to_be_bytes();
    MacAddr([(h[0] & 0xfc) | 0x02, h[1], h[2], h[3], h[4], h[5]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{classify, FrameKind, RxMeta};
    use crate::ie::{classify_encryption, ds_channel, extract_ssid, Encryption};

    const STA: MacAddr = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const AP: MacAddr = MacAddr::new([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const META: RxMeta = RxMeta { rssi: 0, channel: 6 };

    #[test]
    fn test_deauth_layout() {
        let mut buf = [0u8; 64];
        let len = deauth(&mut buf, STA, AP, AP, 1, 0).unwrap();
        assert_eq!(len, 26);
        assert_eq!(buf[0], 0xc0);
        assert_eq!(buf[1], 0x00);
        assert_eq!(&buf[4..10], STA.octets());
        assert_eq!(&buf[10..16], AP.octets());
        assert_eq!(&buf[16..22], AP.octets());
        assert_eq!(&buf[24..26], &[0x01, 0x00]);
    }

    #[test]
    fn test_sequence_number_is_shifted() {
        let mut buf = [0u8; 26];
        deauth(&mut buf, STA, AP, AP, 7, 0x123).unwrap();
        assert_eq!(&buf[22..24], &[0x30, 0x12]);
        assert_eq!(&buf[24..26], &[0x07, 0x00]);
    }

    #[test]
    fn test_buffer_checked_before_write() {
        let mut buf = [0xeeu8; 25];
        let err = deauth(&mut buf, STA, AP, AP, 1, 0).unwrap_err();
        assert_eq!(err, ForgeError::BufferTooSmall { needed: 26, available: 25 });
        assert!(buf.iter().all(|b| *b == 0xee));

        let mut small = [0u8; 60];
        assert!(beacon(&mut small, b"0123456789", 1, 0, 0).is_err());
        assert!(association_request(&mut small, AP, STA, b"", 0).is_err());
    }

    #[test]
    fn test_ssid_too_long() {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let long = [b'x'; 33];
        assert_eq!(beacon(&mut buf, &long, 1, 0, 0), Err(ForgeError::SsidTooLong(33)));
        assert_eq!(
            association_request(&mut buf, AP, STA, &long, 0),
            Err(ForgeError::SsidTooLong(33))
        );
    }

    #[test]
    fn test_beacon_parses_back() {
        let mut buf = [0u8; MAX_BEACON_LEN];
        let len = beacon(&mut buf, b"Lab Net", 11, 0x0102_0304, 5).unwrap();
        assert_eq!(len, 51 + 7);

        let event = classify(&buf[..len], META).unwrap();
        assert_eq!(event.kind, FrameKind::Beacon);
        assert!(event.destination().is_broadcast());
        assert_eq!(event.source(), ssid_mac(b"Lab Net"));
        assert_eq!(event.bssid(), Some(ssid_mac(b"Lab Net")));
        assert_eq!(&event.body[..8], &0x0102_0304u64.to_le_bytes());
        assert_eq!(&event.body[8..12], &[0x64, 0x00, 0x01, 0x00]);

        let ies = &event.body[12..];
        assert_eq!(extract_ssid(ies), "Lab Net");
        assert_eq!(ds_channel(ies), Some(11));
        assert_eq!(classify_encryption(ies), Encryption::Open);
    }

    #[test]
    fn test_max_ssid_beacon_fits() {
        let mut buf = [0u8; MAX_BEACON_LEN];
        let len = beacon(&mut buf, &[b'a'; 32], 1, 0, 0).unwrap();
        assert!(len <= MAX_BEACON_LEN);
    }

    #[test]
    fn test_association_request_layout() {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = association_request(&mut buf, AP, STA, b"lab", 0).unwrap();
        assert_eq!(len, 62 + 3);

        let event = classify(&buf[..len], META).unwrap();
        assert_eq!(event.kind, FrameKind::Management(0));
        assert_eq!(event.destination(), AP);
        assert_eq!(event.source(), STA);
        assert_eq!(&event.body[..4], &[0x11, 0x00, 0x0a, 0x00]);

        let ies = &event.body[4..];
        assert_eq!(extract_ssid(ies), "lab");
        assert_eq!(classify_encryption(ies), Encryption::Wpa2);
        assert_eq!(&buf[len - 22..len - 20], &[0x30, 0x14]);
        assert_eq!(&buf[len - 6..len - 2], &[0x00, 0x0f, 0xac, 0x02]);
    }

    #[test]
    fn test_association_request_empty_ssid() {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = association_request(&mut buf, AP, STA, b"", 0).unwrap();
        assert_eq!(len, 62);
        assert_eq!(&buf[28..30], &[0x00, 0x00]);
    }

    #[test]
    fn test_ssid_mac_is_stable_and_local() {
        let a = ssid_mac(b"Free WiFi");
        assert_eq!(a, ssid_mac(b"Free WiFi"));
        assert_ne!(a, ssid_mac(b"Free WiFi 2"));
        assert!(a.is_locally_administered());
        assert!(!a.is_multicast());
    }
}
