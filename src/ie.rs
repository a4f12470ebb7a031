//! Information-element scanning
//!
//! Walks `(tag, length, value)` records in management frame bodies and EAPOL
//! key data. The walk ends at the first record whose declared length runs past
//! the buffer.

use serde::Serialize;

pub const TAG_SSID: u8 = 0;
pub const TAG_SUPPORTED_RATES: u8 = 1;
pub const TAG_DS_PARAMETER: u8 = 3;
pub const TAG_RSN: u8 = 48;
pub const TAG_VENDOR_SPECIFIC: u8 = 221;

pub const MAX_SSID_LEN: usize = 32;

/// Microsoft OUI carrying the WPA1 element (type 1).
pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
const WPA_OUI_TYPE: u8 = 0x01;

/// Capability-information privacy bit.
pub const CAPABILITY_PRIVACY: u16 = 0x0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoElement<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Iterator over the well-formed prefix of an IE sequence.
#[derive(Debug, Clone)]
pub struct IeIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for IeIter<'a> {
    type Item = InfoElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.buf.get(self.offset..self.offset + 2)?;
        let (tag, len) = (header[0], header[1] as usize);
        let start = self.offset + 2;
        let Some(value) = self.buf.get(start..start + len) else {
            self.offset = self.buf.len();
            return None;
        };
        self.offset = start + len;
        Some(InfoElement { tag, value })
    }
}

pub fn elements(buf: &[u8]) -> IeIter<'_> {
    IeIter { buf, offset: 0 }
}

/// Raw SSID bytes, or `None` when hidden (absent, empty, all-NUL, over 32 bytes).
pub fn ssid_bytes(ies: &[u8]) -> Option<&[u8]> {
    let ie = elements(ies).find(|ie| ie.tag == TAG_SSID)?;
    let value = ie.value;
    if value.is_empty() || value.len() > MAX_SSID_LEN || value.iter().all(|b| *b == 0) {
        return None;
    }
    Some(value)
}

/// SSID as text; an empty string means hidden.
pub fn extract_ssid(ies: &[u8]) -> String {
    ssid_bytes(ies)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

/// Channel advertised in the DS parameter set.
pub fn ds_channel(ies: &[u8]) -> Option<u8> {
    elements(ies)
        .find(|ie| ie.tag == TAG_DS_PARAMETER)
        .and_then(|ie| ie.value.first().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Encryption {
    #[default]
    Open,
    Wep,
    Wpa,
    Wpa2,
}

/// RSN element means WPA2, the Microsoft WPA vendor element means WPA.
pub fn classify_encryption(ies: &[u8]) -> Encryption {
    let mut wpa = false;
    for ie in elements(ies) {
        match ie.tag {
            TAG_RSN => return Encryption::Wpa2,
            TAG_VENDOR_SPECIFIC if is_vendor(ie.value, WPA_OUI, WPA_OUI_TYPE) => wpa = true,
            _ => {}
        }
    }
    if wpa {
        Encryption::Wpa
    } else {
        Encryption::Open
    }
}

/// Like [`classify_encryption`], falling back to the capability privacy bit for WEP.
pub fn classify_with_capability(ies: &[u8], capability: u16) -> Encryption {
    match classify_encryption(ies) {
        Encryption::Open if capability & CAPABILITY_PRIVACY != 0 => Encryption::Wep,
        other => other,
    }
}

/// Finds a vendor-specific element (tag 0xDD) by OUI and type and returns the
/// bytes after the type octet.
pub fn find_vendor_kde(buf: &[u8], oui: [u8; 3], kind: u8) -> Option<&[u8]> {
    elements(buf)
        .filter(|ie| ie.tag == TAG_VENDOR_SPECIFIC)
        .find(|ie| is_vendor(ie.value, oui, kind))
        .map(|ie| &ie.value[4..])
}

fn is_vendor(value: &[u8], oui: [u8; 3], kind: u8) -> bool {
    value.len() >= 4 && value[..3] == oui && value[3] == kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ssid() {
        assert_eq!(extract_ssid(&[0x00, 0x04, b'T', b'E', b'S', b'T']), "TEST");
    }

    #[test]
    fn test_declared_length_past_end_is_hidden() {
        let mut buf = vec![0x00, 0x20];
        buf.extend_from_slice(&[b'A'; 31]);
        assert_eq!(buf.len(), 33);
        assert_eq!(extract_ssid(&buf), "");
        assert_eq!(elements(&buf).count(), 0);
    }

    #[test]
    fn test_hidden_ssids() {
        assert_eq!(extract_ssid(&[0x00, 0x00]), "");
        assert_eq!(extract_ssid(&[0x00, 0x03, 0, 0, 0]), "");
        assert_eq!(extract_ssid(&[0x01, 0x01, 0x82]), "");
        assert_eq!(extract_ssid(&[]), "");
    }

    #[test]
    fn test_walk_stops_at_truncated_element() {
        let buf = [0x01, 0x01, 0x82, 0x03, 0x01, 0x06, 0x30, 0xff, 0x01];
        let tags: Vec<u8> = elements(&buf).map(|ie| ie.tag).collect();
        assert_eq!(tags, vec![TAG_SUPPORTED_RATES, TAG_DS_PARAMETER]);
        assert_eq!(ds_channel(&buf), Some(6));
        // the truncated RSN element is never reported
        assert_eq!(classify_encryption(&buf), Encryption::Open);
    }

    #[test]
    fn test_adversarial_lengths_never_panic() {
        for len in 0..=255u8 {
            for total in 0..8usize {
                let mut buf = vec![TAG_VENDOR_SPECIFIC, len];
                buf.extend(std::iter::repeat(0x00).take(total));
                let _ = elements(&buf).count();
                let _ = find_vendor_kde(&buf, [0, 0, 0], 0);
                let _ = extract_ssid(&buf);
            }
        }
    }

    #[test]
    fn test_classify_encryption() {
        let rsn = [0x30, 0x02, 0x01, 0x00];
        assert_eq!(classify_encryption(&rsn), Encryption::Wpa2);

        let wpa = [0xdd, 0x06, 0x00, 0x50, 0xf2, 0x01, 0x01, 0x00];
        assert_eq!(classify_encryption(&wpa), Encryption::Wpa);

        let wmm = [0xdd, 0x05, 0x00, 0x50, 0xf2, 0x02, 0x00];
        assert_eq!(classify_encryption(&wmm), Encryption::Open);

        let both = [wpa.as_slice(), rsn.as_slice()].concat();
        assert_eq!(classify_encryption(&both), Encryption::Wpa2);
    }

    #[test]
    fn test_privacy_bit_means_wep() {
        assert_eq!(classify_with_capability(&[], 0x0011), Encryption::Wep);
        assert_eq!(classify_with_capability(&[], 0x0001), Encryption::Open);
        assert_eq!(classify_with_capability(&[0x30, 0x00], 0x0011), Encryption::Wpa2);
    }

    #[test]
    fn test_find_vendor_kde() {
        let mut buf = vec![0xdd, 0x05, 0x00, 0x50, 0xf2, 0x02, 0x00];
        buf.extend_from_slice(&[0xdd, 0x06, 0x00, 0x0f, 0xac, 0x04, 0xab, 0xcd]);
        assert_eq!(find_vendor_kde(&buf, [0x00, 0x0f, 0xac], 0x04), Some(&[0xab, 0xcd][..]));
        assert_eq!(find_vendor_kde(&buf, [0x00, 0x0f, 0xac], 0x01), None);
    }
}
