#![allow(dead_code)]

use std::sync::Arc;

use airsniff::{AttackConfig, Engine, ManualClock, MacAddr, Radio, RadioError};

pub const AP: MacAddr = MacAddr([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]);
pub const STA: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);

pub const KI_M1: u16 = 0x008a;
pub const KI_M2: u16 = 0x010a;
pub const KI_M3: u16 = 0x13ca;
pub const KI_M4: u16 = 0x030a;

/// Records everything the engine asks of the hardware.
#[derive(Debug, Default)]
pub struct MockRadio {
    pub sent: Vec<Vec<u8>>,
    pub channel: u8,
    pub promiscuous: Option<bool>,
    pub fail_transmit: bool,
    pub fail_channel: bool,
}

impl Radio for MockRadio {
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.promiscuous = Some(enabled);
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if self.fail_channel {
            return Err(RadioError::Driver("device busy".into()));
        }
        self.channel = channel;
        Ok(())
    }

    fn transmit_raw(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        if self.fail_transmit {
            return Err(RadioError::Driver("tx queue full".into()));
        }
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

pub fn engine() -> (Engine<MockRadio>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = Engine::new(MockRadio::default(), AttackConfig::default(), clock.clone());
    (engine, clock)
}

pub fn beacon(bssid: MacAddr, ssid: &str, rsn: bool) -> Vec<u8> {
    let mut buf = vec![0x80, 0x00, 0x00, 0x00];
    buf.extend_from_slice(&[0xff; 6]);
    buf.extend_from_slice(bssid.octets());
    buf.extend_from_slice(bssid.octets());
    buf.extend_from_slice(&[0x10, 0x00]);
    buf.extend_from_slice(&[0u8; 8]);
    buf.extend_from_slice(&[0x64, 0x00]);
    buf.extend_from_slice(&[0x11, 0x00]);
    buf.push(0x00);
    buf.push(ssid.len() as u8);
    buf.extend_from_slice(ssid.as_bytes());
    if rsn {
        buf.extend_from_slice(&[
            0x30, 0x14, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04,
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x02, 0x00, 0x00,
        ]);
    }
    buf
}

/// EAPOL-Key frame starting at the version byte.
pub fn eapol_key(key_info: u16, replay: u64, nonce: [u8; 32], mic: [u8; 16], key_data: &[u8]) -> Vec<u8> {
    let body_len = 95 + key_data.len();
    let mut f = vec![0x02, 0x03];
    f.extend_from_slice(&(body_len as u16).to_be_bytes());
    f.push(0x02);
    f.extend_from_slice(&key_info.to_be_bytes());
    f.extend_from_slice(&16u16.to_be_bytes());
    f.extend_from_slice(&replay.to_be_bytes());
    f.extend_from_slice(&nonce);
    f.extend_from_slice(&[0u8; 16 + 8 + 8]);
    f.extend_from_slice(&mic);
    f.extend_from_slice(&(key_data.len() as u16).to_be_bytes());
    f.extend_from_slice(key_data);
    f
}

/// Plain data frame carrying `eapol`. `from_ap` picks the DS direction.
pub fn data_frame(ap: MacAddr, sta: MacAddr, from_ap: bool, eapol: &[u8]) -> Vec<u8> {
    let (fc1, addr1, addr2) = if from_ap { (0x02, sta, ap) } else { (0x01, ap, sta) };
    let mut buf = vec![0x08, fc1, 0x00, 0x00];
    buf.extend_from_slice(addr1.octets());
    buf.extend_from_slice(addr2.octets());
    buf.extend_from_slice(ap.octets());
    buf.extend_from_slice(&[0x20, 0x00]);
    buf.extend_from_slice(&[0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e]);
    buf.extend_from_slice(eapol);
    buf
}

pub fn pmkid_kde(pmkid: [u8; 16]) -> Vec<u8> {
    let mut kde = vec![0xdd, 0x14, 0x00, 0x0f, 0xac, 0x04];
    kde.extend_from_slice(&pmkid);
    kde
}

pub fn m1(ap: MacAddr, sta: MacAddr, key_data: &[u8]) -> Vec<u8> {
    data_frame(ap, sta, true, &eapol_key(KI_M1, 1, [0xa1; 32], [0; 16], key_data))
}

pub fn m2_eapol() -> Vec<u8> {
    eapol_key(KI_M2, 1, [0xb2; 32], [0x5c; 16], &[])
}

pub fn m2(ap: MacAddr, sta: MacAddr) -> Vec<u8> {
    data_frame(ap, sta, false, &m2_eapol())
}

pub fn m3(ap: MacAddr, sta: MacAddr) -> Vec<u8> {
    data_frame(ap, sta, true, &eapol_key(KI_M3, 2, [0xa1; 32], [0x3c; 16], &[]))
}

pub fn m4(ap: MacAddr, sta: MacAddr) -> Vec<u8> {
    data_frame(ap, sta, false, &eapol_key(KI_M4, 2, [0; 32], [0x4c; 16], &[]))
}
