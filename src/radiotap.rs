//! Radiotap header handling for monitor-mode interfaces
//!
//! Only the fields in front of the antenna signal are walked: TSFT, flags,
//! rate, channel, FHSS and dBm signal. Alignment is relative to the start of
//! the header.

pub mod present {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const FHSS: u32 = 1 << 4;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const EXT: u32 = 1 << 31;
}

/// Flags field bit: the frame carries a trailing FCS.
const FLAG_FCS: u8 = 0x10;
const FCS_LEN: usize = 4;

/// Minimal header prepended to injected frames: version 0, length 8, nothing present.
pub const INJECT_HEADER: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadiotapInfo {
    /// Total radiotap header length.
    pub length: usize,
    pub flags: Option<u8>,
    pub frequency: Option<u16>,
    pub signal_dbm: Option<i8>,
}

impl RadiotapInfo {
    pub fn channel(&self) -> Option<u8> {
        self.frequency.and_then(freq_to_channel)
    }

    pub fn has_fcs(&self) -> bool {
        self.flags.map(|f| f & FLAG_FCS != 0).unwrap_or(false)
    }
}

/// 2.4 GHz frequency to channel number.
pub fn freq_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 if (freq - 2407) % 5 == 0 => Some(((freq - 2407) / 5) as u8),
        _ => None,
    }
}

pub fn parse(data: &[u8]) -> Option<RadiotapInfo> {
    if data.len() < 8 || data[0] != 0 {
        return None;
    }
    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if length < 8 || data.len() < length {
        return None;
    }
    let header = &data[..length];
    let bitmap = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    // skip extended presence bitmaps
    let mut pos = 4;
    let mut word = bitmap;
    while word & present::EXT != 0 {
        pos += 4;
        let next = header.get(pos..pos + 4)?;
        word = u32::from_le_bytes([next[0], next[1], next[2], next[3]]);
    }
    pos += 4;

    let mut info = RadiotapInfo {
        length,
        ..Default::default()
    };

    if bitmap & present::TSFT != 0 {
        field(header, &mut pos, 8, 8)?;
    }
    if bitmap & present::FLAGS != 0 {
        info.flags = Some(field(header, &mut pos, 1, 1)?[0]);
    }
    if bitmap & present::RATE != 0 {
        field(header, &mut pos, 1, 1)?;
    }
    if bitmap & present::CHANNEL != 0 {
        let ch = field(header, &mut pos, 2, 4)?;
        info.frequency = Some(u16::from_le_bytes([ch[0], ch[1]]));
    }
    if bitmap & present::FHSS != 0 {
        field(header, &mut pos, 1, 2)?;
    }
    if bitmap & present::DBM_ANTSIGNAL != 0 {
        info.signal_dbm = Some(field(header, &mut pos, 1, 1)?[0] as i8);
    }
    Some(info)
}

fn field<'a>(header: &'a [u8], pos: &mut usize, align: usize, size: usize) -> Option<&'a [u8]> {
    let start = (*pos + align - 1) / align * align;
    let bytes = header.get(start..start + size)?;
    *pos = start + size;
    Some(bytes)
}

/// Splits a captured packet into radiotap info and the bare 802.11 frame,
/// dropping the FCS when the flags announce one.
pub fn strip(packet: &[u8]) -> Option<(RadiotapInfo, &[u8])> {
    let info = parse(packet)?;
    let mut frame = &packet[info.length..];
    if info.has_fcs() && frame.len() >= FCS_LEN {
        frame = &frame[..frame.len() - FCS_LEN];
    }
    Some((info, frame))
}
