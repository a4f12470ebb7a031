//! Device registry
//!
//! One record per MAC address seen on air. Records are only removed by
//! [`DeviceRegistry::clear`].

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::ie::Encryption;
use crate::mac::MacAddr;

/// What a frame says about the device that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent a beacon or probe response.
    AccessPoint,
    /// Sent a probe request.
    Prober,
    /// Sent a data frame.
    Data,
    /// Anything else.
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub mac: MacAddr,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub packet_count: u64,
    pub rssi_avg: f32,
    pub rssi_max: i8,
    /// Channels in the order they were first observed.
    pub channels: Vec<u8>,
    pub ssid: String,
    pub encryption: Encryption,
    /// Channel from the AP's DS parameter set, when it advertises one.
    pub advertised_channel: Option<u8>,
    pub is_ap: bool,
    pub beacons: u32,
    pub probes: u32,
    pub data_frames: u32,
}

impl DeviceRecord {
    fn new(mac: MacAddr, rssi: i8, channel: u8, now_ms: u64) -> Self {
        Self {
            mac,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            packet_count: 1,
            rssi_avg: rssi as f32,
            rssi_max: rssi,
            channels: vec![channel],
            ssid: String::new(),
            encryption: Encryption::Open,
            advertised_channel: None,
            is_ap: false,
            beacons: 0,
            probes: 0,
            data_frames: 0,
        }
    }

    fn update(&mut self, rssi: i8, channel: u8, now_ms: u64) {
        self.last_seen_ms = now_ms;
        self.packet_count += 1;
        self.rssi_avg = self.rssi_avg * 0.9 + rssi as f32 * 0.1;
        self.rssi_max = self.rssi_max.max(rssi);
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
    }

    fn count_role(&mut self, role: Role) {
        match role {
            Role::AccessPoint => {
                self.is_ap = true;
                self.beacons = self.beacons.saturating_add(1);
            }
            Role::Prober => self.probes = self.probes.saturating_add(1),
            Role::Data => self.data_frames = self.data_frames.saturating_add(1),
            Role::Other => {}
        }
    }

    pub fn last_channel(&self) -> Option<u8> {
        self.channels.last().copied()
    }

    /// The advertised channel if there is one, else the last channel heard on.
    pub fn operating_channel(&self) -> Option<u8> {
        self.advertised_channel.or_else(|| self.last_channel())
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<MacAddr, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sighting of `mac`. An empty or absent SSID never replaces a known one.
    pub fn observe(
        &mut self,
        mac: MacAddr,
        rssi: i8,
        channel: u8,
        role: Role,
        ssid: Option<&str>,
        now_ms: u64,
    ) -> &mut DeviceRecord {
        let record = self
            .devices
            .entry(mac)
            .and_modify(|r| r.update(rssi, channel, now_ms))
            .or_insert_with(|| {
                info!("New device {} on channel {} ({} dBm)", mac, channel, rssi);
                DeviceRecord::new(mac, rssi, channel, now_ms)
            });

        record.count_role(role);

        if let Some(ssid) = ssid.filter(|s| !s.is_empty()) {
            if record.ssid.is_empty() {
                debug!("SSID for {} learned: {}", mac, ssid);
                record.ssid = ssid.to_string();
            }
        }
        record
    }

    pub fn get(&self, mac: &MacAddr) -> Option<&DeviceRecord> {
        self.devices.get(mac)
    }

    pub fn get_mut(&mut self, mac: &MacAddr) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(mac)
    }

    /// Known SSID for `mac`, empty when unknown or hidden.
    pub fn ssid_of(&self, mac: &MacAddr) -> &str {
        self.devices.get(mac).map(|r| r.ssid.as_str()).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Cloned records ordered by first sighting.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.first_seen_ms.cmp(&b.first_seen_ms).then(a.mac.cmp(&b.mac)));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}
