//! Radio collaborator and the receive hand-off
//!
//! The receive callback only counts and enqueues. Everything that mutates
//! engine state happens on the single consumer of the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use thiserror::Error;

pub const MIN_CHANNEL: u8 = 1;
pub const MAX_CHANNEL: u8 = 13;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("driver error: {0}")]
    Driver(String),
    #[error("invalid channel {0} (expected 1-13)")]
    InvalidChannel(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "capture")]
    #[error("pcap: {0}")]
    Pcap(#[from] pcap::Error),
}

pub fn valid_channel(channel: u8) -> bool {
    (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel)
}

/// The radio hardware as seen by the engine. Power and initialisation are the
/// implementor's business.
pub trait Radio {
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError>;
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;
    fn transmit_raw(&mut self, frame: &[u8]) -> Result<(), RadioError>;
}

impl<R: Radio + ?Sized> Radio for Box<R> {
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
        (**self).set_promiscuous(enabled)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        (**self).set_channel(channel)
    }

    fn transmit_raw(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        (**self).transmit_raw(frame)
    }
}

/// Driver-level packet type hint delivered with each received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Management,
    Control,
    Data,
    Misc,
}

impl PacketKind {
    /// Derives the hint from the frame control type bits.
    pub fn of_frame(buf: &[u8]) -> Self {
        match buf.first().map(|b| (b >> 2) & 0x03) {
            Some(0) => PacketKind::Management,
            Some(1) => PacketKind::Control,
            Some(2) => PacketKind::Data,
            _ => PacketKind::Misc,
        }
    }
}

/// Owned copy of a received frame waiting for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub rssi: i8,
    pub channel: u8,
}

#[derive(Debug, Default)]
pub struct RxCounters {
    received: AtomicU64,
    management: AtomicU64,
    control: AtomicU64,
    data: AtomicU64,
    misc: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RxStats {
    pub received: u64,
    pub management: u64,
    pub control: u64,
    pub data: u64,
    pub misc: u64,
    pub enqueued: u64,
    /// Frames lost because the queue was full or closed.
    pub dropped: u64,
}

impl RxCounters {
    pub fn snapshot(&self) -> RxStats {
        RxStats {
            received: self.received.load(Ordering::Relaxed),
            management: self.management.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
            data: self.data.load(Ordering::Relaxed),
            misc: self.misc.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Producer half of the receive queue, handed to the capture callback.
#[derive(Debug, Clone)]
pub struct RxSender {
    tx: Sender<RxFrame>,
    counters: Arc<RxCounters>,
}

impl RxSender {
    /// Counts the frame and enqueues a copy without blocking. Control and misc
    /// frames are counted but never queued. Returns whether the frame was queued.
    pub fn on_frame(&self, buf: &[u8], rssi: i8, channel: u8, kind: PacketKind) -> bool {
        let c = &self.counters;
        c.received.fetch_add(1, Ordering::Relaxed);
        match kind {
            PacketKind::Management => c.management.fetch_add(1, Ordering::Relaxed),
            PacketKind::Data => c.data.fetch_add(1, Ordering::Relaxed),
            PacketKind::Control => {
                c.control.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            PacketKind::Misc => {
                c.misc.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let frame = RxFrame {
            data: buf.to_vec(),
            rssi,
            channel,
        };
        match self.tx.try_send(frame) {
            Ok(()) => {
                c.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                c.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn counters(&self) -> Arc<RxCounters> {
        Arc::clone(&self.counters)
    }
}

/// Bounded single-consumer queue between the capture callback and the engine.
pub fn rx_queue(capacity: usize) -> (RxSender, Receiver<RxFrame>) {
    let (tx, rx) = bounded(capacity);
    let sender = RxSender {
        tx,
        counters: Arc::new(RxCounters::default()),
    };
    (sender, rx)
}
