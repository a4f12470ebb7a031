//! 802.11 monitoring core: frame classification, device tracking, WPA
//! handshake and PMKID capture, rate-limited injection and hashcat 22000 export.

pub mod attack;
pub mod clock;
pub mod config;
pub mod eapol;
pub mod engine;
pub mod error;
pub mod export;
pub mod forge;
pub mod frame;
pub mod handshake;
pub mod ie;
pub mod mac;
pub mod pmkid;
pub mod radio;
pub mod radiotap;
pub mod registry;

#[cfg(feature = "capture")]
pub mod capture;

pub use attack::{AttackOutcome, FloodSummary};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AttackConfig, Config, ConfigError};
pub use engine::{Engine, EngineEvent, FrameStats, Summary};
pub use error::EngineError;
pub use export::ExportError;
pub use frame::RxMeta;
pub use handshake::{HandshakeId, HandshakeRecord, HandshakeState};
pub use mac::MacAddr;
pub use pmkid::{PmkidId, PmkidRecord};
pub use radio::{rx_queue, PacketKind, Radio, RadioError, RxFrame, RxSender};
pub use registry::DeviceRecord;
