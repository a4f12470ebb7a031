//! libpcap capture and injection on a monitor-mode interface
//!
//! Two handles are opened on the interface: a blocking reader running on its
//! own thread that feeds an [`RxSender`], and a [`PcapRadio`] used by the
//! engine for channel changes and injection.

use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use pcap::{Active, Capture, Linktype};
use tracing::{debug, info, warn};

use crate::radio::{valid_channel, PacketKind, Radio, RadioError, RxSender};
use crate::radiotap::{self, INJECT_HEADER};

const LINKTYPE_IEEE802_11: Linktype = Linktype(105);
const LINKTYPE_RADIOTAP: Linktype = Linktype(127);

/// State shared between the capture thread and the radio handle.
#[derive(Debug)]
pub struct RadioState {
    promiscuous: AtomicBool,
    channel: AtomicU8,
}

impl RadioState {
    pub fn new(channel: u8) -> Arc<Self> {
        Arc::new(Self {
            promiscuous: AtomicBool::new(true),
            channel: AtomicU8::new(channel),
        })
    }

    pub fn promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::SeqCst)
    }
}

/// Reads frames until `running` goes false or the handle fails.
pub fn start_sniffing(
    interface: &str,
    sender: RxSender,
    state: Arc<RadioState>,
    running: Arc<AtomicBool>,
) -> Result<(), pcap::Error> {
    let mut cap = create_capture(interface)?;
    configure_capture(&mut cap)?;
    info!("Capturing on {} ({:?})", interface, cap.get_datalink());

    process_packets(&mut cap, sender, state, running)
}

fn create_capture(interface: &str) -> Result<Capture<Active>, pcap::Error> {
    Capture::from_device(interface)?
        .promisc(true)
        .snaplen(4096)
        .timeout(100)
        .immediate_mode(true)
        .open()
}

fn configure_capture(cap: &mut Capture<Active>) -> Result<(), pcap::Error> {
    let linktype = cap.get_datalink();
    if linktype != LINKTYPE_RADIOTAP && linktype != LINKTYPE_IEEE802_11 {
        cap.set_datalink(LINKTYPE_RADIOTAP)?;
    }
    Ok(())
}

fn process_packets(
    cap: &mut Capture<Active>,
    sender: RxSender,
    state: Arc<RadioState>,
    running: Arc<AtomicBool>,
) -> Result<(), pcap::Error> {
    let has_radiotap = cap.get_datalink() == LINKTYPE_RADIOTAP;

    while running.load(Ordering::SeqCst) {
        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => return Err(e),
        };
        // receive is paused while the radio transmits a flood
        if !state.promiscuous() {
            continue;
        }

        let (frame, rssi, channel) = if has_radiotap {
            let Some((info, frame)) = radiotap::strip(packet.data) else {
                debug!("Dropping packet with malformed radiotap header");
                continue;
            };
            let rssi = info.signal_dbm.unwrap_or(0);
            (frame, rssi, info.channel().unwrap_or_else(|| state.channel()))
        } else {
            (packet.data, 0, state.channel())
        };

        sender.on_frame(frame, rssi, channel, PacketKind::of_frame(frame));
    }
    Ok(())
}

/// Injection and channel control through libpcap and `iw`.
pub struct PcapRadio {
    cap: Capture<Active>,
    interface: String,
    state: Arc<RadioState>,
    radiotap: bool,
}

impl PcapRadio {
    pub fn open(interface: &str, state: Arc<RadioState>) -> Result<Self, RadioError> {
        let mut cap = create_capture(interface)?;
        configure_capture(&mut cap)?;
        let radiotap = cap.get_datalink() == LINKTYPE_RADIOTAP;
        Ok(Self {
            cap,
            interface: interface.to_string(),
            state,
            radiotap,
        })
    }
}

impl Radio for PcapRadio {
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.state.promiscuous.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if !valid_channel(channel) {
            return Err(RadioError::InvalidChannel(channel));
        }
        let channel_arg = channel.to_string();
        let status = Command::new("iw")
            .args(["dev", self.interface.as_str(), "set", "channel", channel_arg.as_str()])
            .status()?;
        if !status.success() {
            warn!("iw failed to set channel {} on {}", channel, self.interface);
            return Err(RadioError::Driver(format!(
                "iw exited with {} setting channel {}",
                status, channel
            )));
        }
        self.state.channel.store(channel, Ordering::SeqCst);
        Ok(())
    }

    fn transmit_raw(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        if self.radiotap {
            let mut packet = Vec::with_capacity(INJECT_HEADER.len() + frame.len());
            packet.extend_from_slice(&INJECT_HEADER);
            packet.extend_from_slice(frame);
            self.cap.sendpacket(packet)?;
        } else {
            self.cap.sendpacket(frame)?;
        }
        Ok(())
    }
}
