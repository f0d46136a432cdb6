//! Discovery-to-frame walkthrough.
//!
//! Finds detectors on the given adapter IP, opens a session on the first
//! one, reads a few parameters, and snaps a single corrected frame.
//!
//! Usage: `cargo run --example acquire -- 192.168.1.100`

use kiran_io::{Adaptor, Config, LogSink, Param, Session};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let local_ip = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0".to_string())
        .parse()
        .expect("adapter IP must be a valid IPv4 address");

    let config = Config::default();

    let mut adaptor = Adaptor::new(local_ip);
    adaptor.set_probe(config.adapter.discovery_probe);
    adaptor.open().expect("failed to open adaptor");

    let detectors = adaptor
        .discover(Duration::from_millis(config.adapter.discovery_window_ms))
        .expect("discovery failed");
    if detectors.is_empty() {
        eprintln!("no detectors answered on {}", local_ip);
        return;
    }
    for det in &detectors {
        println!("found {}", det);
    }

    let session = Session::open(
        detectors[0].clone(),
        local_ip,
        &config,
        Arc::new(LogSink),
        Arc::new(LogSink),
    )
    .expect("failed to open session");

    if let Ok(value) = session.read(Param::IntegrationTime, 0) {
        println!("integration time: {:?} us", value.as_int());
    }
    if let Ok(value) = session.read(Param::GcuSerial, 0) {
        println!("GCU serial: {:?}", value);
    }

    match session.snap() {
        Ok(frame) => {
            let stats = session.grab_stats();
            println!(
                "snapped {}x{} frame @ {} bits ({} packets, {} lost)",
                frame.width(),
                frame.height(),
                frame.bit_depth(),
                stats.packets_received,
                stats.packets_lost
            );
        }
        Err(e) => eprintln!("snap failed: {}", e),
    }

    session.close();
}
