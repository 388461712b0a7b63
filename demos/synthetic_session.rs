// demos/synthetic_session.rs
//
// Drive a full session on a synthetic vibrating board with a component that
// heats up over time.
//
// Usage:
//   cargo run --example synthetic_session --release -- [frames] [policy] [poi.json]
//
//   frames   number of frames to generate (default 60)
//   policy   off | on | once | background (default background)
//   poi.json optional path; the final POI layout is written there
//
// Output (stdout): one line of POI temperatures and one line of heat sources
// per frame, in the plain-text form served to web clients. Set RUST_LOG=debug
// to see the tracker's decisions.

use thermocam_pcb::frame::ThermoFrame;
use thermocam_pcb::homography::Point2;
use thermocam_pcb::image::Image;
use thermocam_pcb::persist::write_poi_json;
use thermocam_pcb::session::{Session, SessionConfig, TrackingPolicy};
use thermocam_pcb::source::{ReplaySource, TemperatureScale};

use std::env;
use std::process;

const W: usize = 160;
const H: usize = 120;

/// Board texture offset by (dx, dy), with the regulator at `heat` raw units
/// above its idle level.
fn board(dx: isize, dy: isize, heat: f32) -> Image<u16> {
    Image::from_fn(W, H, |x, y| {
        let bx = x as isize - dx;
        let by = y as isize - dy;
        let pads = ((bx.div_euclid(7) * 31 + by.div_euclid(7) * 17).rem_euclid(5) < 2) as u16;
        let d2 = ((bx - 80) * (bx - 80) + (by - 60) * (by - 60)) as f32;
        let regulator = heat * (-d2 / 60.0).exp();
        (50.0 + 70.0 * pads as f32 + regulator).min(255.0) as u16
    })
}

fn parse_policy(s: &str) -> Option<TrackingPolicy> {
    match s {
        "off" => Some(TrackingPolicy::Off),
        "on" => Some(TrackingPolicy::On),
        "once" => Some(TrackingPolicy::Once),
        "background" => Some(TrackingPolicy::Background),
        _ => None,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let num_frames: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(60);
    let policy = match args.get(2).map(String::as_str) {
        None => TrackingPolicy::Background,
        Some(s) => parse_policy(s).unwrap_or_else(|| {
            eprintln!("Unknown tracking policy: {s}");
            eprintln!("Usage: {} [frames] [off|on|once|background] [poi.json]", args[0]);
            process::exit(1);
        }),
    };
    let export = args.get(3);

    // Camera shake: a slow circle of radius 3 px. The regulator warms up.
    let frames: Vec<Image<u16>> = (0..num_frames)
        .map(|i| {
            let t = i as f32 * 0.2;
            let dx = (3.0 * t.cos()).round() as isize;
            let dy = (3.0 * t.sin()).round() as isize;
            board(dx, dy, (i as f32 * 2.0).min(100.0))
        })
        .collect();

    let mut reference = ThermoFrame::new(board(0, 0, 0.0), TemperatureScale::recorded());
    reference.add_poi("U1", Point2::new(80.0, 60.0));
    reference.add_poi("C3", Point2::new(40.0, 30.0));
    reference.add_poi("R7", Point2::new(120.0, 95.0));
    reference.border = vec![
        Point2::new(50.0, 30.0),
        Point2::new(110.0, 30.0),
        Point2::new(110.0, 90.0),
        Point2::new(50.0, 90.0),
    ];

    let config = SessionConfig {
        policy,
        ..SessionConfig::default()
    };
    let source = ReplaySource::new(frames, TemperatureScale::recorded());
    let mut session = Session::new(source, config);
    if let Err(e) = session.set_reference(reference) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    for i in 0..num_frames {
        if let Err(e) = session.step() {
            eprintln!("Error on frame {i}: {e}");
            process::exit(1);
        }
        let pois = session.poi_snapshot().temperatures_text().replace('\n', " ");
        let hs = session.heat_source_snapshot().to_text();
        print!("frame {i:3}: {pois}| {hs}");
    }

    if let Err(e) = session.finish() {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    print!("final stability:\n{}", session.poi_snapshot().stability_text());
    for key in ["detail-ema-slow", "laplacian-medium-slow", "heat-sources"] {
        if let Some(img) = session.detector().named_image(key) {
            println!("{key}: {}", img.description);
        }
    }

    if let (Some(path), Some(frame)) = (export, session.current()) {
        match write_poi_json(path, frame) {
            Ok(()) => println!("POIs written to {path}"),
            Err(e) => {
                eprintln!("Error writing {path}: {e}");
                process::exit(1);
            }
        }
    }
}
