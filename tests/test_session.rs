// tests/test_session.rs — End-to-end: replay source → tracker → detector.

use thermocam_pcb::frame::ThermoFrame;
use thermocam_pcb::homography::Point2;
use thermocam_pcb::image::Image;
use thermocam_pcb::session::{Session, SessionConfig, TrackingPolicy};
use thermocam_pcb::source::{ReplaySource, TemperatureScale};

/// Blocky pseudo-random board, shifted by (dx, dy). Values are raw units of
/// the recorded scale (40 ≈ 31 °C, 200 ≈ 97 °C).
fn board(dx: isize, dy: isize) -> Image<u16> {
    Image::from_fn(128, 128, |x, y| {
        let bx = (x as isize - dx).div_euclid(6);
        let by = (y as isize - dy).div_euclid(6);
        let hash = (bx * 73_856_093) ^ (by * 19_349_663);
        if hash.rem_euclid(7) < 3 { 200 } else { 40 }
    })
}

/// Smooth 80×80 frame with one warm blob at (cx, cy).
fn warm_spot(cx: f32, cy: f32) -> Image<u16> {
    Image::from_fn(80, 80, |x, y| {
        let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
        (50.0 + 150.0 * (-d2 / 40.0).exp()) as u16
    })
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(policy: TrackingPolicy) -> SessionConfig {
    let mut cfg = SessionConfig {
        policy,
        ..SessionConfig::default()
    };
    cfg.heat_sources.rolling_window = 16;
    cfg
}

fn board_reference() -> ThermoFrame {
    let mut f = ThermoFrame::new(board(0, 0), TemperatureScale::recorded());
    f.add_poi("U1", Point2::new(64.0, 64.0));
    f.add_poi("U2", Point2::new(30.0, 90.0));
    f
}

// ===== Tracking policies =====

#[test]
fn sync_policy_follows_shift() {
    init_logging();
    let frames = vec![board(3, 2), board(3, 2)];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::On),
    );
    s.set_reference(board_reference()).unwrap();

    s.step().unwrap();
    s.step().unwrap();

    let snap = s.poi_snapshot();
    assert_eq!(snap.points.len(), 2);
    let u1 = &snap.points[0];
    assert!((u1.x - 67.0).abs() < 1.5 && (u1.y - 66.0).abs() < 1.5, "{u1:?}");
    assert!(u1.stability < 1.0);
    assert!(u1.temperature.is_finite());
}

#[test]
fn once_policy_tracks_first_frame_only() {
    let frames = vec![board(3, 2), board(-4, 5)];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::Once),
    );
    s.set_reference(board_reference()).unwrap();

    s.step().unwrap();
    let first = s.poi_snapshot().points[0].clone();
    s.step().unwrap();
    let second = s.poi_snapshot().points[0].clone();

    assert_eq!((first.x, first.y), (second.x, second.y));
}

#[test]
fn background_policy_then_finish() {
    init_logging();
    let frames = vec![board(3, 2); 3];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::Background),
    );
    s.set_reference(board_reference()).unwrap();

    for _ in 0..3 {
        s.step().unwrap();
    }
    s.finish().unwrap();

    let tracker = s.tracker().unwrap();
    assert!(!tracker.job_pending());
    assert!(tracker.jobs_started() >= 1);
    let u1 = &s.poi_snapshot().points[0];
    assert!((u1.x - 67.0).abs() < 1.5 && (u1.y - 66.0).abs() < 1.5, "{u1:?}");
}

#[test]
fn off_policy_keeps_reference_layout() {
    let frames = vec![board(3, 2)];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::Off),
    );
    s.set_reference(board_reference()).unwrap();
    let frame = s.step().unwrap();
    assert_eq!(frame.pois[0].position, Point2::new(64.0, 64.0));
    assert_eq!(s.tracker().unwrap().jobs_started(), 0);
}

// ===== Heat sources =====

#[test]
fn heat_sources_reported_inside_border() {
    init_logging();
    let frames = vec![warm_spot(40.0, 40.0); 3];
    let mut reference = ThermoFrame::new(warm_spot(40.0, 40.0), TemperatureScale::recorded());
    reference.add_poi("hot", Point2::new(40.0, 40.0));
    reference.border = vec![
        Point2::new(15.0, 15.0),
        Point2::new(65.0, 15.0),
        Point2::new(65.0, 65.0),
        Point2::new(15.0, 65.0),
    ];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::Off),
    );
    s.set_reference(reference).unwrap();

    for _ in 0..3 {
        s.step().unwrap();
    }

    let hs = s.heat_source_snapshot();
    let hottest = hs
        .sources
        .iter()
        .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
        .expect("heat source");
    assert!((hottest.x as i32 - 50).abs() <= 2 && (hottest.y as i32 - 50).abs() <= 2);
    assert!(hs.to_text().starts_with("heat_sources="));

    let temps = s.poi_snapshot().temperatures_text();
    assert!(temps.starts_with("hot="), "{temps}");
    assert!(s.detector().named_image("detail-ema-slow").is_some());
}

#[test]
fn no_border_no_heat_sources() {
    let frames = vec![warm_spot(40.0, 40.0)];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::Off),
    );
    s.step().unwrap();
    assert!(s.heat_source_snapshot().sources.is_empty());
    assert_eq!(s.detector().image_names().count(), 0);
}

#[test]
fn reference_from_source_then_track() {
    let frames = vec![board(0, 0), board(2, -1)];
    let mut s = Session::new(
        ReplaySource::new(frames, TemperatureScale::recorded()),
        config(TrackingPolicy::On),
    );
    s.reference_from_source().unwrap();
    assert!(s.reference().unwrap().pois.is_empty());
    let frame = s.step().unwrap();
    assert!(frame.pois.is_empty());
}

#[test]
fn compensation_png_installed_on_detector() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.png");
    image::GrayImage::from_pixel(80, 80, image::Luma([10u8]))
        .save(&path)
        .unwrap();

    let mut s = Session::new(
        ReplaySource::new(vec![warm_spot(40.0, 40.0)], TemperatureScale::recorded()),
        config(TrackingPolicy::Off),
    );
    s.load_compensation(&path).unwrap();
    let offsets = s.detector().compensation().expect("compensation installed");
    assert_eq!(offsets.dimensions(), (80, 80));
    assert_eq!(offsets.get(5, 5), 10.0);
    assert!(s.load_compensation(dir.path().join("missing.png")).is_err());
}
