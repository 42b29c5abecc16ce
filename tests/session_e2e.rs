//! End-to-end tests for the LaserShark session against a simulated device.
//!
//! These tests drive the full connect -> set layer -> start -> poll -> done ->
//! disconnect -> reconnect lifecycle, with PNG data decoded by the real decoder.

#![cfg(all(feature = "testutils", feature = "png"))]

use std::thread;
use std::time::{Duration, Instant};

use lasershark::protocol::{CONTROL_INTERFACE, DATA_INTERFACE};
use lasershark::testutils::SimulatedDevice;
use lasershark::{JobState, LaserShark, Layer, SessionConfig, ZigZagLayer};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encode an 8-bit grayscale PNG.
fn gray_png(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().expect("png header");
        writer.write_image_data(pixels).expect("png data");
    }
    out
}

fn populated_layer(x: u32, y: u32, width: u32, height: u32, pixels: &[u8]) -> Box<dyn Layer> {
    let mut layer = ZigZagLayer::new();
    layer
        .populate(x, y, &gray_png(width, height, pixels))
        .expect("layer should populate");
    Box::new(layer)
}

fn wait_until_done(shark: &LaserShark<SimulatedDevice>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !shark.layer_done() {
        assert!(Instant::now() < deadline, "layer did not finish in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn white_square_streams_in_serpentine_order() {
    init_logging();
    let device = SimulatedDevice::new();
    let mut shark = LaserShark::new(device.clone());
    assert!(shark.connect().unwrap());

    assert!(shark.set_layer(populated_layer(10, 20, 2, 2, &[255; 4])));
    assert_eq!(shark.layer_total_samples(), 4);
    assert_eq!(shark.layer_samples_left(), 4);

    assert!(shark.start_layer().unwrap());
    wait_until_done(&shark);
    assert_eq!(shark.layer_error_message(), "");

    let samples = device.received_samples();
    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|s| s.is_on() && s.is_interleaved()));
    let xy: Vec<(u16, u16)> = samples.iter().map(|s| (s.x, s.y)).collect();
    assert_eq!(xy, vec![(10, 20), (11, 20), (11, 21), (10, 21)]);

    // The worker destroys the layer once it is done.
    assert_eq!(shark.layer_samples_left(), 0);
    assert_eq!(shark.layer_status().state, JobState::Idle);
    assert!(!device.output_enabled());

    shark.disconnect();
    assert!(!shark.is_connected());
}

#[test]
fn blank_pixels_are_sent_but_not_counted() {
    init_logging();
    let device = SimulatedDevice::new();
    let mut shark = LaserShark::new(device.clone());
    assert!(shark.connect().unwrap());

    // Lit pixels at both ends of the path keep the cursor moving across the zeros.
    let pixels = [200, 0, 0, 255, 0, 0];
    assert!(shark.set_layer(populated_layer(0, 0, 3, 2, &pixels)));
    assert_eq!(shark.layer_total_samples(), 2);

    assert!(shark.start_layer().unwrap());
    wait_until_done(&shark);
    assert_eq!(shark.layer_error_message(), "");

    // Each transfer asks for as many samples as there are lit pixels left.
    assert_eq!(device.transfer_sizes(), vec![16, 8, 8, 8, 8]);

    let samples = device.received_samples();
    let xy: Vec<(u16, u16)> = samples.iter().map(|s| (s.x, s.y)).collect();
    assert_eq!(xy, vec![(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]);
    let on: Vec<bool> = samples.iter().map(|s| s.is_on()).collect();
    assert_eq!(on, vec![true, false, false, false, false, true]);
}

#[test]
fn small_transfers_cover_the_whole_image() {
    init_logging();
    let device = SimulatedDevice::new();
    let config = SessionConfig::default().with_samples_per_transfer(5);
    let mut shark = LaserShark::with_config(device.clone(), config);
    assert!(shark.connect().unwrap());

    let pixels: Vec<u8> = (1..=12).collect();
    assert!(shark.set_layer(populated_layer(0, 0, 4, 3, &pixels)));
    assert!(shark.start_layer().unwrap());
    wait_until_done(&shark);

    assert_eq!(device.transfer_sizes(), vec![40, 40, 16]);
    let xy: Vec<(u16, u16)> = device
        .received_samples()
        .iter()
        .map(|s| (s.x, s.y))
        .collect();
    assert_eq!(
        xy,
        vec![
            (0, 0),
            (1, 0),
            (2, 0),
            (3, 0),
            (3, 1),
            (2, 1),
            (1, 1),
            (0, 1),
            (0, 2),
            (1, 2),
            (2, 2),
            (3, 2),
        ]
    );
}

#[test]
fn stop_during_stream_then_reconnect() {
    init_logging();
    let device = SimulatedDevice::new();
    let mut shark = LaserShark::new(device.clone());
    assert!(shark.connect().unwrap());

    device.set_hold_data(true);
    assert!(shark.set_layer(populated_layer(0, 0, 32, 32, &[255; 1024])));
    assert!(shark.start_layer().unwrap());
    assert!(shark.layer_running());
    assert!(!shark.set_layer(populated_layer(0, 0, 1, 1, &[255])));

    let releaser = {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            device.set_hold_data(false);
        })
    };
    shark.stop_and_clear_layer();
    releaser.join().unwrap();
    assert!(shark.layer_done());
    assert_eq!(shark.layer_total_samples(), 0);
    assert!(device.received_samples().len() < 1024);
    assert!(!device.output_enabled());

    shark.disconnect();
    assert!(!device.is_claimed(CONTROL_INTERFACE));
    assert!(!device.is_claimed(DATA_INTERFACE));
    assert_eq!(device.open_handles(), 0);

    assert!(shark.connect().unwrap());
    assert_eq!(shark.resolution().unwrap(), 4095);
    assert!(shark.set_layer(populated_layer(0, 0, 1, 1, &[255])));
}

#[test]
fn drop_releases_device() {
    init_logging();
    let device = SimulatedDevice::new();
    {
        let mut shark = LaserShark::new(device.clone());
        assert!(shark.connect().unwrap());
        device.set_drain_per_poll(0);
        assert!(shark.set_layer(populated_layer(0, 0, 8, 8, &[255; 64])));
        assert!(shark.start_layer().unwrap());
    }
    assert_eq!(device.open_handles(), 0);
    assert!(!device.is_claimed(CONTROL_INTERFACE));
    assert!(!device.output_enabled());
}

#[test]
fn rgb_png_layers_are_reduced_to_luma() {
    init_logging();
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 2, 1);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[255, 255, 255, 0, 0, 0]).unwrap();
    }

    let mut layer = ZigZagLayer::new();
    layer.populate(0, 0, &out).unwrap();
    assert_eq!(layer.total_samples(), 1);
    assert!(layer.populate(0, 0, &out).is_err());
}
