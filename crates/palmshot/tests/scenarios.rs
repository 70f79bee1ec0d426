//! End-to-end runs of the gesture loop with scripted hands and a fake screen.

use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use image::{Rgba, RgbaImage};
use palmshot::{
    capture::{worker::CaptureWorker, ScreenGrabber, ScreenshotStore, Screenshotter},
    gesture::{Gesture, FINGER_PAIRS},
    hand::{landmark::HandLandmarks, landmarker::HandLandmarker},
    pipeline::{FrameSource, GestureLoop, Headless},
    trigger::PalmFistTrigger,
};

#[derive(Clone, Copy)]
enum Pose {
    Palm,
    Fist,
    Mixed,
    Away,
}

use Pose::*;

fn hand(pose: Pose) -> Option<HandLandmarks> {
    let offsets: [f32; 4] = match pose {
        Palm => [-30.0; 4],
        Fist => [12.0; 4],
        Mixed => [-30.0, -30.0, 12.0, 12.0],
        Away => return None,
    };
    let mut positions = [[320.0, 300.0, 0.0]; 21];
    for (i, ((tip, pip), offset)) in FINGER_PAIRS.iter().zip(offsets).enumerate() {
        let x = 280.0 + i as f32 * 25.0;
        positions[*pip as usize] = [x, 260.0, 0.0];
        positions[*tip as usize] = [x, 260.0 + offset, 0.0];
    }
    Some(HandLandmarks::new(positions))
}

struct Camera {
    remaining: usize,
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(RgbaImage::from_pixel(640, 480, Rgba([40, 40, 40, 255]))))
    }
}

struct Performer {
    poses: VecDeque<Vec<Pose>>,
}

impl HandLandmarker for Performer {
    fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<HandLandmarks>> {
        let poses = self.poses.pop_front().unwrap_or_default();
        Ok(poses.into_iter().filter_map(hand).collect())
    }
}

struct FakeScreen {
    grabs: Arc<AtomicUsize>,
    broken: bool,
}

impl ScreenGrabber for FakeScreen {
    fn grab(&mut self) -> anyhow::Result<RgbaImage> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            bail!("display server went away");
        }
        Ok(RgbaImage::from_pixel(32, 18, Rgba([10, 20, 30, 255])))
    }
}

struct Setup {
    gestures: GestureLoop<Camera, Performer, CaptureWorker, Headless>,
    grabs: Arc<AtomicUsize>,
}

fn setup(dir: &Path, frames: Vec<Vec<Pose>>, broken: bool, delay: Duration) -> Setup {
    let grabs = Arc::new(AtomicUsize::new(0));
    let screen = FakeScreen {
        grabs: grabs.clone(),
        broken,
    };
    let capture = CaptureWorker::spawn(
        Screenshotter::new(Box::new(screen), ScreenshotStore::new(dir)),
        delay,
    )
    .unwrap();

    let gestures = GestureLoop::new(
        Camera {
            remaining: frames.len(),
        },
        Performer {
            poses: frames.into(),
        },
        capture,
        Headless,
        PalmFistTrigger::default(),
    );
    Setup { gestures, grabs }
}

fn single(poses: &[Pose]) -> Vec<Vec<Pose>> {
    poses.iter().map(|&p| vec![p]).collect()
}

fn wait_idle(worker: &CaptureWorker) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while worker.is_busy() {
        assert!(Instant::now() < deadline, "screenshot never finished");
        thread::sleep(Duration::from_millis(5));
    }
}

fn screenshots(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn palm_then_fist_writes_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("screenshots");
    let mut s = setup(
        &out,
        single(&[Away, Palm, Palm, Palm, Fist, Away]),
        false,
        Duration::ZERO,
    );

    s.gestures.run().unwrap();
    wait_idle(s.gestures.capture());

    let names = screenshots(&out);
    assert_eq!(names.len(), 1, "{names:?}");
    assert!(names[0].starts_with("screenshot_"), "{names:?}");
    assert!(names[0].ends_with("_0.png"), "{names:?}");

    let saved = image::open(out.join(&names[0])).unwrap().into_rgba8();
    assert_eq!(saved.dimensions(), (32, 18));
    assert_eq!(s.grabs.load(Ordering::SeqCst), 1);
}

#[test]
fn two_rounds_two_screenshots() {
    let dir = tempfile::tempdir().unwrap();
    let frames = single(&[Palm, Palm, Palm, Fist, Palm, Palm, Palm, Fist]);
    let mut s = setup(dir.path(), frames, false, Duration::ZERO);

    for _round in 0..2 {
        for _ in 0..4 {
            let mut frame = RgbaImage::new(640, 480);
            s.gestures.process_frame(&mut frame).unwrap();
        }
        wait_idle(s.gestures.capture());
    }

    let names = screenshots(dir.path());
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("_0.png")), "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("_1.png")), "{names:?}");
    assert_eq!(s.grabs.load(Ordering::SeqCst), 2);
}

#[test]
fn no_screenshot_without_confirmed_palm() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = setup(
        dir.path(),
        single(&[Palm, Palm, Mixed, Palm, Palm, Fist, Fist, Away, Fist]),
        false,
        Duration::ZERO,
    );
    s.gestures.run().unwrap();
    wait_idle(s.gestures.capture());

    assert!(screenshots(dir.path()).is_empty());
    assert_eq!(s.grabs.load(Ordering::SeqCst), 0);
}

#[test]
fn trigger_during_delay_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let frames = single(&[Palm, Palm, Palm, Fist, Palm, Palm, Palm, Fist]);
    let mut s = setup(dir.path(), frames, false, Duration::from_millis(300));

    let mut started = Vec::new();
    for _ in 0..8 {
        let mut frame = RgbaImage::new(640, 480);
        let outcome = s.gestures.process_frame(&mut frame).unwrap();
        if outcome.triggered {
            started.push(outcome.capture_started);
        }
    }
    assert_eq!(started, [true, false]);

    wait_idle(s.gestures.capture());
    assert_eq!(screenshots(dir.path()).len(), 1);
    assert_eq!(s.grabs.load(Ordering::SeqCst), 1);
}

#[test]
fn two_hands_share_one_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![
        vec![Palm, Away],
        vec![Palm],
        vec![Palm, Palm],
        vec![Fist, Palm],
    ];
    let mut s = setup(dir.path(), frames, false, Duration::ZERO);

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let mut frame = RgbaImage::new(640, 480);
        outcomes.push(s.gestures.process_frame(&mut frame).unwrap());
    }

    assert_eq!(outcomes[2].gestures, [Gesture::Palm, Gesture::Palm]);
    assert!(outcomes[2].palm_confirmed);
    assert!(outcomes[3].triggered);
    // The palm after the fist in the same frame starts a new streak.
    assert_eq!(s.gestures.trigger().palm_streak(), 1);
    assert!(!s.gestures.trigger().is_armed());
}

#[test]
fn failed_screenshot_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = setup(
        dir.path(),
        single(&[Palm, Palm, Palm, Fist]),
        true,
        Duration::ZERO,
    );

    for _ in 0..4 {
        let mut frame = RgbaImage::new(640, 480);
        s.gestures.process_frame(&mut frame).unwrap();
    }
    wait_idle(s.gestures.capture());

    let mut frame = RgbaImage::new(640, 480);
    let err = s.gestures.process_frame(&mut frame).unwrap_err();
    assert!(format!("{err:#}").contains("display server went away"), "{err:#}");
    assert!(screenshots(dir.path()).is_empty());
}

#[test]
fn screenshot_failing_after_last_frame_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = setup(
        dir.path(),
        single(&[Palm, Palm, Palm, Fist]),
        true,
        Duration::from_millis(100),
    );

    // The camera runs out while the screenshot is still waiting out its delay.
    let err = s.gestures.run().unwrap_err();
    assert!(format!("{err:#}").contains("display server went away"), "{err:#}");
    assert_eq!(s.grabs.load(Ordering::SeqCst), 1);
    assert!(!s.gestures.capture().is_busy());
}
