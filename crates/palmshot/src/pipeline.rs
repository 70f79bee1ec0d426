//! The per-frame gesture loop and the interfaces it talks to.

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use image::RgbaImage;

use crate::{
    draw,
    gesture::Gesture,
    hand::landmarker::HandLandmarker,
    timer::{FpsCounter, Timer},
    trigger::PalmFistTrigger,
};

/// Label drawn while a confirmed open palm is visible.
pub const PALM_LABEL: &str = "Open Palm";

/// Label drawn on the frame that starts a screenshot.
pub const FIST_LABEL: &str = "Fist Detected! Taking Screenshot!";

const PALM_LABEL_POS: (i32, i32) = (50, 50);
const FIST_LABEL_POS: (i32, i32) = (50, 100);

/// A stream of camera frames.
pub trait FrameSource {
    /// Returns the next frame, or `None` when the stream has ended.
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbaImage>>;

    /// Profiling timers to report along with the frame rate.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// Where annotated frames go.
pub trait FrameSink {
    fn show(&mut self, frame: &RgbaImage) -> anyhow::Result<()>;

    /// Returns `true` once the user asked to stop.
    fn quit_requested(&self) -> bool;
}

/// Takes screenshots on request.
pub trait Capture {
    /// Asks for a screenshot.
    ///
    /// Returns `false` if the request was dropped because a previous one is still in progress.
    fn request_capture(&mut self) -> bool;

    /// Returns the error of a previously requested capture that failed, if any.
    fn poll_error(&mut self) -> anyhow::Result<()>;

    /// Waits for a capture that is still in progress, then reports its error like
    /// [`Capture::poll_error`].
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// A [`FrameSink`] that discards all frames.
#[derive(Debug, Default)]
pub struct Headless;

impl FrameSink for Headless {
    fn show(&mut self, _frame: &RgbaImage) -> anyhow::Result<()> {
        Ok(())
    }

    fn quit_requested(&self) -> bool {
        false
    }
}

/// What happened while processing one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Classification of every detected hand, in detection order.
    pub gestures: Vec<Gesture>,
    /// Whether the open palm label was drawn.
    pub palm_confirmed: bool,
    /// Whether the trigger fired.
    pub triggered: bool,
    /// Whether a screenshot was actually started. This is `false` if the trigger fired while a
    /// previous screenshot was still in progress.
    pub capture_started: bool,
}

/// Reads frames, finds hands, and takes a screenshot when an open palm closes into a fist.
pub struct GestureLoop<S, L, C, K> {
    source: S,
    landmarker: L,
    capture: C,
    sink: K,
    trigger: PalmFistTrigger,
    mirror: bool,
    t_detect: Timer,
    t_show: Timer,
    fps: FpsCounter,
}

impl<S, L, C, K> GestureLoop<S, L, C, K>
where
    S: FrameSource,
    L: HandLandmarker,
    C: Capture,
    K: FrameSink,
{
    pub fn new(source: S, landmarker: L, capture: C, sink: K, trigger: PalmFistTrigger) -> Self {
        Self {
            source,
            landmarker,
            capture,
            sink,
            trigger,
            mirror: true,
            t_detect: Timer::new("detect"),
            t_show: Timer::new("show"),
            fps: FpsCounter::new("gesture loop"),
        }
    }

    /// Selects whether frames are flipped horizontally before detection and display.
    ///
    /// Mirroring is enabled by default, so that moving a hand to the right also moves it to the
    /// right on screen.
    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn trigger(&self) -> &PalmFistTrigger {
        &self.trigger
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Runs until the frame source ends or the sink asks to quit.
    pub fn run(&mut self) -> anyhow::Result<()> {
        log::info!("show an open palm, then close it into a fist to take a screenshot");
        loop {
            let Some(mut frame) = self.source.read_frame()? else {
                log::info!("frame source ended");
                break;
            };

            self.process_frame(&mut frame)?;
            self.t_show.time(|| self.sink.show(&frame))?;

            if self.sink.quit_requested() {
                log::info!("quitting");
                break;
            }
            self.fps.tick_with(
                self.source
                    .timers()
                    .into_iter()
                    .chain(self.landmarker.timers())
                    .chain([&self.t_detect, &self.t_show]),
            );
        }

        self.capture.finish()
    }

    /// Detects hands in `frame`, updates the trigger, requests a screenshot when it fires, and
    /// draws the overlay onto `frame`.
    ///
    /// Frames without any hand leave the trigger untouched. When several hands are visible, they
    /// are fed to the trigger in detection order, so a frame showing both a palm and a fist can
    /// have a different outcome depending on which hand the detector reported first.
    pub fn process_frame(&mut self, frame: &mut RgbaImage) -> anyhow::Result<FrameOutcome> {
        self.capture.poll_error()?;

        if self.mirror {
            image::imageops::flip_horizontal_in_place(frame);
        }

        let hands = self.t_detect.time(|| self.landmarker.detect(frame))?;

        let mut outcome = FrameOutcome::default();
        for hand in &hands {
            hand.draw(frame);

            let gesture = Gesture::classify(hand);
            outcome.gestures.push(gesture);
            if self.trigger.update(gesture).is_some() {
                outcome.triggered = true;
            }
            if gesture == Gesture::Palm && self.trigger.is_palm_confirmed() {
                outcome.palm_confirmed = true;
            }
        }
        if !hands.is_empty() {
            log::trace!("gestures: {:?}", outcome.gestures);
        }

        if outcome.palm_confirmed {
            let (x, y) = PALM_LABEL_POS;
            draw::text(frame, x, y, PALM_LABEL)
                .large()
                .align_left()
                .align_baseline()
                .color(Rgb888::GREEN);
        }
        if outcome.triggered {
            outcome.capture_started = self.capture.request_capture();
            if outcome.capture_started {
                log::info!("fist after open palm, taking screenshot");
                let (x, y) = FIST_LABEL_POS;
                draw::text(frame, x, y, FIST_LABEL)
                    .large()
                    .align_left()
                    .align_baseline()
                    .color(Rgb888::RED);
            } else {
                log::info!("fist after open palm, but a screenshot is already in progress");
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::anyhow;
    use image::Rgba;

    use crate::{gesture::FINGER_PAIRS, hand::landmark::HandLandmarks};

    use super::*;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    /// A hand in the lower right of the frame, away from the labels.
    fn hand(tip_offset: f32) -> HandLandmarks {
        let mut positions = [[500.0, 400.0, 0.0]; 21];
        for (i, (tip, pip)) in FINGER_PAIRS.iter().enumerate() {
            let x = 460.0 + i as f32 * 20.0;
            positions[*pip as usize] = [x, 380.0, 0.0];
            positions[*tip as usize] = [x, 380.0 + tip_offset, 0.0];
        }
        HandLandmarks::new(positions)
    }

    fn palm() -> Vec<HandLandmarks> {
        vec![hand(-40.0)]
    }

    fn fist() -> Vec<HandLandmarks> {
        vec![hand(15.0)]
    }

    fn nothing() -> Vec<HandLandmarks> {
        Vec::new()
    }

    struct Frames(usize);

    impl FrameSource for Frames {
        fn read_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(RgbaImage::new(WIDTH, HEIGHT)))
        }
    }

    /// Reports a scripted list of hands per frame and records the top-left pixel it was shown.
    struct Script {
        frames: VecDeque<Vec<HandLandmarks>>,
        corners: Vec<Rgba<u8>>,
    }

    impl Script {
        fn new(frames: Vec<Vec<HandLandmarks>>) -> Self {
            Self {
                frames: frames.into(),
                corners: Vec::new(),
            }
        }
    }

    impl HandLandmarker for Script {
        fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<HandLandmarks>> {
            self.corners.push(*image.get_pixel(0, 0));
            Ok(self.frames.pop_front().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct Recorder {
        requests: usize,
        busy: bool,
        error: Option<anyhow::Error>,
        /// Error of a capture that only completes once the loop waits for it.
        pending_error: Option<anyhow::Error>,
        finished: bool,
    }

    impl Capture for Recorder {
        fn request_capture(&mut self) -> bool {
            self.requests += 1;
            !self.busy
        }

        fn poll_error(&mut self) -> anyhow::Result<()> {
            match self.error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.finished = true;
            if let Some(e) = self.pending_error.take() {
                self.error = Some(e);
            }
            self.poll_error()
        }
    }

    #[derive(Default)]
    struct Screen {
        shown: usize,
        quit_after: Option<usize>,
    }

    impl FrameSink for Screen {
        fn show(&mut self, _frame: &RgbaImage) -> anyhow::Result<()> {
            self.shown += 1;
            Ok(())
        }

        fn quit_requested(&self) -> bool {
            self.quit_after.map_or(false, |n| self.shown >= n)
        }
    }

    type TestLoop = GestureLoop<Frames, Script, Recorder, Screen>;

    fn gesture_loop(frames: Vec<Vec<HandLandmarks>>) -> TestLoop {
        GestureLoop::new(
            Frames(frames.len()),
            Script::new(frames),
            Recorder::default(),
            Screen::default(),
            PalmFistTrigger::default(),
        )
    }

    fn process_all(gl: &mut TestLoop, n: usize) -> Vec<(FrameOutcome, RgbaImage)> {
        (0..n)
            .map(|_| {
                let mut frame = RgbaImage::new(WIDTH, HEIGHT);
                let outcome = gl.process_frame(&mut frame).unwrap();
                (outcome, frame)
            })
            .collect()
    }

    fn has_color_near(frame: &RgbaImage, (x, y): (i32, i32), color: [u8; 4]) -> bool {
        let (x, y) = (x as u32, y as u32);
        (x..x + 100).any(|px| (y - 15..y + 15).any(|py| frame.get_pixel(px, py).0 == color))
    }

    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn palm_then_fist_takes_screenshot() {
        let mut gl = gesture_loop(vec![palm(), palm(), palm(), fist()]);
        let results = process_all(&mut gl, 4);

        let triggered: Vec<_> = results.iter().map(|(o, _)| o.triggered).collect();
        assert_eq!(triggered, [false, false, false, true]);
        assert!(results[3].0.capture_started);
        assert_eq!(gl.capture().requests, 1);

        assert_eq!(results[0].0.gestures, [Gesture::Palm]);
        assert!(!results[1].0.palm_confirmed);
        assert!(results[2].0.palm_confirmed);

        assert!(!has_color_near(&results[1].1, PALM_LABEL_POS, GREEN));
        assert!(has_color_near(&results[2].1, PALM_LABEL_POS, GREEN));
        assert!(has_color_near(&results[3].1, FIST_LABEL_POS, RED));
        assert!(!has_color_near(&results[2].1, FIST_LABEL_POS, RED));
    }

    #[test]
    fn empty_frames_keep_state() {
        let mut gl = gesture_loop(vec![palm(), palm(), nothing(), palm(), nothing(), fist()]);
        let results = process_all(&mut gl, 6);
        assert!(results[5].0.triggered);
        assert!(results[2].0.gestures.is_empty());
        assert_eq!(gl.capture().requests, 1);
    }

    #[test]
    fn neither_resets() {
        let mut gl = gesture_loop(vec![
            palm(),
            palm(),
            vec![hand(0.0)],
            palm(),
            palm(),
            fist(),
        ]);
        let results = process_all(&mut gl, 6);
        assert_eq!(results[2].0.gestures, [Gesture::Neither]);
        assert!(results.iter().all(|(o, _)| !o.triggered));
        assert_eq!(gl.capture().requests, 0);
    }

    #[test]
    fn busy_capture() {
        let mut gl = gesture_loop(vec![palm(), palm(), palm(), fist()]);
        gl.capture.busy = true;
        let results = process_all(&mut gl, 4);
        assert!(results[3].0.triggered);
        assert!(!results[3].0.capture_started);
        assert!(!gl.trigger().is_armed());
        // No screenshot is taken, so none is announced.
        assert!(!has_color_near(&results[3].1, FIST_LABEL_POS, RED));
    }

    #[test]
    fn capture_errors_surface() {
        let mut gl = gesture_loop(vec![palm()]);
        gl.capture.error = Some(anyhow!("disk full"));
        let mut frame = RgbaImage::new(WIDTH, HEIGHT);
        let err = gl.process_frame(&mut frame).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn mirroring() {
        let mut gl = gesture_loop(vec![nothing(), nothing()]);
        let mut frame = RgbaImage::new(WIDTH, HEIGHT);
        frame.put_pixel(WIDTH - 1, 0, Rgba([1, 2, 3, 4]));
        gl.process_frame(&mut frame).unwrap();
        assert_eq!(*frame.get_pixel(0, 0), Rgba([1, 2, 3, 4]));

        let mut gl = gl.mirror(false);
        let mut frame = RgbaImage::new(WIDTH, HEIGHT);
        frame.put_pixel(WIDTH - 1, 0, Rgba([1, 2, 3, 4]));
        gl.process_frame(&mut frame).unwrap();
        assert_eq!(*frame.get_pixel(0, 0), Rgba([0, 0, 0, 0]));

        assert_eq!(
            gl.landmarker.corners,
            [Rgba([1, 2, 3, 4]), Rgba([0, 0, 0, 0])]
        );
    }

    #[test]
    fn runs_until_source_ends() {
        let mut gl = gesture_loop(vec![palm(), palm(), palm(), fist(), palm()]);
        gl.run().unwrap();
        assert_eq!(gl.sink().shown, 5);
        assert_eq!(gl.capture().requests, 1);
    }

    #[test]
    fn runs_until_quit() {
        let mut gl = gesture_loop(vec![palm(); 10]);
        gl.sink.quit_after = Some(3);
        gl.run().unwrap();
        assert_eq!(gl.sink().shown, 3);
    }

    #[test]
    fn run_reports_late_capture_error() {
        let mut gl = gesture_loop(Vec::new());
        gl.capture.error = Some(anyhow!("clipboard unavailable"));
        assert!(gl.run().is_err());
    }

    #[test]
    fn run_waits_for_capture_in_progress() {
        let mut gl = gesture_loop(vec![palm(), palm(), palm(), fist()]);
        gl.capture.pending_error = Some(anyhow!("display server went away"));
        let err = gl.run().unwrap_err();
        assert_eq!(err.to_string(), "display server went away");
        assert!(gl.capture().finished);
    }
}
