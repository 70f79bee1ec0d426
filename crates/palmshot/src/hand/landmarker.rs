//! Hand detection and tracking.
//!
//! [`Landmarker`] runs a MediaPipe-style hand landmark network (`hand_landmark_full.onnx` or
//! `hand_landmark_lite.onnx`) on each frame. While no hand is tracked, it scans the largest
//! centered region of the frame that has the network's aspect ratio. Once a hand is found, the
//! next frame is only searched inside the padded bounding rectangle of the previous landmarks,
//! which keeps the hand at a resolution the network handles well.

use std::path::Path;

use anyhow::bail;
use image::RgbaImage;

use crate::{
    nn::{Cnn, Outputs},
    rect::Rect,
    timer::Timer,
};

use super::landmark::{HandLandmarks, NUM_LANDMARKS};

/// Produces hand landmarks for camera frames.
pub trait HandLandmarker {
    /// Detects the hands visible in `image`.
    ///
    /// Landmark positions are returned in `image` pixel coordinates. An empty list means that no
    /// hand was found.
    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<HandLandmarks>>;

    /// Profiling timers to report along with the frame rate.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// A network that estimates hand landmarks inside a region of an image.
pub trait LandmarkNetwork {
    /// Returns the resolution of the network input as `(width, height)`.
    fn input_resolution(&self) -> (u32, u32);

    /// Runs the network on the `roi` part of `image`.
    fn infer(&self, image: &RgbaImage, roi: Rect) -> anyhow::Result<Outputs>;
}

impl LandmarkNetwork for Cnn {
    fn input_resolution(&self) -> (u32, u32) {
        Cnn::input_resolution(self)
    }

    fn infer(&self, image: &RgbaImage, roi: Rect) -> anyhow::Result<Outputs> {
        self.estimate(image, roi)
    }
}

/// A [`Landmarker`] backed by an ONNX file.
pub type OnnxLandmarker = Landmarker<Cnn>;

/// Finds and tracks a single hand.
pub struct Landmarker<N: LandmarkNetwork> {
    network: N,
    aspect_ratio: f32,
    roi: Option<Rect>,
    detection_thresh: f32,
    tracking_thresh: f32,
    t_infer: Timer,
}

impl OnnxLandmarker {
    /// Loads the hand landmark network at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::new(Cnn::load(path)?))
    }
}

impl<N: LandmarkNetwork> Landmarker<N> {
    pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.3;

    pub const DEFAULT_TRACKING_THRESHOLD: f32 = 0.3;

    /// Padding added to each side of the landmarks' bounding rectangle, relative to its size.
    const ROI_PADDING: f32 = 0.3;

    pub fn new(network: N) -> Self {
        let (w, h) = network.input_resolution();
        Self {
            aspect_ratio: w as f32 / h as f32,
            network,
            roi: None,
            detection_thresh: Self::DEFAULT_DETECTION_THRESHOLD,
            tracking_thresh: Self::DEFAULT_TRACKING_THRESHOLD,
            t_infer: Timer::new("infer"),
        }
    }

    /// Sets the minimum presence confidence for a newly found hand to be reported.
    pub fn set_min_detection_confidence(&mut self, confidence: f32) {
        self.detection_thresh = confidence;
    }

    /// Sets the presence confidence below which a tracked hand is considered lost.
    ///
    /// When tracking is lost, the same frame is searched again as if no hand had been tracked.
    pub fn set_min_tracking_confidence(&mut self, confidence: f32) {
        self.tracking_thresh = confidence;
    }

    /// Returns the region of interest searched on the next frame, if a hand is being tracked.
    pub fn roi(&self) -> Option<Rect> {
        self.roi
    }

    fn estimate(&self, image: &RgbaImage, roi: Rect) -> anyhow::Result<HandLandmarks> {
        let outputs = self.t_infer.time(|| self.network.infer(image, roi))?;
        extract(&outputs, roi, self.network.input_resolution())
    }

    fn next_roi(&self, hand: &HandLandmarks) -> Option<Rect> {
        let rect = Rect::bounding(hand.positions().iter().map(|&[x, y, _]| [x, y]))?;
        let rect = rect
            .grow_rel(Self::ROI_PADDING)
            .grow_to_fit_aspect(self.aspect_ratio);
        if rect.width() < 1.0 || rect.height() < 1.0 {
            // Collapsed landmarks would leave nothing to look at.
            return None;
        }
        Some(rect)
    }
}

impl<N: LandmarkNetwork> HandLandmarker for Landmarker<N> {
    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<HandLandmarks>> {
        if let Some(roi) = self.roi {
            let hand = self.estimate(image, roi)?;
            if hand.presence() >= self.tracking_thresh {
                self.roi = self.next_roi(&hand);
                return Ok(vec![hand]);
            }

            log::trace!(
                "hand presence {}, tracking threshold {} -> LOST",
                hand.presence(),
                self.tracking_thresh,
            );
            self.roi = None;
        }

        let search = Rect::fit_aspect(image.width(), image.height(), self.aspect_ratio);
        let hand = self.estimate(image, search)?;
        if hand.presence() < self.detection_thresh {
            return Ok(Vec::new());
        }

        self.roi = self.next_roi(&hand);
        log::trace!("hand found, tracking {:?}", self.roi);
        Ok(vec![hand])
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_infer]
    }
}

/// Decodes the outputs of the hand landmark network.
///
/// Expected outputs are the screen landmarks (`[1, 63]`) followed by the presence flag
/// (`[1, 1]`). Further outputs (handedness, world landmarks) are ignored.
fn extract(outputs: &Outputs, roi: Rect, res: (u32, u32)) -> anyhow::Result<HandLandmarks> {
    if outputs.len() < 2 {
        bail!(
            "hand landmark network has {} outputs, expected at least 2",
            outputs.len()
        );
    }
    let screen_landmarks = &outputs[0];
    let presence_flag = &outputs[1];
    if screen_landmarks.len() != NUM_LANDMARKS * 3 || presence_flag.len() != 1 {
        bail!(
            "unexpected hand landmark network outputs {:?} and {:?}",
            screen_landmarks,
            presence_flag,
        );
    }

    let coords = screen_landmarks.as_slice();
    // The network's Z coordinate is scaled like X.
    let z_scale = roi.width() / res.0 as f32;
    let mut positions = [[0.0; 3]; NUM_LANDMARKS];
    for (out, chunk) in positions.iter_mut().zip(coords.chunks_exact(3)) {
        let [x, y] = roi.transform_out([chunk[0], chunk[1]], res);
        *out = [x, y, chunk[2] * z_scale];
    }

    let presence = presence_flag.as_slice()[0];
    Ok(HandLandmarks::new(positions).with_presence(presence))
}
