//! Runtime settings.
//!
//! [`Config::from_env`] starts from the defaults and applies these environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `PALMSHOT_HAND_MODEL` | `models/hand_landmark_full.onnx` | Hand landmark network |
//! | `PALMSHOT_MIN_DETECTION_CONFIDENCE` | `0.3` | Presence needed to pick up a new hand |
//! | `PALMSHOT_MIN_TRACKING_CONFIDENCE` | `0.3` | Presence needed to keep tracking a hand |
//! | `PALMSHOT_CONFIRM_FRAMES` | `3` | Consecutive palm frames that arm the trigger |
//! | `PALMSHOT_CAPTURE_DELAY_MS` | `3000` | Wait between the fist and the screenshot |
//! | `PALMSHOT_OUTPUT_DIR` | `screenshots` | Where screenshots are written |
//! | `PALMSHOT_CLIPBOARD` | `true` | Copy screenshots to the clipboard |
//! | `PALMSHOT_MIRROR` | `true` | Mirror camera frames horizontally |
//! | `PALMSHOT_HEADLESS` | `false` | Run without any window |
//! | `PALMSHOT_PREVIEW` | `true` | Show each screenshot in a window after taking it |
//! | `PALMSHOT_FPS` | unset | Desired webcam frame rate |
//!
//! `PALMSHOT_WEBCAM_NAME` is read by [`crate::video::webcam::Webcam::open`] itself.

use std::{
    env::{self, VarError},
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, bail, Context};

use crate::{capture::worker::DEFAULT_DELAY, trigger::DEFAULT_CONFIRM_FRAMES};

const DEFAULT_CONFIDENCE: f32 = 0.3;

/// Settings for one run of the gesture loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    hand_model: PathBuf,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    confirm_frames: u32,
    capture_delay: Duration,
    output_dir: PathBuf,
    clipboard: bool,
    mirror: bool,
    headless: bool,
    preview: bool,
    fps: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hand_model: PathBuf::from("models/hand_landmark_full.onnx"),
            min_detection_confidence: DEFAULT_CONFIDENCE,
            min_tracking_confidence: DEFAULT_CONFIDENCE,
            confirm_frames: DEFAULT_CONFIRM_FRAMES,
            capture_delay: DEFAULT_DELAY,
            output_dir: PathBuf::from("screenshots"),
            clipboard: true,
            mirror: true,
            headless: false,
            preview: true,
            fps: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key))
    }

    /// Reads the configuration through `lookup`, which behaves like [`std::env::var`].
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let mut config = Self::default();
        let var = |key: &str| -> anyhow::Result<Option<String>> {
            match lookup(key) {
                Ok(value) => {
                    log::debug!("`{key}` is set to '{value}'");
                    Ok(Some(value))
                }
                Err(VarError::NotPresent) => Ok(None),
                Err(e @ VarError::NotUnicode(_)) => Err(anyhow!("`{key}`: {e}")),
            }
        };

        if let Some(path) = var("PALMSHOT_HAND_MODEL")? {
            config.hand_model = path.into();
        }
        if let Some(c) = parse(&var, "PALMSHOT_MIN_DETECTION_CONFIDENCE")? {
            config.min_detection_confidence = c;
        }
        if let Some(c) = parse(&var, "PALMSHOT_MIN_TRACKING_CONFIDENCE")? {
            config.min_tracking_confidence = c;
        }
        if let Some(n) = parse(&var, "PALMSHOT_CONFIRM_FRAMES")? {
            config.confirm_frames = n;
        }
        if let Some(ms) = parse(&var, "PALMSHOT_CAPTURE_DELAY_MS")? {
            config.capture_delay = Duration::from_millis(ms);
        }
        if let Some(dir) = var("PALMSHOT_OUTPUT_DIR")? {
            config.output_dir = dir.into();
        }
        if let Some(b) = parse_bool(&var, "PALMSHOT_CLIPBOARD")? {
            config.clipboard = b;
        }
        if let Some(b) = parse_bool(&var, "PALMSHOT_MIRROR")? {
            config.mirror = b;
        }
        if let Some(b) = parse_bool(&var, "PALMSHOT_HEADLESS")? {
            config.headless = b;
        }
        if let Some(b) = parse_bool(&var, "PALMSHOT_PREVIEW")? {
            config.preview = b;
        }
        if let Some(fps) = parse(&var, "PALMSHOT_FPS")? {
            config.fps = Some(fps);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that all settings are within their valid ranges.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("minimum detection confidence", self.min_detection_confidence),
            ("minimum tracking confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be between 0 and 1, got {value}");
            }
        }
        if self.confirm_frames == 0 {
            bail!("palm confirmation needs at least 1 frame");
        }
        if self.fps == Some(0) {
            bail!("webcam frame rate must be greater than 0");
        }
        Ok(())
    }

    /// Sets the path of the ONNX hand landmark network.
    pub fn hand_model(self, path: impl Into<PathBuf>) -> Self {
        Self {
            hand_model: path.into(),
            ..self
        }
    }

    pub fn min_detection_confidence(mut self, confidence: f32) -> Self {
        self.min_detection_confidence = confidence;
        self
    }

    pub fn min_tracking_confidence(mut self, confidence: f32) -> Self {
        self.min_tracking_confidence = confidence;
        self
    }

    /// Sets how many consecutive palm frames arm the trigger.
    pub fn confirm_frames(mut self, frames: u32) -> Self {
        self.confirm_frames = frames;
        self
    }

    /// Sets the time between the triggering fist and the screenshot.
    pub fn capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn output_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: dir.into(),
            ..self
        }
    }

    pub fn clipboard(mut self, clipboard: bool) -> Self {
        self.clipboard = clipboard;
        self
    }

    /// Selects whether camera frames are mirrored before detection, like a selfie camera.
    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Selects whether every screenshot is shown in a window once it is saved.
    pub fn preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn hand_model_path(&self) -> &Path {
        &self.hand_model
    }

    pub fn detection_confidence(&self) -> f32 {
        self.min_detection_confidence
    }

    pub fn tracking_confidence(&self) -> f32 {
        self.min_tracking_confidence
    }

    pub fn palm_confirm_frames(&self) -> u32 {
        self.confirm_frames
    }

    pub fn delay(&self) -> Duration {
        self.capture_delay
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn use_clipboard(&self) -> bool {
        self.clipboard
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// Returns whether screenshots are previewed. Headless runs never open a preview.
    pub fn shows_preview(&self) -> bool {
        self.preview && !self.headless
    }

    pub fn webcam_fps(&self) -> Option<u32> {
        self.fps
    }
}

fn parse<T, F>(var: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> anyhow::Result<Option<String>>,
{
    match var(key)? {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid value '{value}' for `{key}`")),
        None => Ok(None),
    }
}

fn parse_bool<F>(var: &F, key: &str) -> anyhow::Result<Option<bool>>
where
    F: Fn(&str) -> anyhow::Result<Option<String>>,
{
    let Some(value) = var(key)? else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => bail!("invalid value '{value}' for `{key}`, expected a boolean"),
    }
}
