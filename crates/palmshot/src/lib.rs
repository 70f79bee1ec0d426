//! Webcam gesture trigger for full-screen screenshots.
//!
//! Every camera frame is run through a hand landmark network. Each detected hand is classified as
//! an open palm, a fist, or neither, and a [`trigger::PalmFistTrigger`] watches the sequence of
//! classifications. Holding an open palm for a few frames arms the trigger; closing the hand into a
//! fist afterwards takes a screenshot of the whole display, saves it to disk, and copies it to the
//! clipboard.
//!
//! # Coordinates
//!
//! Landmark coordinates are in pixels of the camera frame, with X pointing to the right and Y
//! pointing *down*. A fingertip that is "above" its joint therefore has the *smaller* Y
//! coordinate.
//!
//! # Environment Variables
//!
//! All settings are read from environment variables by [`config::Config::from_env`]; see the
//! [`config`] module for the full list. The most important ones are:
//!
//! * `PALMSHOT_HAND_MODEL`: Path to the ONNX hand landmark network.
//! * `PALMSHOT_WEBCAM_NAME`: Forces the webcam device to use. If unset, the first device that
//!   supports a compatible image format will be used.
//! * `PALMSHOT_HEADLESS`: Runs without opening any window.
//!
//! Logging is configured with the usual `RUST_LOG` variable understood by [`env_logger`].

pub mod capture;
pub mod config;
pub mod draw;
pub mod gesture;
pub mod gui;
pub mod hand;
pub mod nn;
pub mod pipeline;
pub mod rect;
pub mod timer;
pub mod trigger;
pub mod video;

use log::LevelFilter;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// In debug builds, the calling crate and `palmshot` will log at *debug* level. Otherwise, they
/// will log at *info* level.
///
/// `wgpu` and `tract_onnx` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
