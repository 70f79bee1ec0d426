//! Camera input.

pub mod webcam;
