//! Hand landmark estimation and tracking.

pub mod landmark;
pub mod landmarker;
