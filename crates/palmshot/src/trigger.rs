//! Debounced palm-then-fist trigger.
//!
//! [`PalmFistTrigger`] turns the per-frame [`Gesture`] stream into capture requests. An open palm
//! has to be seen on several consecutive frames before the trigger is *armed*; the next fist then
//! fires it exactly once and disarms it again.
//!
//! ```text
//!          Palm (streak < N)               Palm
//!           ┌──────┐                     ┌──────┐
//!           │      ▼     Palm, streak=N  │      ▼
//!          ┌────────┐ ─────────────────► ┌────────┐
//!          │  Idle  │                    │ Armed  │
//!          └────────┘ ◄───────────────── └────────┘
//!                      Fist / fire capture
//! ```
//!
//! Any non-palm frame resets the palm streak but leaves the armed flag alone, so an armed trigger
//! survives a few frames of motion blur between the palm and the fist.

use crate::gesture::Gesture;

/// Default number of consecutive palm frames needed to arm the trigger.
pub const DEFAULT_CONFIRM_FRAMES: u32 = 3;

/// Emitted by [`PalmFistTrigger::update`] when a capture should be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerCapture;

/// Palm/fist debouncing state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PalmFistTrigger {
    confirm_frames: u32,
    palm_streak: u32,
    armed: bool,
}

impl Default for PalmFistTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_FRAMES)
    }
}

impl PalmFistTrigger {
    /// Creates an idle trigger that arms after `confirm_frames` consecutive palm frames.
    ///
    /// # Panics
    ///
    /// Panics if `confirm_frames` is 0.
    pub fn new(confirm_frames: u32) -> Self {
        assert!(confirm_frames > 0, "palm confirmation needs at least one frame");
        Self {
            confirm_frames,
            palm_streak: 0,
            armed: false,
        }
    }

    /// Feeds the classification of one hand in the current frame.
    ///
    /// Returns [`TriggerCapture`] if this classification fired the trigger.
    pub fn update(&mut self, gesture: Gesture) -> Option<TriggerCapture> {
        if gesture == Gesture::Palm {
            // Pinned at the threshold; staying armed needs no further counting.
            self.palm_streak = (self.palm_streak + 1).min(self.confirm_frames);
            if self.palm_streak >= self.confirm_frames {
                if !self.armed {
                    log::debug!("open palm confirmed after {} frames", self.palm_streak);
                }
                self.armed = true;
            }
            return None;
        }

        self.palm_streak = 0;
        if gesture == Gesture::Fist && self.armed {
            self.armed = false;
            log::debug!("fist after confirmed palm, triggering capture");
            return Some(TriggerCapture);
        }
        None
    }

    /// Returns the number of consecutive palm frames seen, capped at the confirmation threshold.
    #[inline]
    pub fn palm_streak(&self) -> u32 {
        self.palm_streak
    }

    /// Returns whether the palm streak currently meets the confirmation threshold.
    #[inline]
    pub fn is_palm_confirmed(&self) -> bool {
        self.palm_streak >= self.confirm_frames
    }

    /// Returns whether the next fist will fire the trigger.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    #[inline]
    pub fn confirm_frames(&self) -> u32 {
        self.confirm_frames
    }
}
