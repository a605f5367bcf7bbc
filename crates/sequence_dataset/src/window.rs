//! Random fixed-length window selection over a variable-length sequence.

use rand::Rng;
use std::ops::Range;
use thiserror::Error;

/// Half-open step range `[start, end)` into the source sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Frames to decode: the window plus one leading frame when one exists.
    pub fn frame_range(&self) -> Range<usize> {
        self.start.saturating_sub(1)..self.end
    }

    /// Whether `frame_range` includes a real predecessor for the first step.
    pub fn has_lead_frame(&self) -> bool {
        self.start > 0
    }

    /// Poses needed to localize every step of the window.
    pub fn pose_range(&self, num_pts: usize) -> Range<usize> {
        self.start..self.end + num_pts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("sequence of length {length} is too short (< {required})")]
    SequenceTooShort { length: usize, required: usize },
    #[error("window length must be positive")]
    EmptyWindow,
}

/// Pick `[start, start + fix_seq_length)` with `start` uniform in
/// `[1, sequence_length - fix_seq_length - num_pts]`.
///
/// When the sequence is exactly `fix_seq_length + num_pts` long there is no room for a
/// leading frame and `start` is 0.
pub fn sample_window<R: Rng + ?Sized>(
    sequence_length: usize,
    fix_seq_length: usize,
    num_pts: usize,
    rng: &mut R,
) -> Result<Window, WindowError> {
    if fix_seq_length == 0 {
        return Err(WindowError::EmptyWindow);
    }
    let required = fix_seq_length + num_pts;
    if sequence_length < required {
        return Err(WindowError::SequenceTooShort {
            length: sequence_length,
            required,
        });
    }
    let slack = sequence_length - required;
    let start = if slack == 0 {
        0
    } else {
        rng.random_range(1..=slack)
    };
    Ok(Window {
        start,
        end: start + fix_seq_length,
    })
}
