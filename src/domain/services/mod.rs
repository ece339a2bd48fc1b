//! Pure domain services.

pub mod decode_policy;

pub use decode_policy::{
    DownsampleChoice, ORIENTATION_NORMAL, apply_orientation, choose_downsample_shift,
    correct_shift,
};
