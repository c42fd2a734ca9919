//! Segment capture
//!
//! The stream engine records through the [`Recorder`] trait; `FfmpegRecorder`
//! is the implementation used by the binary.

pub mod ffmpeg;
pub mod traits;

pub use ffmpeg::FfmpegRecorder;
pub use traits::{DeviceList, Recorder};
