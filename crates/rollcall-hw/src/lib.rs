//! rollcall-hw: Frame acquisition.
//!
//! Provides V4L2-based camera capture converted to RGB, plus an image
//! directory source for offline enrollment and diagnostics.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, ImageDirSource, PixelFormat};
pub use frame::Frame;
