//! rollcall-hw: Webcam capture and luma frame utilities.

pub mod camera;
pub mod frame;

pub use camera::{
    Camera, CameraError, CameraStream, DeviceInfo, FrameSource, PixelFormat, DEFAULT_DEVICE,
};
pub use frame::{Frame, FrameError};
