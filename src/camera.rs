use crate::error::CaptureError;

/// A captured RGB frame.
pub type Frame = image::RgbImage;

/// Something that can be opened into a stream of frames.
///
/// Dropping the stream releases the device.
pub trait CameraDevice {
    type Stream: FrameStream;

    fn open(&self) -> Result<Self::Stream, CaptureError>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

pub trait FrameStream {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

impl<T: CameraDevice + ?Sized> CameraDevice for &T {
    type Stream = T::Stream;

    fn open(&self) -> Result<Self::Stream, CaptureError> {
        (**self).open()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
