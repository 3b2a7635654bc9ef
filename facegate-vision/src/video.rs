use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Pixel layouts the camera may hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb3,
    Yuyv,
    Grey,
    Other(FourCC),
}

impl From<FourCC> for PixelLayout {
    fn from(fourcc: FourCC) -> Self {
        match &fourcc.repr {
            b"RGB3" => PixelLayout::Rgb3,
            b"YUYV" => PixelLayout::Yuyv,
            b"GREY" => PixelLayout::Grey,
            _ => PixelLayout::Other(fourcc),
        }
    }
}

/// V4L2 capture device streaming RGB frames. Dropping it closes the device.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {device}"))?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        for fourcc in [b"RGB3", b"YUYV"] {
            if fmt.fourcc == FourCC::new(b"RGB3") {
                break;
            }
            let desired = Format::new(fmt.width, fmt.height, FourCC::new(fourcc));
            fmt = dev.set_format(&desired).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::debug!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            layout: PixelLayout::from(fmt.fourcc),
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!("captured frame seq={} len={}", meta.sequence, data.len());
        to_rgb_image(self.layout, self.width, self.height, data)
    }
}

/// Convert a raw capture buffer into an RGB image.
pub fn to_rgb_image(
    layout: PixelLayout,
    width: u32,
    height: u32,
    data: &[u8],
) -> Result<RgbImage> {
    let mut buf = match layout {
        PixelLayout::Rgb3 => data.to_vec(),
        PixelLayout::Yuyv => yuyv_to_rgb(width, height, data)?,
        PixelLayout::Grey => grey_to_rgb(width, height, data)?,
        PixelLayout::Other(fourcc) => {
            log::warn!(
                "unexpected pixel format {:?}, passing through raw len={}",
                fourcc,
                data.len()
            );
            data.to_vec()
        }
    };

    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!(
            "buffer too small: got {}, expected {} ({:?})",
            buf.len(),
            expected,
            layout
        );
    }
    buf.truncate(expected);
    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
}

pub fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

pub fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
