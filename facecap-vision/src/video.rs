use anyhow::{Context, Result};
use image::RgbImage;
use std::io;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::camera::{AcquisitionError, Camera, FacingMode};

/// V4L2 camera at a fixed device path.
pub struct V4lCamera {
    path: String,
}

/// An open capture stream plus the negotiated format.
pub struct V4lStream {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl V4lCamera {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

fn open_error(err: &io::Error) -> AcquisitionError {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => AcquisitionError::PermissionDenied,
        Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => AcquisitionError::DeviceNotFound,
        _ => match err.kind() {
            io::ErrorKind::PermissionDenied => AcquisitionError::PermissionDenied,
            io::ErrorKind::NotFound => AcquisitionError::DeviceNotFound,
            _ => AcquisitionError::OverconstrainedDevice,
        },
    }
}

impl Camera for V4lCamera {
    type Stream = V4lStream;

    fn acquire(&mut self, facing: FacingMode) -> Result<V4lStream, AcquisitionError> {
        // V4L2 has no notion of facing; the device path decides.
        log::debug!("opening {} (requested facing {:?})", self.path, facing);
        let dev = Device::with_path(&self.path).map_err(|e| {
            log::warn!("open {}: {}", self.path, e);
            open_error(&e)
        })?;
        let mut fmt = dev.format().map_err(|e| {
            log::warn!("query format on {}: {}", self.path, e);
            AcquisitionError::OverconstrainedDevice
        })?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).map_err(|e| {
            log::warn!("start stream on {}: {}", self.path, e);
            open_error(&e)
        })?;
        log::info!(
            "camera {} streaming {}x{} {:?}",
            self.path,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(V4lStream {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    fn grab_frame(&mut self, stream: &mut V4lStream) -> Result<RgbImage> {
        stream.frame()
    }

    fn stop(&mut self, stream: V4lStream) {
        // Buffers are unmapped and streaming is switched off on drop.
        log::debug!("stopping camera {}", self.path);
        drop(stream);
    }
}

impl V4lStream {
    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: width={} height={} fourcc={:?} seq={:?} len={}",
            self.width,
            self.height,
            self.fourcc,
            meta.sequence,
            data.len()
        );
        let buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {:?}", other),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!("buffer too small: got {}, expected {}", buf.len(), expected);
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
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

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
