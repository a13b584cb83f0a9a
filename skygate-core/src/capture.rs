use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use std::fs;
use thiserror::Error;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as V4lCapture;
use v4l::{Device, FourCC};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera device: {0}")]
    DeviceOpen(String),
    #[error("Failed to capture frame: {0}")]
    Capture(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
    #[error("V4L2 error: {0}")]
    V4L(#[from] std::io::Error),
}

/// Parse a device index from "/dev/videoN" or a bare index string.
/// Defaults to device 0 when the string does not parse.
fn device_index(device_path: &str) -> usize {
    device_path
        .trim_start_matches("/dev/video")
        .parse::<usize>()
        .unwrap_or(0)
}

pub struct Camera {
    device: Device,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    /// Open a camera and negotiate a capture format.
    pub fn new(config: &CameraConfig) -> Result<Self, CaptureError> {
        let device = Device::new(device_index(&config.device))
            .map_err(|e| CaptureError::DeviceOpen(format!("{}: {}", config.device, e)))?;

        let mut format = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to get format: {}", e)))?;
        format.width = config.width;
        format.height = config.height;

        // Prefer MJPG, fall back to YUYV
        for fourcc in [FourCC::new(b"MJPG"), FourCC::new(b"YUYV")] {
            format.fourcc = fourcc;
            if device.set_format(&format).is_ok() {
                break;
            }
        }

        let actual = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to verify format: {}", e)))?;

        log::info!(
            "Camera initialized: {}x{} {}",
            actual.width,
            actual.height,
            actual.fourcc
        );

        Ok(Self {
            device,
            width: actual.width,
            height: actual.height,
            format: actual.fourcc,
        })
    }

    /// Capture a single frame and decode it to RGB.
    pub fn capture_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, v4l::buffer::Type::VideoCapture, 4)
            .map_err(|e| CaptureError::Capture(format!("Failed to create stream: {}", e)))?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Capture(format!("Failed to capture frame: {}", e)))?;

        match self.format.str() {
            Ok("MJPG") => decode_mjpeg(buf),
            Ok("YUYV") => decode_yuyv(buf, self.width as usize, self.height as usize),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }

    /// Enumerate /dev/video* capture devices.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let mut devices = Vec::new();

        for entry in fs::read_dir("/dev")
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to read /dev: {}", e)))?
        {
            let entry = entry.map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;
            let path = entry.path();
            let is_video = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("video"))
                .unwrap_or(false);
            if is_video {
                if let Some(path_str) = path.to_str() {
                    devices.push(path_str.to_string());
                }
            }
        }

        devices.sort();
        Ok(devices)
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e)))?;
    Ok(img.to_rgb8())
}

/// Decode a packed YUYV buffer (Y0 U Y1 V, two pixels per four bytes) to RGB.
fn decode_yuyv(data: &[u8], width: usize, height: usize) -> Result<RgbImage, CaptureError> {
    if data.len() < width * height * 2 {
        return Err(CaptureError::Conversion(
            "YUYV buffer too small".to_string(),
        ));
    }

    let mut rgb = vec![0u8; width * height * 3];

    for row in 0..height {
        for pair in 0..(width / 2) {
            let src = row * width * 2 + pair * 4;
            let dst = row * width * 3 + pair * 6;

            let y0 = data[src] as i32;
            let u = data[src + 1] as i32 - 128;
            let y1 = data[src + 2] as i32;
            let v = data[src + 3] as i32 - 128;

            for (i, y) in [y0, y1].into_iter().enumerate() {
                let off = dst + i * 3;
                rgb[off] = (y + ((1436 * v) >> 10)).clamp(0, 255) as u8;
                rgb[off + 1] = (y - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8;
                rgb[off + 2] = (y + ((1814 * u) >> 10)).clamp(0, 255) as u8;
            }
        }
    }

    ImageBuffer::from_raw(width as u32, height as u32, rgb)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_index_parsing() {
        assert_eq!(device_index("/dev/video0"), 0);
        assert_eq!(device_index("/dev/video2"), 2);
        assert_eq!(device_index("1"), 1);
        assert_eq!(device_index("not-a-camera"), 0);
    }

    #[test]
    fn test_decode_yuyv_rejects_short_buffer() {
        let data = vec![0u8; 8];
        assert!(decode_yuyv(&data, 640, 480).is_err());
    }

    #[test]
    fn test_decode_yuyv_gray() {
        // Mid-gray: Y=128, U=V=128 (zero chroma) should decode near (128,128,128)
        let width = 2;
        let height = 1;
        let data = vec![128u8, 128, 128, 128];
        let img = decode_yuyv(&data, width, height).unwrap();
        for pixel in img.pixels() {
            for c in 0..3 {
                assert!((pixel[c] as i32 - 128).abs() <= 2);
            }
        }
    }

    #[test]
    fn test_list_devices() {
        // This test requires a system with V4L2 devices
        match Camera::list_devices() {
            Ok(devices) => {
                for device in devices {
                    assert!(device.starts_with("/dev/video"));
                }
            }
            Err(e) => println!("Could not list devices: {}", e),
        }
    }
}
