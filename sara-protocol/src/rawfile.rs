//! Raw image container written for captured frames.
//!
//! A file is a 152-byte little-endian header followed by the pixel bytes
//! exactly as received from the camera.

use crate::camera::{CameraInfo, ImageInfo};
use crate::error::ProtocolError;
use crate::record::{wire_record, Record};
use chrono::{Datelike, Local, TimeZone, Timelike};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Identifies a raw image file (0x4A7B92CF).
pub const RAW_MAGIC: u32 = 1_249_612_495;

/// Size of [`RawFileHeader`] on disk.
pub const RAW_HEADER_SIZE: u32 = 152;

wire_record! {
    /// Header of a raw image file.
    pub struct RawFileHeader(Little) {
        pub magic: u32 => U32,
        pub header_size: u32 => U32,
        pub major_version: u32 => U32,
        pub minor_version: u32 => U32,
        pub ms_expose: f64 => F64,
        pub db_gain: f64 => F64,
        /// Seconds since the Unix epoch.
        pub timestamp: u64 => U64,
        pub camera_time: f64 => F64,
        pub year: u32 => U32,
        pub month: u32 => U32,
        pub day: u32 => U32,
        pub hour: u32 => U32,
        pub minute: u32 => U32,
        pub second: u32 => U32,
        pub millisecond: u32 => U32,
        pub model: String => Str(16),
        pub serial: String => Str(16),
        pub sensor_type: u32 => U32,
        pub color_filter: u32 => U32,
        pub width: u32 => U32,
        pub height: u32 => U32,
        pub bit_depth: u32 => U32,
        pub pixel_bytes: u32 => U32,
        pub image_bytes: u32 => U32,
        /// Physical pixel size in um.
        pub pixel_width: f64 => F64,
        pub pixel_height: f64 => F64,
    }
}

impl RawFileHeader {
    /// Builds the header for a captured frame. Calendar fields are the
    /// capture time in local time.
    pub fn from_capture(image: &ImageInfo, camera: &CameraInfo, image_bytes: usize) -> Self {
        let mut header = Self {
            magic: RAW_MAGIC,
            header_size: RAW_HEADER_SIZE,
            major_version: 1,
            minor_version: 0,
            ms_expose: image.exposure,
            db_gain: image.master_gain,
            timestamp: image.image_time,
            camera_time: image.camera_time,
            model: camera.model.clone(),
            serial: camera.serial.clone(),
            sensor_type: image.camera_type,
            color_filter: image.color_correct_mode,
            width: image.width,
            height: image.height,
            bit_depth: 12,
            pixel_bytes: 2,
            image_bytes: image_bytes as u32,
            pixel_width: camera.x_pixel_um,
            pixel_height: camera.y_pixel_um,
            ..Self::default()
        };

        if let Some(local) = Local.timestamp_opt(image.image_time as i64, 0).single() {
            header.year = local.year() as u32;
            header.month = local.month();
            header.day = local.day();
            header.hour = local.hour();
            header.minute = local.minute();
            header.second = local.second();
        }
        header
    }
}

/// Writes a header and pixel bytes to `path`.
pub fn write_raw_image(
    path: &Path,
    header: &RawFileHeader,
    pixels: &[u8],
) -> Result<(), ProtocolError> {
    let encoded = header.encode()?;
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;
    file.write_all(pixels)?;
    file.flush()?;
    Ok(())
}

/// Reads a raw image file back into its header and pixel bytes.
pub fn read_raw_image(path: &Path) -> Result<(RawFileHeader, Vec<u8>), ProtocolError> {
    let mut bytes = fs::read(path)?;
    let header_len = RawFileHeader::wire_size();
    if bytes.len() < header_len {
        return Err(ProtocolError::InvalidRawFile(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }

    let header = RawFileHeader::decode(&bytes[..header_len])?;
    if header.magic != RAW_MAGIC {
        return Err(ProtocolError::InvalidRawFile(format!(
            "bad magic {:#x}",
            header.magic
        )));
    }
    if header.header_size != RAW_HEADER_SIZE {
        return Err(ProtocolError::InvalidRawFile(format!(
            "unsupported header size {}",
            header.header_size
        )));
    }

    let pixels = bytes.split_off(header_len);
    if pixels.len() != header.image_bytes as usize {
        return Err(ProtocolError::InvalidRawFile(format!(
            "header declares {} image bytes, file holds {}",
            header.image_bytes,
            pixels.len()
        )));
    }
    Ok((header, pixels))
}

/// Path of one collected frame:
/// `<prefix>/<dwell>us_<power>W/Run-<run>_Frame-<frame>.raw`.
pub fn raw_file_path(prefix: &Path, dwell_us: f64, power_w: f64, run: u32, frame: u32) -> PathBuf {
    prefix
        .join(format!("{:05}us_{:06.2}W", dwell_us.trunc() as i64, power_w))
        .join(format!("Run-{:04}_Frame-{:04}.raw", run, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn capture() -> (ImageInfo, CameraInfo) {
        let image = ImageInfo {
            camera_type: 2,
            frame: 0,
            image_time: 1_650_000_000,
            camera_time: 12.25,
            width: 1200,
            height: 1920,
            memory_pitch: 2400,
            exposure: 12.5,
            master_gain: 1.0,
            ..ImageInfo::default()
        };
        let camera = CameraInfo {
            model: "CS2100M-USB".to_string(),
            serial: "08154711".to_string(),
            x_pixel_um: 5.04,
            y_pixel_um: 5.04,
            ..CameraInfo::default()
        };
        (image, camera)
    }

    #[test]
    fn test_header_size() {
        assert_eq!(RawFileHeader::wire_size(), RAW_HEADER_SIZE as usize);
    }

    #[test]
    fn test_from_capture() {
        let (image, camera) = capture();
        let header = RawFileHeader::from_capture(&image, &camera, 2_304_000);

        assert_eq!(header.magic, RAW_MAGIC);
        assert_eq!(header.ms_expose, 12.5);
        assert_eq!(header.width, 1200);
        assert_eq!(header.height, 1920);
        assert_eq!(header.image_bytes, 2_304_000);
        assert_eq!(header.millisecond, 0);
        assert_eq!(header.model, "CS2100M-USB");

        let local = Local.timestamp_opt(1_650_000_000, 0).unwrap();
        assert_eq!(header.year, local.year() as u32);
        assert_eq!(header.hour, local.hour());
    }

    #[test]
    fn test_write_and_read_raw_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.raw");

        let (image, camera) = capture();
        let pixels = vec![0xABu8; 2_304_000];
        let header = RawFileHeader::from_capture(&image, &camera, pixels.len());
        write_raw_image(&path, &header, &pixels).unwrap();

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 152 + 2_304_000);
        assert_eq!(
            u32::from_le_bytes([contents[0], contents[1], contents[2], contents[3]]),
            1_249_612_495
        );

        let (read_header, read_pixels) = read_raw_image(&path).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(read_pixels.len(), pixels.len());
    }

    #[test]
    fn test_read_rejects_bad_files() {
        let dir = tempdir().unwrap();

        let short = dir.path().join("short.raw");
        fs::write(&short, [0u8; 20]).unwrap();
        assert!(matches!(
            read_raw_image(&short),
            Err(ProtocolError::InvalidRawFile(_))
        ));

        let bad_magic = dir.path().join("magic.raw");
        let header = RawFileHeader {
            magic: 7,
            header_size: RAW_HEADER_SIZE,
            ..RawFileHeader::default()
        };
        fs::write(&bad_magic, header.encode().unwrap()).unwrap();
        assert!(matches!(
            read_raw_image(&bad_magic),
            Err(ProtocolError::InvalidRawFile(_))
        ));

        let truncated = dir.path().join("truncated.raw");
        let header = RawFileHeader {
            magic: RAW_MAGIC,
            header_size: RAW_HEADER_SIZE,
            image_bytes: 10,
            ..RawFileHeader::default()
        };
        let mut bytes = header.encode().unwrap().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&truncated, bytes).unwrap();
        assert!(read_raw_image(&truncated).is_err());
    }

    #[test]
    fn test_raw_file_path() {
        let path = raw_file_path(Path::new("/data/lsa"), 500.0, 45.5, 3, 12);
        assert_eq!(
            path,
            PathBuf::from("/data/lsa/00500us_045.50W/Run-0003_Frame-0012.raw")
        );

        // Fractional dwells are truncated, never rounded up
        let path = raw_file_path(Path::new("out"), 250.9, 60.0, 0, 0);
        assert_eq!(path, PathBuf::from("out/00250us_060.00W/Run-0000_Frame-0000.raw"));
    }
}
