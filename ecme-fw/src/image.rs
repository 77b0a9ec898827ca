// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware images, packages of them, and the header images are wrapped in
//! on their way to a partition.

use crate::error::ImageFormatError;
use ecme_messages::ImageType;
use std::sync::Arc;
use zerocopy::byteorder::LittleEndian;
use zerocopy::byteorder::U16;
use zerocopy::byteorder::U32;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// One firmware payload and what we know about it.
///
/// Cloning is cheap; the payload is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    image_type: ImageType,
    data: Arc<[u8]>,
    version: Option<String>,
    load_address: Option<u32>,
    skip_crc32: bool,
}

impl Image {
    pub fn new(image_type: ImageType, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            image_type,
            data: data.into(),
            version: None,
            load_address: None,
            skip_crc32: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Load the image here instead of at the target partition's load
    /// address.
    pub fn with_load_address(mut self, load_address: u32) -> Self {
        self.load_address = Some(load_address);
        self
    }

    pub fn with_skip_crc32(mut self, skip_crc32: bool) -> Self {
        self.skip_crc32 = skip_crc32;
        self
    }

    /// A copy of this image's metadata carrying a different payload.
    pub fn with_data(&self, data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into(), ..self.clone() }
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn load_address(&self) -> Option<u32> {
        self.load_address
    }

    pub fn skip_crc32(&self) -> bool {
        self.skip_crc32
    }
}

/// Partition layout a package (or host) is built for.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConfigClass {
    #[default]
    Default,
    Slot2,
}

impl ConfigClass {
    /// Layout of a host, judging by the firmware version string it reports.
    pub fn of_firmware_version(version: &str) -> Self {
        if version.contains("slot2") {
            Self::Slot2
        } else {
            Self::Default
        }
    }
}

/// A set of images deployed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwarePackage {
    /// Deployed in this order.
    pub images: Vec<Image>,
    /// Recorded on the node once every image is written.
    pub version: Option<String>,
    /// Minimum management controller version the images work with.
    pub required_ecme_version: Option<String>,
    pub config: ConfigClass,
}

impl FirmwarePackage {
    pub fn new(images: Vec<Image>) -> Self {
        Self { images, ..Default::default() }
    }

    pub fn image_types(&self) -> Vec<ImageType> {
        self.images.iter().map(Image::image_type).collect()
    }
}

/// Conversion between an [`Image`] and the bytes a partition holds.
pub trait ImageFormat: Send + Sync + 'static {
    /// Produce the bytes to write for `image`, stamped with `priority` and
    /// the load address to use.
    fn encode(
        &self,
        image: &Image,
        priority: u16,
        load_address: u32,
    ) -> Result<Vec<u8>, ImageFormatError>;

    /// Recover the payload from bytes read back out of a partition.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, ImageFormatError>;
}

const SIMG_MAGIC: [u8; 4] = *b"SIMG";
const SIMG_HEADER_FORMAT: u16 = 2;
const SIMG_VERSION_LEN: usize = 32;
/// Cleared when the bootloader should not check the payload's crc32.
const SIMG_FLAG_CHECK_CRC32: u32 = 1 << 0;

#[derive(
    Debug,
    Clone,
    Copy,
    IntoBytes,
    FromBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C)]
struct SimgHeader {
    magic: [u8; 4],
    header_format: U16<LittleEndian>,
    priority: U16<LittleEndian>,
    image_offset: U32<LittleEndian>,
    image_len: U32<LittleEndian>,
    load_address: U32<LittleEndian>,
    flags: U32<LittleEndian>,
    crc32: U32<LittleEndian>,
    version: [u8; SIMG_VERSION_LEN],
}

const SIMG_HEADER_LEN: usize = std::mem::size_of::<SimgHeader>();

/// What an `SIMG` header says about the image behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimgInfo {
    pub priority: u16,
    pub load_address: u32,
    pub image_len: u32,
    pub crc32: u32,
    pub skip_crc32: bool,
    pub version: String,
}

/// The `SIMG` image header understood by the node's bootloader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimgFormat;

impl SimgFormat {
    fn header(data: &[u8]) -> Option<SimgHeader> {
        let (header, _) = SimgHeader::read_from_prefix(data).ok()?;
        (header.magic == SIMG_MAGIC).then_some(header)
    }

    /// Parse the header at the front of `data`, if there is one.
    pub fn inspect(data: &[u8]) -> Option<SimgInfo> {
        let header = Self::header(data)?;
        let version = header
            .version
            .split(|&b| b == 0)
            .next()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        Some(SimgInfo {
            priority: header.priority.get(),
            load_address: header.load_address.get(),
            image_len: header.image_len.get(),
            crc32: header.crc32.get(),
            skip_crc32: header.flags.get() & SIMG_FLAG_CHECK_CRC32 == 0,
            version,
        })
    }
}

impl ImageFormat for SimgFormat {
    fn encode(
        &self,
        image: &Image,
        priority: u16,
        load_address: u32,
    ) -> Result<Vec<u8>, ImageFormatError> {
        // Images that already carry a header get a fresh one.
        let payload = self.decode(image.data())?;
        let image_len = u32::try_from(payload.len())
            .map_err(|_| ImageFormatError::PayloadTooLarge)?;

        let (flags, crc32) = if image.skip_crc32() {
            (!SIMG_FLAG_CHECK_CRC32, 0)
        } else {
            (u32::MAX, crc32fast::hash(&payload))
        };

        let mut version = [0; SIMG_VERSION_LEN];
        if let Some(v) = image.version() {
            // Keep at least one trailing NUL.
            let n = usize::min(v.len(), SIMG_VERSION_LEN - 1);
            version[..n].copy_from_slice(&v.as_bytes()[..n]);
        }

        let header = SimgHeader {
            magic: SIMG_MAGIC,
            header_format: SIMG_HEADER_FORMAT.into(),
            priority: priority.into(),
            image_offset: (SIMG_HEADER_LEN as u32).into(),
            image_len: image_len.into(),
            load_address: load_address.into(),
            flags: flags.into(),
            crc32: crc32.into(),
            version,
        };

        let mut out = Vec::with_capacity(SIMG_HEADER_LEN + payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, ImageFormatError> {
        let Some(header) = Self::header(data) else {
            return Ok(data.to_vec());
        };

        let offset = u64::from(header.image_offset.get());
        let len = u64::from(header.image_len.get());
        let end = offset + len;
        if end > data.len() as u64 {
            return Err(ImageFormatError::Truncated {
                claimed: end,
                actual: data.len() as u64,
            });
        }
        // Both fit in `data.len()`, so they fit in a usize.
        let payload = &data[offset as usize..end as usize];

        if header.flags.get() & SIMG_FLAG_CHECK_CRC32 != 0 {
            let expected = header.crc32.get();
            let got = crc32fast::hash(payload);
            if expected != got {
                return Err(ImageFormatError::CrcMismatch { expected, got });
            }
        }

        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_sixty_bytes() {
        assert_eq!(SIMG_HEADER_LEN, 60);
    }

    #[test]
    fn encode_stamps_header() {
        let image = Image::new(ImageType::A9Exec, &b"hello, node"[..])
            .with_version("v1.2.3");
        let data = SimgFormat.encode(&image, 7, 0x0004_0000).unwrap();
        assert_eq!(&data[..4], b"SIMG");
        assert_eq!(data.len(), SIMG_HEADER_LEN + 11);

        let info = SimgFormat::inspect(&data).unwrap();
        assert_eq!(
            info,
            SimgInfo {
                priority: 7,
                load_address: 0x0004_0000,
                image_len: 11,
                crc32: crc32fast::hash(b"hello, node"),
                skip_crc32: false,
                version: "v1.2.3".to_string(),
            }
        );
        assert_eq!(SimgFormat.decode(&data).unwrap(), b"hello, node");
    }

    #[test]
    fn encode_restamps_existing_header() {
        let image = Image::new(ImageType::Dtb, &b"tree"[..]);
        let first = SimgFormat.encode(&image, 1, 0x10).unwrap();
        let again = SimgFormat
            .encode(&image.with_data(first), 9, 0x20)
            .unwrap();
        let info = SimgFormat::inspect(&again).unwrap();
        assert_eq!(info.priority, 9);
        assert_eq!(info.load_address, 0x20);
        assert_eq!(SimgFormat.decode(&again).unwrap(), b"tree");
    }

    #[test]
    fn decode_rejects_bad_images() {
        let image = Image::new(ImageType::Dtb, &b"tree"[..]);
        let mut data = SimgFormat.encode(&image, 1, 0).unwrap();

        *data.last_mut().unwrap() ^= 0xff;
        let v = SimgFormat.decode(&data);
        assert!(
            matches!(v, Err(ImageFormatError::CrcMismatch { .. })),
            "mismatched value {v:?}"
        );

        data.pop();
        let v = SimgFormat.decode(&data);
        assert_eq!(
            v,
            Err(ImageFormatError::Truncated {
                claimed: SIMG_HEADER_LEN as u64 + 4,
                actual: SIMG_HEADER_LEN as u64 + 3,
            })
        );
    }

    #[test]
    fn skip_crc32_is_not_checked() {
        let image = Image::new(ImageType::BootLog, &b"log"[..])
            .with_skip_crc32(true);
        let mut data = SimgFormat.encode(&image, 1, 0).unwrap();
        assert!(SimgFormat::inspect(&data).unwrap().skip_crc32);
        *data.last_mut().unwrap() = b'!';
        assert_eq!(SimgFormat.decode(&data).unwrap(), b"lo!");
    }

    #[test]
    fn raw_data_passes_through() {
        let raw = b"not an image".to_vec();
        assert_eq!(SimgFormat::inspect(&raw), None);
        assert_eq!(SimgFormat.decode(&raw).unwrap(), raw);
    }

    #[test]
    fn config_class_of_host() {
        assert_eq!(
            ConfigClass::of_firmware_version("ECX-1000-v2.1.5-slot2"),
            ConfigClass::Slot2
        );
        assert_eq!(
            ConfigClass::of_firmware_version("ECX-1000-v2.1.5"),
            ConfigClass::Default
        );
        assert_eq!("slot2".parse(), Ok(ConfigClass::Slot2));
        assert_eq!(ConfigClass::Default.to_string(), "default");
    }
}
