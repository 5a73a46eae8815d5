//! Input images
//!
//! A raw binary is placed at a base address; an Intel HEX file carries its
//! own addresses and may leave holes. Both end up as address-sorted
//! segments from which the upload picks the blocks it has to write.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ihex::Record;

/// Errors from loading an image
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// File could not be read
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed Intel HEX record
    #[error("invalid Intel HEX: {0}")]
    Hex(#[from] ihex::ReaderError),
    /// Two records write the same byte
    #[error("data at 0x{addr:08X} overlaps earlier data")]
    Overlap {
        /// First overlapping address
        addr: u32,
    },
    /// Data runs past the 32-bit address space
    #[error("data at 0x{addr:08X} runs past the end of the address space")]
    Overflow {
        /// Segment start
        addr: u32,
    },
}

/// Sparse memory image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    segments: BTreeMap<u32, Vec<u8>>,
}

impl Image {
    /// Load `path`, as Intel HEX if it ends in `.hex`, as raw bytes at
    /// `base` otherwise
    pub fn load(path: &Path, base: u32) -> Result<Self, ImageError> {
        let is_hex = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex"));
        if is_hex {
            if base != 0 {
                log::warn!("Ignoring address 0x{:08X}, Intel HEX records carry their own", base);
            }
            Self::from_ihex(&std::fs::read_to_string(path)?)
        } else {
            Self::from_bin(base, &std::fs::read(path)?)
        }
    }

    /// Raw bytes starting at `base`
    pub fn from_bin(base: u32, data: &[u8]) -> Result<Self, ImageError> {
        let mut image = Self::default();
        image.insert(base, data)?;
        Ok(image)
    }

    /// Parse Intel HEX text
    ///
    /// Data, extended segment and extended linear address records are
    /// honoured; start address records are ignored.
    pub fn from_ihex(text: &str) -> Result<Self, ImageError> {
        let mut image = Self::default();
        let mut upper = 0u32;
        for record in ihex::Reader::new(text) {
            match record? {
                Record::Data { offset, value } => {
                    let addr = upper
                        .checked_add(offset as u32)
                        .ok_or(ImageError::Overflow { addr: upper })?;
                    image.insert(addr, &value)?;
                }
                Record::ExtendedSegmentAddress(segment) => upper = (segment as u32) << 4,
                Record::ExtendedLinearAddress(high) => upper = (high as u32) << 16,
                Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
                Record::EndOfFile => break,
            }
        }
        Ok(image)
    }

    fn insert(&mut self, addr: u32, data: &[u8]) -> Result<(), ImageError> {
        if data.is_empty() {
            return Ok(());
        }
        let end = addr as u64 + data.len() as u64;
        if end > 1 << 32 {
            return Err(ImageError::Overflow { addr });
        }

        if let Some((&start, prev)) = self.segments.range(..=addr).next_back() {
            if start as u64 + prev.len() as u64 > addr as u64 {
                return Err(ImageError::Overlap { addr });
            }
        }
        if let Some((&next, _)) = self.segments.range(addr..).next() {
            if (next as u64) < end {
                return Err(ImageError::Overlap { addr: next });
            }
        }

        // Consecutive records extend the segment before them
        let extends = match self.segments.range(..addr).next_back() {
            Some((&start, prev)) if start as u64 + prev.len() as u64 == addr as u64 => Some(start),
            _ => None,
        };
        match extends.and_then(|start| self.segments.get_mut(&start)) {
            Some(prev) => prev.extend_from_slice(data),
            None => {
                self.segments.insert(addr, data.to_vec());
            }
        }
        Ok(())
    }

    /// Whether the image holds no data
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bytes of data in the image
    pub fn len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Number of contiguous segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// One past the highest address holding data
    pub fn end(&self) -> u64 {
        self.segments
            .iter()
            .next_back()
            .map_or(0, |(&addr, data)| addr as u64 + data.len() as u64)
    }

    /// Bases of the `unit`-aligned blocks that hold image data, ascending
    pub fn blocks(&self, unit: u32) -> BTreeSet<u32> {
        let mut blocks = BTreeSet::new();
        for (&addr, data) in &self.segments {
            let last = addr as u64 + data.len() as u64 - 1;
            let mut base = addr as u64 - addr as u64 % unit as u64;
            while base <= last {
                blocks.insert(base as u32);
                base += unit as u64;
            }
        }
        blocks
    }

    /// Copy the image bytes that fall into `base..base + buf.len()`
    ///
    /// Bytes of `buf` the image has no data for are left as they are.
    pub fn copy_into(&self, base: u32, buf: &mut [u8]) {
        let window = base as u64..base as u64 + buf.len() as u64;
        for (&addr, data) in &self.segments {
            let segment = addr as u64..addr as u64 + data.len() as u64;
            let start = segment.start.max(window.start);
            let end = segment.end.min(window.end);
            if start < end {
                buf[(start - window.start) as usize..(end - window.start) as usize]
                    .copy_from_slice(&data[(start - segment.start) as usize..(end - segment.start) as usize]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(records: &[Record]) -> String {
        ihex::create_object_file_representation(records).unwrap()
    }

    #[test]
    fn test_bin_at_base() {
        let image = Image::from_bin(0x1000, &[1, 2, 3]).unwrap();
        assert_eq!(image.len(), 3);
        assert_eq!(image.end(), 0x1003);
        assert_eq!(image.blocks(0x1000).into_iter().collect::<Vec<_>>(), [0x1000]);
        assert!(Image::from_bin(0, &[]).unwrap().is_empty());
        assert!(matches!(
            Image::from_bin(0xFFFF_FFFF, &[0, 0]),
            Err(ImageError::Overflow { .. })
        ));
    }

    #[test]
    fn test_hex_records_merge_and_split() {
        let text = hex(&[
            Record::Data {
                offset: 0x0100,
                value: vec![0x11; 16],
            },
            Record::Data {
                offset: 0x0110,
                value: vec![0x22; 16],
            },
            Record::ExtendedLinearAddress(0x0001),
            Record::Data {
                offset: 0x0000,
                value: vec![0x33; 4],
            },
            Record::StartLinearAddress(0x0000_0100),
            Record::EndOfFile,
        ]);

        let image = Image::from_ihex(&text).unwrap();
        assert_eq!(image.segment_count(), 2);
        assert_eq!(image.len(), 36);
        assert_eq!(image.end(), 0x1_0004);

        let mut buf = [0u8; 0x40];
        image.copy_into(0x0100, &mut buf);
        assert_eq!(&buf[..16], &[0x11; 16]);
        assert_eq!(&buf[16..32], &[0x22; 16]);
        assert_eq!(&buf[32..], &[0; 32]);
    }

    #[test]
    fn test_overlapping_records() {
        let text = hex(&[
            Record::Data {
                offset: 0x0000,
                value: vec![0; 8],
            },
            Record::Data {
                offset: 0x0004,
                value: vec![0; 8],
            },
            Record::EndOfFile,
        ]);
        assert!(matches!(
            Image::from_ihex(&text),
            Err(ImageError::Overlap { addr: 0x0004 })
        ));
    }

    #[test]
    fn test_bad_checksum() {
        assert!(matches!(
            Image::from_ihex(":0400000001020304F0\n:00000001FF\n"),
            Err(ImageError::Hex(_))
        ));
    }

    #[test]
    fn test_blocks_of_sparse_image() {
        let mut image = Image::from_bin(0x0FF0, &[0xAA; 0x20]).unwrap();
        image.insert(0x5000, &[0xBB; 8]).unwrap();
        let blocks: Vec<_> = image.blocks(0x1000).into_iter().collect();
        assert_eq!(blocks, [0x0000, 0x1000, 0x5000]);
    }
}
