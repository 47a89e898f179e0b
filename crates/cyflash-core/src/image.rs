//! `.cyacd` firmware image parsing
//!
//! The image is ASCII hex, one record per line:
//!
//! ```text
//! 1E9602AA00                      <- header: silicon ID (BE u32) + silicon rev
//! :000005004000AA...55            <- row: array, row (BE u16), size (BE u16), data, checksum
//! ```
//!
//! Row lines conventionally start with a `:` which is not part of the hex
//! payload. The per-row checksum byte is not checked here; it is only used
//! later to derive the value the device must report after programming.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

/// Size of the decoded header record
pub const HEADER_LEN: usize = 5;
/// Bytes preceding the payload in a decoded row record
pub const ROW_PREFIX_LEN: usize = 5;

/// Errors raised while decoding an image
#[derive(Debug, Error)]
pub enum FormatError {
    /// The file could not be read
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),

    /// The image has no header line
    #[error("image is empty, header line missing")]
    MissingHeader,

    /// A line is not valid hex
    #[error("line {line}: invalid hex: {source}")]
    InvalidHex {
        /// 1-based line number
        line: usize,
        /// Underlying decoder error
        source: hex::FromHexError,
    },

    /// The header decodes to fewer than five bytes
    #[error("header is {len} bytes, expected at least {HEADER_LEN}")]
    HeaderTooShort {
        /// Decoded header length
        len: usize,
    },

    /// A row record is shorter than its declared size requires
    #[error("line {line}: row record is {len} bytes, size field requires {needed}")]
    RowTooShort {
        /// 1-based line number
        line: usize,
        /// Decoded record length
        len: usize,
        /// Minimum length for the declared payload size
        needed: usize,
    },

    /// A row payload does not fit the 16-bit size field
    #[error("row payload of {len} bytes exceeds the 16-bit size field")]
    RowTooLong {
        /// Payload length
        len: usize,
    },
}

/// One flash row record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    array_id: u8,
    row_num: u16,
    data: Vec<u8>,
    checksum: u8,
}

impl Row {
    /// Build a row from its fields
    pub fn new(
        array_id: u8,
        row_num: u16,
        data: Vec<u8>,
        checksum: u8,
    ) -> Result<Self, FormatError> {
        if data.len() > u16::MAX as usize {
            return Err(FormatError::RowTooLong { len: data.len() });
        }
        Ok(Self {
            array_id,
            row_num,
            data,
            checksum,
        })
    }

    /// Decode a single row line (with or without the leading `:`)
    pub fn parse_line(line: &str, line_no: usize) -> Result<Self, FormatError> {
        let text = line.trim();
        let text = text.strip_prefix(':').unwrap_or(text);
        let decoded = hex::decode(text).map_err(|source| FormatError::InvalidHex {
            line: line_no,
            source,
        })?;

        if decoded.len() < ROW_PREFIX_LEN {
            return Err(FormatError::RowTooShort {
                line: line_no,
                len: decoded.len(),
                needed: ROW_PREFIX_LEN + 1,
            });
        }

        let size = u16::from_be_bytes([decoded[3], decoded[4]]) as usize;
        let needed = ROW_PREFIX_LEN + size + 1;
        if decoded.len() < needed {
            return Err(FormatError::RowTooShort {
                line: line_no,
                len: decoded.len(),
                needed,
            });
        }

        Ok(Self {
            array_id: decoded[0],
            row_num: u16::from_be_bytes([decoded[1], decoded[2]]),
            data: decoded[ROW_PREFIX_LEN..ROW_PREFIX_LEN + size].to_vec(),
            checksum: decoded[decoded.len() - 1],
        })
    }

    /// Flash array this row belongs to
    pub fn array_id(&self) -> u8 {
        self.array_id
    }

    /// Row number within the array
    pub fn row_num(&self) -> u16 {
        self.row_num
    }

    /// Payload size in bytes
    pub fn size(&self) -> u16 {
        // Bounded by construction
        self.data.len() as u16
    }

    /// Row payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Checksum byte stored at the end of the record
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Value GetRowChecksum must return once this row is programmed
    ///
    /// The record checksum plus every header byte of the record, mod 256.
    pub fn expected_device_checksum(&self) -> u8 {
        let [row_hi, row_lo] = self.row_num.to_be_bytes();
        let [size_hi, size_lo] = self.size().to_be_bytes();
        self.checksum
            .wrapping_add(self.array_id)
            .wrapping_add(row_hi)
            .wrapping_add(row_lo)
            .wrapping_add(size_lo)
            .wrapping_add(size_hi)
    }
}

/// A parsed `.cyacd` image
///
/// Rows keep their file order, which is also the programming order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    silicon_id: u32,
    silicon_rev: u8,
    rows: Vec<Row>,
}

impl FirmwareImage {
    /// Assemble an image from already decoded parts
    pub fn new(silicon_id: u32, silicon_rev: u8, rows: Vec<Row>) -> Self {
        Self {
            silicon_id,
            silicon_rev,
            rows,
        }
    }

    /// Parse an image from its text
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_no, header) = lines.next().ok_or(FormatError::MissingHeader)?;
        let decoded = hex::decode(header).map_err(|source| FormatError::InvalidHex {
            line: header_no,
            source,
        })?;
        if decoded.len() < HEADER_LEN {
            return Err(FormatError::HeaderTooShort { len: decoded.len() });
        }

        let silicon_id = u32::from_be_bytes([decoded[0], decoded[1], decoded[2], decoded[3]]);
        let silicon_rev = decoded[4];

        let rows = lines
            .map(|(line_no, line)| Row::parse_line(line, line_no))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Parsed image: silicon 0x{:08X} rev 0x{:02X}, {} rows",
            silicon_id,
            silicon_rev,
            rows.len()
        );

        Ok(Self {
            silicon_id,
            silicon_rev,
            rows,
        })
    }

    /// Read and parse an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let text = fs::read_to_string(path.as_ref())?;
        log::info!("Loaded firmware image {}", path.as_ref().display());
        Self::parse(&text)
    }

    /// Silicon ID the image targets
    pub fn silicon_id(&self) -> u32 {
        self.silicon_id
    }

    /// Silicon revision the image targets
    pub fn silicon_rev(&self) -> u8 {
        self.silicon_rev
    }

    /// Rows in file order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Total payload bytes over all rows
    pub fn total_bytes(&self) -> usize {
        self.rows.iter().map(|r| r.data.len()).sum()
    }

    /// Number of rows per flash array
    pub fn rows_per_array(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.array_id).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_line(array: u8, row: u16, data: &[u8], checksum: u8) -> String {
        let mut bytes = vec![array];
        bytes.extend_from_slice(&row.to_be_bytes());
        bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
        bytes.extend_from_slice(data);
        bytes.push(checksum);
        format!(":{}", hex::encode_upper(bytes))
    }

    #[test]
    fn test_parse_header_and_rows() {
        let text = format!(
            "1E9602AA00\n{}\n{}\n",
            row_line(0, 0x10, &[1, 2, 3, 4], 0xAB),
            row_line(1, 0x0102, &[0xFF; 8], 0x01)
        );
        let image = FirmwareImage::parse(&text).unwrap();

        assert_eq!(image.silicon_id(), 0x1E9602AA);
        assert_eq!(image.silicon_rev(), 0x00);
        assert_eq!(image.rows().len(), 2);

        let first = &image.rows()[0];
        assert_eq!(first.array_id(), 0);
        assert_eq!(first.row_num(), 0x10);
        assert_eq!(first.size(), 4);
        assert_eq!(first.data(), &[1, 2, 3, 4]);
        assert_eq!(first.checksum(), 0xAB);

        let second = &image.rows()[1];
        assert_eq!(second.array_id(), 1);
        assert_eq!(second.row_num(), 0x0102);
        assert_eq!(second.data().len(), 8);
        assert_eq!(image.total_bytes(), 12);
    }

    #[test]
    fn test_data_length_matches_size_field() {
        let data: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let row = Row::parse_line(&row_line(0, 5, &data, 0x42), 2).unwrap();
        assert_eq!(row.data().len(), 128);
        assert_eq!(row.size(), 128);
        assert_eq!(row.data(), &data[..]);
    }

    #[test]
    fn test_truncated_row_is_rejected() {
        // Declares 0x40 bytes but carries only 4 plus the checksum
        let line = ":000005004001020304AA";
        match Row::parse_line(line, 3) {
            Err(FormatError::RowTooShort { line, needed, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(needed, 5 + 0x40 + 1);
            }
            other => panic!("expected RowTooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let text = "1E9602AA00\n:00zz\n";
        assert!(matches!(
            FirmwareImage::parse(text),
            Err(FormatError::InvalidHex { line: 2, .. })
        ));

        assert!(matches!(
            FirmwareImage::parse("XYZ"),
            Err(FormatError::InvalidHex { line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_or_short_header() {
        assert!(matches!(
            FirmwareImage::parse(""),
            Err(FormatError::MissingHeader)
        ));
        assert!(matches!(
            FirmwareImage::parse("1E96\n"),
            Err(FormatError::HeaderTooShort { len: 2 })
        ));
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let text = format!("04C811930A\r\n\r\n{}\r\n", row_line(0, 1, &[9], 0));
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(image.silicon_id(), 0x04C81193);
        assert_eq!(image.silicon_rev(), 0x0A);
        assert_eq!(image.rows().len(), 1);
    }

    #[test]
    fn test_expected_device_checksum() {
        let row = Row::new(0x00, 0x0005, vec![0u8; 0x40], 0x10).unwrap();
        assert_eq!(row.expected_device_checksum(), 0x55);

        // Wraps modulo 256
        let row = Row::new(0x01, 0x01FF, vec![0u8; 0x0180], 0xF0).unwrap();
        let expected = (0xF0u32 + 0x01 + 0x01 + 0xFF + 0x80 + 0x01) % 256;
        assert_eq!(row.expected_device_checksum() as u32, expected);
    }

    #[test]
    fn test_rows_per_array() {
        let text = format!(
            "1E9602AA00\n{}\n{}\n{}\n",
            row_line(0, 1, &[0], 0),
            row_line(1, 1, &[0], 0),
            row_line(0, 2, &[0], 0)
        );
        let image = FirmwareImage::parse(&text).unwrap();
        let counts = image.rows_per_array();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&1), Some(&1));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.cyacd");
        std::fs::write(&path, format!("1E9602AA00\n{}\n", row_line(0, 7, &[1, 2], 3))).unwrap();

        let image = FirmwareImage::from_file(&path).unwrap();
        assert_eq!(image.rows()[0].row_num(), 7);

        assert!(matches!(
            FirmwareImage::from_file(dir.path().join("missing.cyacd")),
            Err(FormatError::Io(_))
        ));
    }
}
