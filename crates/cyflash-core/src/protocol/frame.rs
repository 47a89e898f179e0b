//! Generic frame encoding and decoding

use super::{ProtocolError, END_OF_FRAME, FRAME_OVERHEAD, START_OF_FRAME};

/// Frame checksum over `bytes` (start byte through last payload byte)
///
/// `(1 + (0xFFFF ^ sum)) mod 0x10000`, i.e. the value that brings the byte
/// sum to zero modulo 0x10000.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
    (1u32.wrapping_add(0xFFFF ^ sum) & 0xFFFF) as u16
}

/// One protocol frame
///
/// `code` holds the command identifier for requests and the status byte
/// for responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier or status byte
    pub code: u8,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, checking the payload fits the length field
    pub fn new(code: u8, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() > u16::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { code, payload })
    }

    /// Total encoded length
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(START_OF_FRAME);
        buf.push(self.code);
        // Length is bounded by `new`
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let chk = checksum(&buf);
        buf.extend_from_slice(&chk.to_le_bytes());
        buf.push(END_OF_FRAME);
        buf
    }

    /// Parse a frame from the start of `bytes`
    ///
    /// Trailing bytes after the stop byte are ignored (USB reads return a
    /// whole padded packet). The checksum is verified.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::Truncated {
                len: bytes.len(),
                needed: FRAME_OVERHEAD,
            });
        }
        if bytes[0] != START_OF_FRAME {
            return Err(ProtocolError::BadStart(bytes[0]));
        }

        let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let total = FRAME_OVERHEAD + len;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                len: bytes.len(),
                needed: total,
            });
        }
        if bytes[total - 1] != END_OF_FRAME {
            return Err(ProtocolError::BadStop(bytes[total - 1]));
        }

        let found = u16::from_le_bytes([bytes[total - 3], bytes[total - 2]]);
        let computed = checksum(&bytes[..total - 3]);
        if found != computed {
            return Err(ProtocolError::BadChecksum { found, computed });
        }

        Ok(Self {
            code: bytes[1],
            payload: bytes[4..4 + len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_sum(bytes: &[u8]) -> u32 {
        bytes.iter().map(|&b| u32::from(b)).sum()
    }

    #[test]
    fn test_checksum_cancels_sum() {
        let samples: [&[u8]; 4] = [
            &[0x01, 0x3B, 0x00, 0x00],
            &[0x01, 0x38, 0x06, 0x00, 0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F],
            &[0xFF; 300],
            &[],
        ];
        for sample in samples {
            let chk = checksum(sample);
            assert_eq!(
                (byte_sum(sample) + u32::from(chk)) % 0x10000,
                0,
                "sample {:02X?}",
                sample
            );
        }
    }

    #[test]
    fn test_exit_bootloader_wire_bytes() {
        // Sum = 0x3C, checksum = 0x10000 - 0x3C = 0xFFC4
        let frame = Frame::new(0x3B, vec![]).unwrap();
        assert_eq!(frame.encode(), vec![0x01, 0x3B, 0x00, 0x00, 0xC4, 0xFF, 0x17]);
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(0x32, vec![0x00]).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], START_OF_FRAME);
        assert_eq!(bytes[1], 0x32);
        assert_eq!(&bytes[2..4], &[0x01, 0x00]);
        assert_eq!(bytes[4], 0x00);
        assert_eq!(bytes[7], END_OF_FRAME);
        let chk = u16::from_le_bytes([bytes[5], bytes[6]]);
        assert_eq!(chk, checksum(&bytes[..5]));
    }

    #[test]
    fn test_decode_encode_lossless() {
        let frame = Frame::new(0x39, (0..57).collect()).unwrap();
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_ignores_padding() {
        let mut bytes = Frame::new(0x00, vec![0xAA]).unwrap().encode();
        bytes.resize(64, 0);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, vec![0xAA]);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let good = Frame::new(0x37, vec![1, 2, 3]).unwrap().encode();

        let mut bad = good.clone();
        bad[0] = 0x02;
        assert_eq!(Frame::decode(&bad), Err(ProtocolError::BadStart(0x02)));

        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] = 0x00;
        assert_eq!(Frame::decode(&bad), Err(ProtocolError::BadStop(0x00)));

        let mut bad = good.clone();
        bad[5] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&bad),
            Err(ProtocolError::BadChecksum { .. })
        ));

        assert!(matches!(
            Frame::decode(&good[..good.len() - 1]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_payload_too_large() {
        assert_eq!(
            Frame::new(0x37, vec![0; 0x10000]),
            Err(ProtocolError::PayloadTooLarge(0x10000))
        );
    }
}
