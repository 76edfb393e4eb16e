// One MTU-bounded packet of an envelope: a 24-byte header followed by its
// payload slice.

use crate::ids::CallId;

/// `correlation_id (16) + sequence (2) + total (2) + crc32 (4)`.
pub const FRAME_HEADER_LEN: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub correlation_id: CallId,
    pub sequence: u16,
    pub total: u16,
    pub crc32: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(correlation_id: CallId, sequence: u16, total: u16, payload: Vec<u8>) -> Self {
        let crc32 = crc32fast::hash(&payload);
        Self {
            header: FrameHeader {
                correlation_id,
                sequence,
                total,
                crc32,
            },
            payload,
        }
    }

    pub fn crc_valid(&self) -> bool {
        crc32fast::hash(&self.payload) == self.header.crc32
    }

    /// Serialize header + payload into the wire byte layout. Plain
    /// fixed-width encoding, not the envelope codec — frames are never
    /// passed through `postcard`, since the header must be a constant 24
    /// bytes regardless of payload contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.correlation_id.as_u128().as_bytes());
        out.extend_from_slice(&self.header.sequence.to_be_bytes());
        out.extend_from_slice(&self.header.total.to_be_bytes());
        out.extend_from_slice(&self.header.crc32.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }

        let mut correlation_bytes = [0u8; 16];
        correlation_bytes.copy_from_slice(&bytes[0..16]);
        let sequence = u16::from_be_bytes(bytes[16..18].try_into().ok()?);
        let total = u16::from_be_bytes(bytes[18..20].try_into().ok()?);
        let crc32 = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        let payload = bytes[FRAME_HEADER_LEN..].to_vec();

        Some(Self {
            header: FrameHeader {
                correlation_id: CallId::from_u128(crate::ids::U128::from_bytes(correlation_bytes)),
                sequence,
                total,
                crc32,
            },
            payload,
        })
    }
}
