//! Append-only journal of committed table batches.
//!
//! Every frame is self-describing:
//!
//! ```text
//! magic "FSJR" (4) | version u16 LE (2) | type u8 (1) | len u32 LE (4) | payload | crc32 LE (4)
//! ```
//!
//! The CRC covers everything before it. A damaged last frame is a torn
//! write and is cut off on replay; damage anywhere else is corruption.

use crate::error::{CoreError, CoreResult};
use fieldsync_storage::StorageBackend;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Magic bytes starting every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FSJR";

/// Current frame format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Type of a journal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Operations of one committed transaction.
    Batch = 1,
    /// A full image of the journaled state, written by compaction.
    Snapshot = 2,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Batch),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame in the journal.
    pub offset: u64,
    /// Frame type.
    pub frame_type: FrameType,
    /// CBOR payload.
    pub payload: Vec<u8>,
}

/// Serializes a frame with its envelope.
pub fn encode_frame(frame_type: FrameType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("journal frame payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&JOURNAL_MAGIC);
    data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    data.push(frame_type as u8);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Encodes a value as CBOR.
pub fn encode_cbor<S: Serialize>(value: &S) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(CoreError::codec)?;
    Ok(buf)
}

/// Decodes a CBOR value.
pub fn decode_cbor<D: DeserializeOwned>(bytes: &[u8]) -> CoreResult<D> {
    ciborium::de::from_reader(bytes).map_err(CoreError::codec)
}

/// A journal over a storage backend.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
    frames: Mutex<usize>,
}

impl Journal {
    /// Creates a journal. Call [`replay`](Self::replay) before appending.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            frames: Mutex::new(0),
        }
    }

    /// Appends one frame and returns its offset.
    ///
    /// If the write or the following flush/sync fails, the journal is cut
    /// back to its previous length so a failed commit never replays.
    pub fn append(&self, frame_type: FrameType, payload: &[u8]) -> CoreResult<u64> {
        let data = encode_frame(frame_type, payload)?;

        let mut backend = self.backend.lock();
        let start = backend.size()?;
        let written = backend.append(&data).and_then(|offset| {
            if self.sync_on_commit {
                backend.sync()?;
            } else {
                backend.flush()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => {
                *self.frames.lock() += 1;
                Ok(offset)
            }
            Err(err) => {
                if let Err(rollback) = backend.truncate(start) {
                    warn!(
                        offset = start,
                        error = %rollback,
                        "failed to roll back journal append"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Replaces the whole journal with a single frame.
    pub fn rewrite(&self, frame_type: FrameType, payload: &[u8]) -> CoreResult<()> {
        let data = encode_frame(frame_type, payload)?;
        self.backend.lock().replace(&data)?;
        *self.frames.lock() = 1;
        Ok(())
    }

    /// Reads every intact frame, cutting off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] or
    /// [`CoreError::ChecksumMismatch`] when a damaged frame is followed by
    /// more data.
    pub fn replay(&self) -> CoreResult<Vec<Frame>> {
        let mut backend = self.backend.lock();
        let bytes = backend.read_all()?;
        let size = bytes.len() as u64;

        let mut frames = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            match decode_frame_at(&bytes, offset)? {
                Decoded::Frame(frame, next) => {
                    frames.push(frame);
                    offset = next;
                }
                Decoded::TornTail => {
                    warn!(
                        offset,
                        dropped = size - offset as u64,
                        "truncating torn journal tail"
                    );
                    backend.truncate(offset as u64)?;
                    backend.sync()?;
                    break;
                }
            }
        }

        *self.frames.lock() = frames.len();
        Ok(frames)
    }

    /// Number of frames currently in the journal.
    pub fn frame_count(&self) -> usize {
        *self.frames.lock()
    }

    /// Size of the journal in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

enum Decoded {
    Frame(Frame, usize),
    TornTail,
}

fn decode_frame_at(bytes: &[u8], offset: usize) -> CoreResult<Decoded> {
    let remaining = bytes.len() - offset;
    if remaining < HEADER_SIZE {
        return Ok(Decoded::TornTail);
    }

    let header = &bytes[offset..offset + HEADER_SIZE];
    if header[0..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption(offset as u64, "bad frame magic"));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != JOURNAL_VERSION {
        return Err(CoreError::journal_corruption(
            offset as u64,
            format!("unsupported frame version {version}"),
        ));
    }

    let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    let end = offset + HEADER_SIZE + len + CRC_SIZE;
    if end > bytes.len() {
        return Ok(Decoded::TornTail);
    }

    let body_end = end - CRC_SIZE;
    let expected = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    let actual = compute_crc32(&bytes[offset..body_end]);
    if expected != actual {
        if end == bytes.len() {
            return Ok(Decoded::TornTail);
        }
        return Err(CoreError::ChecksumMismatch {
            offset: offset as u64,
            expected,
            actual,
        });
    }

    let frame_type = FrameType::from_byte(header[6]).ok_or_else(|| {
        CoreError::journal_corruption(offset as u64, format!("unknown frame type {}", header[6]))
    })?;

    Ok(Decoded::Frame(
        Frame {
            offset: offset as u64,
            frame_type,
            payload: bytes[offset + HEADER_SIZE..body_end].to_vec(),
        },
        end,
    ))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
