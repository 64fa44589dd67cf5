//! Fixed-size frame codec for the datagram protocol.
//!
//! Every datagram is exactly one frame of `MESSAGE_SIZE` bytes, whatever
//! its operation or phase. Unused payload bytes are zero-filled on encode
//! but never trusted on decode.

use crate::error::{Result, TransferError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Wire format: all multi-byte integers are big-endian
/// Frame format: operation:u32 | phase:u32 | payload:[u8; 1024]

/// Fixed payload block carried by every frame
pub const PAYLOAD_SIZE: usize = 1024;

/// Operation code + phase code
pub const HEADER_SIZE: usize = 8;

/// Total datagram size
pub const MESSAGE_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Frame index prefix of a data payload
pub const INDEX_SIZE: usize = 2;

/// Usable file bytes per data frame
pub const FRAME_BODY_SIZE: usize = PAYLOAD_SIZE - INDEX_SIZE;

/// Largest number of frames addressable by the 2-byte index
pub const MAX_FRAMES: usize = u16::MAX as usize;

/// Largest file that fits in `MAX_FRAMES` frames
pub const MAX_FILE_LEN: u64 = (MAX_FRAMES * FRAME_BODY_SIZE) as u64;

/// Longest name that still leaves room for its NUL terminator
pub const MAX_NAME_LEN: usize = PAYLOAD_SIZE - 1;

/// Longest name in an Upload Init (after the 4-byte length)
pub const MAX_UPLOAD_NAME_LEN: usize = PAYLOAD_SIZE - 4 - 1;

// =============================================================================
// Operations and phases
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    Fetch = 0,
    Upload = 1,
    Delete = 2,
    List = 3,
    Shutdown = 4,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Self::Fetch,
        Self::Upload,
        Self::Delete,
        Self::List,
        Self::Shutdown,
    ];

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Fetch),
            1 => Some(Self::Upload),
            2 => Some(Self::Delete),
            3 => Some(Self::List),
            4 => Some(Self::Shutdown),
            _ => None,
        }
    }

    /// Phases of this operation, in wire-code order.
    pub fn phases(self) -> &'static [Phase] {
        match self {
            Self::Fetch | Self::Upload | Self::List => &[Phase::Init, Phase::Data, Phase::Done],
            Self::Delete => &[Phase::Init, Phase::Done],
            Self::Shutdown => &[Phase::Init],
        }
    }

    pub fn has_phase(self, phase: Phase) -> bool {
        self.phases().contains(&phase)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Handshake step within an operation.
///
/// The wire code of a phase is its position in [`Operation::phases`], so
/// Done is 2 for Fetch but 1 for Delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Data,
    Done,
}

impl Phase {
    pub fn code(self, op: Operation) -> Option<u32> {
        op.phases()
            .iter()
            .position(|p| *p == self)
            .map(|pos| pos as u32)
    }

    pub fn from_code(op: Operation, code: u32) -> Option<Self> {
        op.phases().get(code as usize).copied()
    }
}

// =============================================================================
// Frame
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    operation: Operation,
    phase: Phase,
    payload: Bytes,
}

impl Frame {
    pub fn new(operation: Operation, phase: Phase, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if !operation.has_phase(phase) {
            return Err(TransferError::malformed(format!(
                "{} has no {:?} phase",
                operation.name(),
                phase
            )));
        }
        if payload.len() > PAYLOAD_SIZE {
            return Err(TransferError::PayloadTooLarge {
                len: payload.len(),
                max: PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            operation,
            phase,
            payload,
        })
    }

    /// A frame with no meaningful payload.
    pub fn signal(operation: Operation, phase: Phase) -> Result<Self> {
        Self::new(operation, phase, Bytes::new())
    }

    /// Append a command sequence number after the meaningful payload.
    ///
    /// Nothing decodes it. It only keeps two consecutive Inits for the same
    /// target from being byte-identical, so a holder can tell a repeated
    /// command from a retransmit. Frames with no room are left as they are.
    pub fn stamped(mut self, sequence: u32) -> Self {
        if self.payload.len() + 4 <= PAYLOAD_SIZE {
            let mut buf = BytesMut::with_capacity(self.payload.len() + 4);
            buf.put_slice(&self.payload);
            buf.put_u32(sequence);
            self.payload = buf.freeze();
        }
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Payload bytes. Decoded frames always carry the full `PAYLOAD_SIZE`.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is(&self, operation: Operation, phase: Phase) -> bool {
        self.operation == operation && self.phase == phase
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_SIZE);
        buf.put_u32(self.operation as u32);
        // Validated in `new`
        buf.put_u32(self.phase.code(self.operation).unwrap_or_default());
        buf.put_slice(&self.payload);
        buf.put_bytes(0, PAYLOAD_SIZE - self.payload.len());
        buf.freeze()
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < MESSAGE_SIZE {
            return Err(TransferError::malformed(format!(
                "truncated frame: {} bytes, expected {}",
                block.len(),
                MESSAGE_SIZE
            )));
        }
        let mut buf = &block[..MESSAGE_SIZE];
        let op_code = buf.get_u32();
        let phase_code = buf.get_u32();

        let operation = Operation::from_u32(op_code)
            .ok_or_else(|| TransferError::malformed(format!("unknown operation {}", op_code)))?;
        let phase = Phase::from_code(operation, phase_code).ok_or_else(|| {
            TransferError::malformed(format!(
                "unknown phase {} for {}",
                phase_code,
                operation.name()
            ))
        })?;

        Ok(Self {
            operation,
            phase,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// Read a NUL-terminated name from the start of a payload.
fn read_name(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn put_name(buf: &mut BytesMut, name: &str, max: usize) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > max {
        return Err(TransferError::NameTooLong {
            len: bytes.len(),
            max,
        });
    }
    buf.put_slice(bytes);
    buf.put_u8(0);
    Ok(())
}

fn require(frame: &Frame, operation: Operation, phase: Phase) -> Result<()> {
    if frame.is(operation, phase) {
        Ok(())
    } else {
        Err(TransferError::malformed(format!(
            "expected {} {:?}, got {} {:?}",
            operation.name(),
            phase,
            frame.operation.name(),
            frame.phase
        )))
    }
}

fn require_len(payload: &[u8], len: usize, what: &str) -> Result<()> {
    if payload.len() < len {
        return Err(TransferError::malformed(format!("{} payload too short", what)));
    }
    Ok(())
}

// =============================================================================
// Init payloads
// =============================================================================

/// Init carrying a bare file name (Fetch, Delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRequest {
    pub name: String,
}

impl NameRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn encode(&self, operation: Operation) -> Result<Frame> {
        let mut buf = BytesMut::with_capacity(self.name.len() + 1);
        put_name(&mut buf, &self.name, MAX_NAME_LEN)?;
        Frame::new(operation, Phase::Init, buf.freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.phase != Phase::Init {
            return Err(TransferError::malformed("name request outside Init"));
        }
        let name = read_name(frame.payload());
        if name.is_empty() {
            return Err(TransferError::malformed("empty file name"));
        }
        Ok(Self { name })
    }
}

/// Fetch Init response: the file length, zero meaning "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthReply {
    pub length: u32,
}

impl LengthReply {
    pub const NOT_FOUND: LengthReply = LengthReply { length: 0 };

    pub fn encode(&self) -> Result<Frame> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.length);
        Frame::new(Operation::Fetch, Phase::Init, buf.freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        require(frame, Operation::Fetch, Phase::Init)?;
        let mut payload = frame.payload().clone();
        require_len(&payload, 4, "length reply")?;
        Ok(Self {
            length: payload.get_u32(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        self.length == 0
    }
}

/// Upload Init: file length followed by the target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInit {
    pub length: u32,
    pub name: String,
}

impl UploadInit {
    pub fn encode(&self) -> Result<Frame> {
        let mut buf = BytesMut::with_capacity(4 + self.name.len() + 1);
        buf.put_u32(self.length);
        put_name(&mut buf, &self.name, MAX_UPLOAD_NAME_LEN)?;
        Frame::new(Operation::Upload, Phase::Init, buf.freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        require(frame, Operation::Upload, Phase::Init)?;
        let mut payload = frame.payload().clone();
        require_len(&payload, 5, "upload init")?;
        let length = payload.get_u32();
        let name = read_name(&payload);
        if name.is_empty() {
            return Err(TransferError::malformed("empty file name"));
        }
        Ok(Self { length, name })
    }
}

// =============================================================================
// Status payloads
// =============================================================================

/// Single success/failure byte (Upload Init accept, Delete/Upload Done).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub ok: bool,
}

impl Status {
    pub fn encode(&self, operation: Operation, phase: Phase) -> Result<Frame> {
        Frame::new(operation, phase, vec![u8::from(self.ok)])
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        require_len(frame.payload(), 1, "status")?;
        Ok(Self {
            ok: frame.payload()[0] == 1,
        })
    }
}

// =============================================================================
// Data payloads
// =============================================================================

/// One frame of file content at a frame index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub operation: Operation,
    pub index: u16,
    pub body: Bytes,
}

impl DataFrame {
    pub fn encode(&self) -> Result<Frame> {
        if self.body.len() > FRAME_BODY_SIZE {
            return Err(TransferError::PayloadTooLarge {
                len: self.body.len(),
                max: FRAME_BODY_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(INDEX_SIZE + self.body.len());
        buf.put_u16(self.index);
        buf.put_slice(&self.body);
        Frame::new(self.operation, Phase::Data, buf.freeze())
    }

    /// The body is the full remainder of the payload; the caller trims it
    /// to the valid length derived from the file length.
    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.phase != Phase::Data {
            return Err(TransferError::malformed("data frame outside Data phase"));
        }
        let mut payload = frame.payload().clone();
        require_len(&payload, INDEX_SIZE, "data frame")?;
        let index = payload.get_u16();
        Ok(Self {
            operation: frame.operation,
            index,
            body: payload,
        })
    }
}

/// Lowest missing frame index, sent by whichever side is receiving.
///
/// Fetch requesters send it to ask for a burst; Upload holders send it to
/// tell the uploader where to resume, `frame_count` meaning complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorReport {
    pub operation: Operation,
    pub cursor: u16,
}

impl CursorReport {
    pub fn encode(&self) -> Result<Frame> {
        let mut buf = BytesMut::with_capacity(INDEX_SIZE);
        buf.put_u16(self.cursor);
        Frame::new(self.operation, Phase::Data, buf.freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.phase != Phase::Data {
            return Err(TransferError::malformed("cursor report outside Data phase"));
        }
        let mut payload = frame.payload().clone();
        require_len(&payload, INDEX_SIZE, "cursor report")?;
        Ok(Self {
            operation: frame.operation,
            cursor: payload.get_u16(),
        })
    }
}

/// List Data response: newline-terminated entry names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub text: String,
}

impl Listing {
    /// Join entries, silently truncating to the payload size.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        for entry in entries {
            text.push_str(entry.as_ref());
            text.push('\n');
        }
        if text.len() > PAYLOAD_SIZE {
            let mut cut = PAYLOAD_SIZE;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Self { text }
    }

    pub fn entries(&self) -> Vec<String> {
        self.text
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn encode(&self) -> Result<Frame> {
        Frame::new(
            Operation::List,
            Phase::Data,
            Bytes::copy_from_slice(self.text.as_bytes()),
        )
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        require(frame, Operation::List, Phase::Data)?;
        Ok(Self {
            text: read_name(frame.payload()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
