//! Serialized exceptions.
//!
//! ```text
//! no exception:  u32 0
//! exception:     u32 len │ u8 type │ u16 code │ u32 msg_len │ msg
//! ```

use bytes::{Buf, BufMut, BytesMut};
use partix_common::{ErrorCode, ExceptionType, EXCEPTION_TYPE_NONE};

use crate::buffers::OutputBuffer;
use crate::error::{EngineError, EngineResult};

/// An exception as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializableException {
    /// Exception type.
    pub exception_type: ExceptionType,
    /// Raw error code.
    pub code: u16,
    /// Message.
    pub message: String,
}

impl SerializableException {
    /// Builds the exception reported for an error code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            exception_type: ExceptionType::for_code(code),
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// Builds the exception reported for `err`.
    pub fn from_error(err: &EngineError) -> Self {
        Self::new(err.code(), err.to_string())
    }

    /// Writes the "no exception" marker at the start of `buffer`.
    pub fn reset(buffer: &mut OutputBuffer) -> EngineResult<()> {
        buffer.reset(0)?;
        buffer.write(&EXCEPTION_TYPE_NONE.to_be_bytes())
    }

    /// Replaces the buffer's contents with this exception.
    ///
    /// A message that does not fit is cut short rather than lost.
    pub fn serialize(&self, buffer: &mut OutputBuffer) -> EngineResult<()> {
        let fixed = 4 + 1 + 2 + 4;
        let room = buffer.capacity().saturating_sub(fixed);
        let mut message = self.message.as_str();
        if message.len() > room {
            let mut end = room;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message = &message[..end];
        }

        let mut buf = BytesMut::with_capacity(fixed + message.len());
        buf.put_u32((1 + 2 + 4 + message.len()) as u32);
        buf.put_u8(self.exception_type.as_u8());
        buf.put_u16(self.code);
        buf.put_u32(message.len() as u32);
        buf.put_slice(message.as_bytes());

        buffer.reset(0)?;
        buffer.write(&buf)
    }

    /// Reads the exception in `bytes`, `None` for the marker.
    pub fn decode(bytes: &[u8]) -> EngineResult<Option<Self>> {
        let truncated = || EngineError::invalid("exception buffer truncated");
        let mut buf = bytes;
        if buf.remaining() < 4 {
            return Err(truncated());
        }
        let len = buf.get_u32() as usize;
        if len == 0 {
            return Ok(None);
        }
        if buf.remaining() < len || len < 7 {
            return Err(truncated());
        }
        let type_code = buf.get_u8();
        let exception_type = ExceptionType::from_u8(type_code)
            .ok_or_else(|| EngineError::invalid(format!("unknown exception type {}", type_code)))?;
        let code = buf.get_u16();
        let msg_len = buf.get_u32() as usize;
        if buf.remaining() < msg_len {
            return Err(truncated());
        }
        let message = String::from_utf8_lossy(&buf[..msg_len]).into_owned();
        Ok(Some(Self {
            exception_type,
            code,
            message,
        }))
    }
}
