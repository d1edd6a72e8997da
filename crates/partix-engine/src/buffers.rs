//! The four caller-owned buffers.
//!
//! ```text
//!  parameters ──► engine reads fragment batches and parameter sets
//!  result     ◄── [header_size reserved] (i32 dep, table)*
//!  exception  ◄── u32 0 | serialized exception
//!  log        ◄── log records, when enabled
//! ```
//!
//! The caller binds a [`BufferSet`] with one call and may take it back at
//! any time. Every region has a fixed capacity; writes past it fail instead
//! of growing the buffer.

use bytes::{BufMut, BytesMut};

use crate::error::{EngineError, EngineResult, Region};

/// A fixed-capacity output region.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    region: Region,
    data: BytesMut,
    capacity: usize,
    header: usize,
}

impl OutputBuffer {
    fn new(region: Region, capacity: usize) -> Self {
        Self {
            region,
            data: BytesMut::with_capacity(capacity.min(1 << 20)),
            capacity,
            header: 0,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written, including the reserved header.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing is written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Reserved header size.
    pub fn header_size(&self) -> usize {
        self.header
    }

    /// Everything written.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Everything written after the header.
    pub fn body(&self) -> &[u8] {
        &self.data[self.header..]
    }

    /// Rewinds to just after a zeroed header of `header` bytes.
    pub fn reset(&mut self, header: usize) -> EngineResult<()> {
        self.check(header)?;
        self.data.clear();
        self.data.put_bytes(0, header);
        self.header = header;
        Ok(())
    }

    /// Appends `bytes`, failing without writing if they do not fit.
    pub fn write(&mut self, bytes: &[u8]) -> EngineResult<()> {
        self.check(self.data.len() + bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrites already written bytes at `offset`.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> EngineResult<()> {
        let end = offset + bytes.len();
        if end > self.data.len() {
            return Err(EngineError::BufferOverflow {
                region: self.region,
                needed: end,
                capacity: self.data.len(),
            });
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Drops everything after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len.max(self.header));
    }

    fn check(&self, needed: usize) -> EngineResult<()> {
        if needed > self.capacity {
            return Err(EngineError::BufferOverflow {
                region: self.region,
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Parameter, result, exception and log regions bound together.
#[derive(Debug, Clone)]
pub struct BufferSet {
    parameters: BytesMut,
    parameter_capacity: usize,
    result: OutputBuffer,
    exception: OutputBuffer,
    log: OutputBuffer,
}

impl BufferSet {
    /// Creates a set with the given capacities.
    pub fn new(
        parameter_capacity: usize,
        result_capacity: usize,
        exception_capacity: usize,
        log_capacity: usize,
    ) -> Self {
        Self {
            parameters: BytesMut::new(),
            parameter_capacity,
            result: OutputBuffer::new(Region::Result, result_capacity),
            exception: OutputBuffer::new(Region::Exception, exception_capacity),
            log: OutputBuffer::new(Region::Log, log_capacity),
        }
    }

    /// Creates a set with every region `capacity` bytes long.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, capacity, capacity, capacity)
    }

    /// Caller side: replaces the parameter region's contents.
    pub fn write_parameters(&mut self, bytes: &[u8]) -> EngineResult<()> {
        if bytes.len() > self.parameter_capacity {
            return Err(EngineError::BufferOverflow {
                region: Region::Parameters,
                needed: bytes.len(),
                capacity: self.parameter_capacity,
            });
        }
        self.parameters.clear();
        self.parameters.extend_from_slice(bytes);
        Ok(())
    }

    /// The parameter region.
    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// The result region.
    pub fn result(&self) -> &OutputBuffer {
        &self.result
    }

    /// The result region, mutably.
    pub fn result_mut(&mut self) -> &mut OutputBuffer {
        &mut self.result
    }

    /// The exception region.
    pub fn exception(&self) -> &OutputBuffer {
        &self.exception
    }

    /// The exception region, mutably.
    pub fn exception_mut(&mut self) -> &mut OutputBuffer {
        &mut self.exception
    }

    /// The log region.
    pub fn log(&self) -> &OutputBuffer {
        &self.log
    }

    /// The log region, mutably.
    pub fn log_mut(&mut self) -> &mut OutputBuffer {
        &mut self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let mut buffers = BufferSet::new(4, 8, 8, 8);
        assert!(matches!(
            buffers.write_parameters(&[0; 5]),
            Err(EngineError::BufferOverflow {
                region: Region::Parameters,
                ..
            })
        ));

        let result = buffers.result_mut();
        result.reset(4).unwrap();
        result.write(&[1, 2, 3]).unwrap();
        assert!(result.write(&[4, 5]).is_err());
        assert_eq!(result.as_slice(), &[0, 0, 0, 0, 1, 2, 3]);
        assert_eq!(result.body(), &[1, 2, 3]);
        assert!(result.reset(9).is_err());
    }

    #[test]
    fn test_patch_and_truncate() {
        let mut buffers = BufferSet::with_capacity(16);
        let log = buffers.log_mut();
        log.reset(0).unwrap();
        log.write(&[0, 0, 9]).unwrap();
        log.patch(0, &[7, 8]).unwrap();
        assert_eq!(log.as_slice(), &[7, 8, 9]);
        assert!(log.patch(2, &[1, 1]).is_err());
        log.truncate(1);
        assert_eq!(log.len(), 1);
    }
}
