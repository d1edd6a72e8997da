//! Parameter sets and fragment batches as they arrive in the parameter
//! buffer.
//!
//! ```text
//! batch:   u16 count │ (i64 fragment, i32 out_dep, i32 in_dep, params) × count
//! params:  u16 count │ (u8 type tag, payload) × count
//! ```

use bytes::{Buf, BufMut};
use partix_common::{DependencyId, FragmentId};
use partix_storage::codec::{get_tagged_value, put_tagged_value};
use partix_storage::Value;

use crate::error::{ExecError, ExecResult};

/// Positional fragment parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: Vec<Value>,
}

impl ParameterSet {
    /// Creates a parameter set.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// The values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends the wire form.
    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.values.len() as u16);
        for value in &self.values {
            put_tagged_value(buf, value);
        }
    }

    /// Reads one parameter set, refusing more than `max_params` values.
    pub fn read(buf: &mut &[u8], max_params: usize) -> ExecResult<Self> {
        if buf.remaining() < 2 {
            return Err(ExecError::decode("parameter count truncated"));
        }
        let count = buf.get_u16() as usize;
        if count > max_params {
            return Err(ExecError::decode(format!(
                "{} parameters exceeds the limit of {}",
                count, max_params
            )));
        }
        let values = (0..count)
            .map(|_| get_tagged_value(buf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }
}

impl From<Vec<Value>> for ParameterSet {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// One fragment invocation of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRequest {
    /// Fragment to run.
    pub fragment_id: FragmentId,
    /// Dependency id the result is published under.
    pub out_dep: DependencyId,
    /// Dependency id `Receive` reads from.
    pub in_dep: DependencyId,
    /// Parameters.
    pub params: ParameterSet,
}

impl FragmentRequest {
    /// Creates a request with no dependencies.
    pub fn new(fragment_id: FragmentId, params: impl Into<ParameterSet>) -> Self {
        Self {
            fragment_id,
            out_dep: DependencyId::NONE,
            in_dep: DependencyId::NONE,
            params: params.into(),
        }
    }

    /// Sets the output dependency.
    pub fn with_output(mut self, dep: DependencyId) -> Self {
        self.out_dep = dep;
        self
    }

    /// Sets the input dependency.
    pub fn with_input(mut self, dep: DependencyId) -> Self {
        self.in_dep = dep;
        self
    }
}

/// An ordered batch of fragment requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentBatch {
    /// Requests in execution order.
    pub fragments: Vec<FragmentRequest>,
}

impl FragmentBatch {
    /// Creates a batch.
    pub fn new(fragments: Vec<FragmentRequest>) -> Self {
        Self { fragments }
    }

    /// Appends the wire form.
    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.fragments.len() as u16);
        for request in &self.fragments {
            buf.put_i64(request.fragment_id.as_i64());
            buf.put_i32(request.out_dep.as_i32());
            buf.put_i32(request.in_dep.as_i32());
            request.params.serialize(buf);
        }
    }

    /// Decodes a batch, enforcing batch and parameter limits.
    pub fn decode(bytes: &[u8], max_batch: usize, max_params: usize) -> ExecResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(ExecError::decode("batch count truncated"));
        }
        let count = buf.get_u16() as usize;
        if count > max_batch {
            return Err(ExecError::decode(format!(
                "batch of {} fragments exceeds the limit of {}",
                count, max_batch
            )));
        }

        let mut fragments = Vec::with_capacity(count);
        for i in 0..count {
            if buf.remaining() < 16 {
                return Err(ExecError::decode(format!("fragment {} header truncated", i)));
            }
            let fragment_id = FragmentId::new(buf.get_i64());
            let out_dep = DependencyId::new(buf.get_i32());
            let in_dep = DependencyId::new(buf.get_i32());
            let params = ParameterSet::read(&mut buf, max_params)?;
            fragments.push(FragmentRequest {
                fragment_id,
                out_dep,
                in_dep,
                params,
            });
        }
        Ok(Self { fragments })
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Returns true for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
