//! Binary codecs for values, tuples and serialized tables.
//!
//! All integers are big-endian.
//!
//! ```text
//! value:  [u8 null marker: 0 present, 1 null] [payload]
//! tagged: [u8 type code, 0 for null] [payload]
//! tuple:  [u32 byte length] [value]*
//! table:  [u32 total_len] [u8 status] [u16 column_count] [u8 type]*
//!         [u32 len + utf8 name]* [u32 row_count] [tuple]*
//! ```
//!
//! Variable-length payloads are a `u32` length followed by the bytes.

use bytes::{Buf, BufMut, BytesMut};
use partix_common::constants::{MAX_VARIABLE_LENGTH, TABLE_STATUS_OK};

use crate::error::{StorageError, StorageResult};
use crate::row::Row;
use crate::schema::Column;
use crate::value::{ColumnType, Value};

const NULL_MARKER: u8 = 1;
const PRESENT_MARKER: u8 = 0;

fn ensure(buf: &[u8], needed: usize, what: &str) -> StorageResult<()> {
    if buf.remaining() < needed {
        return Err(StorageError::decode(format!(
            "{} truncated: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

// =============================================================================
// Values
// =============================================================================

fn put_payload<B: BufMut>(buf: &mut B, value: &Value) {
    match value {
        Value::Null => {}
        Value::TinyInt(v) => buf.put_i8(*v),
        Value::SmallInt(v) => buf.put_i16(*v),
        Value::Integer(v) => buf.put_i32(*v),
        Value::BigInt(v) | Value::Timestamp(v) => buf.put_i64(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::Varchar(s) => {
            buf.put_u32(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        Value::Varbinary(b) => {
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
        Value::Boolean(b) => buf.put_u8(u8::from(*b)),
    }
}

fn get_variable(buf: &mut &[u8], what: &str) -> StorageResult<Vec<u8>> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32() as usize;
    if len > MAX_VARIABLE_LENGTH {
        return Err(StorageError::ValueTooLarge {
            size: len,
            max: MAX_VARIABLE_LENGTH,
        });
    }
    ensure(buf, len, what)?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn get_payload(buf: &mut &[u8], ty: ColumnType) -> StorageResult<Value> {
    if let Some(width) = ty.fixed_width() {
        ensure(buf, width, "value")?;
    }
    let value = match ty {
        ColumnType::TinyInt => Value::TinyInt(buf.get_i8()),
        ColumnType::SmallInt => Value::SmallInt(buf.get_i16()),
        ColumnType::Integer => Value::Integer(buf.get_i32()),
        ColumnType::BigInt => Value::BigInt(buf.get_i64()),
        ColumnType::Timestamp => Value::Timestamp(buf.get_i64()),
        ColumnType::Double => Value::Double(buf.get_f64()),
        ColumnType::Boolean => Value::Boolean(buf.get_u8() != 0),
        ColumnType::Varchar => {
            let bytes = get_variable(buf, "varchar")?;
            Value::Varchar(
                String::from_utf8(bytes).map_err(|e| StorageError::decode(e.to_string()))?,
            )
        }
        ColumnType::Varbinary => Value::Varbinary(get_variable(buf, "varbinary")?),
    };
    Ok(value)
}

/// Writes a value with its null marker.
pub fn put_value<B: BufMut>(buf: &mut B, value: &Value) {
    if value.is_null() {
        buf.put_u8(NULL_MARKER);
    } else {
        buf.put_u8(PRESENT_MARKER);
        put_payload(buf, value);
    }
}

/// Reads a value of a known type.
pub fn get_value(buf: &mut &[u8], ty: ColumnType) -> StorageResult<Value> {
    ensure(buf, 1, "null marker")?;
    match buf.get_u8() {
        NULL_MARKER => Ok(Value::Null),
        PRESENT_MARKER => get_payload(buf, ty),
        other => Err(StorageError::decode(format!("bad null marker {}", other))),
    }
}

/// Writes a self-describing value (type code, 0 for NULL, then payload).
pub fn put_tagged_value<B: BufMut>(buf: &mut B, value: &Value) {
    match value.column_type() {
        None => buf.put_u8(0),
        Some(ty) => {
            buf.put_u8(ty.as_u8());
            put_payload(buf, value);
        }
    }
}

/// Reads a self-describing value.
pub fn get_tagged_value(buf: &mut &[u8]) -> StorageResult<Value> {
    ensure(buf, 1, "type tag")?;
    match buf.get_u8() {
        0 => Ok(Value::Null),
        tag => {
            let ty = ColumnType::from_u8(tag)
                .ok_or_else(|| StorageError::decode(format!("unknown type tag {}", tag)))?;
            get_payload(buf, ty)
        }
    }
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_string(buf: &mut &[u8]) -> StorageResult<String> {
    let bytes = get_variable(buf, "string")?;
    String::from_utf8(bytes).map_err(|e| StorageError::decode(e.to_string()))
}

// =============================================================================
// Tuples
// =============================================================================

/// Writes a tuple: byte length, then the values.
pub fn put_tuple<B: BufMut>(buf: &mut B, row: &Row) {
    let body_len = row.serialized_size() - 4;
    buf.put_u32(body_len as u32);
    for value in row.iter() {
        put_value(buf, value);
    }
}

/// Reads a tuple whose values have the given types.
pub fn get_tuple(buf: &mut &[u8], types: &[ColumnType]) -> StorageResult<Row> {
    ensure(buf, 4, "tuple length")?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, "tuple")?;

    let mut body = &buf[..len];
    let values = types
        .iter()
        .map(|&ty| get_value(&mut body, ty))
        .collect::<StorageResult<Vec<_>>>()?;
    if body.has_remaining() {
        return Err(StorageError::decode(format!(
            "tuple has {} trailing bytes",
            body.remaining()
        )));
    }
    buf.advance(len);
    Ok(Row::new(values))
}

// =============================================================================
// Tables
// =============================================================================

/// Writes a serialized table.
pub fn put_table<'a, B, I>(buf: &mut B, columns: &[Column], rows: I)
where
    B: BufMut,
    I: IntoIterator<Item = &'a Row>,
{
    let mut body = BytesMut::new();
    body.put_u8(TABLE_STATUS_OK);
    body.put_u16(columns.len() as u16);
    for column in columns {
        body.put_u8(column.column_type.as_u8());
    }
    for column in columns {
        put_string(&mut body, &column.name);
    }

    let count_at = body.len();
    body.put_u32(0);
    let mut count: u32 = 0;
    for row in rows {
        put_tuple(&mut body, row);
        count += 1;
    }
    body[count_at..count_at + 4].copy_from_slice(&count.to_be_bytes());

    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
}

/// A decoded serialized table.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    /// Columns, all reported nullable.
    pub columns: Vec<Column>,
    /// Rows in serialized order.
    pub rows: Vec<Row>,
}

impl DecodedTable {
    /// Returns the column types.
    pub fn types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }
}

/// Decodes serialized tables.
pub struct TableReader;

impl TableReader {
    /// Reads one serialized table from the front of `buf`.
    pub fn read(buf: &mut &[u8]) -> StorageResult<DecodedTable> {
        ensure(buf, 4, "table length")?;
        let total = buf.get_u32() as usize;
        ensure(buf, total, "table")?;
        let mut body = &buf[..total];

        ensure(body, 3, "table header")?;
        let status = body.get_u8();
        if status != TABLE_STATUS_OK {
            return Err(StorageError::decode(format!("table status {}", status)));
        }
        let column_count = body.get_u16() as usize;

        ensure(body, column_count, "column types")?;
        let types = (0..column_count)
            .map(|_| {
                let code = body.get_u8();
                ColumnType::from_u8(code)
                    .ok_or_else(|| StorageError::decode(format!("unknown column type {}", code)))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut columns = Vec::with_capacity(column_count);
        for ty in &types {
            columns.push(Column::new(get_string(&mut body)?, *ty));
        }

        ensure(body, 4, "row count")?;
        let row_count = body.get_u32() as usize;
        let mut rows = Vec::with_capacity(row_count.min(4096));
        for _ in 0..row_count {
            rows.push(get_tuple(&mut body, &types)?);
        }

        buf.advance(total);
        Ok(DecodedTable { columns, rows })
    }

    /// Decodes a buffer holding exactly one serialized table.
    pub fn decode(bytes: &[u8]) -> StorageResult<DecodedTable> {
        let mut buf = bytes;
        let table = Self::read(&mut buf)?;
        if buf.has_remaining() {
            return Err(StorageError::decode("trailing bytes after table"));
        }
        Ok(table)
    }
}
