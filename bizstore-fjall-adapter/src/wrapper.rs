use bizstore::collection::Document;
use bizstore::common::Value;
use bizstore::errors::{BizError, ErrorKind};
use std::error::Error;
use thiserror::Error;

/// Failure to encode or decode stored bytes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FjallValueError {
    #[error("Deserialization failed: {0}")]
    DeserializationError(String),
    #[error("Serialization failed: {0}")]
    SerializationError(String),
    /// A stored key does not have the expected shape.
    #[error("Malformed key: {0}")]
    MalformedKey(String),
}

impl From<FjallValueError> for BizError {
    fn from(err: FjallValueError) -> Self {
        BizError::new(&err.to_string(), ErrorKind::EncodingError)
    }
}

pub type FjallValueResult<T> = Result<T, FjallValueError>;

pub(crate) fn encode_document(document: &Document) -> FjallValueResult<Vec<u8>> {
    bincode::serde::encode_to_vec(document, bincode::config::legacy())
        .map_err(|e| FjallValueError::SerializationError(e.to_string()))
}

pub(crate) fn decode_document(bytes: &[u8]) -> FjallValueResult<Document> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(document, _)| document)
        .map_err(|e| FjallValueError::DeserializationError(e.to_string()))
}

/// Encodes a value as an index key.
///
/// Values that compare equal must produce the same key, so numbers are
/// brought to one representation first: `U64(5)`, `F64(5.0)` and `I64(5)`
/// all become `I64(5)`.
pub(crate) fn encode_key(value: &Value) -> FjallValueResult<Vec<u8>> {
    bincode::serde::encode_to_vec(normalize(value), bincode::config::legacy())
        .map_err(|e| FjallValueError::SerializationError(e.to_string()))
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::U64(v) if *v <= i64::MAX as u64 => Value::I64(*v as i64),
        Value::F64(v) if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 => {
            Value::I64(*v as i64)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Document(doc) => Value::Document(
            doc.iter()
                .map(|(key, value)| (key.clone(), normalize(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Big-endian bytes, so key order matches numeric order.
#[inline]
pub(crate) fn encode_seq(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

pub(crate) fn decode_seq(bytes: &[u8]) -> FjallValueResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| FjallValueError::MalformedKey(format!("{} byte sequence key", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// Escapes a name for use inside a fjall partition name.
///
/// Partition names only allow `a-zA-Z0-9_-.#$`. Letters, digits, `_`, `-`
/// and `.` pass through; every other byte becomes `$` plus two hex digits.
/// `#` is never produced, so it can separate the parts of a partition name.
pub(crate) fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || byte == b'.' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("${:02X}", byte));
        }
    }
    encoded
}

/// Reverses [encode_name].
pub(crate) fn decode_name(name: &str) -> FjallValueResult<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let hex = name
                .get(i + 1..i + 3)
                .ok_or_else(|| FjallValueError::MalformedKey(name.to_string()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| FjallValueError::MalformedKey(name.to_string()))?;
            decoded.push(byte);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).map_err(|e| FjallValueError::MalformedKey(e.to_string()))
}

/// Maps an engine error onto a [BizError] kind.
///
/// Fjall reports its errors through `Debug`-style messages such as
/// `FjallError: Io(..)`. I/O failures are transient and may be retried.
pub(crate) fn to_biz_error(error: impl Error) -> BizError {
    let message = error.to_string();
    let kind = if message.contains("Io(") {
        ErrorKind::IOError
    } else if message.contains("Poisoned") || message.contains("PartitionDeleted") {
        ErrorKind::StoreUnavailable
    } else if message.contains("Decompress") || message.contains("InvalidVersion") {
        ErrorKind::EncodingError
    } else {
        ErrorKind::BackendError
    };
    BizError::new(&format!("Fjall error: {}", message), kind)
}

/// Maps an error returned by a batch commit.
///
/// A commit that fails while writing or syncing the journal may still have
/// reached the disk, so the write can reappear on recovery. Such failures
/// are a non-transient `BackendError`; retrying them could apply the batch
/// twice.
pub(crate) fn to_commit_error(error: impl Error) -> BizError {
    let message = error.to_string();
    if message.contains("Io(") || message.contains("Poisoned") {
        return BizError::new(
            &format!("Fjall commit outcome unknown: {}", message),
            ErrorKind::BackendError,
        );
    }
    to_biz_error(error)
}
