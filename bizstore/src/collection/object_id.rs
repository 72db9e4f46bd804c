use crate::errors::{BizError, BizResult, ErrorKind};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let mut bytes = [0u8; 5];
    OsRng.fill_bytes(&mut bytes);
    bytes
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(OsRng.gen_range(0..0x00FF_FFFF)));

/// Opaque 12-byte document identifier assigned by the store.
///
/// Layout: 4-byte big-endian unix seconds, 5 bytes random per process and a
/// 3-byte big-endian counter. The text form is 24 lowercase hex characters.
///
/// # Examples
///
/// ```rust
/// use bizstore::collection::ObjectId;
///
/// let id = ObjectId::new();
/// let parsed = ObjectId::parse(&id.to_hex()).unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    pub fn new() -> Self {
        let timestamp = chrono::Utc::now().timestamp() as u32;
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        ObjectId { bytes }
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId { bytes }
    }

    /// Parses the 24-character hex form.
    pub fn parse(hex: &str) -> BizResult<Self> {
        if hex.len() != 24 || !hex.is_ascii() {
            log::error!("Invalid object id {:?}", hex);
            return Err(BizError::new(
                &format!("Invalid object id: {}", hex),
                ErrorKind::InvalidArgument,
            ));
        }

        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                log::error!("Invalid object id {:?}", hex);
                BizError::new(
                    &format!("Invalid object id: {}", hex),
                    ErrorKind::InvalidArgument,
                )
            })?;
        }
        Ok(ObjectId { bytes })
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.bytes
    }

    /// Seconds since the unix epoch at which the id was generated.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = BizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectId::parse(s)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}
