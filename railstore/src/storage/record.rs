//! Fixed-size record encoding.
//!
//! Every value that lives in a table file (keys, values, tree nodes, value
//! blocks, file headers) implements [`Record`]: it has a fixed encoded size
//! and converts to and from exactly that many bytes. Integers are stored
//! little-endian.
//!
//! # Invariants
//!
//! - `encode` writes exactly `SIZE` bytes into a buffer of length `SIZE`
//! - `decode(encode(x)) == x` for every value produced by the type's
//!   constructors

/// Target encoded size of one tree node or value block, in bytes.
pub const PAGE_BUDGET: usize = 4000;

/// A value with a fixed-size binary encoding.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into `buf`.
    ///
    /// # Pre-conditions
    /// - `buf.len() == Self::SIZE`
    fn encode(&self, buf: &mut [u8]);

    /// Decode from `buf`.
    ///
    /// # Pre-conditions
    /// - `buf.len() == Self::SIZE`
    fn decode(buf: &[u8]) -> Result<Self, RecordError>;
}

/// Errors produced when decoding or constructing records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A tag byte did not name any variant of the enumeration.
    InvalidTag { type_name: &'static str, tag: u8 },
    /// A boolean byte was neither 0 nor 1.
    InvalidBool(u8),
    /// A string does not fit its fixed width.
    StringTooLong { len: usize, max: usize },
    /// A string contains a NUL byte, which is reserved for padding.
    InteriorNul,
    /// Stored string bytes are not valid UTF-8.
    InvalidUtf8,
    /// A stored length field exceeds the record's capacity.
    LengthOutOfRange { len: usize, max: usize },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTag { type_name, tag } => {
                write!(f, "invalid {type_name} tag: 0x{tag:02x}")
            }
            Self::InvalidBool(v) => write!(f, "invalid bool byte: 0x{v:02x}"),
            Self::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds fixed width {max}")
            }
            Self::InteriorNul => write!(f, "string contains a NUL byte"),
            Self::InvalidUtf8 => write!(f, "stored string is not valid UTF-8"),
            Self::LengthOutOfRange { len, max } => {
                write!(f, "stored length {len} exceeds capacity {max}")
            }
        }
    }
}

impl std::error::Error for RecordError {}

macro_rules! int_record {
    ($($ty:ty),*) => {
        $(
            impl Record for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Result<Self, RecordError> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

int_record!(u8, u16, u32, u64, i32, i64);

impl Record for bool {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RecordError::InvalidBool(other)),
        }
    }
}

impl Record for () {
    const SIZE: usize = 0;

    fn encode(&self, _buf: &mut [u8]) {}

    fn decode(_buf: &[u8]) -> Result<Self, RecordError> {
        Ok(())
    }
}

impl<const N: usize> Record for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        Ok(bytes)
    }
}

impl<A: Record, B: Record> Record for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(&mut buf[..A::SIZE]);
        self.1.encode(&mut buf[A::SIZE..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Ok((A::decode(&buf[..A::SIZE])?, B::decode(&buf[A::SIZE..])?))
    }
}

/// Encode `record` into a freshly allocated buffer of `T::SIZE` bytes.
#[must_use]
pub fn to_bytes<T: Record>(record: &T) -> Vec<u8> {
    let mut buf = vec![0u8; T::SIZE];
    record.encode(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_little_endian() {
        let bytes = to_bytes(&0x0102_0304_0506_0708u64);
        assert_eq!(bytes, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(u64::decode(&bytes), Ok(0x0102_0304_0506_0708));

        let bytes = to_bytes(&-2i32);
        assert_eq!(i32::decode(&bytes), Ok(-2));
    }

    #[test]
    fn test_bool_rejects_garbage() {
        assert_eq!(bool::decode(&[1]), Ok(true));
        assert_eq!(bool::decode(&[0]), Ok(false));
        assert_eq!(bool::decode(&[7]), Err(RecordError::InvalidBool(7)));
    }

    #[test]
    fn test_tuple_layout() {
        assert_eq!(<(u32, [u8; 3])>::SIZE, 7);
        let bytes = to_bytes(&(9u32, *b"abc"));
        assert_eq!(&bytes[4..], b"abc");
        assert_eq!(<(u32, [u8; 3])>::decode(&bytes), Ok((9, *b"abc")));
    }

    #[test]
    fn test_error_display() {
        let e = RecordError::InvalidTag {
            type_name: "OrderStatus",
            tag: 0xAB,
        };
        assert_eq!(e.to_string(), "invalid OrderStatus tag: 0xab");
        let e = RecordError::StringTooLong { len: 30, max: 20 };
        assert!(e.to_string().contains("fixed width 20"));
    }
}
