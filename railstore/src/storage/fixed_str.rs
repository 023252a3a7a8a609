//! Fixed-width strings for use as keys and record fields.

use crate::storage::record::{Record, RecordError};

/// A string stored in exactly `N` bytes, zero-padded.
///
/// Ordering and equality compare the stored bytes, which for UTF-8 gives
/// the same result as comparing the strings code point by code point.
///
/// # Invariants
/// - content length <= `N`
/// - content contains no NUL byte; every byte after the content is NUL
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Create a fixed-width string.
    ///
    /// Returns an error if `s` is longer than `N` bytes or contains NUL.
    pub fn new(s: &str) -> Result<Self, RecordError> {
        if s.len() > N {
            return Err(RecordError::StringTooLong {
                len: s.len(),
                max: N,
            });
        }
        if s.as_bytes().contains(&0) {
            return Err(RecordError::InteriorNul);
        }
        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self { bytes })
    }

    /// Length of the content in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    /// Whether the content is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.bytes.first(), None | Some(0))
    }

    /// The content as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Content is validated on construction and on decode.
        std::str::from_utf8(&self.bytes[..self.len()]).unwrap_or_default()
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> TryFrom<&str> for FixedStr<N> {
    type Error = RecordError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl<const N: usize> std::fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> std::fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> Record for FixedStr<N> {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(N);
        if bytes[len..].iter().any(|&b| b != 0) {
            return Err(RecordError::InteriorNul);
        }
        if std::str::from_utf8(&bytes[..len]).is_err() {
            return Err(RecordError::InvalidUtf8);
        }
        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::to_bytes;

    #[test]
    fn test_new_and_as_str() {
        let s = FixedStr::<8>::new("seat").expect("fits");
        assert_eq!(s.as_str(), "seat");
        assert_eq!(s.len(), 4);
        assert!(!s.is_empty());
        assert!(FixedStr::<8>::default().is_empty());

        let full = FixedStr::<4>::new("abcd").expect("exact fit");
        assert_eq!(full.as_str(), "abcd");
    }

    #[test]
    fn test_rejects_overlong_and_nul() {
        assert_eq!(
            FixedStr::<3>::new("abcd"),
            Err(RecordError::StringTooLong { len: 4, max: 3 })
        );
        assert_eq!(FixedStr::<8>::new("a\0b"), Err(RecordError::InteriorNul));
    }

    #[test]
    fn test_ordering_matches_str() {
        let words = ["", "a", "ab", "abc", "b", "ba", "z"];
        for x in words {
            for y in words {
                let fx = FixedStr::<4>::new(x).expect("fits");
                let fy = FixedStr::<4>::new(y).expect("fits");
                assert_eq!(fx.cmp(&fy), x.cmp(y), "{x:?} vs {y:?}");
            }
        }
    }

    #[test]
    fn test_decode_validates_padding() {
        let s = FixedStr::<6>::new("train").expect("fits");
        let bytes = to_bytes(&s);
        assert_eq!(FixedStr::<6>::decode(&bytes), Ok(s));

        assert_eq!(
            FixedStr::<4>::decode(&[b'a', 0, b'b', 0]),
            Err(RecordError::InteriorNul)
        );
        assert_eq!(
            FixedStr::<2>::decode(&[0xFF, 0xFE]),
            Err(RecordError::InvalidUtf8)
        );
    }
}
