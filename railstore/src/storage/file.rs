//! Paged record file.
//!
//! A table file is a header followed by a sequence of fixed-size records.
//!
//! # File Format
//!
//! ```text
//! offset 0            : tail cursor (u64), free-list head (u64),
//!                       header payload (H::SIZE bytes), CRC32 (u32)
//! offset HEADER_SIZE  : record 0, record 1, ... (each `stride` bytes)
//! ```
//!
//! A freed record that is not at the tail holds the address of the next
//! freed record in its first 8 bytes. Address 0 is the header, so it is
//! never handed out and serves as the null address.
//!
//! # Invariants
//!
//! - `data_start <= tail` and `(tail - data_start) % stride == 0`
//! - Every address on the free list is a record address below `tail`
//! - The on-disk header is rewritten on `sync`, `close` and drop

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::storage::record::{Record, RecordError};

/// Byte offset of a record inside its file.
pub type Address = u64;

/// The null address. Never a record address.
pub const NULL_ADDRESS: Address = 0;

/// Encoded size of an [`Address`].
pub const ADDRESS_SIZE: usize = 8;

const CURSORS_SIZE: usize = 2 * ADDRESS_SIZE;
const CHECKSUM_SIZE: usize = 4;

/// A file of fixed-size `T` records with a persistent `H` header payload.
pub struct PagedFile<T: Record, H: Record + Default> {
    file: File,
    path: PathBuf,
    header: H,
    /// Address one past the last record.
    tail: Address,
    /// Head of the free list (`NULL_ADDRESS` when empty).
    free_head: Address,
    closed: bool,
    _records: PhantomData<T>,
}

impl<T: Record, H: Record + Default> PagedFile<T, H> {
    /// Size of the header region in bytes.
    pub const HEADER_SIZE: usize = CURSORS_SIZE + H::SIZE + CHECKSUM_SIZE;

    /// Distance between consecutive record addresses.
    #[allow(clippy::cast_possible_truncation)]
    pub const STRIDE: u64 = if T::SIZE > ADDRESS_SIZE {
        T::SIZE as u64
    } else {
        ADDRESS_SIZE as u64
    };

    /// Address of the first record.
    #[allow(clippy::cast_possible_truncation)]
    pub const DATA_START: Address = Self::HEADER_SIZE as u64;

    /// Open the file at `path`, creating it with a default header if it
    /// does not exist.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(FileError::Io)?;

        let mut paged = if exists {
            let (header, tail, free_head) = Self::read_header(&mut file)?;
            Self {
                file,
                path: path.to_path_buf(),
                header,
                tail,
                free_head,
                closed: false,
                _records: PhantomData,
            }
        } else {
            Self {
                file,
                path: path.to_path_buf(),
                header: H::default(),
                tail: Self::DATA_START,
                free_head: NULL_ADDRESS,
                closed: false,
                _records: PhantomData,
            }
        };

        if !exists {
            paged.write_header()?;
            tracing::debug!("Created paged file {}", paged.path.display());
        }
        Ok(paged)
    }

    fn read_header(file: &mut File) -> Result<(H, Address, Address), FileError> {
        let len = file.metadata().map_err(FileError::Io)?.len();
        if len < Self::DATA_START {
            return Err(FileError::Truncated {
                len,
                expected: Self::DATA_START,
            });
        }

        let mut buf = vec![0u8; Self::HEADER_SIZE];
        file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        file.read_exact(&mut buf).map_err(FileError::Io)?;

        let (body, stored) = buf.split_at(Self::HEADER_SIZE - CHECKSUM_SIZE);
        let expected = u32::decode(stored).map_err(|source| FileError::Record {
            address: NULL_ADDRESS,
            source,
        })?;
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(FileError::HeaderChecksum { expected, actual });
        }

        let decode_err = |source| FileError::Record {
            address: NULL_ADDRESS,
            source,
        };
        let tail = u64::decode(&body[..ADDRESS_SIZE]).map_err(decode_err)?;
        let free_head = u64::decode(&body[ADDRESS_SIZE..CURSORS_SIZE]).map_err(decode_err)?;
        let header = H::decode(&body[CURSORS_SIZE..]).map_err(decode_err)?;

        if tail < Self::DATA_START || (tail - Self::DATA_START) % Self::STRIDE != 0 {
            return Err(FileError::InvalidAddress {
                address: tail,
                reason: "tail cursor is not a record boundary",
            });
        }
        if free_head != NULL_ADDRESS && !Self::is_record_address(free_head, tail) {
            return Err(FileError::InvalidAddress {
                address: free_head,
                reason: "free-list head is not a record address",
            });
        }
        Ok((header, tail, free_head))
    }

    /// Rewrite the header region at offset 0.
    pub fn write_header(&mut self) -> Result<(), FileError> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];
        self.tail.encode(&mut buf[..ADDRESS_SIZE]);
        self.free_head.encode(&mut buf[ADDRESS_SIZE..CURSORS_SIZE]);
        let body_end = Self::HEADER_SIZE - CHECKSUM_SIZE;
        self.header.encode(&mut buf[CURSORS_SIZE..body_end]);
        let checksum = crc32fast::hash(&buf[..body_end]);
        checksum.encode(&mut buf[body_end..]);

        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file.write_all(&buf).map_err(FileError::Io)
    }

    const fn is_record_address(address: Address, tail: Address) -> bool {
        address >= Self::DATA_START
            && address < tail
            && (address - Self::DATA_START) % Self::STRIDE == 0
    }

    /// Verify that `address` names a record of this file.
    pub(crate) const fn check_address(&self, address: Address) -> Result<(), FileError> {
        if address < Self::DATA_START || address >= self.tail {
            return Err(FileError::InvalidAddress {
                address,
                reason: "out of range",
            });
        }
        if (address - Self::DATA_START) % Self::STRIDE != 0 {
            return Err(FileError::InvalidAddress {
                address,
                reason: "not aligned to a record boundary",
            });
        }
        Ok(())
    }

    /// Reserve space for one record and return its address.
    ///
    /// Reuses the most recently freed record if there is one, else grows
    /// the file by one record. The record's contents are unspecified until
    /// written.
    pub fn allocate(&mut self) -> Result<Address, FileError> {
        if self.free_head != NULL_ADDRESS {
            let address = self.free_head;
            let mut link = [0u8; ADDRESS_SIZE];
            self.read_raw(address, &mut link)?;
            let next = u64::decode(&link).map_err(|source| FileError::Record { address, source })?;
            if next != NULL_ADDRESS && !Self::is_record_address(next, self.tail) {
                return Err(FileError::InvalidAddress {
                    address: next,
                    reason: "free-list link is not a record address",
                });
            }
            self.free_head = next;
            return Ok(address);
        }

        let address = self.tail;
        self.tail += Self::STRIDE;
        self.file.set_len(self.tail).map_err(FileError::Io)?;
        Ok(address)
    }

    /// Return the record at `address` to the file.
    ///
    /// The tail record is truncated away; any other record joins the free
    /// list.
    pub fn free(&mut self, address: Address) -> Result<(), FileError> {
        self.check_address(address)?;
        if address + Self::STRIDE == self.tail {
            self.tail = address;
            return self.file.set_len(self.tail).map_err(FileError::Io);
        }

        let mut link = [0u8; ADDRESS_SIZE];
        self.free_head.encode(&mut link);
        self.write_raw(address, &link)?;
        self.free_head = address;
        Ok(())
    }

    /// Read and decode the record at `address`.
    pub fn read(&mut self, address: Address) -> Result<T, FileError> {
        self.check_address(address)?;
        let mut buf = vec![0u8; T::SIZE];
        self.read_raw(address, &mut buf)?;
        T::decode(&buf).map_err(|source| FileError::Record { address, source })
    }

    /// Encode and write `record` at `address`.
    pub fn write(&mut self, address: Address, record: &T) -> Result<(), FileError> {
        self.check_address(address)?;
        let mut buf = vec![0u8; T::SIZE];
        record.encode(&mut buf);
        self.write_raw(address, &buf)
    }

    fn read_raw(&mut self, address: Address, buf: &mut [u8]) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(address))
            .map_err(FileError::Io)?;
        self.file.read_exact(buf).map_err(FileError::Io)
    }

    fn write_raw(&mut self, address: Address, buf: &[u8]) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(address))
            .map_err(FileError::Io)?;
        self.file.write_all(buf).map_err(FileError::Io)
    }

    /// The header payload.
    #[must_use]
    pub const fn header(&self) -> &H {
        &self.header
    }

    /// Mutable access to the header payload. Persisted on the next
    /// `write_header`, `sync` or `close`.
    pub const fn header_mut(&mut self) -> &mut H {
        &mut self.header
    }

    /// Address one past the last record.
    #[must_use]
    pub const fn tail(&self) -> Address {
        self.tail
    }

    /// Number of record slots between the header and the tail, live or
    /// freed.
    #[must_use]
    pub const fn slot_count(&self) -> u64 {
        (self.tail - Self::DATA_START) / Self::STRIDE
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every record and reset the header to its default.
    pub fn reset(&mut self) -> Result<(), FileError> {
        self.header = H::default();
        self.tail = Self::DATA_START;
        self.free_head = NULL_ADDRESS;
        self.file.set_len(Self::DATA_START).map_err(FileError::Io)?;
        self.write_header()
    }

    /// Write the header and flush all pending writes to disk.
    pub fn sync(&mut self) -> Result<(), FileError> {
        self.write_header()?;
        self.file.sync_all().map_err(FileError::Io)
    }

    /// Persist the header and close the file.
    pub fn close(mut self) -> Result<(), FileError> {
        self.closed = true;
        self.sync()
    }
}

impl<T: Record, H: Record + Default> Drop for PagedFile<T, H> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.write_header() {
            tracing::error!(
                "Failed to write header of {} on drop: {e}",
                self.path.display()
            );
        }
    }
}

/// Errors that can occur during paged file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// The file is shorter than its header.
    Truncated { len: u64, expected: u64 },
    /// The header checksum does not match its contents.
    HeaderChecksum { expected: u32, actual: u32 },
    /// A record (or the header, at address 0) failed to decode.
    Record {
        address: Address,
        source: RecordError,
    },
    /// An address does not name a record in this file.
    InvalidAddress {
        address: Address,
        reason: &'static str,
    },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Truncated { len, expected } => {
                write!(f, "file of {len} bytes is shorter than its {expected}-byte header")
            }
            Self::HeaderChecksum { expected, actual } => write!(
                f,
                "header checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
            Self::Record { address, source } => {
                write!(f, "corrupt record at address {address}: {source}")
            }
            Self::InvalidAddress { address, reason } => {
                write!(f, "invalid address {address}: {reason}")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Record { source, .. } => Some(source),
            Self::Truncated { .. } | Self::HeaderChecksum { .. } | Self::InvalidAddress { .. } => {
                None
            }
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    type Wide = PagedFile<(u64, u64), u64>;
    type Narrow = PagedFile<u16, ()>;

    #[test]
    fn test_layout_constants() {
        assert_eq!(Wide::HEADER_SIZE, 8 + 8 + 8 + 4);
        assert_eq!(Wide::STRIDE, 16);
        // Records smaller than a link still get room for one
        assert_eq!(Narrow::STRIDE, 8);
        assert_eq!(Narrow::DATA_START, 20);
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");

        let a;
        let b;
        {
            let mut file = Wide::open(&path).expect("create");
            assert_eq!(file.slot_count(), 0);
            a = file.allocate().expect("allocate");
            b = file.allocate().expect("allocate");
            assert_eq!(a, Wide::DATA_START);
            assert_eq!(b, a + Wide::STRIDE);
            file.write(a, &(1, 2)).expect("write");
            file.write(b, &(3, 4)).expect("write");
            *file.header_mut() = 77;
            file.close().expect("close");
        }

        let mut file = Wide::open(&path).expect("reopen");
        assert_eq!(*file.header(), 77);
        assert_eq!(file.slot_count(), 2);
        assert_eq!(file.read(a).expect("read"), (1, 2));
        assert_eq!(file.read(b).expect("read"), (3, 4));
    }

    #[test]
    fn test_drop_persists_header() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        {
            let mut file = Wide::open(&path).expect("create");
            let _ = file.allocate().expect("allocate");
            *file.header_mut() = 5;
        }
        let file = Wide::open(&path).expect("reopen");
        assert_eq!(*file.header(), 5);
        assert_eq!(file.slot_count(), 1);
    }

    #[test]
    fn test_free_at_tail_shrinks_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        let mut file = Wide::open(&path).expect("create");

        let a = file.allocate().expect("allocate");
        let b = file.allocate().expect("allocate");
        file.free(b).expect("free");
        assert_eq!(file.tail(), b);
        file.free(a).expect("free");
        assert_eq!(file.tail(), Wide::DATA_START);

        let len = fs::metadata(&path).expect("metadata").len();
        assert_eq!(len, Wide::DATA_START);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        let mut file = Wide::open(&path).expect("create");

        let a = file.allocate().expect("allocate");
        let b = file.allocate().expect("allocate");
        let c = file.allocate().expect("allocate");
        file.free(a).expect("free");
        file.free(b).expect("free");
        assert_eq!(file.tail(), c + Wide::STRIDE);

        assert_eq!(file.allocate().expect("allocate"), b);
        assert_eq!(file.allocate().expect("allocate"), a);
        // Free list drained: the file grows again
        assert_eq!(file.allocate().expect("allocate"), c + Wide::STRIDE);
    }

    #[test]
    fn test_free_list_survives_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        let a;
        {
            let mut file = Narrow::open(&path).expect("create");
            a = file.allocate().expect("allocate");
            let _ = file.allocate().expect("allocate");
            file.free(a).expect("free");
            file.close().expect("close");
        }
        let mut file = Narrow::open(&path).expect("reopen");
        assert_eq!(file.allocate().expect("allocate"), a);
    }

    #[test]
    fn test_invalid_addresses() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        let mut file = Wide::open(&path).expect("create");
        let a = file.allocate().expect("allocate");

        assert!(matches!(
            file.read(NULL_ADDRESS),
            Err(FileError::InvalidAddress { .. })
        ));
        assert!(matches!(
            file.read(a + 1),
            Err(FileError::InvalidAddress { .. })
        ));
        assert!(matches!(
            file.write(a + Wide::STRIDE, &(0, 0)),
            Err(FileError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        {
            let mut file = Wide::open(&path).expect("create");
            *file.header_mut() = 9;
            file.close().expect("close");
        }

        let mut bytes = fs::read(&path).expect("read");
        bytes[17] ^= 0xFF;
        fs::write(&path, &bytes).expect("write");
        assert!(matches!(
            Wide::open(&path),
            Err(FileError::HeaderChecksum { .. })
        ));

        fs::write(&path, &bytes[..10]).expect("write");
        assert!(matches!(
            Wide::open(&path),
            Err(FileError::Truncated { len: 10, .. })
        ));
    }

    #[test]
    fn test_reset() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("t.db");
        let mut file = Wide::open(&path).expect("create");
        let a = file.allocate().expect("allocate");
        let _ = file.allocate().expect("allocate");
        file.free(a).expect("free");
        *file.header_mut() = 3;

        file.reset().expect("reset");
        assert_eq!(*file.header(), 0);
        assert_eq!(file.slot_count(), 0);
        assert_eq!(file.allocate().expect("allocate"), Wide::DATA_START);
    }
}
