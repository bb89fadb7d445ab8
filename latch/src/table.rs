//! Memory-mapped record table: the on-disk key→record store.
//!
//! The table is a single pre-sized file holding an open-addressing hash
//! table (linear probing, no deletions) of fixed-size slots. It is sized
//! once at creation from an expected entry count and an average key size,
//! and never grows.
//!
//! # File Format
//!
//! All integers are little-endian.
//!
//! ```text
//! [0..4)    magic "LTCH"
//! [4..8)    format version (u32)
//! [8..16)   slot count (u64, power of two)
//! [16..20)  slot size in bytes (u32)
//! [20..24)  declared average key size (u32)
//! [24..32)  declared expected entries (u64)
//! [32..40)  entry count (u64)
//! [40..64)  reserved
//! [64..)    slot_count slots, each slot_size bytes:
//!           [key_len u16][record_len u16][key bytes][record bytes][padding]
//! ```
//!
//! A slot with `key_len == 0` is empty. Keys and records share the slot
//! payload, so a key longer than the declared average eats into record
//! headroom; an entry that does not fit at all is rejected with
//! [`TableError::RecordTooLarge`] rather than spilling into a neighbor.
//! Slot lengths are `u16`, so slots are capped at 64 KiB no matter how
//! large a key size is declared. This is the documented limit of the
//! fixed-slot design — oversized input degrades to an error, never to
//! corruption.
//!
//! # Thread Safety
//!
//! The table synchronizes internally with an `RwLock`: concurrent `get`,
//! `put`, and enumeration from independent threads need no external
//! locking. Slot placement uses FNV-1a over the key bytes, which is stable
//! across processes and toolchains — the hash is part of the file format.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use memmap2::MmapMut;

use crate::error::{Result, TableError};

/// Magic bytes identifying a latch table file.
const TABLE_MAGIC: [u8; 4] = *b"LTCH";

/// Current table format version.
const TABLE_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 64;

/// Per-slot header: key length (u16) + record length (u16).
const SLOT_HEADER_SIZE: usize = 4;

/// Record headroom added on top of the declared average key size when
/// sizing slots. Covers the JSON envelope, state payload, and timestamp.
const RECORD_HEADROOM: usize = 224;

/// Byte offset of the entry-count field in the header.
const ENTRY_COUNT_OFFSET: usize = 32;

/// Upper bound on slot size, enforced at creation and on reopen. Slot
/// lengths are stored as `u16`, so payload beyond this could never be
/// addressed.
const MAX_SLOT_SIZE: u32 = 1 << 16;

/// Upper bound on slot count accepted from a header.
const MAX_SLOT_COUNT: u64 = 1 << 32;

/// FNV-1a 64-bit hash over the key bytes.
///
/// Deliberately not `std::hash`: slot placement persists across runs, so the
/// hash must be stable across toolchains.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(b)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(b)
}

/// Table geometry derived from the declared capacity.
#[derive(Debug, Clone, Copy)]
struct TableGeometry {
    /// Number of slots (power of two).
    slot_count: u64,
    /// Bytes per slot, including the slot header.
    slot_size: usize,
}

impl TableGeometry {
    /// Computes the geometry for a new table.
    ///
    /// Slot count is the next power of two at or above twice the expected
    /// entry count, keeping the load factor at or below 0.5 at declared
    /// capacity so probe chains stay short. The slot size is capped at
    /// [`MAX_SLOT_SIZE`]: record lengths are `u16`, so a larger payload
    /// could never be addressed anyway.
    fn new(expected_entries: u64, average_key_size: u32) -> std::result::Result<Self, TableError> {
        let slot_count = expected_entries
            .checked_mul(2)
            .and_then(|n| n.max(8).checked_next_power_of_two())
            .filter(|n| *n <= MAX_SLOT_COUNT)
            .ok_or_else(|| TableError::InvalidGeometry {
                reason: format!(
                    "expected entry count {expected_entries} exceeds the \
                     {MAX_SLOT_COUNT} slot limit"
                ),
            })?;

        let payload = 2 * u64::from(average_key_size) + RECORD_HEADROOM as u64;
        #[allow(clippy::cast_possible_truncation)] // capped at MAX_SLOT_SIZE
        let payload = payload.min(u64::from(MAX_SLOT_SIZE) - SLOT_HEADER_SIZE as u64) as usize;
        let slot_size = (SLOT_HEADER_SIZE + payload).next_multiple_of(8);

        Ok(Self {
            slot_count,
            slot_size,
        })
    }

    /// Total file size for this geometry.
    ///
    /// Cannot overflow: `slot_count` and `slot_size` are bounded by
    /// [`MAX_SLOT_COUNT`] and [`MAX_SLOT_SIZE`] on both the create and the
    /// reopen path, keeping the product under 2^49.
    fn file_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.slot_count * self.slot_size as u64
    }

    /// Payload bytes available per slot (key + record).
    fn payload_capacity(&self) -> usize {
        self.slot_size - SLOT_HEADER_SIZE
    }

    /// Maximum number of entries. One slot is always kept empty so that an
    /// unsuccessful probe terminates.
    fn max_entries(&self) -> u64 {
        self.slot_count - 1
    }
}

/// The mapping plus its geometry, guarded by the table's `RwLock`.
#[derive(Debug)]
struct TableInner {
    mmap: MmapMut,
    geometry: TableGeometry,
    entry_count: u64,
}

impl TableInner {
    fn slot_offset(&self, slot: u64) -> usize {
        HEADER_SIZE + slot as usize * self.geometry.slot_size
    }

    fn slot_lens(&self, slot: u64) -> (usize, usize) {
        let offset = self.slot_offset(slot);
        (
            read_u16(&self.mmap, offset) as usize,
            read_u16(&self.mmap, offset + 2) as usize,
        )
    }

    /// A slot whose lengths cannot fit the payload is treated as garbage:
    /// skipped by enumeration, probed past by lookups.
    fn slot_is_sane(&self, key_len: usize, record_len: usize) -> bool {
        key_len + record_len <= self.geometry.payload_capacity()
    }

    fn slot_key(&self, slot: u64, key_len: usize) -> &[u8] {
        let offset = self.slot_offset(slot) + SLOT_HEADER_SIZE;
        &self.mmap[offset..offset + key_len]
    }

    fn slot_record(&self, slot: u64, key_len: usize, record_len: usize) -> &[u8] {
        let offset = self.slot_offset(slot) + SLOT_HEADER_SIZE + key_len;
        &self.mmap[offset..offset + record_len]
    }

    fn write_entry_count(&mut self, count: u64) {
        self.entry_count = count;
        self.mmap[ENTRY_COUNT_OFFSET..ENTRY_COUNT_OFFSET + 8]
            .copy_from_slice(&count.to_le_bytes());
    }

    /// Probes for `key`. Returns `Ok(slot)` holding the key, or
    /// `Err(empty_slot)` where an insert would land.
    ///
    /// The probe visits at most `slot_count` slots; with one slot always
    /// empty it terminates on an empty slot before wrapping fully.
    fn probe(&self, key: &[u8]) -> std::result::Result<u64, Option<u64>> {
        let mask = self.geometry.slot_count - 1;
        let mut slot = fnv1a(key) & mask;

        for _ in 0..self.geometry.slot_count {
            let (key_len, record_len) = self.slot_lens(slot);
            if key_len == 0 {
                return Err(Some(slot));
            }
            if self.slot_is_sane(key_len, record_len) && self.slot_key(slot, key_len) == key {
                return Ok(slot);
            }
            slot = (slot + 1) & mask;
        }

        // Wrapped without finding an empty slot: the table is full.
        Err(None)
    }
}

/// On-disk, memory-mapped key→record table.
///
/// Holds at most one record per key; `put` for an existing key is a full
/// overwrite. There is no delete operation — the store keeps last values,
/// and retiring an item is the embedding platform's concern.
///
/// Dropping the table unmaps the file; call [`RecordTable::sync`] first if
/// durability of the final writes matters at that point.
#[derive(Debug)]
pub struct RecordTable {
    inner: RwLock<TableInner>,
    path: PathBuf,
}

impl RecordTable {
    /// Opens the table at `path`, creating and pre-sizing it if absent.
    ///
    /// The parent directory tree is created when missing. When the file
    /// already exists its header is validated and the geometry is read back
    /// from disk — `expected_entries` and `average_key_size` only shape a
    /// newly created file, so reopening with different parameters cannot
    /// reinterpret existing data.
    ///
    /// # Errors
    ///
    /// - [`TableError::Corrupted`] if an existing file fails validation.
    ///   Existing data is never silently discarded; see
    ///   [`StorageLayout::quarantine`](crate::layout::StorageLayout::quarantine)
    ///   for the recovery path.
    /// - [`TableError::InvalidGeometry`] if `expected_entries` exceeds what
    ///   the slot-count field can represent.
    /// - [`TableError::ReadFailed`] / [`TableError::WriteFailed`] /
    ///   [`TableError::MemoryMap`] for I/O failures.
    pub fn open<P: AsRef<Path>>(
        path: P,
        expected_entries: u64,
        average_key_size: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TableError::WriteFailed {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        if path.exists() {
            Self::open_existing(path)
        } else {
            Self::create_new(path, expected_entries, average_key_size)
        }
    }

    /// Creates a new table file pre-allocated to its full size.
    fn create_new(path: PathBuf, expected_entries: u64, average_key_size: u32) -> Result<Self> {
        let geometry = TableGeometry::new(expected_entries, average_key_size)?;
        let path_str = path.display().to_string();

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TableError::WriteFailed {
                path: path_str.clone(),
                source: e,
            })?;

        file.set_len(geometry.file_size())
            .map_err(|e| TableError::WriteFailed {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: the file was just created with the exact mapped length and
        // this handle is the only writer at creation time.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| TableError::MemoryMap {
                path: path_str,
                source: e,
            })?
        };

        // set_len zero-fills, so every slot already reads as empty; only the
        // header needs writing.
        mmap[0..4].copy_from_slice(&TABLE_MAGIC);
        mmap[4..8].copy_from_slice(&TABLE_VERSION.to_le_bytes());
        mmap[8..16].copy_from_slice(&geometry.slot_count.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_SLOT_SIZE
        let slot_size = geometry.slot_size as u32;
        mmap[16..20].copy_from_slice(&slot_size.to_le_bytes());
        // Declared parameters, recorded for diagnostics.
        mmap[20..24].copy_from_slice(&average_key_size.to_le_bytes());
        mmap[24..32].copy_from_slice(&expected_entries.to_le_bytes());
        mmap[ENTRY_COUNT_OFFSET..ENTRY_COUNT_OFFSET + 8].copy_from_slice(&0u64.to_le_bytes());

        Ok(Self {
            inner: RwLock::new(TableInner {
                mmap,
                geometry,
                entry_count: 0,
            }),
            path,
        })
    }

    /// Opens and validates an existing table file.
    fn open_existing(path: PathBuf) -> Result<Self> {
        let path_str = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TableError::ReadFailed {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: the file was successfully opened read/write; the mapping
        // length is taken from the file itself.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| TableError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        let corrupted = |reason: String| TableError::Corrupted {
            path: path_str.clone(),
            reason,
        };

        if mmap.len() < HEADER_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {HEADER_SIZE}",
                mmap.len()
            ))
            .into());
        }

        if mmap[0..4] != TABLE_MAGIC {
            return Err(corrupted(format!(
                "invalid magic bytes: expected {TABLE_MAGIC:?}, found {:?}",
                &mmap[0..4]
            ))
            .into());
        }

        let version = read_u32(&mmap, 4);
        if version != TABLE_VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {TABLE_VERSION}, found {version}"
            ))
            .into());
        }

        let slot_count = read_u64(&mmap, 8);
        if !slot_count.is_power_of_two() || slot_count < 8 || slot_count > MAX_SLOT_COUNT {
            return Err(corrupted(format!("invalid slot count: {slot_count}")).into());
        }

        let slot_size = read_u32(&mmap, 16);
        if slot_size < (SLOT_HEADER_SIZE as u32 + 8) || slot_size > MAX_SLOT_SIZE {
            return Err(corrupted(format!("invalid slot size: {slot_size}")).into());
        }

        let geometry = TableGeometry {
            slot_count,
            slot_size: slot_size as usize,
        };

        if mmap.len() as u64 != geometry.file_size() {
            return Err(corrupted(format!(
                "file size mismatch: {} bytes, expected {}",
                mmap.len(),
                geometry.file_size()
            ))
            .into());
        }

        let entry_count = read_u64(&mmap, ENTRY_COUNT_OFFSET);
        if entry_count > geometry.max_entries() {
            return Err(corrupted(format!(
                "entry count {entry_count} exceeds capacity {}",
                geometry.max_entries()
            ))
            .into());
        }

        Ok(Self {
            inner: RwLock::new(TableInner {
                mmap,
                geometry,
                entry_count,
            }),
            path,
        })
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, TableInner> {
        // A poisoned lock means a holder panicked; the mapping itself is
        // still consistent (slot writes are length-prefixed, count last).
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Point lookup. Returns the record text for `key`, or `None`.
    ///
    /// A slot whose record bytes are not valid UTF-8 reads as absent — the
    /// read path degrades, it does not fail.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.read_inner();
        let slot = inner.probe(key.as_bytes()).ok()?;
        let (key_len, record_len) = inner.slot_lens(slot);
        String::from_utf8(inner.slot_record(slot, key_len, record_len).to_vec()).ok()
    }

    /// Upsert. Overwrites any existing record for `key`.
    ///
    /// # Errors
    ///
    /// - [`TableError::RecordTooLarge`] if `key` + `record` exceed the slot
    ///   payload (the documented fixed-slot limit).
    /// - [`TableError::TableFull`] if a new key arrives with no free slot.
    pub fn put(&self, key: &str, record: &str) -> Result<()> {
        let key_bytes = key.as_bytes();
        let record_bytes = record.as_bytes();
        let needed = key_bytes.len() + record_bytes.len();

        let mut inner = self.write_inner();
        let capacity = inner.geometry.payload_capacity();
        // The per-length guards back the u16 casts below; geometry already
        // keeps the capacity within what a u16 length can address.
        if needed > capacity
            || key_bytes.len() > usize::from(u16::MAX)
            || record_bytes.len() > usize::from(u16::MAX)
        {
            return Err(TableError::RecordTooLarge {
                key: key.to_string(),
                needed,
                capacity,
            }
            .into());
        }

        match inner.probe(key_bytes) {
            Ok(slot) => {
                // Existing key: rewrite the record in place. The key bytes
                // are already correct; record_len is updated last so a
                // concurrent mapping flush never exposes a longer length
                // than was written.
                let offset = inner.slot_offset(slot);
                let record_offset = offset + SLOT_HEADER_SIZE + key_bytes.len();
                inner.mmap[record_offset..record_offset + record_bytes.len()]
                    .copy_from_slice(record_bytes);
                #[allow(clippy::cast_possible_truncation)] // bounded by payload capacity
                let record_len = record_bytes.len() as u16;
                inner.mmap[offset + 2..offset + 4].copy_from_slice(&record_len.to_le_bytes());
                Ok(())
            }
            Err(Some(slot)) => {
                if inner.entry_count >= inner.geometry.max_entries() {
                    return Err(TableError::TableFull {
                        capacity: inner.geometry.max_entries(),
                    }
                    .into());
                }
                let offset = inner.slot_offset(slot);
                let key_offset = offset + SLOT_HEADER_SIZE;
                let record_offset = key_offset + key_bytes.len();
                inner.mmap[key_offset..record_offset].copy_from_slice(key_bytes);
                inner.mmap[record_offset..record_offset + record_bytes.len()]
                    .copy_from_slice(record_bytes);
                #[allow(clippy::cast_possible_truncation)] // bounded by payload capacity
                let record_len = record_bytes.len() as u16;
                inner.mmap[offset + 2..offset + 4].copy_from_slice(&record_len.to_le_bytes());
                // key_len written last: it is what marks the slot occupied.
                #[allow(clippy::cast_possible_truncation)] // checked against u16::MAX above
                let key_len = key_bytes.len() as u16;
                inner.mmap[offset..offset + 2].copy_from_slice(&key_len.to_le_bytes());
                let count = inner.entry_count + 1;
                inner.write_entry_count(count);
                Ok(())
            }
            Err(None) => Err(TableError::TableFull {
                capacity: inner.geometry.max_entries(),
            }
            .into()),
        }
    }

    /// Lazy enumeration of all stored record texts, in unspecified order.
    ///
    /// The iterator is finite and restartable — each call to `values` starts
    /// a fresh scan. Slots with out-of-range lengths or non-UTF-8 record
    /// bytes are skipped, so one corrupt slot cannot poison a bulk read.
    pub fn values(&self) -> Values<'_> {
        Values {
            table: self,
            next_slot: 0,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> u64 {
        self.read_inner().entry_count
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SyncFailed`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        let inner = self.read_inner();
        inner.mmap.flush().map_err(|e| {
            TableError::SyncFailed {
                path: self.path.display().to_string(),
                source: e,
            }
            .into()
        })
    }

    /// Path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over the record texts in a [`RecordTable`].
///
/// Takes the table's read lock per step, so it can run concurrently with
/// writers; records inserted behind the cursor are not revisited.
#[derive(Debug)]
pub struct Values<'a> {
    table: &'a RecordTable,
    next_slot: u64,
}

impl Iterator for Values<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.table.read_inner();
        while self.next_slot < inner.geometry.slot_count {
            let slot = self.next_slot;
            self.next_slot += 1;

            let (key_len, record_len) = inner.slot_lens(slot);
            if key_len == 0 || !inner.slot_is_sane(key_len, record_len) {
                continue;
            }
            if let Ok(text) =
                String::from_utf8(inner.slot_record(slot, key_len, record_len).to_vec())
            {
                return Some(text);
            }
        }
        None
    }
}
