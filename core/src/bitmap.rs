//! Occupancy bitmap: one bit per ticket number, 1 = reserved or sold.
//!
//! A campaign's bitmap is split into fixed-size chunks of [`CHUNK_BITS`] numbers. The
//! chunk is the unit of storage and of row locking in the database, so two writers only
//! contend when they touch numbers in the same chunk.
//!
//! Words are `u64` so free-bit scanning can use `trailing_zeros` on the inverted word
//! instead of testing bits one by one.

use crate::error::StoreError;
use crate::types::{NumberRange, TicketNumber};
use std::collections::{BTreeMap, BTreeSet};

/// Numbers per chunk (8 KiB of bits).
pub const CHUNK_BITS: u64 = 65_536;

const WORD_BITS: u64 = 64;

/// Fixed-length bitset backed by `u64` words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OccupancyBitmap {
    len: u64,
    words: Vec<u64>,
}

impl OccupancyBitmap {
    /// A bitmap of `len` clear bits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Chunk lengths fit in usize
    pub fn new(len: u64) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(WORD_BITS) as usize],
        }
    }

    /// Decode a bitmap from its little-endian byte form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the byte length does not match `len`.
    pub fn from_bytes(len: u64, bytes: &[u8]) -> Result<Self, StoreError> {
        let expected = len.div_ceil(WORD_BITS) * 8;
        if bytes.len() as u64 != expected {
            return Err(StoreError::Corrupted(format!(
                "Bitmap of {len} bits needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(Self { len, words })
    }

    /// Encode to little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Number of bits.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the bitmap has zero bits.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn locate(index: u64) -> (usize, u64) {
        ((index / WORD_BITS) as usize, 1u64 << (index % WORD_BITS))
    }

    /// Whether bit `index` is set (out-of-range bits read as clear).
    #[must_use]
    pub fn get(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Set bit `index`; returns `true` only if it was clear.
    pub fn set(&mut self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        let was_clear = self.words[word] & mask == 0;
        self.words[word] |= mask;
        was_clear
    }

    /// Clear bit `index`; returns `true` only if it was set.
    pub fn clear(&mut self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        let was_set = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        was_set
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Set bits in `[from, to)`.
    #[must_use]
    pub fn count_ones_in(&self, from: u64, to: u64) -> u64 {
        let to = to.min(self.len);
        let mut count = 0;
        let mut index = from;
        while index < to {
            let (word, _) = Self::locate(index);
            let offset = index % WORD_BITS;
            let span = (WORD_BITS - offset).min(to - index);
            let mask = if span == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << span) - 1) << offset
            };
            count += u64::from((self.words[word] & mask).count_ones());
            index += span;
        }
        count
    }

    /// First clear bit in `[from, to)`.
    #[must_use]
    pub fn next_clear(&self, from: u64, to: u64) -> Option<u64> {
        let to = to.min(self.len);
        let mut index = from;
        while index < to {
            let (word, _) = Self::locate(index);
            let offset = index % WORD_BITS;
            let free = !self.words[word] >> offset;
            if free != 0 {
                let candidate = index + u64::from(free.trailing_zeros());
                return (candidate < to).then_some(candidate);
            }
            index += WORD_BITS - offset;
        }
        None
    }
}

/// Largest range the chunk address space can hold: `u32::MAX` chunks.
pub const MAX_RANGE_SIZE: u64 = CHUNK_BITS * 0xFFFF_FFFF;

fn chunk_index(offset: u64) -> Result<u32, StoreError> {
    u32::try_from(offset / CHUNK_BITS).map_err(|_| {
        StoreError::Corrupted(format!(
            "Offset {offset} is beyond the addressable {MAX_RANGE_SIZE} numbers"
        ))
    })
}

/// Number of chunks covering a range of `len` numbers.
///
/// # Errors
///
/// Returns [`StoreError::Corrupted`] if `len` exceeds [`MAX_RANGE_SIZE`].
pub fn chunk_count(len: u64) -> Result<u32, StoreError> {
    u32::try_from(len.div_ceil(CHUNK_BITS)).map_err(|_| {
        StoreError::Corrupted(format!(
            "Range of {len} numbers exceeds the addressable {MAX_RANGE_SIZE}"
        ))
    })
}

/// Length of chunk `chunk_no` in a range of `len` numbers.
#[must_use]
pub const fn chunk_len(len: u64, chunk_no: u32) -> u64 {
    let start = chunk_no as u64 * CHUNK_BITS;
    let remaining = len.saturating_sub(start);
    if remaining < CHUNK_BITS {
        remaining
    } else {
        CHUNK_BITS
    }
}

/// Chunk holding `number`.
///
/// # Errors
///
/// Returns [`StoreError::Corrupted`] if the chunk index does not fit in `u32`.
pub fn chunk_of(range: &NumberRange, number: TicketNumber) -> Result<u32, StoreError> {
    chunk_index(range.offset_of(number))
}

/// Chunks overlapping `[start, end]`, ascending.
///
/// # Errors
///
/// Returns [`StoreError::Corrupted`] if a chunk index does not fit in `u32`.
pub fn chunks_between(
    range: &NumberRange,
    start: TicketNumber,
    end: TicketNumber,
) -> Result<Vec<u32>, StoreError> {
    Ok((chunk_of(range, start)?..=chunk_of(range, end)?).collect())
}

/// A campaign's occupancy split into chunks.
///
/// In memory every chunk is present; a database transaction loads only the chunks it
/// touches and writes back the dirty ones.
#[derive(Clone, Debug)]
pub struct ChunkedOccupancy {
    base: u64,
    len: u64,
    chunks: BTreeMap<u32, OccupancyBitmap>,
    dirty: BTreeSet<u32>,
}

impl ChunkedOccupancy {
    /// Fully materialised, all-clear occupancy for `range`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the range exceeds [`MAX_RANGE_SIZE`].
    pub fn empty(range: &NumberRange) -> Result<Self, StoreError> {
        let len = range.size();
        let chunks = (0..chunk_count(len)?)
            .map(|no| (no, OccupancyBitmap::new(chunk_len(len, no))))
            .collect();
        Ok(Self {
            base: range.start.get(),
            len,
            chunks,
            dirty: BTreeSet::new(),
        })
    }

    /// Occupancy with no chunks loaded yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the range exceeds [`MAX_RANGE_SIZE`].
    pub fn partial(range: &NumberRange) -> Result<Self, StoreError> {
        let len = range.size();
        chunk_count(len)?;
        Ok(Self {
            base: range.start.get(),
            len,
            chunks: BTreeMap::new(),
            dirty: BTreeSet::new(),
        })
    }

    /// Add a chunk loaded from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the chunk length is wrong for its position.
    pub fn insert_chunk(&mut self, chunk_no: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let bitmap = OccupancyBitmap::from_bytes(chunk_len(self.len, chunk_no), bytes)?;
        self.chunks.insert(chunk_no, bitmap);
        Ok(())
    }

    /// Iterate every loaded chunk.
    pub fn chunks(&self) -> impl Iterator<Item = (u32, &OccupancyBitmap)> {
        self.chunks.iter().map(|(no, bitmap)| (*no, bitmap))
    }

    /// Chunks modified since the last [`Self::take_dirty`].
    pub fn take_dirty(&mut self) -> Vec<(u32, Vec<u8>)> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|no| self.chunks.get(&no).map(|bitmap| (no, bitmap.to_bytes())))
            .collect()
    }

    /// Chunk and bit of `number`, `None` outside the range.
    fn position(&self, number: TicketNumber) -> Result<Option<(u32, u64)>, StoreError> {
        let Some(offset) = number.get().checked_sub(self.base) else {
            return Ok(None);
        };
        if offset >= self.len {
            return Ok(None);
        }
        Ok(Some((chunk_index(offset)?, offset % CHUNK_BITS)))
    }

    fn chunk(&self, chunk_no: u32) -> Result<&OccupancyBitmap, StoreError> {
        self.chunks
            .get(&chunk_no)
            .ok_or_else(|| StoreError::Corrupted(format!("Occupancy chunk {chunk_no} not loaded")))
    }

    fn chunk_mut(&mut self, chunk_no: u32) -> Result<&mut OccupancyBitmap, StoreError> {
        self.chunks
            .get_mut(&chunk_no)
            .ok_or_else(|| StoreError::Corrupted(format!("Occupancy chunk {chunk_no} not loaded")))
    }

    /// Whether `number` is occupied (numbers outside the range read as free).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the chunk is not loaded.
    pub fn is_occupied(&self, number: TicketNumber) -> Result<bool, StoreError> {
        match self.position(number)? {
            Some((chunk_no, bit)) => Ok(self.chunk(chunk_no)?.get(bit)),
            None => Ok(false),
        }
    }

    /// Set the bits of `numbers` that are currently clear.
    ///
    /// Returns the subset that actually transitioned; numbers already occupied (or
    /// outside the range) are left out. This is the compare-and-set primitive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a needed chunk is not loaded.
    pub fn try_occupy(&mut self, numbers: &[TicketNumber]) -> Result<Vec<TicketNumber>, StoreError> {
        let mut transitioned = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let Some((chunk_no, bit)) = self.position(number)? else {
                continue;
            };
            if self.chunk_mut(chunk_no)?.set(bit) {
                self.dirty.insert(chunk_no);
                transitioned.push(number);
            }
        }
        Ok(transitioned)
    }

    /// Clear the bits of `numbers`; already-clear bits are a no-op.
    ///
    /// Returns the subset that was actually cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a needed chunk is not loaded.
    pub fn release(&mut self, numbers: &[TicketNumber]) -> Result<Vec<TicketNumber>, StoreError> {
        let mut cleared = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let Some((chunk_no, bit)) = self.position(number)? else {
                continue;
            };
            if self.chunk_mut(chunk_no)?.clear(bit) {
                self.dirty.insert(chunk_no);
                cleared.push(number);
            }
        }
        Ok(cleared)
    }

    /// Occupied numbers in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a needed chunk is not loaded.
    pub fn count_occupied(&self, start: TicketNumber, end: TicketNumber) -> Result<u64, StoreError> {
        let (Some((first_chunk, first_bit)), Some((last_chunk, last_bit))) =
            (self.position(start)?, self.position(end)?)
        else {
            return Ok(0);
        };
        let mut count = 0;
        for chunk_no in first_chunk..=last_chunk {
            let bitmap = self.chunk(chunk_no)?;
            let from = if chunk_no == first_chunk { first_bit } else { 0 };
            let to = if chunk_no == last_chunk { last_bit + 1 } else { bitmap.len() };
            count += bitmap.count_ones_in(from, to);
        }
        Ok(count)
    }

    /// First free number in `[from, to]`, skipping numbers in `excluded`.
    fn next_free(
        &self,
        from: TicketNumber,
        to: TicketNumber,
        excluded: &BTreeSet<TicketNumber>,
    ) -> Result<Option<TicketNumber>, StoreError> {
        let mut cursor = from.get();
        while cursor <= to.get() {
            let Some((chunk_no, bit)) = self.position(TicketNumber::new(cursor))? else {
                return Ok(None);
            };
            let bitmap = self.chunk(chunk_no)?;
            let chunk_base = cursor - bit;
            let limit = (to.get() - chunk_base + 1).min(bitmap.len());
            match bitmap.next_clear(bit, limit) {
                Some(free_bit) => {
                    let candidate = TicketNumber::new(chunk_base + free_bit);
                    if !excluded.contains(&candidate) {
                        return Ok(Some(candidate));
                    }
                    cursor = candidate.get() + 1;
                }
                None => cursor = chunk_base + bitmap.len(),
            }
        }
        Ok(None)
    }

    /// Collect up to `limit` free numbers in `[start, end]`.
    ///
    /// The scan begins at `start + offset` and wraps around to `start`, so a random
    /// offset spreads picks across the sub-range. Numbers in `excluded` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a needed chunk is not loaded.
    pub fn free_in(
        &self,
        start: TicketNumber,
        end: TicketNumber,
        offset: u64,
        limit: usize,
        excluded: &BTreeSet<TicketNumber>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut found = Vec::with_capacity(limit);
        if limit == 0 || end < start {
            return Ok(found);
        }
        let span = end.get() - start.get() + 1;
        let pivot = TicketNumber::new(start.get() + offset % span);
        let segments = [(pivot, end), (start, TicketNumber::new(pivot.get().saturating_sub(1)))];
        for (index, (mut from, to)) in segments.into_iter().enumerate() {
            if index == 1 && pivot == start {
                break;
            }
            while found.len() < limit {
                match self.next_free(from, to, excluded)? {
                    Some(number) => {
                        found.push(number);
                        if number >= to {
                            break;
                        }
                        from = TicketNumber::new(number.get() + 1);
                    }
                    None => break,
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::types::CampaignId;
    use proptest::prelude::*;

    fn numbers(values: &[u64]) -> Vec<TicketNumber> {
        values.iter().copied().map(TicketNumber::new).collect()
    }

    #[test]
    fn test_set_and_clear_report_transitions() {
        let mut bitmap = OccupancyBitmap::new(130);
        assert!(bitmap.set(129));
        assert!(!bitmap.set(129));
        assert!(bitmap.get(129));
        assert!(bitmap.clear(129));
        assert!(!bitmap.clear(129));
        assert!(!bitmap.set(130));
    }

    #[test]
    fn test_next_clear_skips_full_words() {
        let mut bitmap = OccupancyBitmap::new(200);
        for i in 0..150 {
            bitmap.set(i);
        }
        assert_eq!(bitmap.next_clear(0, 200), Some(150));
        assert_eq!(bitmap.next_clear(0, 150), None);
        assert_eq!(bitmap.next_clear(160, 200), Some(160));
    }

    #[test]
    fn test_count_ones_in_partial_words() {
        let mut bitmap = OccupancyBitmap::new(256);
        for i in [0, 63, 64, 65, 127, 128, 255] {
            bitmap.set(i);
        }
        assert_eq!(bitmap.count_ones_in(0, 256), 7);
        assert_eq!(bitmap.count_ones_in(63, 66), 3);
        assert_eq!(bitmap.count_ones_in(1, 63), 0);
        assert_eq!(bitmap.count_ones(), 7);
    }

    #[test]
    fn test_bytes_round_trip_and_length_check() {
        let mut bitmap = OccupancyBitmap::new(100);
        bitmap.set(3);
        bitmap.set(99);
        let bytes = bitmap.to_bytes();
        assert_eq!(OccupancyBitmap::from_bytes(100, &bytes).ok(), Some(bitmap));
        assert!(OccupancyBitmap::from_bytes(200, &bytes).is_err());
    }

    #[test]
    fn test_try_occupy_returns_only_transitioned() {
        let range = NumberRange::new(CampaignId::new(), 1, 100);
        let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
        let first = occupancy.try_occupy(&numbers(&[1, 2, 3])).unwrap_or_default();
        let second = occupancy.try_occupy(&numbers(&[2, 3, 4, 500])).unwrap_or_default();
        assert_eq!(first, numbers(&[1, 2, 3]));
        assert_eq!(second, numbers(&[4]));
    }

    #[test]
    fn test_release_is_idempotent() {
        let range = NumberRange::new(CampaignId::new(), 1, 100);
        let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
        let _ = occupancy.try_occupy(&numbers(&[10, 11]));
        assert_eq!(occupancy.release(&numbers(&[10])).unwrap_or_default(), numbers(&[10]));
        assert!(occupancy.release(&numbers(&[10])).unwrap_or_default().is_empty());
        assert_eq!(occupancy.count_occupied(range.start, range.end).ok(), Some(1));
    }

    #[test]
    fn test_free_in_wraps_and_skips_excluded() {
        let range = NumberRange::new(CampaignId::new(), 0, 9).with_instant_prizes([8]);
        let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
        let _ = occupancy.try_occupy(&numbers(&[0, 1, 2, 3, 4, 5, 6]));
        let free = occupancy
            .free_in(range.start, range.end, 9, 10, &range.instant_prize_numbers)
            .unwrap_or_default();
        assert_eq!(free, numbers(&[9, 7]));
    }

    #[test]
    fn test_multi_chunk_scan() {
        let range = NumberRange::new(CampaignId::new(), 1, CHUNK_BITS * 2 + 10);
        let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
        let all: Vec<TicketNumber> = (1..=CHUNK_BITS + 5).map(TicketNumber::new).collect();
        let _ = occupancy.try_occupy(&all);
        let free = occupancy
            .free_in(range.start, range.end, 0, 1, &range.instant_prize_numbers)
            .unwrap_or_default();
        assert_eq!(free, numbers(&[CHUNK_BITS + 6]));
        assert_eq!(
            occupancy.count_occupied(range.start, range.end).ok(),
            Some(CHUNK_BITS + 5)
        );
        assert_eq!(occupancy.take_dirty().len(), 2);
    }

    #[test]
    fn test_partial_occupancy_requires_loaded_chunk() {
        let range = NumberRange::new(CampaignId::new(), 1, 100);
        let mut occupancy = ChunkedOccupancy::partial(&range).unwrap();
        assert!(occupancy.try_occupy(&numbers(&[5])).is_err());
        let empty = OccupancyBitmap::new(100).to_bytes();
        assert!(occupancy.insert_chunk(0, &empty).is_ok());
        assert_eq!(occupancy.try_occupy(&numbers(&[5])).unwrap_or_default(), numbers(&[5]));
    }

    #[test]
    fn test_chunk_addressing_is_bounded() {
        assert_eq!(chunk_count(CHUNK_BITS * 2 + 1).unwrap(), 3);
        assert_eq!(chunk_count(MAX_RANGE_SIZE).unwrap(), u32::MAX);
        assert!(chunk_count(MAX_RANGE_SIZE + 1).is_err());

        let range = NumberRange::new(CampaignId::new(), 0, 1 << 48);
        assert!(chunk_of(&range, TicketNumber::new(1 << 48)).is_err());
        assert!(ChunkedOccupancy::partial(&range).is_err());
    }

    proptest! {
        #[test]
        fn prop_occupy_then_release_restores_count(
            picks in proptest::collection::vec(1u64..=500, 0..200)
        ) {
            let range = NumberRange::new(CampaignId::new(), 1, 500);
            let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
            let requested = numbers(&picks);
            let occupied = occupancy.try_occupy(&requested).unwrap_or_default();
            let distinct: BTreeSet<_> = requested.iter().copied().collect();
            prop_assert_eq!(occupied.len(), distinct.len());
            prop_assert_eq!(
                occupancy.count_occupied(range.start, range.end).unwrap_or_default(),
                distinct.len() as u64
            );
            let released = occupancy.release(&requested).unwrap_or_default();
            prop_assert_eq!(released.len(), distinct.len());
            prop_assert_eq!(occupancy.count_occupied(range.start, range.end).unwrap_or_default(), 0);
        }

        #[test]
        fn prop_free_in_never_returns_occupied(
            picks in proptest::collection::vec(0u64..300, 0..300),
            offset in 0u64..300,
        ) {
            let range = NumberRange::new(CampaignId::new(), 0, 299);
            let mut occupancy = ChunkedOccupancy::empty(&range).unwrap();
            let _ = occupancy.try_occupy(&numbers(&picks));
            let free = occupancy
                .free_in(range.start, range.end, offset, 300, &range.instant_prize_numbers)
                .unwrap_or_default();
            let distinct: BTreeSet<_> = picks.iter().copied().collect();
            prop_assert_eq!(free.len() as u64, 300 - distinct.len() as u64);
            for number in free {
                prop_assert!(!occupancy.is_occupied(number).unwrap_or(true));
            }
        }
    }
}
