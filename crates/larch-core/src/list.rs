//! Chunked ring lists.
//!
//! A [`ChunkList`] is a ring of small fixed-capacity chunks (14 slots). It is
//! the container behind instruction streams, CFG edge lists, and phi lists:
//! dense storage, O(1) append, and cursors that stay valid while the current
//! entry is deleted or replaced.
//!
//! Deleting through a cursor leaves a tombstone; the number of slots a walk
//! visits is stable for the duration of that walk. [`ChunkList::pack`]
//! compacts tombstones away and must run before a later pass re-reads the
//! list.

use crate::arena::{Idx, Recycler};

/// Slots per chunk.
pub const CHUNK_CAPACITY: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkIdx(u32);

impl Idx for ChunkIdx {
    fn from_raw(raw: u32) -> Self {
        ChunkIdx(raw)
    }
    fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Chunk<T> {
    entries: [Option<T>; CHUNK_CAPACITY],
    /// Slots in use, tombstones included.
    nr: usize,
    prev: u32,
    next: u32,
}

impl<T: Copy> Chunk<T> {
    fn empty() -> Self {
        Chunk {
            entries: [None; CHUNK_CAPACITY],
            nr: 0,
            prev: 0,
            next: 0,
        }
    }
}

/// Ring of chunks holding `T` values.
#[derive(Debug)]
pub struct ChunkList<T> {
    chunks: Vec<Chunk<T>>,
    head: Option<u32>,
    free: Recycler<ChunkIdx>,
    live: usize,
}

impl<T: Copy> Clone for ChunkList<T> {
    fn clone(&self) -> Self {
        self.to_vec().into_iter().collect()
    }
}

impl<T: Copy> ChunkList<T> {
    pub fn new() -> Self {
        ChunkList {
            chunks: Vec::new(),
            head: None,
            free: Recycler::new(),
            live: 0,
        }
    }

    /// Number of live entries (tombstones excluded).
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn alloc_chunk(&mut self) -> u32 {
        if let Some(idx) = self.free.reuse() {
            self.chunks[idx.raw() as usize] = Chunk::empty();
            idx.raw()
        } else {
            self.chunks.push(Chunk::empty());
            (self.chunks.len() - 1) as u32
        }
    }

    /// Links `idx` into the ring just before `head` (i.e. at the tail).
    fn link_tail(&mut self, idx: u32) {
        match self.head {
            None => {
                self.head = Some(idx);
                self.chunks[idx as usize].prev = idx;
                self.chunks[idx as usize].next = idx;
            }
            Some(head) => {
                let tail = self.chunks[head as usize].prev;
                self.chunks[tail as usize].next = idx;
                self.chunks[idx as usize].prev = tail;
                self.chunks[idx as usize].next = head;
                self.chunks[head as usize].prev = idx;
            }
        }
    }

    /// Appends `value` at the tail.
    pub fn push_back(&mut self, value: T) {
        let chunk = match self.head {
            Some(head) => {
                let tail = self.chunks[head as usize].prev;
                if self.chunks[tail as usize].nr < CHUNK_CAPACITY {
                    tail
                } else {
                    let idx = self.alloc_chunk();
                    self.link_tail(idx);
                    idx
                }
            }
            None => {
                let idx = self.alloc_chunk();
                self.link_tail(idx);
                idx
            }
        };
        let ch = &mut self.chunks[chunk as usize];
        ch.entries[ch.nr] = Some(value);
        ch.nr += 1;
        self.live += 1;
    }

    /// Prepends `value` at the head. Not cursor-stable.
    pub fn push_front(&mut self, value: T) {
        match self.head {
            Some(head) if self.chunks[head as usize].nr < CHUNK_CAPACITY => {
                let ch = &mut self.chunks[head as usize];
                let nr = ch.nr;
                ch.entries.copy_within(0..nr, 1);
                ch.entries[0] = Some(value);
                ch.nr += 1;
            }
            Some(_) => {
                let idx = self.alloc_chunk();
                self.link_tail(idx);
                self.head = Some(idx);
                let ch = &mut self.chunks[idx as usize];
                ch.entries[0] = Some(value);
                ch.nr = 1;
            }
            None => {
                self.push_back(value);
                return;
            }
        }
        self.live += 1;
    }

    /// First live entry.
    pub fn first(&self) -> Option<T> {
        let mut cursor = ListCursor::new(self);
        cursor.next(self)
    }

    /// Last live entry.
    pub fn last(&self) -> Option<T> {
        let mut cursor = ListCursor::new_reverse(self);
        cursor.prev(self)
    }

    /// Removes and returns the last live entry.
    pub fn delete_last(&mut self) -> Option<T> {
        let mut cursor = ListCursor::new_reverse(self);
        let last = cursor.prev(self)?;
        cursor.delete_current(self);
        Some(last)
    }

    /// Inserts `value` immediately before the last live entry. With no live
    /// entry this is a plain append. Used to place instructions ahead of a
    /// block terminator.
    pub fn insert_before_last(&mut self, value: T) {
        let mut cursor = ListCursor::new_reverse(self);
        match cursor.prev(self) {
            Some(last) => {
                cursor.replace_current(self, value);
                self.push_back(last);
            }
            None => self.push_back(value),
        }
    }

    /// Copies at most `n` leading entries into `buf`, returning how many
    /// were copied.
    pub fn linearize(&self, buf: &mut [T], n: usize) -> usize {
        let mut cursor = ListCursor::new(self);
        let mut copied = 0;
        while copied < n.min(buf.len()) {
            match cursor.next(self) {
                Some(v) => {
                    buf[copied] = v;
                    copied += 1;
                }
                None => break,
            }
        }
        copied
    }

    /// All live entries in order.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.live);
        let mut cursor = ListCursor::new(self);
        while let Some(v) = cursor.next(self) {
            out.push(v);
        }
        out
    }

    /// Iterates live entries. The list must not be mutated during the walk;
    /// use a [`ListCursor`] for mutating iteration.
    pub fn iter(&self) -> ChunkIter<'_, T> {
        ChunkIter {
            list: self,
            cursor: ListCursor::new(self),
        }
    }

    fn rebuild(&mut self, entries: &[T]) {
        self.head = None;
        self.live = 0;
        self.free.clear();
        for i in 0..self.chunks.len() {
            self.free.free_one(ChunkIdx(i as u32));
        }
        for &v in entries {
            self.push_back(v);
        }
    }

    /// Compacts tombstones and frees emptied chunks. Invalidates cursors.
    pub fn pack(&mut self) {
        let entries = self.to_vec();
        self.rebuild(&entries);
    }

    /// Sorts live entries: insertion sort within each chunk, then a merge
    /// across the chunk runs. Invalidates cursors.
    pub fn sort<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        // Per-chunk runs, insertion-sorted.
        let mut runs: Vec<Vec<T>> = Vec::new();
        if let Some(head) = self.head {
            let mut chunk = head;
            loop {
                let ch = &self.chunks[chunk as usize];
                let mut run: Vec<T> = ch.entries[..ch.nr].iter().filter_map(|e| *e).collect();
                for i in 1..run.len() {
                    let mut j = i;
                    while j > 0 && cmp(&run[j - 1], &run[j]) == std::cmp::Ordering::Greater {
                        run.swap(j - 1, j);
                        j -= 1;
                    }
                }
                if !run.is_empty() {
                    runs.push(run);
                }
                chunk = ch.next;
                if chunk == head {
                    break;
                }
            }
        }
        // Merge runs pairwise until one remains.
        while runs.len() > 1 {
            let mut merged: Vec<Vec<T>> = Vec::with_capacity(runs.len() / 2 + 1);
            let mut iter = runs.into_iter();
            while let Some(a) = iter.next() {
                match iter.next() {
                    Some(b) => merged.push(merge_runs(a, b, &mut cmp)),
                    None => merged.push(a),
                }
            }
            runs = merged;
        }
        let entries = runs.pop().unwrap_or_default();
        self.rebuild(&entries);
    }

    /// Appends all of `other`'s entries, leaving `other` empty.
    pub fn concat(&mut self, other: &mut ChunkList<T>) {
        let entries = other.to_vec();
        other.clear();
        for v in entries {
            self.push_back(v);
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.free.clear();
        self.head = None;
        self.live = 0;
    }

    /// Linear scan for `value`.
    pub fn contains(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|v| v == value)
    }

    /// Deletes the first occurrence of `value`, leaving a tombstone.
    pub fn delete_first(&mut self, value: T) -> bool
    where
        T: PartialEq,
    {
        let mut cursor = ListCursor::new(self);
        while let Some(v) = cursor.next(self) {
            if v == value {
                cursor.delete_current(self);
                return true;
            }
        }
        false
    }

    /// Replaces the first occurrence of `old` with `new`.
    pub fn replace_first(&mut self, old: T, new: T) -> bool
    where
        T: PartialEq,
    {
        let mut cursor = ListCursor::new(self);
        while let Some(v) = cursor.next(self) {
            if v == old {
                cursor.replace_current(self, new);
                return true;
            }
        }
        false
    }
}

fn merge_runs<T: Copy, F>(a: Vec<T>, b: Vec<T>, cmp: &mut F) -> Vec<T>
where
    F: FnMut(&T, &T) -> std::cmp::Ordering,
{
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if cmp(&b[j], &a[i]) == std::cmp::Ordering::Less {
            out.push(b[j]);
            j += 1;
        } else {
            out.push(a[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

impl<T: Copy> Default for ChunkList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> FromIterator<T> for ChunkList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = ChunkList::new();
        for v in iter {
            list.push_back(v);
        }
        list
    }
}

/// Detached cursor over a [`ChunkList`].
///
/// The cursor holds positions, not borrows, so the owning pass can mutate
/// other structures between steps. `delete_current`/`replace_current` act on
/// the entry most recently yielded.
#[derive(Debug, Clone, Copy)]
pub struct ListCursor {
    chunk: Option<u32>,
    slot: usize,
    current: Option<(u32, usize)>,
    reverse: bool,
}

impl ListCursor {
    /// Forward cursor positioned before the first entry.
    pub fn new<T: Copy>(list: &ChunkList<T>) -> Self {
        ListCursor {
            chunk: list.head,
            slot: 0,
            current: None,
            reverse: false,
        }
    }

    /// Reverse cursor positioned after the last entry.
    pub fn new_reverse<T: Copy>(list: &ChunkList<T>) -> Self {
        let chunk = list.head.map(|h| list.chunks[h as usize].prev);
        let slot = chunk.map_or(0, |c| list.chunks[c as usize].nr);
        ListCursor {
            chunk,
            slot,
            current: None,
            reverse: true,
        }
    }

    /// Next live entry in forward order.
    pub fn next<T: Copy>(&mut self, list: &ChunkList<T>) -> Option<T> {
        debug_assert!(!self.reverse);
        loop {
            let chunk = self.chunk?;
            let ch = &list.chunks[chunk as usize];
            if self.slot < ch.nr {
                let slot = self.slot;
                self.slot += 1;
                if let Some(v) = ch.entries[slot] {
                    self.current = Some((chunk, slot));
                    return Some(v);
                }
            } else {
                let next = ch.next;
                self.chunk = if Some(next) == list.head {
                    None
                } else {
                    Some(next)
                };
                self.slot = 0;
            }
        }
    }

    /// Next live entry in reverse order.
    pub fn prev<T: Copy>(&mut self, list: &ChunkList<T>) -> Option<T> {
        debug_assert!(self.reverse);
        loop {
            let chunk = self.chunk?;
            let ch = &list.chunks[chunk as usize];
            if self.slot > 0 {
                self.slot -= 1;
                if let Some(v) = ch.entries[self.slot] {
                    self.current = Some((chunk, self.slot));
                    return Some(v);
                }
            } else {
                if Some(chunk) == list.head {
                    self.chunk = None;
                    return None;
                }
                let prev = ch.prev;
                self.chunk = Some(prev);
                self.slot = list.chunks[prev as usize].nr;
            }
        }
    }

    /// Tombstones the entry most recently yielded.
    pub fn delete_current<T: Copy>(&mut self, list: &mut ChunkList<T>) {
        if let Some((chunk, slot)) = self.current {
            let ch = &mut list.chunks[chunk as usize];
            if ch.entries[slot].take().is_some() {
                list.live -= 1;
            }
            self.current = None;
        }
    }

    /// Overwrites the entry most recently yielded.
    pub fn replace_current<T: Copy>(&mut self, list: &mut ChunkList<T>, value: T) {
        if let Some((chunk, slot)) = self.current {
            let ch = &mut list.chunks[chunk as usize];
            if ch.entries[slot].is_none() {
                list.live += 1;
            }
            ch.entries[slot] = Some(value);
        }
    }
}

/// Borrowing iterator over live entries.
pub struct ChunkIter<'a, T> {
    list: &'a ChunkList<T>,
    cursor: ListCursor,
}

impl<'a, T: Copy> Iterator for ChunkIter<'a, T> {
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.cursor.next(self.list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(list: &ChunkList<u32>) -> Vec<u32> {
        list.to_vec()
    }

    #[test]
    fn push_back_spans_chunks() {
        let mut list = ChunkList::new();
        for i in 0..40u32 {
            list.push_back(i);
        }
        assert_eq!(list.len(), 40);
        assert_eq!(collect(&list), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn push_front_prepends() {
        let mut list = ChunkList::new();
        for i in 0..20u32 {
            list.push_front(i);
        }
        let expected: Vec<u32> = (0..20).rev().collect();
        assert_eq!(collect(&list), expected);
    }

    #[test]
    fn first_and_last() {
        let mut list = ChunkList::new();
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        for i in 1..=30u32 {
            list.push_back(i);
        }
        assert_eq!(list.first(), Some(1));
        assert_eq!(list.last(), Some(30));
    }

    #[test]
    fn delete_current_leaves_walk_stable() {
        let mut list: ChunkList<u32> = (0..30).collect();
        let mut cursor = ListCursor::new(&list);
        while let Some(v) = cursor.next(&list) {
            if v % 3 == 0 {
                cursor.delete_current(&mut list);
            }
        }
        let expected: Vec<u32> = (0..30).filter(|v| v % 3 != 0).collect();
        assert_eq!(collect(&list), expected);
        assert_eq!(list.len(), expected.len());
    }

    #[test]
    fn replace_current_during_walk() {
        let mut list: ChunkList<u32> = (0..20).collect();
        let mut cursor = ListCursor::new(&list);
        while let Some(v) = cursor.next(&list) {
            cursor.replace_current(&mut list, v * 2);
        }
        let expected: Vec<u32> = (0..20).map(|v| v * 2).collect();
        assert_eq!(collect(&list), expected);
    }

    #[test]
    fn reverse_walk_sees_reverse_order() {
        let list: ChunkList<u32> = (0..33).collect();
        let mut cursor = ListCursor::new_reverse(&list);
        let mut seen = Vec::new();
        while let Some(v) = cursor.prev(&list) {
            seen.push(v);
        }
        let expected: Vec<u32> = (0..33).rev().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn pack_compacts_tombstones() {
        let mut list: ChunkList<u32> = (0..30).collect();
        let mut cursor = ListCursor::new(&list);
        while let Some(v) = cursor.next(&list) {
            if v % 2 == 0 {
                cursor.delete_current(&mut list);
            }
        }
        list.pack();
        let expected: Vec<u32> = (0..30).filter(|v| v % 2 == 1).collect();
        assert_eq!(collect(&list), expected);
        assert_eq!(list.len(), 15);
    }

    #[test]
    fn delete_last_removes_terminator_position() {
        let mut list: ChunkList<u32> = (0..16).collect();
        assert_eq!(list.delete_last(), Some(15));
        assert_eq!(list.last(), Some(14));
        assert_eq!(list.len(), 15);
    }

    #[test]
    fn insert_before_last_keeps_terminator_last() {
        let mut list: ChunkList<u32> = (0..5).collect();
        list.insert_before_last(99);
        assert_eq!(collect(&list), vec![0, 1, 2, 3, 99, 4]);

        let mut empty: ChunkList<u32> = ChunkList::new();
        empty.insert_before_last(7);
        assert_eq!(collect(&empty), vec![7]);
    }

    #[test]
    fn sort_across_chunks() {
        let mut list = ChunkList::new();
        for i in (0..50u32).rev() {
            list.push_back(i);
        }
        list.sort(|a, b| a.cmp(b));
        assert_eq!(collect(&list), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        // Sort by the low byte only; the high byte records insertion order.
        let mut list = ChunkList::new();
        for i in 0..20u32 {
            list.push_back((i << 8) | (i % 2));
        }
        list.sort(|a, b| (a & 0xff).cmp(&(b & 0xff)));
        let sorted = collect(&list);
        let evens: Vec<u32> = sorted.iter().copied().filter(|v| v & 1 == 0).collect();
        assert!(evens.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn concat_drains_source() {
        let mut a: ChunkList<u32> = (0..3).collect();
        let mut b: ChunkList<u32> = (10..13).collect();
        a.concat(&mut b);
        assert_eq!(collect(&a), vec![0, 1, 2, 10, 11, 12]);
        assert!(b.is_empty());
    }

    #[test]
    fn linearize_copies_prefix() {
        let list: ChunkList<u32> = (0..10).collect();
        let mut buf = [0u32; 4];
        let n = list.linearize(&mut buf, 4);
        assert_eq!(n, 4);
        assert_eq!(buf, [0, 1, 2, 3]);

        let small: ChunkList<u32> = (0..2).collect();
        let n = small.linearize(&mut buf, 4);
        assert_eq!(n, 2);
    }

    #[test]
    fn delete_and_replace_first() {
        let mut list: ChunkList<u32> = (0..5).collect();
        assert!(list.delete_first(2));
        assert!(!list.delete_first(2));
        assert!(list.replace_first(3, 33));
        list.pack();
        assert_eq!(collect(&list), vec![0, 1, 33, 4]);
    }

    proptest! {
        #[test]
        fn behaves_like_vec(ops in proptest::collection::vec((0u8..4, any::<u32>()), 0..200)) {
            let mut list: ChunkList<u32> = ChunkList::new();
            let mut model: Vec<u32> = Vec::new();
            for (op, v) in ops {
                match op {
                    0 => { list.push_back(v); model.push(v); }
                    1 => { list.push_front(v); model.insert(0, v); }
                    2 => { list.delete_last(); model.pop(); }
                    _ => { list.pack(); }
                }
                prop_assert_eq!(list.len(), model.len());
            }
            prop_assert_eq!(list.to_vec(), model);
        }

        #[test]
        fn sort_matches_std_sort(mut values in proptest::collection::vec(any::<u32>(), 0..150)) {
            let mut list: ChunkList<u32> = values.iter().copied().collect();
            list.sort(|a, b| a.cmp(b));
            values.sort();
            prop_assert_eq!(list.to_vec(), values);
        }
    }
}
