//! Forward-only cursor over a segmented byte sequence.
//!
//! # Positions
//! - read position: advanced by `peek`/`next`/`bump`, the next unread byte
//! - consume position: trails the read position, moved only when the caller
//!   takes the bytes read so far
//!
//! Both are absolute offsets from the start of the sequence, so the owner of
//! the segments can release everything before the consume position once a
//! parse step succeeds.

use bytes::{Bytes, BytesMut};

/// A zero-copy walker over a sequence of [`Bytes`] segments.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    segments: &'a [Bytes],
    /// Index of the segment holding the read position.
    segment: usize,
    /// Absolute offset of the first byte of `segment`.
    segment_start: usize,
    /// Index of the read position within `segment`.
    index: usize,
    consumed: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `segments`.
    pub fn new(segments: &'a [Bytes]) -> Self {
        Self {
            segments,
            segment: 0,
            segment_start: 0,
            index: 0,
            consumed: 0,
        }
    }

    /// Absolute read position.
    pub fn position(&self) -> usize {
        self.segment_start + self.index
    }

    /// Absolute consume position.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Return the next byte without advancing the read position.
    ///
    /// Crosses into the following segment when the current one is exhausted.
    /// `None` only means no more data is buffered, not that the stream ended.
    #[inline]
    pub fn peek(&mut self) -> Option<u8> {
        loop {
            let current = self.segments.get(self.segment)?;
            if let Some(&byte) = current.get(self.index) {
                return Some(byte);
            }
            if self.segment + 1 >= self.segments.len() {
                return None;
            }
            self.segment_start += current.len();
            self.segment += 1;
            self.index = 0;
        }
    }

    /// Advance the read position by one byte.
    ///
    /// Must only follow a `peek` that returned `Some`.
    #[inline]
    pub fn bump(&mut self) {
        self.index += 1;
    }

    /// Return the next byte and advance past it.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.bump();
        Some(byte)
    }

    /// The bytes between the consume position and `read position + end_offset`.
    ///
    /// Negative offsets trim delimiters that were already scanned.
    pub fn slice_since_consumed(&self, end_offset: isize) -> Slice<'a> {
        let end = offset_position(self.position(), end_offset);
        debug_assert!(end >= self.consumed, "slice ends before the consume position");
        Slice {
            segments: self.segments,
            start: self.consumed,
            end: end.max(self.consumed),
        }
    }

    /// Move the consume position to `read position + offset`.
    pub fn mark_consumed(&mut self, offset: isize) {
        let consumed = offset_position(self.position(), offset);
        debug_assert!(consumed >= self.consumed, "consume position moved backwards");
        self.consumed = consumed.max(self.consumed);
    }

    /// Slice up to `read position + end_offset` and consume everything read.
    pub fn take(&mut self, end_offset: isize) -> Slice<'a> {
        let slice = self.slice_since_consumed(end_offset);
        self.mark_consumed(0);
        slice
    }
}

fn offset_position(position: usize, offset: isize) -> usize {
    position.saturating_add_signed(offset)
}

/// A borrowed byte range that may span several segments.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'a> {
    segments: &'a [Bytes],
    start: usize,
    end: usize,
}

impl<'a> Slice<'a> {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Iterate over the contiguous pieces of this range.
    pub fn chunks(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let (start, end) = (self.start, self.end);
        let mut offset = 0usize;
        self.segments.iter().filter_map(move |segment| {
            let segment_start = offset;
            let segment_end = offset + segment.len();
            offset = segment_end;

            let lo = start.max(segment_start);
            let hi = end.min(segment_end);
            (lo < hi).then(|| &segment[lo - segment_start..hi - segment_start])
        })
    }

    /// Decode the range byte-per-char (ISO-8859-1), the only allocation a parse makes.
    pub fn to_latin1(&self) -> String {
        let mut out = String::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend(chunk.iter().map(|&b| char::from(b)));
        }
        out
    }

    /// Copy the range out, without copying when it lies within one segment.
    pub fn to_bytes(&self) -> Bytes {
        let mut offset = 0usize;
        for segment in self.segments {
            let segment_end = offset + segment.len();
            if self.start >= offset && self.end <= segment_end {
                return segment.slice(self.start - offset..self.end - offset);
            }
            offset = segment_end;
        }

        let mut out = BytesMut::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}
