//! Byte-range planning for the mirror installer's parallel pulls.

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Splits `total_size` into at most `max_segments` near-equal ranges, using
/// fewer when that would make a range shorter than `min_len`. Earlier
/// segments absorb the remainder one byte each.
pub fn plan_segments(total_size: u64, max_segments: usize, min_len: u64) -> Vec<Segment> {
    if total_size == 0 || max_segments == 0 {
        return Vec::new();
    }
    let by_len = total_size.div_ceil(min_len.max(1));
    let count = (max_segments as u64).min(by_len).max(1);
    let base = total_size / count;
    let remainder = total_size % count;

    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        out.push(Segment {
            start: offset,
            end: offset + len,
        });
        offset += len;
    }
    out
}
