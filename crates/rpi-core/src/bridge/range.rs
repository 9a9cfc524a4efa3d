//! Single `Range: bytes=...` header parsing.

/// Inclusive byte span resolved against the object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Not a `bytes=` range or not parseable.
    Malformed,
    /// More than one range in the header.
    MultiRange,
    /// Valid syntax, but no byte of it lies within the object.
    Unsatisfiable,
}

/// Parses `bytes=a-b`, `bytes=a-` and `bytes=-n` against an object of
/// `total` bytes; the end is clamped to the last byte.
pub fn parse_range(value: &str, total: u64) -> Result<ByteRange, RangeError> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?
        .trim();
    if spec.contains(',') {
        return Err(RangeError::MultiRange);
    }
    let (first, last) = spec.split_once('-').ok_or(RangeError::Malformed)?;
    let (first, last) = (first.trim(), last.trim());
    let parse = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Malformed);
    if total == 0 {
        return Err(RangeError::Unsatisfiable);
    }
    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return Err(RangeError::Malformed),
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            (total.saturating_sub(suffix), total - 1)
        }
        (false, true) => (parse(first)?, total - 1),
        (false, false) => {
            let (s, e) = (parse(first)?, parse(last)?);
            if e < s {
                return Err(RangeError::Malformed);
            }
            (s, e.min(total - 1))
        }
    };
    if start >= total {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(ByteRange { start, end })
}
