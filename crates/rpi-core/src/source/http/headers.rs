//! Response header parsing for the HTTP source.

/// Size-related headers of a HEAD or `bytes=0-0` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HeadInfo {
    /// `Content-Length`, if present.
    pub content_length: Option<u64>,
    /// Total from `Content-Range: bytes a-b/total`, if present.
    pub range_total: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

impl HeadInfo {
    /// Object size: the range total wins over the length of a partial body.
    pub fn total_size(&self) -> Option<u64> {
        self.range_total.or(self.content_length)
    }
}

/// Status code from a status line (`HTTP/1.1 206 Partial Content`).
/// Returns None for ordinary header lines.
pub(crate) fn status_code(line: &[u8]) -> Option<u32> {
    let line = std::str::from_utf8(line).ok()?;
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Total length from a `Content-Range` value such as `bytes 0-0/12345`.
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Parse collected header lines of the final response. Earlier responses
/// (redirects) are discarded when a new status line starts.
pub(crate) fn parse_headers(lines: &[String]) -> HeadInfo {
    let mut info = HeadInfo::default();
    for line in lines {
        let line = line.trim();
        if line.starts_with("HTTP/") {
            info = HeadInfo::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            info.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            info.range_total = content_range_total(value);
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            info.accept_ranges = value.eq_ignore_ascii_case("bytes");
        }
    }
    info
}
