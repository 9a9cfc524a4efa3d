//! `/<kind>/<hash>` request paths.

use crate::jobs::JobKind;

/// Splits a request URL into route kind and job hash. Query strings are
/// ignored; anything else (extra segments, unknown kind, empty hash) is not
/// a job route.
pub fn parse_route(url: &str) -> Option<(JobKind, &str)> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut parts = path.trim_start_matches('/').splitn(2, '/');
    let kind = JobKind::from_segment(parts.next()?)?;
    let hash = parts.next()?;
    if hash.is_empty() || hash.contains('/') {
        return None;
    }
    Some((kind, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_routes() {
        assert_eq!(
            parse_route("/rmt_inst/abc.pkg"),
            Some((JobKind::Direct, "abc.pkg"))
        );
        assert_eq!(
            parse_route("/split_inst/abc.pkg?x=1"),
            Some((JobKind::Staged, "abc.pkg"))
        );
        assert_eq!(
            parse_route("/archive_inst/q.pkg"),
            Some((JobKind::Archive, "q.pkg"))
        );
    }

    #[test]
    fn non_routes() {
        assert_eq!(parse_route("/status"), None);
        assert_eq!(parse_route("/rmt_inst/"), None);
        assert_eq!(parse_route("/rmt_inst/a/b"), None);
        assert_eq!(parse_route("/other/abc"), None);
    }
}
