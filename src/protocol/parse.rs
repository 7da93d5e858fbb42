use super::types::ProgressEvent;

/// Path segments that precede the file key in a design URL.
const FILE_KEY_MARKERS: &[&str] = &["/file/", "/design/"];

/// Extract the file key from a design URL.
///
/// Matches the first `/file/<key>` or `/design/<key>` segment, where the key
/// is a run of ASCII alphanumerics. Returns `None` when neither is present.
pub fn extract_file_key(url: &str) -> Option<&str> {
    FILE_KEY_MARKERS
        .iter()
        .filter_map(|marker| url.find(marker).map(|start| start + marker.len()))
        .min()
        .and_then(|start| {
            let rest = &url[start..];
            let len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            (len > 0).then(|| &rest[..len])
        })
}

/// Parse one push message payload into a `ProgressEvent`.
///
/// Returns `Ok(None)` for empty payloads.
/// Returns `Err` for malformed JSON (caller should drop, not crash).
pub fn parse_event(data: &str) -> serde_json::Result<Option<ProgressEvent>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    let event: ProgressEvent = serde_json::from_str(data)?;
    Ok(Some(event))
}
