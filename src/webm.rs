// EBML/WebM reading helpers

/// EBML header element ID (0x1A45DFA3), the first four bytes of every WebM file
pub const EBML_HEADER_ID: u32 = 0x1A45DFA3;

/// DocType element inside the EBML header
pub const DOC_TYPE_ID: u32 = 0x4282;

/// Read an EBML element ID (marker bits kept). Returns (id, encoded length).
pub fn read_ebml_id(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()?;
    let len = match first {
        b if b & 0x80 != 0 => 1,
        b if b & 0x40 != 0 => 2,
        b if b & 0x20 != 0 => 3,
        b if b & 0x10 != 0 => 4,
        _ => return None,
    };
    if buf.len() < len {
        return None;
    }
    let id = buf[..len]
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);
    Some((id, len))
}

/// Read an EBML variable-length size. Returns (size, encoded length); `None` size
/// means "unknown", which live MediaRecorder streams use for Segment and Cluster.
pub fn read_ebml_size(buf: &[u8]) -> Option<(Option<u64>, usize)> {
    let first = *buf.first()?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || buf.len() < len {
        return None;
    }
    let mask = if len == 8 { 0 } else { 0xFFu8 >> len };
    let mut value = (first & mask) as u64;
    for &byte in &buf[1..len] {
        value = (value << 8) | byte as u64;
    }
    let all_ones = (1u64 << (7 * len)) - 1;
    if value == all_ones {
        Some((None, len))
    } else {
        Some((Some(value), len))
    }
}

/// True when the payload begins with an EBML header, i.e. carries its own
/// container initialization rather than continuing a previous one.
pub fn starts_with_ebml_header(buf: &[u8]) -> bool {
    matches!(read_ebml_id(buf), Some((EBML_HEADER_ID, 4)))
}

/// DocType of the leading EBML header ("webm", "matroska"), if present.
pub fn read_doc_type(buf: &[u8]) -> Option<String> {
    let (id, id_len) = read_ebml_id(buf)?;
    if id != EBML_HEADER_ID {
        return None;
    }
    let (size, size_len) = read_ebml_size(&buf[id_len..])?;
    let start = id_len + size_len;
    let end = start + size? as usize;
    let header = buf.get(start..end)?;

    let mut offset = 0;
    while offset < header.len() {
        let (child_id, child_id_len) = read_ebml_id(&header[offset..])?;
        let (child_size, child_size_len) = read_ebml_size(&header[offset + child_id_len..])?;
        let body_start = offset + child_id_len + child_size_len;
        let body_end = body_start + child_size? as usize;
        let body = header.get(body_start..body_end)?;
        if child_id == DOC_TYPE_ID {
            let text = body.split(|&b| b == 0).next().unwrap_or_default();
            return String::from_utf8(text.to_vec()).ok();
        }
        offset = body_end;
    }
    None
}

/// Number of payloads that open a new EBML container. More than one means a naive
/// concatenation embeds several headers mid-stream.
pub fn count_container_headers<T: AsRef<[u8]>>(payloads: &[T]) -> usize {
    payloads
        .iter()
        .filter(|payload| starts_with_ebml_header(payload.as_ref()))
        .count()
}
