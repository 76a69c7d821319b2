use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Look up an encoding by config name.
///
/// Accepts every WHATWG label known to `encoding_rs`, plus `plain`, which is
/// treated as UTF-8.
pub fn find_encoding(name: &str) -> Option<&'static Encoding> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("plain") {
        return Some(UTF_8);
    }

    let name = name.to_ascii_lowercase();
    let name = match name.as_str() {
        "utf-16le-bom" => "utf-16le",
        "utf-16be-bom" => "utf-16be",
        other => other,
    };

    Encoding::for_label_no_replacement(name.as_bytes())
}

/// Byte sequence for `\n` in `encoding`.
///
/// `encoding_rs` cannot encode into UTF-16, so those two are spelled out.
pub fn encoded_newline(encoding: &'static Encoding) -> Vec<u8> {
    if encoding == UTF_16LE {
        vec![b'\n', 0]
    } else if encoding == UTF_16BE {
        vec![0, b'\n']
    } else {
        let (bytes, _, _) = encoding.encode("\n");
        bytes.into_owned()
    }
}
