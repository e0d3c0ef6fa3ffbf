/// Makes client-supplied bytes safe to put in a log line: control
/// characters become escape sequences, invalid UTF-8 becomes `\xNN` and
/// non-ASCII characters become `\u{..}`.
pub fn escape_for_log(input: &[u8]) -> String {
    let mut result = String::with_capacity(input.len());
    for chunk in input.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\0' => result.push_str("\\0"),
                '\r' => result.push_str("\\r"),
                '\n' => result.push_str("\\n"),
                '\t' => result.push_str("\\t"),
                '\\' => result.push_str("\\\\"),
                ' ' => result.push(' '),
                _ if c.is_ascii_graphic() => result.push(c),
                _ if c.is_ascii() => result.push_str(&format!("\\x{:02x}", c as u32)),
                _ => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
            }
        }
        for b in chunk.invalid() {
            result.push_str(&format!("\\x{b:02x}"));
        }
    }
    result
}
