//! Comma-separated fields with double-quote escaping.
//!
//! Shared by the journal and the roster import. A field holding a comma or
//! a double quote is written in double quotes, with inner quotes doubled:
//! `Smith, Jones & Co` becomes `"Smith, Jones & Co"` and `Sam "Red"` becomes
//! `"Sam ""Red"""`. Records are single lines, so fields never hold a line
//! break.

use std::borrow::Cow;

/// Whether `value` can be written as a field at all.
pub fn is_encodable(value: &str) -> bool {
    !value.contains(['\n', '\r'])
}

/// Quote `value` if it needs it. Plain values are borrowed unchanged.
pub fn quote(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Split one line into fields, undoing [`quote`].
///
/// A quote opens a quoted field only at the start of a field (leading
/// blanks allowed). Fails on a quoted field left open at the end of the line.
pub fn split(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    fields.push(current);
    Ok(fields)
}
