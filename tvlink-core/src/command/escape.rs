//! Argument escaping for the space-delimited command text.
//!
//! Tokens are separated by exactly one space, so an argument may not
//! contain a raw space. Inside an argument:
//!
//! | Raw  | Escaped |
//! |------|---------|
//! | `\`  | `\\`    |
//! | ` `  | `\s`    |
//! | LF   | `\n`    |
//! | CR   | `\r`    |
//!
//! Everything else, commas included, is written verbatim.

use crate::error::InnerError;

pub fn escape(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for ch in arg.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape(token: &str) -> Result<String, InnerError> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(InnerError::MalformedCommand(format!(
                    "unknown escape `\\{other}`"
                )));
            }
            None => {
                return Err(InnerError::MalformedCommand(
                    "dangling escape at end of argument".into(),
                ));
            }
        }
    }
    Ok(out)
}
