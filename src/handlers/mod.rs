//! One handler per implemented verb. Each checks the session state,
//! parses its arguments, consults the policy and produces one reply.

pub mod data;
pub mod ehlo;
pub mod mail;
pub mod quit;
pub mod rcpt;
pub mod rset;
pub mod starttls;

/// Strips a case-insensitive `FROM:`/`TO:` keyword and any whitespace
/// after the colon.
fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(args[keyword.len()..].trim_start())
    } else {
        None
    }
}
