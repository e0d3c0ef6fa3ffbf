//! Address syntax (RFC 5321 section 4.1.2, RFC 6531) and EHLO argument checks.

use std::net::{Ipv4Addr, Ipv6Addr};

const LOCAL_PART_MAX: usize = 64;
const DOMAIN_MAX: usize = 255;
const PATH_MAX: usize = 256;
const LABEL_MAX: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("path must be enclosed in angle brackets")]
    Brackets,
    #[error("invalid local part")]
    LocalPart,
    #[error("invalid domain")]
    Domain,
    #[error("path too long")]
    TooLong,
}

/// Checks an EHLO argument: a domain of at least two DNS labels, or an
/// address literal in brackets. A bare IP address is rejected.
#[must_use]
pub fn is_valid_ehlo(value: &str) -> bool {
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        return is_ip_literal(inner);
    }
    if value.parse::<Ipv4Addr>().is_ok() || value.parse::<Ipv6Addr>().is_ok() {
        return false;
    }
    let labels: Vec<&str> = value.split('.').collect();
    labels.len() >= 2
        && value.len() <= DOMAIN_MAX
        && labels.iter().all(|l| is_label(l, false))
}

/// Splits `<path> rest` into the bracketed path and whatever follows it.
/// Quoted strings and backslash escapes inside the path are honoured, so a
/// `>` inside quotes does not end the path.
///
/// # Errors
///
/// Returns [`AddressError::Brackets`] if the input does not start with `<`
/// or the closing `>` is missing.
pub fn take_path(input: &str) -> Result<(&str, &str), AddressError> {
    if !input.starts_with('<') {
        return Err(AddressError::Brackets);
    }
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '>' if !quoted => return Ok((&input[..=i], &input[i + 1..])),
            _ => {}
        }
    }
    Err(AddressError::Brackets)
}

/// Parses a bracketed path and returns the mailbox inside it. `<>` yields
/// an empty string; a leading source route (`<@a,@b:user@c>`) is dropped.
/// Non-ASCII characters are accepted here, callers decide if SMTPUTF8
/// allows them.
///
/// # Errors
///
/// Returns an [`AddressError`] describing the first syntax violation.
pub fn parse_path(raw: &str) -> Result<String, AddressError> {
    if raw.len() > PATH_MAX {
        return Err(AddressError::TooLong);
    }
    let inner = raw
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .ok_or(AddressError::Brackets)?;
    if inner.is_empty() {
        return Ok(String::new());
    }
    let mailbox = strip_source_route(inner)?;
    validate_mailbox(mailbox)?;
    Ok(mailbox.to_string())
}

fn strip_source_route(inner: &str) -> Result<&str, AddressError> {
    if !inner.starts_with('@') {
        return Ok(inner);
    }
    let (route, mailbox) = inner.split_once(':').ok_or(AddressError::Domain)?;
    for hop in route.split(',') {
        let domain = hop.strip_prefix('@').ok_or(AddressError::Domain)?;
        if !is_domain(domain) {
            return Err(AddressError::Domain);
        }
    }
    Ok(mailbox)
}

/// Validates `local@domain`.
///
/// # Errors
///
/// Returns an [`AddressError`] for a malformed local part or domain.
pub fn validate_mailbox(mailbox: &str) -> Result<(), AddressError> {
    let local_len = local_part_len(mailbox).ok_or(AddressError::LocalPart)?;
    if local_len > LOCAL_PART_MAX {
        return Err(AddressError::LocalPart);
    }
    let rest = &mailbox[local_len..];
    let domain = rest.strip_prefix('@').ok_or(AddressError::LocalPart)?;
    if domain.len() > DOMAIN_MAX {
        return Err(AddressError::TooLong);
    }
    let valid = match domain.strip_prefix('[').and_then(|d| d.strip_suffix(']')) {
        Some(literal) => is_address_literal(literal),
        None => is_domain(domain),
    };
    if valid {
        Ok(())
    } else {
        Err(AddressError::Domain)
    }
}

/// Byte length of the local part at the start of `s`, or `None` if it is
/// not a valid Dot-string or Quoted-string.
fn local_part_len(s: &str) -> Option<usize> {
    if s.starts_with('"') {
        let mut escaped = false;
        for (i, c) in s.char_indices().skip(1) {
            if escaped {
                if !(' '..='~').contains(&c) {
                    return None;
                }
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => return Some(i + 1),
                c if is_qtext(c) => {}
                _ => return None,
            }
        }
        return None;
    }
    let end = s.find('@')?;
    let local = &s[..end];
    if local.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext)) {
        Some(end)
    } else {
        None
    }
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c) || !c.is_ascii()
}

fn is_qtext(c: char) -> bool {
    matches!(c, ' '..='!' | '#'..='[' | ']'..='~') || !c.is_ascii()
}

fn is_label(label: &str, allow_utf8: bool) -> bool {
    !label.is_empty()
        && label.len() <= LABEL_MAX
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || (allow_utf8 && !c.is_ascii()))
}

fn is_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= DOMAIN_MAX
        && domain.split('.').all(|l| is_label(l, true))
}

fn is_ip_literal(inner: &str) -> bool {
    if inner.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    match inner.get(..5) {
        Some(tag) if tag.eq_ignore_ascii_case("IPv6:") => inner[5..].parse::<Ipv6Addr>().is_ok(),
        _ => false,
    }
}

/// IPv4, `IPv6:` or a General-address-literal (`tag:content`).
fn is_address_literal(inner: &str) -> bool {
    if is_ip_literal(inner) {
        return true;
    }
    let Some((tag, content)) = inner.split_once(':') else {
        return false;
    };
    !tag.eq_ignore_ascii_case("IPv6")
        && is_label(tag, false)
        && !content.is_empty()
        && content
            .chars()
            .all(|c| matches!(c, '!'..='Z' | '^'..='~'))
}
