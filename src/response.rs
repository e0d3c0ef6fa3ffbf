//! SMTP replies: basic code, RFC 3463 enhanced code and text.

use std::fmt;

/// Enhanced status code (RFC 3463), `class.subject.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedCode(pub u8, pub u16, pub u16);

impl EnhancedCode {
    pub const OK: Self = Self(2, 0, 0);
    pub const SENDER_OK: Self = Self(2, 1, 0);
    pub const DESTINATION_OK: Self = Self(2, 1, 5);
    pub const MESSAGE_ACCEPTED: Self = Self(2, 6, 0);
    pub const LOCAL_ERROR: Self = Self(4, 3, 0);
    pub const TIMEOUT: Self = Self(4, 4, 2);
    pub const SECURITY: Self = Self(4, 7, 0);
    pub const BAD_DESTINATION_SYNTAX: Self = Self(5, 1, 3);
    pub const BAD_SENDER_SYNTAX: Self = Self(5, 1, 7);
    pub const TOO_BIG: Self = Self(5, 3, 4);
    pub const BAD_SEQUENCE: Self = Self(5, 5, 1);
    pub const SYNTAX: Self = Self(5, 5, 2);
    pub const BAD_ARGUMENTS: Self = Self(5, 5, 4);
    pub const NON_ASCII: Self = Self(5, 6, 7);
    pub const TLS_REQUIRED: Self = Self(5, 7, 0);
}

impl fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Default texts, keyed by full code or by `subject.detail`.
const STATUS_TEXT: &[(&str, &str)] = &[
    ("2.0.0", "OK"),
    ("2.1.0", "OK"),
    ("2.1.5", "Destination address valid"),
    ("2.6.0", "Message accepted"),
    ("4.3.0", "Requested action aborted: local error in processing"),
    ("4.4.2", "Connection timed out"),
    ("4.7.0", "Temporary security failure"),
    ("5.7.0", "Security policy violation"),
    ("5.3.0", "Transaction failed: internal server error"),
    ("5.3.4", "Message too big for system"),
    ("5.5.1", "Bad sequence of commands"),
    ("5.5.2", "Syntax error"),
    ("5.5.4", "Invalid command arguments"),
    ("5.1.3", "Bad destination mailbox address syntax"),
    ("5.1.7", "Bad sender's mailbox address syntax"),
    ("5.6.7", "Non-ASCII addresses not permitted for that sender"),
    ("1.3", "Bad destination mailbox address syntax"),
    ("1.7", "Bad sender's mailbox address syntax"),
    ("3.4", "Message too big for system"),
    ("5.1", "Bad sequence of commands"),
    ("5.2", "Syntax error"),
    ("5.4", "Invalid command arguments"),
];

/// Looks up the default text for an enhanced code: exact match first,
/// then the same code with the class digit dropped.
#[must_use]
pub fn default_text(code: EnhancedCode) -> Option<&'static str> {
    let full = code.to_string();
    let partial = format!("{}.{}", code.1, code.2);
    STATUS_TEXT
        .iter()
        .find(|(k, _)| *k == full)
        .or_else(|| STATUS_TEXT.iter().find(|(k, _)| *k == partial))
        .map(|(_, text)| *text)
}

/// Error returned when neither text nor a table entry exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no message text for enhanced status {0}")]
pub struct MissingText(pub EnhancedCode);

/// A single-line SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    enhanced: EnhancedCode,
    message: String,
}

impl Response {
    pub fn new(code: u16, enhanced: EnhancedCode, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced,
            message: message.into(),
        }
    }

    /// Builds a response whose text comes from the status table.
    ///
    /// # Errors
    ///
    /// Returns [`MissingText`] when the table has no entry for `enhanced`.
    pub fn from_code(code: u16, enhanced: EnhancedCode) -> Result<Self, MissingText> {
        default_text(enhanced)
            .map(|text| Self::new(code, enhanced, text))
            .ok_or(MissingText(enhanced))
    }

    /// Same as [`from_code`](Self::from_code) for codes known to be in the table.
    pub(crate) fn standard(code: u16, enhanced: EnhancedCode) -> Self {
        let text = default_text(enhanced);
        debug_assert!(text.is_some(), "no status text for {enhanced}");
        Self::new(code, enhanced, text.unwrap_or_default())
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn enhanced(&self) -> EnhancedCode {
        self.enhanced
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Renders the wire line, CRLF included.
    #[must_use]
    pub fn render(&self, enhanced_enabled: bool) -> String {
        if enhanced_enabled {
            format!("{} {} {}\r\n", self.code, self.enhanced, self.message)
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }

    pub fn ok() -> Self {
        Self::standard(250, EnhancedCode::OK)
    }

    pub fn bad_sequence() -> Self {
        Self::standard(503, EnhancedCode::BAD_SEQUENCE)
    }

    pub fn bad_arguments() -> Self {
        Self::new(501, EnhancedCode::BAD_ARGUMENTS, "Syntax error in parameters or arguments")
    }

    pub fn local_error() -> Self {
        Self::standard(451, EnhancedCode::LOCAL_ERROR)
    }
}

/// What a handler sends back: one line, or a multi-line EHLO-style reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Single(Response),
    Multi { code: u16, lines: Vec<String> },
}

impl Reply {
    pub fn code(&self) -> u16 {
        match self {
            Self::Single(r) => r.code(),
            Self::Multi { code, .. } => *code,
        }
    }

    /// Renders the reply. Multi-line replies use `NNN-` for every line but
    /// the last, which uses `NNN `.
    #[must_use]
    pub fn render(&self, enhanced_enabled: bool) -> String {
        match self {
            Self::Single(r) => r.render(enhanced_enabled),
            Self::Multi { code, lines } => {
                let mut out = String::new();
                let last = lines.len().saturating_sub(1);
                for (i, line) in lines.iter().enumerate() {
                    let sep = if i == last { ' ' } else { '-' };
                    out.push_str(&format!("{code}{sep}{line}\r\n"));
                }
                out
            }
        }
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Self::Single(r)
    }
}
