use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invite code handed to the uploader and relayed to the downloader.
///
/// Serializes as a bare number so the upload response reads `{"port": 4821}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u16);

impl Token {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid token: {0:?}")]
pub struct ParseTokenError(String);

impl FromStr for Token {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u16::from_str accepts a leading '+', invite codes are digits only
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseTokenError(s.to_string()));
        }
        s.parse::<u16>()
            .map(Token)
            .map_err(|_| ParseTokenError(s.to_string()))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenRangeError {
    #[error("token range must look like START-END, got {0:?}")]
    Malformed(String),

    #[error("token range must start at 1 or above")]
    ZeroStart,

    #[error("token range start {start} is above end {end}")]
    Inverted { start: u16, end: u16 },
}

/// Inclusive range tokens are allocated from, written `START-END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenRange {
    start: u16,
    end: u16,
}

impl TokenRange {
    pub fn new(start: u16, end: u16) -> Result<Self, TokenRangeError> {
        if start == 0 {
            return Err(TokenRangeError::ZeroStart);
        }
        if start > end {
            return Err(TokenRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of distinct tokens in the range.
    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn contains(&self, token: Token) -> bool {
        (self.start..=self.end).contains(&token.get())
    }

    /// Token at `offset` from the start, wrapping around the end.
    pub fn nth(&self, offset: usize) -> Token {
        let step = offset % self.capacity();
        // step < capacity <= 65535, so the sum never leaves u16
        Token(self.start + step as u16)
    }
}

impl Default for TokenRange {
    fn default() -> Self {
        // unprivileged ports, matching the codes the front-end displays
        Self {
            start: 1024,
            end: u16::MAX,
        }
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for TokenRange {
    type Err = TokenRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TokenRangeError::Malformed(s.to_string());

        let (start, end) = s.trim().split_once('-').ok_or_else(malformed)?;
        let start = start.trim().parse::<u16>().map_err(|_| malformed())?;
        let end = end.trim().parse::<u16>().map_err(|_| malformed())?;

        Self::new(start, end)
    }
}

impl TryFrom<String> for TokenRange {
    type Error = TokenRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenRange> for String {
    fn from(range: TokenRange) -> Self {
        range.to_string()
    }
}
