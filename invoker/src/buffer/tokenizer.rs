//! Splitting a byte stream into complete tokens.

use thiserror::Error;

/// Longest line [`LineTokenizer`] accepts by default.
pub const DEFAULT_MAX_TOKEN_SIZE: usize = 64 * 1024;

/// Errors raised while tokenizing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// No complete token fits within the size limit.
    #[error("token exceeds maximum size of {max} bytes")]
    TooLong { max: usize },

    /// A token was produced without consuming any input.
    #[error("tokenizer produced a token without advancing")]
    NoProgress,

    /// Failure reported by a custom tokenizer.
    #[error("{0}")]
    Custom(String),
}

/// A complete token found at the front of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Number of input bytes the token used up, delimiters included.
    pub advance: usize,
    /// Token contents handed to the callback.
    pub bytes: Vec<u8>,
}

impl Token {
    /// Create a token that consumes `advance` input bytes.
    pub fn new(advance: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            advance,
            bytes: bytes.into(),
        }
    }
}

/// Finds the next complete token in a chunk of unread bytes.
///
/// `data` is everything currently unread. Return `Ok(None)` to wait for more
/// input. `at_eof` is set once no more input will arrive, in which case a
/// trailing partial token should be returned if there is one.
pub trait Tokenizer: Send {
    fn next_token(&mut self, data: &[u8], at_eof: bool) -> Result<Option<Token>, TokenizeError>;
}

impl<F> Tokenizer for F
where
    F: FnMut(&[u8], bool) -> Result<Option<Token>, TokenizeError> + Send,
{
    fn next_token(&mut self, data: &[u8], at_eof: bool) -> Result<Option<Token>, TokenizeError> {
        self(data, at_eof)
    }
}

/// Newline-delimited lines with the terminator (and a trailing `\r`) removed.
#[derive(Debug, Clone, Copy)]
pub struct LineTokenizer {
    max_line: usize,
}

impl Default for LineTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTokenizer {
    /// Lines up to [`DEFAULT_MAX_TOKEN_SIZE`] bytes.
    pub const fn new() -> Self {
        Self {
            max_line: DEFAULT_MAX_TOKEN_SIZE,
        }
    }

    /// Lines up to `max_line` bytes.
    pub const fn with_max_line(max_line: usize) -> Self {
        Self { max_line }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl Tokenizer for LineTokenizer {
    fn next_token(&mut self, data: &[u8], at_eof: bool) -> Result<Option<Token>, TokenizeError> {
        if let Some(end) = data.iter().position(|b| *b == b'\n') {
            return Ok(Some(Token::new(end + 1, trim_cr(&data[..end]))));
        }
        if at_eof && !data.is_empty() {
            return Ok(Some(Token::new(data.len(), trim_cr(data))));
        }
        if data.len() >= self.max_line {
            return Err(TokenizeError::TooLong { max: self.max_line });
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_tokenizer_splits_on_newline() {
        let mut lines = LineTokenizer::new();
        let token = lines.next_token(b"first\nsecond\n", false).unwrap().unwrap();
        assert_eq!(token, Token::new(6, "first"));
    }

    #[test]
    fn test_line_tokenizer_strips_carriage_return() {
        let mut lines = LineTokenizer::new();
        let token = lines.next_token(b"dos\r\n", false).unwrap().unwrap();
        assert_eq!(token.bytes, b"dos");
        assert_eq!(token.advance, 5);
    }

    #[test]
    fn test_line_tokenizer_waits_for_terminator() {
        let mut lines = LineTokenizer::new();
        assert_eq!(lines.next_token(b"partial", false).unwrap(), None);
        assert_eq!(lines.next_token(b"", true).unwrap(), None);

        let token = lines.next_token(b"partial", true).unwrap().unwrap();
        assert_eq!(token, Token::new(7, "partial"));
    }

    #[test]
    fn test_line_tokenizer_keeps_empty_lines() {
        let mut lines = LineTokenizer::new();
        let token = lines.next_token(b"\nnext", false).unwrap().unwrap();
        assert_eq!(token, Token::new(1, ""));
    }

    #[test]
    fn test_line_tokenizer_rejects_overlong_line() {
        let mut lines = LineTokenizer::with_max_line(4);
        assert_eq!(
            lines.next_token(b"abcdef", false),
            Err(TokenizeError::TooLong { max: 4 })
        );
        // A terminated line is still fine.
        assert!(lines.next_token(b"abcdef\n", false).unwrap().is_some());
    }

    #[test]
    fn test_closure_tokenizer() {
        let mut commas = |data: &[u8], _at_eof: bool| -> Result<Option<Token>, TokenizeError> {
            Ok(data
                .iter()
                .position(|b| *b == b',')
                .map(|end| Token::new(end + 1, &data[..end])))
        };
        let token = commas.next_token(b"a,b", false).unwrap().unwrap();
        assert_eq!(token, Token::new(2, "a"));
    }
}
