// ==============================================================================
// Tokenizer
// ==============================================================================
//
// A hand-written, single-token-lookahead lexer shared by the declaration parser
// and the value encoder. The lexer owns its source text so that a parser
// session can swap one lexer out for another while it processes an `include`,
// and so that every error it raises can carry the full source for `miette`.
//
// The current token is exposed through `token()`; its spelling (identifier
// name, decoded string contents, numeric text) through `text()`. Documentation
// comments met while skipping trivia are attached to the token that follows.

use miette::{NamedSource, SourceSpan};

use crate::doc_comments::DocComments;
use crate::error::{IdlError, ParseDiagnostic, Result, Warning};

/// The kind of the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Eof,
    StringConstant,
    IntegerConstant,
    FloatConstant,
    Identifier,
    Table,
    Struct,
    Enum,
    Union,
    Namespace,
    RootType,
    FileIdentifier,
    FileExtension,
    Include,
    Attribute,
    Null,
    Service,
    /// Any single punctuation character.
    Char(char),
}

impl Token {
    /// Classify an identifier-shaped word against the keyword set.
    fn keyword(word: &str) -> Option<Token> {
        Some(match word {
            "table" => Token::Table,
            "struct" => Token::Struct,
            "enum" => Token::Enum,
            "union" => Token::Union,
            "namespace" => Token::Namespace,
            "root_type" => Token::RootType,
            "file_identifier" => Token::FileIdentifier,
            "file_extension" => Token::FileExtension,
            "include" => Token::Include,
            "attribute" => Token::Attribute,
            "null" => Token::Null,
            "rpc_service" => Token::Service,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Eof => write!(f, "end of file"),
            Token::StringConstant => write!(f, "string constant"),
            Token::IntegerConstant => write!(f, "integer constant"),
            Token::FloatConstant => write!(f, "float constant"),
            Token::Identifier => write!(f, "identifier"),
            Token::Table => write!(f, "table"),
            Token::Struct => write!(f, "struct"),
            Token::Enum => write!(f, "enum"),
            Token::Union => write!(f, "union"),
            Token::Namespace => write!(f, "namespace"),
            Token::RootType => write!(f, "root_type"),
            Token::FileIdentifier => write!(f, "file_identifier"),
            Token::FileExtension => write!(f, "file_extension"),
            Token::Include => write!(f, "include"),
            Token::Attribute => write!(f, "attribute"),
            Token::Null => write!(f, "null"),
            Token::Service => write!(f, "rpc_service"),
            Token::Char(c) => write!(f, "{c}"),
        }
    }
}

/// A remembered source position, used for errors reported after the parser
/// has moved past the offending token (dangling references, for example).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub span: SourceSpan,
}

pub struct Lexer {
    name: String,
    source: String,
    cursor: usize,
    line: usize,
    token: Token,
    text: String,
    token_start: usize,
    token_line: usize,
    /// Line of the most recently produced token, 0 before the first one.
    last_token_line: usize,
    docs: DocComments,
}

impl Lexer {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let cursor = if source.starts_with('\u{feff}') {
            '\u{feff}'.len_utf8()
        } else {
            0
        };
        Lexer {
            name: name.into(),
            source,
            cursor,
            line: 1,
            token: Token::Eof,
            text: String::new(),
            token_start: cursor,
            token_line: 1,
            last_token_line: 0,
            docs: DocComments::default(),
        }
    }

    // ==========================================================================
    // Accessors
    // ==========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Spelling of the current token: identifier name, decoded string
    /// contents, or numeric text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line(&self) -> usize {
        self.token_line
    }

    pub fn span(&self) -> SourceSpan {
        (self.token_start, self.cursor - self.token_start).into()
    }

    pub fn location(&self) -> Location {
        Location {
            file: self.name.clone(),
            line: self.token_line,
            span: self.span(),
        }
    }

    /// Documentation lines that immediately precede the current token.
    pub fn doc_comment(&self) -> Vec<String> {
        self.docs.lines().to_vec()
    }

    pub fn has_doc_comment(&self) -> bool {
        !self.docs.is_empty()
    }

    pub fn is(&self, token: Token) -> bool {
        self.token == token
    }

    pub fn is_char(&self, c: char) -> bool {
        self.token == Token::Char(c)
    }

    /// Describe the current token for "expecting ... instead got ..." errors.
    pub fn describe(&self) -> String {
        match self.token {
            Token::Identifier | Token::IntegerConstant | Token::FloatConstant => {
                format!("{} `{}`", self.token, self.text)
            }
            Token::StringConstant => format!("{} {:?}", self.token, self.text),
            other => other.to_string(),
        }
    }

    // ==========================================================================
    // Token-level helpers used by the parsers
    // ==========================================================================

    /// Consume the current token if it is `token`.
    pub fn is_next(&mut self, token: Token) -> Result<bool> {
        if self.token == token {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn expect(&mut self, token: Token) -> Result<()> {
        if self.token != token {
            return Err(self.error(format!(
                "expecting: {token} instead got: {}",
                self.describe()
            )));
        }
        self.next()
    }

    pub fn expect_char(&mut self, c: char) -> Result<()> {
        self.expect(Token::Char(c))
    }

    /// Consume an identifier and return its name.
    pub fn expect_identifier(&mut self) -> Result<String> {
        if self.token != Token::Identifier {
            return Err(self.error(format!(
                "expecting: identifier instead got: {}",
                self.describe()
            )));
        }
        let name = std::mem::take(&mut self.text);
        self.next()?;
        Ok(name)
    }

    /// Consume a string constant and return its decoded contents.
    pub fn expect_string(&mut self) -> Result<String> {
        if self.token != Token::StringConstant {
            return Err(self.error(format!(
                "expecting: string constant instead got: {}",
                self.describe()
            )));
        }
        let value = std::mem::take(&mut self.text);
        self.next()?;
        Ok(value)
    }

    // ==========================================================================
    // Diagnostics
    // ==========================================================================

    /// Build an error pointing at the current token.
    pub fn error(&self, message: impl Into<String>) -> IdlError {
        self.error_span(self.token_start, self.cursor, self.token_line, message)
    }

    /// Build an error pointing at a remembered location. Locations from a
    /// different file (an include) cannot be highlighted here, so their
    /// position is folded into the message instead.
    pub fn error_at(&self, location: &Location, message: impl Into<String>) -> IdlError {
        let message = message.into();
        if location.file == self.name {
            let start = location.span.offset();
            self.error_span(start, start + location.span.len(), location.line, message)
        } else {
            self.error(format!("{}:{}: {message}", location.file, location.line))
        }
    }

    pub fn warning(&self, message: impl Into<String>) -> Warning {
        Warning {
            src: NamedSource::new(&self.name, self.source.clone()),
            span: self.span(),
            message: message.into(),
        }
    }

    fn error_span(
        &self,
        start: usize,
        end: usize,
        line: usize,
        message: impl Into<String>,
    ) -> IdlError {
        let end = end.max(start).min(self.source.len());
        let start = start.min(end);
        IdlError::from(ParseDiagnostic {
            src: NamedSource::new(&self.name, self.source.clone()),
            span: (start, end - start).into(),
            line,
            message: message.into(),
        })
    }

    // ==========================================================================
    // Scanner
    // ==========================================================================

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.cursor).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.as_bytes().get(self.cursor + ahead).copied()
    }

    /// Advance to the next token.
    pub fn next(&mut self) -> Result<()> {
        self.docs.clear();
        self.text.clear();
        loop {
            let start = self.cursor;
            self.token_start = start;
            self.token_line = self.line;
            let Some(c) = self.peek() else {
                self.token = Token::Eof;
                return self.finish_token();
            };
            self.cursor += 1;
            match c {
                b'\n' => self.line += 1,
                b' ' | b'\r' | b'\t' => {}
                b'/' if self.peek() == Some(b'/') => self.line_comment(start)?,
                b'/' if self.peek() == Some(b'*') => self.block_comment(start)?,
                b'"' | b'\'' => {
                    self.string_constant(c)?;
                    self.token = Token::StringConstant;
                    return self.finish_token();
                }
                b'.' if self.peek().is_some_and(|d| d.is_ascii_digit()) => {
                    return Err(self.error_span(
                        start,
                        self.cursor,
                        self.line,
                        "floating point constant can't start with \".\"",
                    ));
                }
                c if c.is_ascii_digit()
                    || ((c == b'-' || c == b'+')
                        && self.peek().is_some_and(|d| d.is_ascii_digit())) =>
                {
                    self.number(start)?;
                    return self.finish_token();
                }
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    self.word(start);
                    return self.finish_token();
                }
                c if (b' '..=b'~').contains(&c) => {
                    self.token = Token::Char(c as char);
                    return self.finish_token();
                }
                _ => {
                    let ch = self.source[start..].chars().next().unwrap_or('\u{fffd}');
                    self.cursor = start + ch.len_utf8();
                    return Err(self.error_span(
                        start,
                        self.cursor,
                        self.line,
                        format!("illegal character: {}", ch.escape_debug()),
                    ));
                }
            }
        }
    }

    fn finish_token(&mut self) -> Result<()> {
        if let Err(misplaced) = self.docs.check_adjacent(self.token_line) {
            return Err(self.error(misplaced.message()));
        }
        self.last_token_line = self.line;
        Ok(())
    }

    fn line_comment(&mut self, start: usize) -> Result<()> {
        let end = self.source[self.cursor..]
            .find('\n')
            .map_or(self.source.len(), |i| self.cursor + i);
        let body = &self.source[start..end];
        self.cursor = end;
        if let Some(doc) = body.strip_prefix("///")
            && !doc.starts_with('/')
        {
            let code_on_line = self.last_token_line == self.line;
            if let Err(misplaced) = self.docs.push(doc, self.line, code_on_line) {
                return Err(self.error_span(start, end, self.line, misplaced.message()));
            }
        } else {
            self.docs.note_comment(self.line, self.line);
        }
        Ok(())
    }

    fn block_comment(&mut self, start: usize) -> Result<()> {
        let start_line = self.line;
        let Some(len) = self.source[self.cursor + 1..].find("*/") else {
            self.cursor = self.source.len();
            return Err(self.error_span(
                start,
                start + 2,
                start_line,
                "unterminated block comment",
            ));
        };
        let end = self.cursor + 1 + len + 2;
        self.line += self.source[start..end].matches('\n').count();
        self.cursor = end;
        self.docs.note_comment(start_line, self.line);
        Ok(())
    }

    fn word(&mut self, start: usize) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.cursor += 1;
        }
        let word = &self.source[start..self.cursor];
        // Booleans fold into integers so later stages only see numbers.
        let (token, text) = match word {
            "true" => (Token::IntegerConstant, "1"),
            "false" => (Token::IntegerConstant, "0"),
            _ => (Token::keyword(word).unwrap_or(Token::Identifier), word),
        };
        self.token = token;
        self.text = text.to_string();
    }

    fn number(&mut self, start: usize) -> Result<()> {
        self.cursor = start;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.cursor += 1;
        }
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.cursor += 2;
            let digits_start = self.cursor;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.cursor += 1;
            }
            if self.cursor == digits_start {
                return Err(self.error_span(
                    start,
                    self.cursor,
                    self.line,
                    "hexadecimal constant needs at least one digit",
                ));
            }
            self.token = Token::IntegerConstant;
            self.text = self.source[start..self.cursor].to_string();
            return Ok(());
        }

        self.skip_digits();
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.cursor += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.cursor += 1;
            if matches!(self.peek(), Some(b'-' | b'+')) {
                self.cursor += 1;
            }
            let exponent_start = self.cursor;
            self.skip_digits();
            if self.cursor == exponent_start {
                return Err(self.error_span(
                    start,
                    self.cursor,
                    self.line,
                    "floating point exponent needs at least one digit",
                ));
            }
        }
        self.token = if is_float {
            Token::FloatConstant
        } else {
            Token::IntegerConstant
        };
        self.text = self.source[start..self.cursor].to_string();
        Ok(())
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.cursor += 1;
        }
    }

    /// Read `count` hex digits following an escape.
    fn hex_escape(&mut self, count: usize) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let Some(digit) = self.peek().and_then(|c| (c as char).to_digit(16)) else {
                return Err(self.error_span(
                    self.cursor.saturating_sub(2),
                    self.cursor,
                    self.line,
                    format!("escape code must be followed by {count} hex digits"),
                ));
            };
            value = value * 16 + digit;
            self.cursor += 1;
        }
        Ok(value)
    }

    fn string_constant(&mut self, quote: u8) -> Result<()> {
        let start = self.cursor - 1;
        let mut bytes = Vec::new();
        let mut high_surrogate: Option<u32> = None;
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error_span(
                    start,
                    self.cursor,
                    self.line,
                    "unterminated string constant",
                ));
            };
            if c == quote {
                self.cursor += 1;
                break;
            }
            if c < b' ' {
                return Err(self.error_span(
                    self.cursor,
                    self.cursor + 1,
                    self.line,
                    "illegal character in string constant",
                ));
            }
            self.cursor += 1;
            if c != b'\\' {
                bytes.push(c);
            } else {
                let escape_start = self.cursor - 1;
                let Some(escape) = self.peek() else {
                    continue;
                };
                self.cursor += 1;
                match escape {
                    b'n' => bytes.push(b'\n'),
                    b't' => bytes.push(b'\t'),
                    b'r' => bytes.push(b'\r'),
                    b'b' => bytes.push(0x08),
                    b'f' => bytes.push(0x0c),
                    b'"' => bytes.push(b'"'),
                    b'\'' => bytes.push(b'\''),
                    b'\\' => bytes.push(b'\\'),
                    b'/' => bytes.push(b'/'),
                    b'x' => {
                        let value = self.hex_escape(2)?;
                        bytes.push(value as u8);
                    }
                    b'u' => {
                        let unit = self.hex_escape(4)?;
                        self.unicode_escape(unit, &mut high_surrogate, &mut bytes, escape_start)?;
                        continue;
                    }
                    _ => {
                        return Err(self.error_span(
                            escape_start,
                            self.cursor,
                            self.line,
                            "unknown escape code in string constant",
                        ));
                    }
                }
            }
            if high_surrogate.is_some() {
                return Err(self.unpaired_high_surrogate(start));
            }
        }
        if high_surrogate.is_some() {
            return Err(self.unpaired_high_surrogate(start));
        }
        self.text = String::from_utf8(bytes).map_err(|_| {
            self.error_span(
                start,
                self.cursor,
                self.line,
                "string constant is not valid UTF-8",
            )
        })?;
        Ok(())
    }

    fn unicode_escape(
        &self,
        unit: u32,
        high_surrogate: &mut Option<u32>,
        bytes: &mut Vec<u8>,
        escape_start: usize,
    ) -> Result<()> {
        let code_point = match unit {
            0xD800..=0xDBFF => {
                if high_surrogate.replace(unit).is_some() {
                    return Err(self.error_span(
                        escape_start,
                        self.cursor,
                        self.line,
                        "illegal Unicode sequence (multiple high surrogates)",
                    ));
                }
                return Ok(());
            }
            0xDC00..=0xDFFF => {
                let Some(high) = high_surrogate.take() else {
                    return Err(self.error_span(
                        escape_start,
                        self.cursor,
                        self.line,
                        "illegal Unicode sequence (unpaired low surrogate)",
                    ));
                };
                0x10000 + ((high - 0xD800) << 10) + (unit - 0xDC00)
            }
            _ => {
                if high_surrogate.is_some() {
                    return Err(self.unpaired_high_surrogate(escape_start));
                }
                unit
            }
        };
        let ch = char::from_u32(code_point).ok_or_else(|| {
            self.error_span(
                escape_start,
                self.cursor,
                self.line,
                "illegal Unicode code point",
            )
        })?;
        let mut utf8 = [0; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        Ok(())
    }

    fn unpaired_high_surrogate(&self, start: usize) -> IdlError {
        self.error_span(
            start,
            self.cursor,
            self.line,
            "illegal Unicode sequence (unpaired high surrogate)",
        )
    }
}
