// ==============================================================================
// Documentation Comment Accumulation
// ==============================================================================
//
// `///` comments attach to the declaration that follows them. The lexer hands
// every doc line it meets to a `DocComments` accumulator, together with the
// line bookkeeping it needs to enforce the two placement rules:
//
//   1. A doc comment must sit on a line of its own, never after code.
//   2. Doc lines must be directly followed by the declaration they document;
//      a blank line in between orphans them.
//
// Plain `//` and `/* */` comments between a doc block and its declaration are
// allowed and do not count as blank lines.

/// Doc lines collected since the previous token.
#[derive(Debug, Default)]
pub struct DocComments {
    lines: Vec<String>,
    /// Line on which the most recent comment (doc or plain) ended.
    last_comment_line: usize,
}

/// Why a doc comment was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misplaced {
    SharesLineWithCode,
    NotAdjacent,
}

impl Misplaced {
    pub fn message(self) -> &'static str {
        match self {
            Misplaced::SharesLineWithCode => {
                "a documentation comment should be on a line on its own"
            }
            Misplaced::NotAdjacent => "a documentation comment must directly precede a declaration",
        }
    }
}

impl DocComments {
    /// Record one `///` line. `code_on_line` is true when a token was already
    /// produced earlier on the same source line.
    pub fn push(
        &mut self,
        text: &str,
        line: usize,
        code_on_line: bool,
    ) -> Result<(), Misplaced> {
        if code_on_line {
            return Err(Misplaced::SharesLineWithCode);
        }
        if !self.lines.is_empty() && line > self.last_comment_line + 1 {
            return Err(Misplaced::NotAdjacent);
        }
        self.lines.push(text.trim_end_matches('\r').to_string());
        self.last_comment_line = line;
        Ok(())
    }

    /// Record a plain comment spanning `start_line..=end_line`. A comment
    /// directly below the doc block keeps the block attached.
    pub fn note_comment(&mut self, start_line: usize, end_line: usize) {
        if !self.lines.is_empty() && start_line <= self.last_comment_line + 1 {
            self.last_comment_line = end_line;
        }
    }

    /// Check that pending doc lines end right above a token starting on `line`.
    pub fn check_adjacent(&self, line: usize) -> Result<(), Misplaced> {
        if !self.lines.is_empty() && line > self.last_comment_line + 1 {
            return Err(Misplaced::NotAdjacent);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
