//! Lexical analysis: a character [Stream] with one-character push-back, a
//! [Lexer] producing [Token]s on demand, and a [CommentStripper] that hides
//! comment tokens from the parser.

use crate::{
    consts::RESERVED_WORDS,
    error::{CompileError, CompileErrorReport},
};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// The different kinds of token the lexer can produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Identifier,
    Number,
    Symbol,
    Comment,
    String,
    Eof,
    ReservedWord,
}

/// One lexical token. `text` preserves the original spelling (for strings,
/// with quotes removed and doubled apostrophes collapsed); `line` is the
/// 1-based line the token started on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, text: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
        }
    }

    /// Is this token exactly the given symbol? Symbol comparison is exact.
    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    /// Is this token the given reserved word? Case-insensitive.
    pub fn is_reserved(&self, word: &str) -> bool {
        self.kind == TokenKind::ReservedWord && self.text.eq_ignore_ascii_case(word)
    }

    /// Is this token an identifier with the given name? Case-insensitive.
    pub fn is_identifier(&self, name: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text.eq_ignore_ascii_case(name)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of file"),
            _ => write!(f, "{}", self.text),
        }
    }
}

/// Character cursor over the source text with one-character push-back and
/// line tracking.
struct Stream {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    pushback: Option<char>,
}

impl Stream {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            pushback: None,
        }
    }

    /// Next character, or `None` at end of input. Newlines bump the line
    /// counter as they are consumed.
    fn next(&mut self) -> Option<char> {
        let ch = match self.pushback.take() {
            Some(ch) => Some(ch),
            None => {
                let ch = self.chars.get(self.pos).copied();
                if ch.is_some() {
                    self.pos += 1;
                }
                ch
            }
        };
        if ch == Some('\n') {
            self.line += 1;
        }
        ch
    }

    /// Push one character back onto the stream. At most one character can be
    /// held; pushing a newline back un-counts its line.
    fn push_back(&mut self, ch: char) {
        assert!(self.pushback.is_none(), "double push-back");
        if ch == '\n' {
            self.line -= 1;
        }
        self.pushback = Some(ch);
    }
}

/// The lexer. Call [Lexer::next] to consume a token or [Lexer::peek] to look
/// at the upcoming one without consuming it. Comments are produced as regular
/// tokens; wrap the lexer in a [CommentStripper] to drop them.
pub(crate) struct Lexer {
    stream: Stream,
    peeked: Option<Token>,
    /// A token scanned as a by-product of the previous one (the `..` that
    /// terminates a number). Handed out before the stream is consulted again.
    pending: Option<Token>,
}

impl Lexer {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            stream: Stream::new(source),
            peeked: None,
            pending: None,
        }
    }

    /// Consume and return the next token. Once the end of input is reached,
    /// every subsequent call returns an EOF token.
    pub(crate) fn next(&mut self) -> Result<Token, CompileErrorReport> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.scan(),
        }
    }

    /// Return the upcoming token without consuming it.
    pub(crate) fn peek(&mut self) -> Result<&Token, CompileErrorReport> {
        if self.peeked.is_none() {
            self.peeked = Some(self.scan()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn scan(&mut self) -> Result<Token, CompileErrorReport> {
        if let Some(token) = self.pending.take() {
            return Ok(token);
        }

        // Whitespace separates tokens
        let ch = loop {
            match self.stream.next() {
                Some(ch) if ch.is_whitespace() => continue,
                Some(ch) => break ch,
                None => {
                    return Ok(Token::new(TokenKind::Eof, "", self.stream.line))
                }
            }
        };
        let line = self.stream.line;

        if ch == '{' {
            return self.scan_brace_comment(line);
        }
        if ch == '(' {
            // Might be the `(*` comment opener
            match self.stream.next() {
                Some('*') => return self.scan_paren_comment(line),
                Some(other) => self.stream.push_back(other),
                None => {}
            }
            return Ok(Token::new(TokenKind::Symbol, "(", line));
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            return Ok(self.scan_word(ch, line));
        }
        if ch.is_ascii_digit() {
            return Ok(self.scan_number(ch, line));
        }
        if ch == '\'' {
            return self.scan_string(line);
        }
        self.scan_symbol(ch, line)
    }

    /// `{ ... }` comment. The opening brace has been consumed.
    fn scan_brace_comment(&mut self, line: u32) -> Result<Token, CompileErrorReport> {
        let mut text = String::new();
        loop {
            match self.stream.next() {
                Some('}') => {
                    return Ok(Token::new(TokenKind::Comment, text, line))
                }
                Some(ch) => text.push(ch),
                None => {
                    return Err(CompileErrorReport::at_line(
                        CompileError::UnterminatedComment,
                        line,
                    ))
                }
            }
        }
    }

    /// `(* ... *)` comment. The opener has been consumed.
    fn scan_paren_comment(&mut self, line: u32) -> Result<Token, CompileErrorReport> {
        let mut text = String::new();
        loop {
            match self.stream.next() {
                Some('*') => match self.stream.next() {
                    Some(')') => {
                        return Ok(Token::new(TokenKind::Comment, text, line))
                    }
                    Some(ch) => {
                        text.push('*');
                        self.stream.push_back(ch);
                    }
                    None => {
                        return Err(CompileErrorReport::at_line(
                            CompileError::UnterminatedComment,
                            line,
                        ))
                    }
                },
                Some(ch) => text.push(ch),
                None => {
                    return Err(CompileErrorReport::at_line(
                        CompileError::UnterminatedComment,
                        line,
                    ))
                }
            }
        }
    }

    /// Identifier or reserved word. Case is preserved in the token text;
    /// reserved-word matching is case-insensitive.
    fn scan_word(&mut self, first: char, line: u32) -> Token {
        let mut text = String::new();
        text.push(first);
        loop {
            match self.stream.next() {
                Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' => {
                    text.push(ch)
                }
                Some(ch) => {
                    self.stream.push_back(ch);
                    break;
                }
                None => break,
            }
        }
        let kind = if RESERVED_WORDS
            .iter()
            .any(|word| text.eq_ignore_ascii_case(word))
        {
            TokenKind::ReservedWord
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, text, line)
    }

    /// Number: a digit run with at most one `.`. A `.` followed by another
    /// `.` is the range symbol, which terminates the number; the `..` token
    /// is stashed and handed out next.
    fn scan_number(&mut self, first: char, line: u32) -> Token {
        let mut text = String::new();
        text.push(first);
        let mut seen_dot = false;
        loop {
            match self.stream.next() {
                Some(ch) if ch.is_ascii_digit() => text.push(ch),
                Some('.') if !seen_dot => match self.stream.next() {
                    Some('.') => {
                        self.pending =
                            Some(Token::new(TokenKind::Symbol, "..", line));
                        break;
                    }
                    other => {
                        seen_dot = true;
                        text.push('.');
                        if let Some(ch) = other {
                            self.stream.push_back(ch);
                        }
                    }
                },
                Some(ch) => {
                    self.stream.push_back(ch);
                    break;
                }
                None => break,
            }
        }
        Token::new(TokenKind::Number, text, line)
    }

    /// String literal: `'...'` with `''` as a literal apostrophe. Strings
    /// cannot span lines.
    fn scan_string(&mut self, line: u32) -> Result<Token, CompileErrorReport> {
        let mut text = String::new();
        loop {
            match self.stream.next() {
                Some('\'') => match self.stream.next() {
                    Some('\'') => text.push('\''),
                    other => {
                        if let Some(ch) = other {
                            self.stream.push_back(ch);
                        }
                        return Ok(Token::new(TokenKind::String, text, line));
                    }
                },
                Some('\n') | None => {
                    return Err(CompileErrorReport::at_line(
                        CompileError::UnterminatedString,
                        line,
                    ))
                }
                Some(ch) => text.push(ch),
            }
        }
    }

    /// Multi-character symbols, longest match first.
    fn scan_symbol(&mut self, first: char, line: u32) -> Result<Token, CompileErrorReport> {
        let followers: &[char] = match first {
            '<' => &['>', '<', '='],
            '>' => &['>', '='],
            ':' => &['='],
            '.' => &['.'],
            _ => &[],
        };
        if !followers.is_empty() {
            match self.stream.next() {
                Some(ch) if followers.contains(&ch) => {
                    let mut text = String::new();
                    text.push(first);
                    text.push(ch);
                    return Ok(Token::new(TokenKind::Symbol, text, line));
                }
                Some(ch) => self.stream.push_back(ch),
                None => {}
            }
        }
        match first {
            '<' | '>' | ':' | '.' | '-' | '+' | '*' | '/' | ';' | ',' | '['
            | ']' | ')' | '=' | '^' | '@' => Ok(Token::new(
                TokenKind::Symbol,
                first.to_string(),
                line,
            )),
            _ => Err(CompileErrorReport::new(
                CompileError::UnknownCharacter(first),
                Some(Token::new(TokenKind::Symbol, first.to_string(), line)),
            )),
        }
    }
}

/// Wraps a [Lexer] and silently drops comment tokens from both `peek` and
/// `next`.
pub(crate) struct CommentStripper {
    lexer: Lexer,
}

impl CommentStripper {
    pub(crate) fn new(lexer: Lexer) -> Self {
        Self { lexer }
    }

    pub(crate) fn next(&mut self) -> Result<Token, CompileErrorReport> {
        loop {
            let token = self.lexer.next()?;
            if token.kind != TokenKind::Comment {
                return Ok(token);
            }
        }
    }

    pub(crate) fn peek(&mut self) -> Result<&Token, CompileErrorReport> {
        while self.lexer.peek()?.kind == TokenKind::Comment {
            self.lexer.next()?;
        }
        self.lexer.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut stripper = CommentStripper::new(Lexer::new(source));
        let mut tokens = Vec::new();
        loop {
            let token = stripper.next().unwrap();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn kinds_and_texts(source: &str) -> Vec<(TokenKind, String)> {
        lex_all(source)
            .into_iter()
            .map(|token| (token.kind, token.text))
            .collect()
    }

    #[test]
    fn test_words_and_symbols() {
        assert_eq!(
            kinds_and_texts("BEGIN x := x + 1; end"),
            vec![
                (TokenKind::ReservedWord, "BEGIN".into()),
                (TokenKind::Identifier, "x".into()),
                (TokenKind::Symbol, ":=".into()),
                (TokenKind::Identifier, "x".into()),
                (TokenKind::Symbol, "+".into()),
                (TokenKind::Number, "1".into()),
                (TokenKind::Symbol, ";".into()),
                (TokenKind::ReservedWord, "end".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
    }

    #[test]
    fn test_range_disambiguation() {
        // The first `.` of `..` terminates the number
        assert_eq!(
            kinds_and_texts("1..30"),
            vec![
                (TokenKind::Number, "1".into()),
                (TokenKind::Symbol, "..".into()),
                (TokenKind::Number, "30".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
        assert_eq!(
            kinds_and_texts("1.5"),
            vec![
                (TokenKind::Number, "1.5".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds_and_texts("'it''s'"),
            vec![
                (TokenKind::String, "it's".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
        assert_eq!(
            kinds_and_texts("''"),
            vec![
                (TokenKind::String, "".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(
            kinds_and_texts("a { one } (* two *) b"),
            vec![
                (TokenKind::Identifier, "a".into()),
                (TokenKind::Identifier, "b".into()),
                (TokenKind::Eof, "".into()),
            ],
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = lex_all("a\nbc\n\nd");
        let lines: Vec<(String, u32)> = tokens
            .into_iter()
            .map(|token| (token.text, token.line))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("a".into(), 1),
                ("bc".into(), 2),
                ("d".into(), 4),
                ("".into(), 4),
            ],
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("'oops");
        assert!(lexer.next().is_err());
    }

    #[test]
    fn test_unterminated_comment() {
        let mut lexer = Lexer::new("{ oops");
        assert!(lexer.next().is_err());
    }

    #[test]
    fn test_unknown_character() {
        let mut lexer = Lexer::new("$");
        assert!(lexer.next().is_err());
    }

    #[test]
    fn test_sticky_eof() {
        let mut lexer = Lexer::new("x");
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Identifier);
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Eof);
        assert_eq!(lexer.next().unwrap().kind, TokenKind::Eof);
    }
}
