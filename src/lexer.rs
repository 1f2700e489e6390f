//! Tokens of the schema language.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(i64),

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Eq,
    At,
    Dot,
    /// `->`
    Arrow,

    Eof,
}

impl Token {
    fn punct(c: char) -> Option<Self> {
        Some(match c {
            '{' => Self::LBrace,
            '}' => Self::RBrace,
            '(' => Self::LParen,
            ')' => Self::RParen,
            '[' => Self::LBracket,
            ']' => Self::RBracket,
            ',' => Self::Comma,
            ':' => Self::Colon,
            '=' => Self::Eq,
            '@' => Self::At,
            '.' => Self::Dot,
            _ => return None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("line {line}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, line: usize },
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },
    #[error("line {line}: number out of range: {text}")]
    InvalidNumber { text: String, line: usize },
}

/// Byte-offset scanner over the schema source.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &src[start..self.pos]
    }

    /// Whitespace and `#` line comments.
    fn skip_trivia(&mut self) {
        loop {
            self.take_while(char::is_whitespace);
            if self.peek() != Some('#') {
                break;
            }
            self.take_while(|c| c != '\n');
        }
    }

    /// Digits after an already consumed sign or first digit at `start`.
    fn number(&mut self, start: usize) -> Result<Token, LexError> {
        self.take_while(|c| c.is_ascii_digit());
        let text = &self.src[start..self.pos];
        text.parse().map(Token::Num).map_err(|_| LexError::InvalidNumber {
            text: text.to_string(),
            line: self.line,
        })
    }

    fn string(&mut self) -> Result<Token, LexError> {
        let line = self.line;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Token::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(LexError::UnterminatedString { line })
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Ok(Token::Eof);
        };
        if let Some(tok) = Token::punct(c) {
            return Ok(tok);
        }

        match c {
            '"' => self.string(),
            '-' if self.peek() == Some('>') => {
                self.bump();
                Ok(Token::Arrow)
            }
            '-' if self.peek().is_some_and(|d| d.is_ascii_digit()) => self.number(start),
            c if c.is_ascii_digit() => self.number(start),
            c if c.is_alphabetic() || c == '_' => {
                self.take_while(|c| c.is_alphanumeric() || c == '_');
                Ok(Token::Ident(self.src[start..self.pos].to_string()))
            }
            ch => Err(LexError::UnexpectedChar {
                ch,
                line: self.line,
            }),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idents(names: &[&str]) -> Vec<Token> {
        names.iter().map(|n| Token::Ident(n.to_string())).collect()
    }

    #[test]
    fn test_table_header() {
        let tokens = Lexer::new("table Article { }").tokenize().unwrap();
        let mut expected = idents(&["table", "Article"]);
        expected.extend([Token::LBrace, Token::RBrace, Token::Eof]);
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = Lexer::new("# roles first\nrole editor # inline\n# end")
            .tokenize()
            .unwrap();
        let mut expected = idents(&["role", "editor"]);
        expected.push(Token::Eof);
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_relation_and_grant_setting() {
        let tokens = Lexer::new("byAuthor int -> Author.id @grant.editor = read")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[2], Token::Arrow);
        assert_eq!(tokens[4], Token::Dot);
        assert_eq!(tokens[6], Token::At);
        assert_eq!(tokens[10], Token::Eq);
        assert_eq!(tokens[11], Token::Ident("read".into()));
        assert_eq!(tokens.len(), 13);
    }

    #[test]
    fn test_numbers_and_escaped_strings() {
        let tokens = Lexer::new(r#"-5 20 "published \"x\"\n""#).tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Num(-5),
                Token::Num(20),
                Token::Str("published \"x\"\n".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_report_line() {
        let err = Lexer::new("role a\n\n\"open").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { line: 3 }));

        let err = Lexer::new("a\n - b").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: '-', line: 2 }));
        assert_eq!(err.to_string(), "line 2: unexpected character '-'");

        let err = Lexer::new("99999999999999999999").tokenize().unwrap_err();
        assert!(matches!(err, LexError::InvalidNumber { .. }));
    }

    #[test]
    fn test_unicode_identifiers() {
        let tokens = Lexer::new("tänzer_1 text").tokenize().unwrap();
        assert_eq!(tokens[0], Token::Ident("tänzer_1".into()));
    }
}
