use anyhow::{bail, Context, Result};

use crate::source::SourceFile;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    Constant,
    InstanceVar,
    Global,
    IntegerLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),
    BooleanLiteral(bool),
    Keyword(Keyword),
    Newline,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Equal,
    DoubleEqual,
    Bang,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    PlusEqual,
    Minus,
    MinusEqual,
    Star,
    StarEqual,
    Slash,
    Percent,
    Pipe,
    PipePipe,
    AmpersandAmpersand,
    Question,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    Class,
    Lib,
    Fun,
    End,
    If,
    Elsif,
    Else,
    Unless,
    While,
    Return,
    Break,
    Yield,
    Do,
    SelfRef,
    Nil,
    Require,
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a SourceFile) -> Result<Self> {
        Ok(Self {
            input: &source.contents,
            position: 0,
            line: 1,
            column: 1,
        })
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' => {
                    self.advance_char();
                }
                '\r' | '\n' => {
                    self.advance_char();
                    tokens.push(self.make_newline_token());
                }
                '#' => {
                    self.skip_comment();
                }
                '"' => {
                    let token = self.lex_string()?;
                    tokens.push(token);
                }
                '\'' => {
                    let token = self.lex_char()?;
                    tokens.push(token);
                }
                '0'..='9' => {
                    let token = self.lex_number()?;
                    tokens.push(token);
                }
                'a'..='z' | 'A'..='Z' | '_' => {
                    let member_position = tokens.last().is_some_and(|token| {
                        matches!(
                            token.kind,
                            TokenKind::Dot | TokenKind::Keyword(Keyword::Def)
                        )
                    });
                    let token = self.lex_identifier_or_keyword(member_position);
                    tokens.push(token);
                }
                '@' => {
                    let token = self.lex_sigil_name(TokenKind::InstanceVar)?;
                    tokens.push(token);
                }
                '$' => {
                    let token = self.lex_sigil_name(TokenKind::Global)?;
                    tokens.push(token);
                }
                '(' => tokens.push(self.simple_token(TokenKind::LParen)),
                ')' => tokens.push(self.simple_token(TokenKind::RParen)),
                '{' => tokens.push(self.simple_token(TokenKind::LBrace)),
                '}' => tokens.push(self.simple_token(TokenKind::RBrace)),
                ',' => tokens.push(self.simple_token(TokenKind::Comma)),
                ';' => tokens.push(self.simple_token(TokenKind::Semicolon)),
                ':' => tokens.push(self.simple_token(TokenKind::Colon)),
                '.' => tokens.push(self.simple_token(TokenKind::Dot)),
                '/' => tokens.push(self.simple_token(TokenKind::Slash)),
                '%' => tokens.push(self.simple_token(TokenKind::Percent)),
                '?' => tokens.push(self.simple_token(TokenKind::Question)),
                '=' => {
                    let token = self.lex_with_equal(TokenKind::Equal, TokenKind::DoubleEqual);
                    tokens.push(token);
                }
                '!' => {
                    let token = self.lex_with_equal(TokenKind::Bang, TokenKind::BangEqual);
                    tokens.push(token);
                }
                '>' => {
                    let token = self.lex_with_equal(TokenKind::Greater, TokenKind::GreaterEqual);
                    tokens.push(token);
                }
                '<' => {
                    let token = self.lex_with_equal(TokenKind::Less, TokenKind::LessEqual);
                    tokens.push(token);
                }
                '+' => {
                    let token = self.lex_with_equal(TokenKind::Plus, TokenKind::PlusEqual);
                    tokens.push(token);
                }
                '-' => {
                    let token = self.lex_with_equal(TokenKind::Minus, TokenKind::MinusEqual);
                    tokens.push(token);
                }
                '*' => {
                    let token = self.lex_with_equal(TokenKind::Star, TokenKind::StarEqual);
                    tokens.push(token);
                }
                '|' => {
                    let token = self.lex_doubled(TokenKind::Pipe, '|', TokenKind::PipePipe);
                    tokens.push(token);
                }
                '&' if self.peek_next_char() == Some('&') => {
                    let token = self.simple_token(TokenKind::AmpersandAmpersand);
                    self.advance_char();
                    tokens.push(Token {
                        lexeme: "&&".to_string(),
                        ..token
                    });
                }
                other => {
                    bail!(
                        "Unexpected character '{}' at line {}, column {}",
                        other,
                        self.line,
                        self.column
                    );
                }
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
        ));

        Ok(tokens)
    }

    fn make_newline_token(&self) -> Token {
        Token::new(
            TokenKind::Newline,
            "\n".to_string(),
            self.line.saturating_sub(1),
            1,
        )
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn lex_escape(&mut self, context: &str) -> Result<char> {
        self.advance_char(); // consume backslash
        let escaped = self
            .peek_char()
            .with_context(|| format!("Unterminated escape sequence in {context}"))?;
        self.advance_char();
        Ok(match escaped {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            other => other,
        })
    }

    fn lex_string(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // consume opening quote

        let mut value = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                '"' => {
                    self.advance_char();
                    let lexeme = self.slice(start, self.position);
                    return Ok(Token::new(
                        TokenKind::StringLiteral(value),
                        lexeme.to_string(),
                        start_line,
                        start_column,
                    ));
                }
                '\\' => {
                    value.push(self.lex_escape("string literal")?);
                }
                '\n' => break,
                _ => {
                    value.push(ch);
                    self.advance_char();
                }
            }
        }

        bail!(
            "Unterminated string literal starting at line {}, column {}",
            start_line,
            start_column
        );
    }

    fn lex_char(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // consume opening quote

        let value = match self.peek_char() {
            Some('\\') => self.lex_escape("char literal")?,
            Some(ch) if ch != '\'' && ch != '\n' => {
                self.advance_char();
                ch
            }
            _ => bail!(
                "Empty char literal at line {}, column {}",
                start_line,
                start_column
            ),
        };

        if self.peek_char() != Some('\'') {
            bail!(
                "Unterminated char literal starting at line {}, column {}",
                start_line,
                start_column
            );
        }
        self.advance_char();

        Ok(Token::new(
            TokenKind::CharLiteral(value),
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        ))
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        let mut is_float = false;

        self.advance_char(); // consume first digit

        while let Some(ch) = self.peek_char() {
            match ch {
                '0'..='9' | '_' => {
                    self.advance_char();
                }
                // `3.foo` is a call on an integer, `1.5` is a float
                '.' if !is_float && self.peek_next_char().is_some_and(|c| c.is_ascii_digit()) => {
                    is_float = true;
                    self.advance_char();
                }
                _ => break,
            }
        }

        let lexeme = self.slice(start, self.position).replace('_', "");
        let kind = if is_float {
            let value = lexeme.parse::<f64>().with_context(|| {
                format!(
                    "Failed to parse float literal '{}' at line {}, column {}",
                    lexeme, start_line, start_column
                )
            })?;
            TokenKind::FloatLiteral(value)
        } else {
            let value = lexeme.parse::<i64>().with_context(|| {
                format!(
                    "Failed to parse integer literal '{}' at line {}, column {}",
                    lexeme, start_line, start_column
                )
            })?;
            TokenKind::IntegerLiteral(value)
        };

        Ok(Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        ))
    }

    /// After `.` or `def` every word is a method name, so keywords lose their
    /// meaning there and a trailing `?` or `!` belongs to the name.
    fn lex_identifier_or_keyword(&mut self, member_position: bool) -> Token {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.consume_word();

        if member_position
            && matches!(self.peek_char(), Some('?') | Some('!'))
            && self.peek_next_char() != Some('=')
        {
            self.advance_char();
        }

        let lexeme = self.slice(start, self.position).to_string();
        let kind = if member_position {
            TokenKind::Identifier
        } else if let Some(keyword) = keyword_from_lexeme(&lexeme) {
            TokenKind::Keyword(keyword)
        } else if lexeme == "true" {
            TokenKind::BooleanLiteral(true)
        } else if lexeme == "false" {
            TokenKind::BooleanLiteral(false)
        } else if lexeme.starts_with(|c: char| c.is_ascii_uppercase()) {
            TokenKind::Constant
        } else {
            TokenKind::Identifier
        };

        Token::new(kind, lexeme, start_line, start_column)
    }

    fn lex_sigil_name(&mut self, kind: TokenKind) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // consume sigil

        if !self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            bail!(
                "Expected a name after '{}' at line {}, column {}",
                self.slice(start, self.position),
                start_line,
                start_column
            );
        }
        self.consume_word();

        Ok(Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        ))
    }

    fn consume_word(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn lex_with_equal(&mut self, single: TokenKind, with_equal: TokenKind) -> Token {
        self.lex_doubled(single, '=', with_equal)
    }

    fn lex_doubled(&mut self, single: TokenKind, second: char, doubled: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();

        let kind = if self.peek_char() == Some(second) {
            self.advance_char();
            doubled
        } else {
            single
        };

        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn simple_token(&mut self, kind: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.input[self.position..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\r' || ch == '\n' {
            if ch == '\r' && self.peek_char() == Some('\n') {
                self.position += 1;
            }
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.input[start..end]
    }
}

fn keyword_from_lexeme(lexeme: &str) -> Option<Keyword> {
    match lexeme {
        "def" => Some(Keyword::Def),
        "class" => Some(Keyword::Class),
        "lib" => Some(Keyword::Lib),
        "fun" => Some(Keyword::Fun),
        "end" => Some(Keyword::End),
        "if" => Some(Keyword::If),
        "elsif" => Some(Keyword::Elsif),
        "else" => Some(Keyword::Else),
        "unless" => Some(Keyword::Unless),
        "while" => Some(Keyword::While),
        "return" => Some(Keyword::Return),
        "break" => Some(Keyword::Break),
        "yield" => Some(Keyword::Yield),
        "do" => Some(Keyword::Do),
        "self" => Some(Keyword::SelfRef),
        "nil" => Some(Keyword::Nil),
        "require" => Some(Keyword::Require),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let file = SourceFile::named(SourceId(0), "lexer.gt", source);
        let mut lexer = Lexer::new(&file).expect("lexer");
        lexer
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn integer_followed_by_call_is_not_a_float() {
        assert_eq!(
            kinds("3.foo 1.5"),
            vec![
                TokenKind::IntegerLiteral(3),
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::FloatLiteral(1.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_after_dot_and_def_are_method_names() {
        let file = SourceFile::named(SourceId(0), "lexer.gt", "def do; x.do; x.nil?");
        let tokens = Lexer::new(&file).unwrap().tokenize().unwrap();
        let lexemes: Vec<_> = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Identifier)
            .map(|token| token.lexeme.as_str())
            .collect();
        assert_eq!(lexemes, vec!["do", "x", "do", "x", "nil?"]);
    }

    #[test]
    fn ternary_question_mark_stays_separate() {
        assert_eq!(
            kinds("true ? 1 : 2"),
            vec![
                TokenKind::BooleanLiteral(true),
                TokenKind::Question,
                TokenKind::IntegerLiteral(1),
                TokenKind::Colon,
                TokenKind::IntegerLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn sigils_compound_assignment_and_chars() {
        assert_eq!(
            kinds("@x += $y; FOO -= 'a'"),
            vec![
                TokenKind::InstanceVar,
                TokenKind::PlusEqual,
                TokenKind::Global,
                TokenKind::Semicolon,
                TokenKind::Constant,
                TokenKind::MinusEqual,
                TokenKind::CharLiteral('a'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn block_pipes_and_logical_operators() {
        assert_eq!(
            kinds("{ |a| a || b && c }"),
            vec![
                TokenKind::LBrace,
                TokenKind::Pipe,
                TokenKind::Identifier,
                TokenKind::Pipe,
                TokenKind::Identifier,
                TokenKind::PipePipe,
                TokenKind::Identifier,
                TokenKind::AmpersandAmpersand,
                TokenKind::Identifier,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let file = SourceFile::named(SourceId(0), "lexer.gt", "\"abc");
        let error = Lexer::new(&file).unwrap().tokenize().unwrap_err();
        assert!(error.to_string().contains("Unterminated string literal"));
    }
}
