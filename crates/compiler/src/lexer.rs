//! Tokenizer for FasterBASIC source
//!
//! Line-based: newlines are significant statement separators, so they are
//! emitted as tokens. Keywords are case-insensitive and normalized to
//! uppercase in the token lexeme; identifiers preserve the case the user
//! wrote (for error messages) and carry their type suffix character
//! (`%`, `&`, `!`, `#`, `$`, `@`, `^`) as part of the lexeme.

use crate::diagnostics::{DiagCategory, Diagnostic, Severity, SourceLoc};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Kind tag of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Integer literal that fits 32 bits
    Int,
    /// Floating literal (has `.`/exponent, or an integer too wide for 32 bits)
    Float,
    /// String literal; the lexeme holds the decoded content
    Str,
    /// Identifier, possibly with an attached type suffix
    Ident,
    /// Reserved word, uppercase-normalized
    Keyword,
    /// Operator or punctuation
    Op,
    Newline,
    Eof,
}

/// A token with its lexeme and source position.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub loc: SourceLoc,
}

impl Token {
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.lexeme == kw
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.lexeme == op
    }
}

/// Reserved words of the language. Lookup happens on the uppercased
/// identifier text.
static KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "PRINT", "CONSOLE", "LET", "DIM", "REDIM", "AS", "IF", "THEN", "ELSE", "ELSEIF", "END",
        "FOR", "TO", "STEP", "NEXT", "EACH", "IN", "WHILE", "WEND", "DO", "LOOP", "UNTIL",
        "REPEAT", "SELECT", "CASE", "IS", "TRY", "CATCH", "FINALLY", "THROW", "FUNCTION", "SUB",
        "RETURN", "GOTO", "GOSUB", "ON", "EXIT", "CALL", "LOCAL", "SHARED", "INC", "DEC", "SWAP",
        "TYPE", "CLASS", "EXTENDS", "METHOD", "CONSTRUCTOR", "DESTRUCTOR", "OPTION", "DATA",
        "READ", "RESTORE", "INPUT", "MATCH", "DELETE", "WORKER", "AWAIT", "NEW", "CREATE", "ME",
        "NOTHING", "SUPER", "LIST", "OF", "ANY", "HASHMAP", "ARRAY", "AND", "OR", "NOT", "XOR",
        "MOD", "BYTE", "UBYTE", "SHORT", "USHORT", "INTEGER", "UINTEGER", "LONG", "ULONG",
        "SINGLE", "DOUBLE", "STRING", "BASE", "EXPLICIT", "IIF", "READY",
    ])
});

const SUFFIX_CHARS: &[char] = &['%', '&', '!', '#', '$', '@', '^'];

/// Tokenize a full translation unit. Lexing continues past errors so one
/// run reports every bad literal; the caller decides what to do with the
/// diagnostics.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    diags: Vec<Diagnostic>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            diags: Vec::new(),
        }
    }

    fn run(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while self.pos < self.chars.len() {
            let loc = SourceLoc::new(self.line, self.col);
            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\r' => self.bump(),
                '\n' => {
                    self.push(TokenKind::Newline, "\n", loc);
                    self.bump_line();
                }
                '\'' => self.skip_line_comment(),
                '"' => self.lex_string(loc),
                '_' => self.lex_continuation(loc),
                c if c.is_ascii_digit() => self.lex_number(loc),
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number(loc),
                c if c.is_ascii_alphabetic() => self.lex_word(loc),
                _ => self.lex_operator(loc),
            }
        }
        let loc = SourceLoc::new(self.line, self.col);
        self.push(TokenKind::Eof, "", loc);
        (self.tokens, self.diags)
    }

    fn bump(&mut self) {
        self.pos += 1;
        self.col += 1;
    }

    fn bump_line(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.col = 1;
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>, loc: SourceLoc) {
        self.tokens.push(Token {
            kind,
            lexeme: lexeme.into(),
            loc,
        });
    }

    fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.diags.push(Diagnostic {
            category: DiagCategory::Lex,
            severity: Severity::Error,
            loc,
            message: message.into(),
            hint: None,
        });
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.bump();
        }
    }

    /// A `_` at the end of a line suppresses the newline. Identifiers never
    /// start with `_`, so a bare underscore is always a continuation marker.
    fn lex_continuation(&mut self, loc: SourceLoc) {
        self.bump();
        while matches!(self.peek(0), Some(' ') | Some('\t') | Some('\r')) {
            self.bump();
        }
        if self.peek(0) == Some('\n') {
            self.bump_line();
        } else if self.peek(0).is_some() {
            self.error(loc, "'_' line continuation must end the line");
            // Resynchronize at the next newline
            self.skip_line_comment();
        }
    }

    fn lex_string(&mut self, loc: SourceLoc) {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    self.error(loc, "unterminated string literal");
                    self.push(TokenKind::Str, value, loc);
                    return;
                }
                Some('"') => {
                    self.bump();
                    self.push(TokenKind::Str, value, loc);
                    return;
                }
                Some('\\') => {
                    self.bump();
                    match self.peek(0) {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => {
                            let at = SourceLoc::new(self.line, self.col);
                            self.error(at, format!("unknown escape sequence '\\{}'", other));
                            value.push(other);
                        }
                        None => continue, // loop handles EOF as unterminated
                    }
                    self.bump();
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn lex_number(&mut self, loc: SourceLoc) {
        let start = self.pos;
        let mut saw_dot = false;
        let mut saw_exp = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !saw_dot && !saw_exp {
                // A dot not followed by a digit is member access, not a
                // fractional part (e.g. `3.ToString` never occurs, but
                // `arr(1).field` style parses rely on this).
                if self.peek(1).is_some_and(|d| d.is_ascii_digit()) {
                    saw_dot = true;
                    self.bump();
                } else {
                    break;
                }
            } else if (c == 'e' || c == 'E')
                && !saw_exp
                && self
                    .peek(1)
                    .is_some_and(|d| d.is_ascii_digit() || d == '+' || d == '-')
            {
                saw_exp = true;
                self.bump(); // e
                if matches!(self.peek(0), Some('+') | Some('-')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if saw_dot || saw_exp {
            match text.parse::<f64>() {
                Ok(_) => self.push(TokenKind::Float, text, loc),
                Err(_) => self.error(loc, format!("invalid numeric literal '{}'", text)),
            }
        } else if text.parse::<i32>().is_ok() {
            self.push(TokenKind::Int, text, loc);
        } else if text.parse::<f64>().is_ok() {
            // Whole number wider than 32 bits: becomes a double literal
            self.push(TokenKind::Float, text, loc);
        } else {
            self.error(loc, format!("invalid numeric literal '{}'", text));
        }
    }

    fn lex_word(&mut self, loc: SourceLoc) {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        let mut text: String = self.chars[start..self.pos].iter().collect();
        let upper = text.to_ascii_uppercase();

        if upper == "REM" {
            self.skip_line_comment();
            return;
        }

        if KEYWORDS.contains(upper.as_str()) {
            self.push(TokenKind::Keyword, upper, loc);
            return;
        }

        // Type suffix attaches only when directly adjacent to the identifier.
        if let Some(c) = self.peek(0)
            && SUFFIX_CHARS.contains(&c)
        {
            text.push(c);
            self.bump();
        }
        self.push(TokenKind::Ident, text, loc);
    }

    fn lex_operator(&mut self, loc: SourceLoc) {
        let c = self.chars[self.pos];
        // Two-character comparison operators first
        if c == '<' {
            match self.peek(1) {
                Some('=') => {
                    self.bump();
                    self.bump();
                    self.push(TokenKind::Op, "<=", loc);
                    return;
                }
                Some('>') => {
                    self.bump();
                    self.bump();
                    self.push(TokenKind::Op, "<>", loc);
                    return;
                }
                _ => {}
            }
        }
        if c == '>' && self.peek(1) == Some('=') {
            self.bump();
            self.bump();
            self.push(TokenKind::Op, ">=", loc);
            return;
        }
        match c {
            '+' | '-' | '*' | '/' | '\\' | '=' | '<' | '>' | '(' | ')' | ',' | ';' | ':' | '.'
            | '&' | '^' | '{' | '}' => {
                self.bump();
                self.push(TokenKind::Op, c.to_string(), loc);
            }
            _ => {
                self.bump();
                self.error(loc, format!("unexpected character '{}'", c));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = tokenize(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let (tokens, diags) = tokenize("print Print PRINT");
        assert!(diags.is_empty());
        for t in &tokens[..3] {
            assert_eq!(t.kind, TokenKind::Keyword);
            assert_eq!(t.lexeme, "PRINT");
        }
    }

    #[test]
    fn test_identifier_preserves_case_and_suffix() {
        let (tokens, _) = tokenize("myVar$ Count% x# b@ s^");
        assert_eq!(tokens[0].lexeme, "myVar$");
        assert_eq!(tokens[1].lexeme, "Count%");
        assert_eq!(tokens[2].lexeme, "x#");
        assert_eq!(tokens[3].lexeme, "b@");
        assert_eq!(tokens[4].lexeme, "s^");
        for t in &tokens[..5] {
            assert_eq!(t.kind, TokenKind::Ident);
        }
    }

    #[test]
    fn test_numeric_literal_kinds() {
        let (tokens, _) = tokenize("42 3.14 1e3 99999999999");
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[2].kind, TokenKind::Float);
        // Too wide for i32: becomes a double literal
        assert_eq!(tokens[3].kind, TokenKind::Float);
    }

    #[test]
    fn test_string_escapes() {
        let (tokens, diags) = tokenize(r#""a\nb\t\"q\"""#);
        assert!(diags.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].lexeme, "a\nb\t\"q\"");
    }

    #[test]
    fn test_unterminated_string() {
        let (_, diags) = tokenize("\"oops\nPRINT 1");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unterminated"));
        assert_eq!(diags[0].loc.line, 1);
    }

    #[test]
    fn test_comments() {
        let (tokens, _) = tokenize("PRINT 1 ' trailing\nREM whole line\nPRINT 2");
        let texts: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert!(!texts.iter().any(|t| t.contains("trailing")));
        assert!(!texts.iter().any(|t| t.contains("whole")));
    }

    #[test]
    fn test_line_continuation() {
        let (tokens, diags) = tokenize("PRINT 1 _\n  + 2\n");
        assert!(diags.is_empty());
        // No newline token between `1` and `+`
        let newline_positions: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TokenKind::Newline)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(newline_positions.len(), 1);
        assert!(tokens[3].is_op("+"));
    }

    #[test]
    fn test_comparison_operators() {
        let (tokens, _) = tokenize("<= >= <> < > =");
        let ops: Vec<&str> = tokens[..6].iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(ops, vec!["<=", ">=", "<>", "<", ">", "="]);
    }

    #[test]
    fn test_standalone_ampersand_is_operator() {
        let (tokens, _) = tokenize("a$ & b$");
        assert_eq!(tokens[0].lexeme, "a$");
        assert!(tokens[1].is_op("&"));
        assert_eq!(tokens[2].lexeme, "b$");
    }

    #[test]
    fn test_newlines_significant() {
        assert_eq!(
            kinds("PRINT\nPRINT\n"),
            vec![
                TokenKind::Keyword,
                TokenKind::Newline,
                TokenKind::Keyword,
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unknown_character() {
        let (_, diags) = tokenize("PRINT ~");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unexpected character"));
    }

    #[test]
    fn test_leading_dot_number() {
        let (tokens, _) = tokenize("x = .5");
        assert_eq!(tokens[2].kind, TokenKind::Float);
        assert_eq!(tokens[2].lexeme, ".5");
    }
}
