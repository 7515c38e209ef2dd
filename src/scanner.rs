use std::{collections::HashMap, iter::Peekable, str::Chars, sync::OnceLock};
use strum_macros::{Display, EnumString};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum TokenType {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Tilde,
    Percent,
    Amp,
    Pipe,
    Caret,

    // One or two character tokens.
    Minus,
    MinusEqual,
    MinusMinus,
    Plus,
    PlusEqual,
    PlusPlus,
    Slash,
    SlashEqual,
    Star,
    StarEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    GreaterGreater,
    Less,
    LessEqual,
    LessLess,

    // Literals.
    Identifier,
    String,
    Number,

    // Keywords.
    And,
    Assert,
    Break,
    Case,
    Class,
    Continue,
    Default,
    Else,
    Eprint,
    Exit,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    Switch,
    This,
    True,
    Var,
    While,

    Error,
    Eof,
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf::phf_map! {
    "and" => TokenType::And,
    "assert" => TokenType::Assert,
    "break" => TokenType::Break,
    "case" => TokenType::Case,
    "class" => TokenType::Class,
    "continue" => TokenType::Continue,
    "default" => TokenType::Default,
    "else" => TokenType::Else,
    "eprint" => TokenType::Eprint,
    "exit" => TokenType::Exit,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "switch" => TokenType::Switch,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

#[derive(Debug)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    token_type: Option<TokenType>,
    is_end: bool,
}

impl TrieNode {
    fn new() -> Self {
        TrieNode {
            children: HashMap::new(),
            token_type: None,
            is_end: false,
        }
    }
}

static TRIE_ROOT: OnceLock<TrieNode> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub token_type: TokenType,
    pub value: &'a str,
    pub line: u32,
}

pub struct Scanner<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
    start: usize,
    current: usize,
    line: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Box<Scanner<'a>> {
        TRIE_ROOT.get_or_init(|| {
            let mut root = TrieNode::new();
            for (keyword, token) in KEYWORDS.entries() {
                let mut current_node = &mut root;
                for c in keyword.chars() {
                    current_node = current_node.children.entry(c).or_insert(TrieNode::new());
                }
                current_node.token_type = Some(*token);
                current_node.is_end = true;
            }
            root
        });

        let chars = source.chars().peekable();
        Box::new(Scanner {
            source,
            chars,
            start: 0,
            current: 0,
            line: 1,
        })
    }

    pub fn scan_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_end() {
            return self.make_token(TokenType::Eof);
        }

        let c = self.advance();

        if Self::is_alpha(c) {
            return self.make_identifier_token();
        }

        if Self::is_digit(c) {
            return self.make_number_token();
        }

        match c {
            '(' => self.make_token(TokenType::LeftParen),
            ')' => self.make_token(TokenType::RightParen),
            '{' => self.make_token(TokenType::LeftBrace),
            '}' => self.make_token(TokenType::RightBrace),
            '[' => self.make_token(TokenType::LeftBracket),
            ']' => self.make_token(TokenType::RightBracket),
            ';' => self.make_token(TokenType::Semicolon),
            ':' => self.make_token(TokenType::Colon),
            ',' => self.make_token(TokenType::Comma),
            '.' => self.make_token(TokenType::Dot),
            '~' => self.make_token(TokenType::Tilde),
            '%' => self.make_token(TokenType::Percent),
            '&' => self.make_token(TokenType::Amp),
            '|' => self.make_token(TokenType::Pipe),
            '^' => self.make_token(TokenType::Caret),
            '"' => self.make_string_token(),
            '-' => {
                if self.match_char('=') {
                    self.make_token(TokenType::MinusEqual)
                } else if self.match_char('-') {
                    self.make_token(TokenType::MinusMinus)
                } else {
                    self.make_token(TokenType::Minus)
                }
            }
            '+' => {
                if self.match_char('=') {
                    self.make_token(TokenType::PlusEqual)
                } else if self.match_char('+') {
                    self.make_token(TokenType::PlusPlus)
                } else {
                    self.make_token(TokenType::Plus)
                }
            }
            '/' => {
                if self.match_char('=') {
                    self.make_token(TokenType::SlashEqual)
                } else {
                    self.make_token(TokenType::Slash)
                }
            }
            '*' => {
                if self.match_char('=') {
                    self.make_token(TokenType::StarEqual)
                } else {
                    self.make_token(TokenType::Star)
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenType::BangEqual)
                } else {
                    self.make_token(TokenType::Bang)
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.make_token(TokenType::EqualEqual)
                } else {
                    self.make_token(TokenType::Equal)
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenType::LessEqual)
                } else if self.match_char('<') {
                    self.make_token(TokenType::LessLess)
                } else {
                    self.make_token(TokenType::Less)
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenType::GreaterEqual)
                } else if self.match_char('>') {
                    self.make_token(TokenType::GreaterGreater)
                } else {
                    self.make_token(TokenType::Greater)
                }
            }
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_digit(ch: char) -> bool {
        ch.is_ascii_digit()
    }

    fn is_alpha(ch: char) -> bool {
        ch.is_ascii_alphabetic() || ch == '_'
    }

    fn identifier_type(&mut self) -> TokenType {
        match self.check_keyword() {
            Some(token_type) => token_type,
            None => TokenType::Identifier,
        }
    }

    fn make_identifier_token(&mut self) -> Token<'a> {
        loop {
            match self.peek() {
                Some(c) if Self::is_alpha(*c) || Self::is_digit(*c) => self.advance(),
                _ => break,
            };
        }
        let token_type = self.identifier_type();
        self.make_token(token_type)
    }

    fn make_number_token(&mut self) -> Token<'a> {
        loop {
            match self.peek() {
                Some(c) if Self::is_digit(*c) => self.advance(),
                _ => break,
            };
        }

        if let Some('.') = self.peek().copied() {
            if let Some(c) = self.peek_next() {
                if Self::is_digit(c) {
                    self.advance();
                    while let Some(ch) = self.peek() {
                        if Self::is_digit(*ch) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        self.make_token(TokenType::Number)
    }

    fn make_string_token(&mut self) -> Token<'a> {
        loop {
            match self.peek() {
                None => return self.error_token("Unterminated string."),
                Some('"') => break,
                Some('\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
            }
        }

        self.advance();
        self.make_token(TokenType::String)
    }

    fn skip_whitespace(&mut self) {
        loop {
            let next_char = self.peek_next();
            match (self.peek(), next_char) {
                (Some('\n'), _) => {
                    self.line += 1;
                    self.advance();
                }
                (Some(' '), _) | (Some('\t'), _) | (Some('\r'), _) => {
                    self.advance();
                }
                (Some('/'), Some('/')) | (Some('#'), _) => {
                    while let Some(ch) = self.peek() {
                        if *ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn peek_next(&self) -> Option<char> {
        if self.is_end() {
            return None;
        }

        let mut iter = self.chars.clone();
        iter.next();
        iter.next()
    }

    fn is_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn make_token(&self, token_type: TokenType) -> Token<'a> {
        Token {
            token_type,
            value: &self.source[self.start..self.current],
            line: self.line,
        }
    }

    fn error_token(&self, reason: &'static str) -> Token<'a> {
        Token {
            token_type: TokenType::Error,
            value: reason,
            line: self.line,
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_end() {
            return false;
        }

        if let Some(&next_char) = self.chars.peek() {
            if next_char == expected {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check_keyword(&mut self) -> Option<TokenType> {
        let trie_root = TRIE_ROOT.get().expect("Trie not initialized");
        let mut current_node = trie_root;

        let substring = &self.source[self.start..self.current];
        for ch in substring.chars() {
            match current_node.children.get(&ch) {
                Some(child) => current_node = child,
                None => return None,
            }
        }
        if current_node.is_end {
            current_node.token_type
        } else {
            None
        }
    }

    fn advance(&mut self) -> char {
        if let Some(next_char) = self.chars.next() {
            self.current += next_char.len_utf8();
            next_char
        } else {
            '\0'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scanner;
    use crate::scanner::TokenType;

    #[test]
    fn test_check_keyword() {
        let mut scanner = Scanner::new("this is for if fun  fun1 forfor switch");
        let mut token = scanner.scan_token();
        assert!(token.token_type == TokenType::This);
        assert!(token.value == "this");

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::Identifier);
        assert!(token.value == "is");

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::For);
        assert!(token.value == "for");

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::If);

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::Fun);

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::Identifier);
        assert!(token.value == "fun1");

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::Identifier);
        assert!(token.value == "forfor");

        token = scanner.scan_token();
        assert!(token.token_type == TokenType::Switch);
    }

    #[test]
    fn test_compound_operators() {
        let mut scanner = Scanner::new("+= -= *= /= ++ -- << >> & | ^ ~ %");
        let expected = [
            TokenType::PlusEqual,
            TokenType::MinusEqual,
            TokenType::StarEqual,
            TokenType::SlashEqual,
            TokenType::PlusPlus,
            TokenType::MinusMinus,
            TokenType::LessLess,
            TokenType::GreaterGreater,
            TokenType::Amp,
            TokenType::Pipe,
            TokenType::Caret,
            TokenType::Tilde,
            TokenType::Percent,
        ];
        for token_type in expected {
            let token = scanner.scan_token();
            assert!(token.token_type == token_type, "expected {}", token_type);
        }
        assert!(scanner.scan_token().token_type == TokenType::Eof);
    }

    #[test]
    fn test_comments_and_lines() {
        let source = "var a = 1; // trailing comment\n# whole-line comment\nvar b = 2;";
        let mut scanner = Scanner::new(source);
        let mut lines = vec![];
        loop {
            let token = scanner.scan_token();
            if token.token_type == TokenType::Eof {
                break;
            }
            assert!(token.token_type != TokenType::Error);
            lines.push(token.line);
        }
        // Both statements scan; the second sits on line 3.
        assert_eq!(lines.first(), Some(&1));
        assert_eq!(lines.last(), Some(&3));
    }

    #[test]
    fn test_unterminated_string() {
        let mut scanner = Scanner::new("\"never closed");
        let token = scanner.scan_token();
        assert!(token.token_type == TokenType::Error);
        assert!(token.value == "Unterminated string.");
    }

    #[test]
    fn test_stray_character() {
        let mut scanner = Scanner::new("@");
        let token = scanner.scan_token();
        assert!(token.token_type == TokenType::Error);
        assert!(token.value == "Unexpected character.");
    }

    #[test]
    fn test_scan_token() {
        let source = "var a = 1;
        var b = \"this is a string\";
        while (a < 3) {
            if (a == 1) {
                print a;
            }

            var c = a and 1 or 2;
            for (var d = 1; d <= 5; ++d) {
                a = a + 1;
            }
        }
        fun test(x) {
            var a = 1 + 2 * 3 / 4 - -5;
            switch (x) {
                case 1: return a;
                default: return nil;
            }
        }
        ";
        let mut scanner = Scanner::new(source);
        loop {
            let token = scanner.scan_token();
            assert!(token.token_type != TokenType::Error);
            if token.token_type == TokenType::Eof {
                break;
            }
        }
    }
}
