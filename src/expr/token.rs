use std::{fmt, iter::Peekable, str::CharIndices};

/// A binary arithmetic operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(BinOp::Add),
            '-' => Some(BinOp::Sub),
            '*' => Some(BinOp::Mul),
            '/' => Some(BinOp::Div),
            _ => None,
        }
    }

    /// Binding strength; all operators are left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Raw number text, parsed by the compiler.
    Number(String),
    Ident(String),
    Op(BinOp),
    LParen,
    RParen,
    /// Any other single character.
    Other(char),
}

/// A lexical token and its byte span in the formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Number(s) | TokenKind::Ident(s) => f.write_str(s),
            TokenKind::Op(op) => write!(f, "{}", op.symbol()),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::Other(c) => write!(f, "{c}"),
        }
    }
}

/// A tokenized formula, keeping the source text for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Tokens {
    src: String,
    tokens: Vec<Token>,
}

impl Tokens {
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Display for Tokens {
    /// Tokens joined by single spaces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `name` would tokenize as a single identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().map_or(false, is_ident_start) && chars.all(is_ident_continue)
}

fn is_number(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Advance over characters matching `pred`, returning the end byte offset.
fn scan(chars: &mut Peekable<CharIndices<'_>>, mut end: usize, pred: fn(char) -> bool) -> usize {
    while let Some((i, c)) = chars.peek().copied() {
        if !pred(c) {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    end
}

/// Split a formula into tokens.
///
/// No validation happens here: `1.2.3` becomes a single number token and unknown characters
/// become [`TokenKind::Other`].
pub fn tokenize(formula: &str) -> Tokens {
    let mut tokens = Vec::new();
    let mut chars = formula.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }

        let first = start + c.len_utf8();

        let (kind, end) = if is_number(c) {
            let end = scan(&mut chars, first, is_number);
            (TokenKind::Number(formula[start..end].to_string()), end)
        } else if is_ident_start(c) {
            let end = scan(&mut chars, first, is_ident_continue);
            (TokenKind::Ident(formula[start..end].to_string()), end)
        } else {
            let kind = match c {
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                c => BinOp::from_char(c)
                    .map(TokenKind::Op)
                    .unwrap_or(TokenKind::Other(c)),
            };
            (kind, first)
        };

        tokens.push(Token {
            kind,
            offset: start,
            len: end - start,
        });
    }

    Tokens {
        src: formula.to_string(),
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(s: &str) -> Vec<TokenKind> {
        tokenize(s).iter().map(|t| t.kind.clone()).collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.into())
    }

    fn num(s: &str) -> TokenKind {
        TokenKind::Number(s.into())
    }

    #[test]
    fn classifies_tokens() {
        assert_eq!(
            kinds("pol0 + 2.5*(sig_1 - bg)/ 3"),
            vec![
                ident("pol0"),
                TokenKind::Op(BinOp::Add),
                num("2.5"),
                TokenKind::Op(BinOp::Mul),
                TokenKind::LParen,
                ident("sig_1"),
                TokenKind::Op(BinOp::Sub),
                ident("bg"),
                TokenKind::RParen,
                TokenKind::Op(BinOp::Div),
                num("3"),
            ]
        );
    }

    #[test]
    fn malformed_number_is_one_token() {
        assert_eq!(kinds("1.2.3"), vec![num("1.2.3")]);
    }

    #[test]
    fn number_then_ident() {
        assert_eq!(kinds("2x"), vec![num("2"), ident("x")]);
    }

    #[test]
    fn other_characters() {
        assert_eq!(
            kinds("a ^ b"),
            vec![ident("a"), TokenKind::Other('^'), ident("b")]
        );
    }

    #[test]
    fn spans() {
        let t = tokenize("  bg +sig");
        let spans: Vec<_> = t.iter().map(|t| (t.offset, t.len)).collect();
        assert_eq!(spans, vec![(2, 2), (5, 1), (6, 3)]);
        for tok in t.iter() {
            assert_eq!(&t.src()[tok.offset..tok.offset + tok.len], tok.to_string());
        }
    }

    #[test]
    fn concatenation_reconstructs_formula() {
        let f = " (bg+ sig) *\t2.0 / lednicky ";
        let joined: String = tokenize(f).iter().map(|t| t.to_string()).collect();
        let stripped: String = f.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(joined, stripped);
    }

    #[test]
    fn spaced_round_trip() {
        for f in ["(bg + (sig * 2)) / (1.5 - pol0)", "a*(b+c)", "((x))"] {
            let t = tokenize(f);
            let again = tokenize(&t.to_string());
            let a: Vec<_> = t.iter().map(|t| &t.kind).collect();
            let b: Vec<_> = again.iter().map(|t| &t.kind).collect();
            assert_eq!(a, b, "{f}");
        }
    }

    #[test]
    fn empty() {
        assert!(tokenize("   ").is_empty());
    }
}
