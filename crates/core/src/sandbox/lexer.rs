use crate::errors::{SandboxError, ViolationKind};

const RESERVED: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "eval", "except", "exec", "false", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "none", "nonlocal", "not", "or", "pass", "raise", "return", "true",
    "try", "while", "with", "yield",
];

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    LParen,
    RParen,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Ident(name) => name.clone(),
            Self::Plus => "+".to_string(),
            Self::Minus => "-".to_string(),
            Self::Star => "*".to_string(),
            Self::Slash => "/".to_string(),
            Self::Lt => "<".to_string(),
            Self::Le => "<=".to_string(),
            Self::Gt => ">".to_string(),
            Self::Ge => ">=".to_string(),
            Self::EqEq => "==".to_string(),
            Self::NotEq => "!=".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, SandboxError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        let next = bytes.get(index + 1).copied();

        if byte.is_ascii_whitespace() {
            index += 1;
            continue;
        }

        if byte.is_ascii_digit() || (byte == b'.' && next.is_some_and(|b| b.is_ascii_digit())) {
            let (value, end) = read_number(source, index)?;
            tokens.push(Token { kind: TokenKind::Number(value), offset: index });
            index = end;
            continue;
        }

        if byte.is_ascii_alphabetic() || byte == b'_' {
            let start = index;
            while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_') {
                index += 1;
            }
            let name = &source[start..index];
            let lowered = name.to_ascii_lowercase();
            if RESERVED.contains(&lowered.as_str()) || name.starts_with("__") {
                return Err(SandboxError::violation(ViolationKind::Keyword(name.to_string()), start));
            }
            tokens.push(Token { kind: TokenKind::Ident(name.to_string()), offset: start });
            continue;
        }

        let (kind, width) = match (byte, next) {
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            _ => return Err(SandboxError::violation(classify(source, index), index)),
        };
        tokens.push(Token { kind, offset: index });
        index += width;
    }

    Ok(tokens)
}

fn read_number(source: &str, start: usize) -> Result<(f64, usize), SandboxError> {
    let bytes = source.as_bytes();
    let mut index = start;
    let mut seen_dot = false;

    while index < bytes.len() {
        match bytes[index] {
            b'0'..=b'9' => index += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                index += 1;
            }
            b'e' | b'E' => {
                let mut cursor = index + 1;
                if matches!(bytes.get(cursor), Some(b'+' | b'-')) {
                    cursor += 1;
                }
                if !bytes.get(cursor).is_some_and(u8::is_ascii_digit) {
                    return Err(SandboxError::violation(ViolationKind::InvalidNumber, start));
                }
                while bytes.get(cursor).is_some_and(u8::is_ascii_digit) {
                    cursor += 1;
                }
                index = cursor;
                break;
            }
            _ => break,
        }
    }

    if let Some(&trailing) = bytes.get(index) {
        if trailing == b'.' {
            return Err(SandboxError::violation(ViolationKind::AttributeAccess, index));
        }
        if trailing.is_ascii_alphanumeric() || trailing == b'_' {
            return Err(SandboxError::violation(ViolationKind::InvalidNumber, start));
        }
    }

    let value = source[start..index]
        .parse::<f64>()
        .map_err(|_| SandboxError::violation(ViolationKind::InvalidNumber, start))?;
    if !value.is_finite() {
        return Err(SandboxError::violation(ViolationKind::InvalidNumber, start));
    }
    Ok((value, index))
}

fn classify(source: &str, index: usize) -> ViolationKind {
    let Some(ch) = source[index..].chars().next() else {
        return ViolationKind::UnexpectedEnd;
    };
    match ch {
        '.' => ViolationKind::AttributeAccess,
        '[' | ']' => ViolationKind::IndexAccess,
        '{' | '}' | ',' => ViolationKind::Collection,
        '=' => ViolationKind::Assignment,
        '"' | '\'' | '`' => ViolationKind::StringLiteral,
        other => ViolationKind::UnexpectedCharacter(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{tokenize, TokenKind};
    use crate::errors::{SandboxError, ViolationKind};

    fn violation(source: &str) -> ViolationKind {
        match tokenize(source) {
            Err(SandboxError::Violation { kind, .. }) => kind,
            other => panic!("expected a violation for `{source}`, got {other:?}"),
        }
    }

    #[test]
    fn tokenizes_comparison_over_arithmetic() {
        let tokens = tokenize("wind_speed * 1.5 >= limit").expect("valid expression");
        let kinds: Vec<_> = tokens.into_iter().map(|token| token.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("wind_speed".to_string()),
                TokenKind::Star,
                TokenKind::Number(1.5),
                TokenKind::Ge,
                TokenKind::Ident("limit".to_string()),
            ]
        );
    }

    #[test]
    fn scientific_notation_is_a_number() {
        let tokens = tokenize("2.5e3").expect("valid number");
        assert_eq!(tokens[0].kind, TokenKind::Number(2500.0));
    }

    #[test]
    fn lexical_violations_are_classified() {
        assert_eq!(violation("os.system"), ViolationKind::AttributeAccess);
        assert_eq!(violation("reading[0]"), ViolationKind::IndexAccess);
        assert_eq!(violation("x = 1"), ViolationKind::Assignment);
        assert_eq!(violation("'rm -rf'"), ViolationKind::StringLiteral);
        assert_eq!(violation("{1, 2}"), ViolationKind::Collection);
        assert_eq!(violation("import os"), ViolationKind::Keyword("import".to_string()));
        assert_eq!(violation("__class__"), ViolationKind::Keyword("__class__".to_string()));
        assert_eq!(violation("reading ; 1"), ViolationKind::UnexpectedCharacter(';'));
        assert_eq!(violation("1e999"), ViolationKind::InvalidNumber);
        assert_eq!(violation("2x"), ViolationKind::InvalidNumber);
        assert_eq!(violation("1.5.real"), ViolationKind::AttributeAccess);
    }
}
