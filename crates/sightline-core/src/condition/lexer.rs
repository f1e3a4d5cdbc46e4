//! Tokenizer for breakpoint conditions.

use super::ConditionError;

/// A lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Identifier or keyword (`and`, `or`, `not`, `in`, `True`, ...).
    Ident(String),
    /// Quoted string literal with escapes resolved.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A token with the byte offset it started at.
#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset into the source.
    pub offset: usize,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ConditionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let token = match c {
            b'(' => single(&mut pos, Token::LParen),
            b')' => single(&mut pos, Token::RParen),
            b'[' => single(&mut pos, Token::LBracket),
            b']' => single(&mut pos, Token::RBracket),
            b',' => single(&mut pos, Token::Comma),
            b'+' => single(&mut pos, Token::Plus),
            b'-' => single(&mut pos, Token::Minus),
            b'*' => single(&mut pos, Token::Star),
            b'/' => single(&mut pos, Token::Slash),
            b'%' => single(&mut pos, Token::Percent),
            b'=' if bytes.get(pos + 1) == Some(&b'=') => double(&mut pos, Token::EqEq),
            b'!' if bytes.get(pos + 1) == Some(&b'=') => double(&mut pos, Token::NotEq),
            b'<' if bytes.get(pos + 1) == Some(&b'=') => double(&mut pos, Token::Le),
            b'>' if bytes.get(pos + 1) == Some(&b'=') => double(&mut pos, Token::Ge),
            b'<' => single(&mut pos, Token::Lt),
            b'>' => single(&mut pos, Token::Gt),
            b'.' if bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                lex_number(source, &mut pos)?
            }
            b'.' => single(&mut pos, Token::Dot),
            b'"' | b'\'' => lex_string(source, &mut pos)?,
            b'0'..=b'9' => lex_number(source, &mut pos)?,
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric()) {
                    pos += 1;
                }
                Token::Ident(source[start..pos].to_string())
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(ConditionError::Syntax {
                    offset: pos,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };
        tokens.push(Spanned { token, offset: start });
    }

    Ok(tokens)
}

fn single(pos: &mut usize, token: Token) -> Token {
    *pos += 1;
    token
}

fn double(pos: &mut usize, token: Token) -> Token {
    *pos += 2;
    token
}

fn lex_string(source: &str, pos: &mut usize) -> Result<Token, ConditionError> {
    let start = *pos;
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(ConditionError::Syntax { offset: start, message: "expected string".into() });
    };
    let mut out = String::new();
    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => {
                *pos = start + i + c.len_utf8();
                return Ok(Token::Str(out));
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(ConditionError::Syntax {
        offset: start,
        message: "unterminated string literal".into(),
    })
}

fn lex_number(source: &str, pos: &mut usize) -> Result<Token, ConditionError> {
    let bytes = source.as_bytes();
    let start = *pos;
    let mut is_float = false;
    while *pos < bytes.len() {
        match bytes[*pos] {
            b'0'..=b'9' | b'_' => *pos += 1,
            b'.' if !is_float => {
                is_float = true;
                *pos += 1;
            }
            b'e' | b'E' => {
                is_float = true;
                *pos += 1;
                if matches!(bytes.get(*pos), Some(b'+' | b'-')) {
                    *pos += 1;
                }
            }
            _ => break,
        }
    }
    let text: String = source[start..*pos].chars().filter(|c| *c != '_').collect();
    let invalid = || ConditionError::Syntax {
        offset: start,
        message: format!("invalid number '{}'", &source[start..*pos]),
    };
    if is_float {
        text.parse::<f64>().map(Token::Float).map_err(|_| invalid())
    } else {
        text.parse::<i64>().map(Token::Int).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn comparison_tokens() {
        assert_eq!(
            kinds("severity == \"error\""),
            vec![
                Token::Ident("severity".into()),
                Token::EqEq,
                Token::Str("error".into()),
            ]
        );
        assert_eq!(kinds("a<=b>=c!=d"), vec![
            Token::Ident("a".into()),
            Token::Le,
            Token::Ident("b".into()),
            Token::Ge,
            Token::Ident("c".into()),
            Token::NotEq,
            Token::Ident("d".into()),
        ]);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("42 3.5 .5 1e3 1_000"), vec![
            Token::Int(42),
            Token::Float(3.5),
            Token::Float(0.5),
            Token::Float(1000.0),
            Token::Int(1000),
        ]);
    }

    #[test]
    fn strings_with_escapes_and_quotes() {
        assert_eq!(kinds(r#"'it\'s' "a\"b""#), vec![
            Token::Str("it's".into()),
            Token::Str("a\"b".into()),
        ]);
    }

    #[test]
    fn unicode_in_strings() {
        assert_eq!(kinds("'héllo'"), vec![Token::Str("héllo".into())]);
    }

    #[test]
    fn attribute_access_uses_dot() {
        assert_eq!(kinds("payload.get('x')"), vec![
            Token::Ident("payload".into()),
            Token::Dot,
            Token::Ident("get".into()),
            Token::LParen,
            Token::Str("x".into()),
            Token::RParen,
        ]);
    }

    #[test]
    fn unterminated_string_fails() {
        let err = tokenize("message == 'oops").unwrap_err();
        assert!(matches!(err, ConditionError::Syntax { offset: 11, .. }));
    }

    #[test]
    fn stray_characters_fail() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a ; b").is_err());
        assert!(tokenize("a & b").is_err());
    }

    #[test]
    fn offsets_point_at_token_start() {
        let tokens = tokenize("  len(x)").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[1].offset, 5);
    }
}
