//! Text form of caps, parsed with winnow.
//!
//! ```text
//! caps      := "ANY" | "EMPTY" | structure (";" structure)*
//! structure := name ("," key "=" ["(" type ")"] value)*
//! value     := "[" scalar "," scalar "]" | "{" scalar ("," scalar)* "}" | "ANY" | scalar
//! scalar    := quoted string | bare word
//! ```
//!
//! Types are `int`, `fraction`, `string` and `boolean` (`i`, `f`, `s`, `b`
//! for short). Without a type the first scalar decides: digits are an int,
//! `n/d` a fraction, `true`/`false` a boolean, anything else a string.

use super::{Caps, CapsValue, FieldValue, Fraction, Structure};
use crate::error::{Error, Result};
use winnow::Parser;
use winnow::ascii::{alpha1, multispace0};
use winnow::combinator::{alt, delimited, opt, preceded, repeat, separated, terminated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Clone)]
enum Token {
    Quoted(String),
    Bare(String),
}

#[derive(Debug)]
enum RawValue {
    Single(Token),
    Range(Token, Token),
    List(Vec<Token>),
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Fraction,
    Str,
    Bool,
}

/// Parse a caps description.
///
/// # Example
///
/// ```rust
/// use sluice::caps::parse_caps;
///
/// let caps = parse_caps("video/x-raw, width=(int)[16, 4096], framerate=30/1").unwrap();
/// assert_eq!(caps.size(), 1);
/// assert!(parse_caps("ANY").unwrap().is_any());
/// ```
pub fn parse_caps(input: &str) -> Result<Caps> {
    caps_list
        .parse(input.trim())
        .map_err(|e| Error::CapsParse(format!("{e}")))
}

fn caps_list(input: &mut &str) -> WResult<Caps> {
    let _ = ws.parse_next(input)?;
    let structures: Vec<Structure> = separated(1.., structure, (ws, ';', ws)).parse_next(input)?;
    let _ = ws.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    if let [only] = structures.as_slice() {
        if only.n_fields() == 0 {
            match only.name() {
                "ANY" => return Ok(Caps::any()),
                "EMPTY" => return Ok(Caps::new_empty()),
                _ => {}
            }
        }
    }
    Ok(Caps::from_structures(structures))
}

fn ws<'a>(input: &mut &'a str) -> WResult<&'a str> {
    multispace0.parse_next(input)
}

fn structure(input: &mut &str) -> WResult<Structure> {
    let name = media_name.parse_next(input)?;
    let fields: Vec<(String, FieldValue)> =
        repeat(0.., preceded((ws, ',', ws), field)).parse_next(input)?;

    let mut structure = Structure::new(name);
    for (key, value) in fields {
        structure.set(key, value);
    }
    Ok(structure)
}

fn media_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+')
    })
    .parse_next(input)
}

fn field_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .parse_next(input)
}

fn field(input: &mut &str) -> WResult<(String, FieldValue)> {
    let key = field_name.parse_next(input)?;
    let _ = (ws, '=', ws).parse_next(input)?;
    let ty = opt(terminated(type_name, ws)).parse_next(input)?;
    let raw = raw_value.parse_next(input)?;

    let kind = match ty {
        Some(name) => kind_from_name(name).ok_or_else(ContextError::new)?,
        None => infer_kind(&raw),
    };
    let value = convert(kind, raw).ok_or_else(ContextError::new)?;
    Ok((key.to_string(), value))
}

fn type_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    delimited(('(', ws), alpha1, (ws, ')')).parse_next(input)
}

fn raw_value(input: &mut &str) -> WResult<RawValue> {
    alt((
        delimited(('[', ws), (token, (ws, ',', ws), token), (ws, ']'))
            .map(|(min, _, max)| RawValue::Range(min, max)),
        delimited(('{', ws), separated(1.., token, (ws, ',', ws)), (ws, '}')).map(RawValue::List),
        token.map(RawValue::Single),
    ))
    .parse_next(input)
}

fn token(input: &mut &str) -> WResult<Token> {
    alt((quoted, bare)).parse_next(input)
}

fn quoted(input: &mut &str) -> WResult<Token> {
    delimited('"', take_till(0.., '"'), '"')
        .map(|s: &str| Token::Quoted(s.to_string()))
        .parse_next(input)
}

fn bare(input: &mut &str) -> WResult<Token> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+' | ':')
    })
    .map(|s: &str| Token::Bare(s.to_string()))
    .parse_next(input)
}

fn kind_from_name(name: &str) -> Option<Kind> {
    match name {
        "int" | "i" => Some(Kind::Int),
        "fraction" | "f" => Some(Kind::Fraction),
        "string" | "str" | "s" => Some(Kind::Str),
        "boolean" | "bool" | "b" => Some(Kind::Bool),
        _ => None,
    }
}

fn infer_kind(raw: &RawValue) -> Kind {
    let first = match raw {
        RawValue::Single(t) | RawValue::Range(t, _) => t,
        RawValue::List(tokens) => match tokens.first() {
            Some(t) => t,
            None => return Kind::Str,
        },
    };
    match first {
        Token::Quoted(_) => Kind::Str,
        Token::Bare(s) if s.parse::<i64>().is_ok() => Kind::Int,
        Token::Bare(s) if parse_fraction(s).is_some() => Kind::Fraction,
        Token::Bare(s) if s == "true" || s == "false" => Kind::Bool,
        Token::Bare(_) => Kind::Str,
    }
}

fn parse_fraction(s: &str) -> Option<Fraction> {
    match s.split_once('/') {
        Some((n, d)) => Some(Fraction::new(n.parse().ok()?, d.parse().ok()?)),
        None => Some(Fraction::new(s.parse().ok()?, 1)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

fn build<T: Clone + Ord>(raw: RawValue, scalar: impl Fn(&Token) -> Option<T>) -> Option<CapsValue<T>> {
    match raw {
        RawValue::Single(Token::Bare(s)) if s == "ANY" => Some(CapsValue::Any),
        RawValue::Single(t) => Some(CapsValue::Fixed(scalar(&t)?)),
        RawValue::Range(a, b) => {
            let (min, max) = (scalar(&a)?, scalar(&b)?);
            if min > max {
                None
            } else if min == max {
                Some(CapsValue::Fixed(min))
            } else {
                Some(CapsValue::Range { min, max })
            }
        }
        RawValue::List(tokens) => {
            let mut values = tokens.iter().map(&scalar).collect::<Option<Vec<T>>>()?;
            if values.len() == 1 {
                values.pop().map(CapsValue::Fixed)
            } else {
                Some(CapsValue::List(values))
            }
        }
    }
}

fn convert(kind: Kind, raw: RawValue) -> Option<FieldValue> {
    match kind {
        Kind::Int => build(raw, |t| match t {
            Token::Bare(s) => s.parse::<i64>().ok(),
            Token::Quoted(_) => None,
        })
        .map(FieldValue::Int),
        Kind::Fraction => build(raw, |t| match t {
            Token::Bare(s) => parse_fraction(s),
            Token::Quoted(_) => None,
        })
        .map(FieldValue::Fraction),
        Kind::Str => build(raw, |t| match t {
            Token::Bare(s) | Token::Quoted(s) => Some(s.clone()),
        })
        .map(FieldValue::Str),
        Kind::Bool => build(raw, |t| match t {
            Token::Bare(s) => parse_bool(s),
            Token::Quoted(_) => None,
        })
        .map(FieldValue::Bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_fields() {
        let caps = parse_caps(
            "video/x-raw, width=(int)[16, 4096], format=(string){I420, NV12}, framerate=(fraction)30/1",
        )
        .unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name(), "video/x-raw");
        assert_eq!(
            s.get("width"),
            Some(&FieldValue::Int(CapsValue::Range { min: 16, max: 4096 }))
        );
        assert_eq!(s.get_fraction("framerate"), Some(Fraction::new(30, 1)));
        assert!(!caps.is_fixed());
    }

    #[test]
    fn test_parse_inferred_types() {
        let caps = parse_caps("audio/x-raw,rate=44100,signed=true,layout=interleaved").unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get_int("rate"), Some(44100));
        assert_eq!(s.get_bool("signed"), Some(true));
        assert_eq!(s.get_str("layout"), Some("interleaved"));
        assert!(caps.is_fixed());
    }

    #[test]
    fn test_parse_multiple_structures() {
        let caps = parse_caps("audio/x-raw; audio/x-alaw ; audio/x-mulaw").unwrap();
        assert_eq!(caps.size(), 3);
        assert_eq!(caps.structure(2).unwrap().name(), "audio/x-mulaw");
    }

    #[test]
    fn test_parse_any_and_empty() {
        assert!(parse_caps("ANY").unwrap().is_any());
        assert!(parse_caps("  EMPTY ").unwrap().is_empty());
    }

    #[test]
    fn test_quoted_string_keeps_spaces() {
        let caps = parse_caps("text/x-raw, title=\"two words\"").unwrap();
        assert_eq!(caps.structure(0).unwrap().get_str("title"), Some("two words"));
    }

    #[test]
    fn test_display_parses_back() {
        let original = parse_caps(
            "video/x-raw, width=(int){320, 640}, title=\"a b\", depth=(int)ANY; image/png",
        )
        .unwrap();
        let reparsed = parse_caps(&original.to_string()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_caps("").is_err());
        assert!(parse_caps("video/x-raw, width=").is_err());
        assert!(parse_caps("video/x-raw, width=(int)abc").is_err());
        assert!(parse_caps("video/x-raw, width=(int)[10, 1]").is_err());
        assert!(parse_caps("video/x-raw, n=(bogus)1").is_err());
    }
}
