//! Text to value graph.
//!
//! A recursive-descent reader built on nom. It accepts integers, floats, strings with the
//! usual escapes, symbols, `nil`, proper and dotted lists, the quote family of prefixes and
//! `;` line comments. Nesting depth is bounded by [`MAX_PARSE_DEPTH`] so hostile input cannot
//! exhaust the native stack.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    error::{Error, ErrorKind},
};

use crate::ast::{Symbol, Value};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Treat `;` up to the end of the line as whitespace
    pub handle_comments: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            handle_comments: true,
        }
    }
}

/// Characters that end a bare token
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "()[]\";'`,".contains(c)
}

fn failure(input: &str, code: ErrorKind) -> nom::Err<Error<&str>> {
    nom::Err::Failure(Error::new(input, code))
}

/// Once a construct has been recognized by its opening character, errors inside it are final.
fn to_failure(err: nom::Err<Error<&str>>) -> nom::Err<Error<&str>> {
    match err {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    }
}

/// Skip whitespace and, if enabled, comments.
fn skip_space(input: &str, config: ReaderConfig) -> IResult<&str, ()> {
    let (mut input, _) = multispace0.parse(input)?;
    while config.handle_comments && input.starts_with(';') {
        let (rest, _) = take_while(|c: char| c != '\n').parse(input)?;
        (input, _) = multispace0.parse(rest)?;
    }
    Ok((input, ()))
}

fn close_paren(input: &str) -> IResult<&str, char> {
    char(')').parse(input)
}

/// A lone `.` inside a list introduces the tail of a dotted pair.
fn dot_marker(input: &str) -> IResult<&str, ()> {
    let (rest, token) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;
    if token == "." {
        Ok((rest, ()))
    } else {
        Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
    }
}

fn parse_string(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('"').parse(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => return Ok((&input[i + 1..], Value::from(result))),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    return Err(failure("", ErrorKind::Char));
                };
                result.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    _ => return Err(failure(&input[i..], ErrorKind::Escaped)),
                });
            }
            c => result.push(c),
        }
    }

    // Ran out of input before the closing quote
    Err(failure("", ErrorKind::Char))
}

/// `'x`, `` `x ``, `,x` and `,@x` expand to two-element lists.
fn parse_prefixed(input: &str, config: ReaderConfig, depth: usize) -> IResult<&str, Value> {
    let (rest, prefix) = alt((tag(",@"), tag("'"), tag("`"), tag(","))).parse(input)?;
    let name = match prefix {
        "'" => "quote",
        "`" => "quasiquote",
        "," => "unquote",
        _ => "unquote-splicing",
    };
    let (rest, _) = skip_space(rest, config).map_err(to_failure)?;
    let (rest, quoted) = parse_expr(rest, config, depth + 1).map_err(to_failure)?;
    Ok((
        rest,
        Value::list([Value::Symbol(Symbol::from_static(name)), quoted]),
    ))
}

fn parse_list(input: &str, config: ReaderConfig, depth: usize) -> IResult<&str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        (input, _) = skip_space(input, config).map_err(to_failure)?;

        if let Ok((rest, _)) = close_paren(input) {
            return Ok((rest, Value::list(items)));
        }

        if !items.is_empty()
            && let Ok((rest, ())) = dot_marker(input)
        {
            let (rest, _) = skip_space(rest, config).map_err(to_failure)?;
            let (rest, tail) = parse_expr(rest, config, depth + 1).map_err(to_failure)?;
            let (rest, _) = skip_space(rest, config).map_err(to_failure)?;
            let (rest, _) = close_paren(rest).map_err(to_failure)?;
            let list = items
                .into_iter()
                .rev()
                .fold(tail, |tail, item| Value::cons(item, tail));
            return Ok((rest, list));
        }

        let (rest, item) = parse_expr(input, config, depth + 1).map_err(to_failure)?;
        items.push(item);
        input = rest;
    }
}

fn is_integer_literal(token: &str) -> bool {
    let digits = token.strip_prefix(['+', '-']).unwrap_or(token);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Tokens starting with a digit, or a sign or point followed by one, are numbers.
fn looks_numeric(token: &str) -> bool {
    let unsigned = token.strip_prefix(['+', '-']).unwrap_or(token);
    let unsigned = unsigned.strip_prefix('.').unwrap_or(unsigned);
    unsigned.starts_with(|c: char| c.is_ascii_digit())
}

fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (rest, token) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;

    if looks_numeric(token) {
        if let Ok(n) = token.parse::<i64>() {
            return Ok((rest, Value::Integer(n)));
        }
        if is_integer_literal(token) {
            return Err(failure(input, ErrorKind::Digit));
        }
        return match token.parse::<f64>() {
            Ok(f) => Ok((rest, Value::Float(f))),
            Err(_) => Err(failure(input, ErrorKind::Verify)),
        };
    }

    if token == "nil" {
        return Ok((rest, Value::Nil));
    }

    match Symbol::new(token) {
        Ok(symbol) => Ok((rest, Value::Symbol(symbol))),
        Err(_) => Err(failure(input, ErrorKind::Verify)),
    }
}

fn parse_expr(input: &str, config: ReaderConfig, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }

    alt((
        |input| parse_list(input, config, depth),
        |input| parse_prefixed(input, config, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// The bare token at the start of `input`, for error messages
fn token_at(input: &str) -> &str {
    input.split(is_delimiter).next().unwrap_or("")
}

fn to_parse_error(source: &str, err: nom::Err<Error<&str>>) -> ParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                ErrorKind::Digit => (
                    ParseErrorKind::ImplementationLimit,
                    format!("Integer literal out of range: '{}'", token_at(e.input)),
                ),
                ErrorKind::Verify => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid token: '{}'", token_at(e.input)),
                ),
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    "Invalid escape sequence in string".to_owned(),
                ),
                _ if e.input.is_empty() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input".to_owned(),
                ),
                _ => (
                    ParseErrorKind::InvalidSyntax,
                    format!(
                        "Invalid syntax near '{}'",
                        e.input.chars().take(10).collect::<String>()
                    ),
                ),
            };
            ParseError::with_context(kind, message, source, offset)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

/// Read exactly one expression with the default configuration.
pub fn parse(input: &str) -> Result<Value, ParseError> {
    parse_with_config(input, ReaderConfig::default())
}

pub fn parse_with_config(input: &str, config: ReaderConfig) -> Result<Value, ParseError> {
    let result = skip_space(input, config)
        .and_then(|(text, _)| parse_expr(text, config, 0))
        .and_then(|(text, value)| skip_space(text, config).map(|(text, _)| (text, value)));

    match result {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!(
                "Unexpected remaining input: '{}'",
                remaining.chars().take(20).collect::<String>()
            ),
            input,
            input.len() - remaining.len(),
        )),
        Err(err) => Err(to_parse_error(input, err)),
    }
}

/// Read every top-level expression into a list, ready for
/// [`evaluate_sequence`](crate::evaluate_sequence).
pub fn parse_program(input: &str) -> Result<Value, ParseError> {
    parse_program_with_config(input, ReaderConfig::default())
}

pub fn parse_program_with_config(input: &str, config: ReaderConfig) -> Result<Value, ParseError> {
    let mut exprs = Vec::new();
    let (mut rest, _) = skip_space(input, config).map_err(|e| to_parse_error(input, e))?;

    while !rest.is_empty() {
        let (after, expr) = parse_expr(rest, config, 0).map_err(|e| to_parse_error(input, e))?;
        exprs.push(expr);
        (rest, _) = skip_space(after, config).map_err(|e| to_parse_error(input, e))?;
    }

    Ok(Value::list(exprs))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    /// Test result variants for reader tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),              // Parsing should succeed with this value
        SpecificError(&'static str), // Parsing should fail with a message containing this
        FailsWith(ParseErrorKind),   // Parsing should fail with this kind
        AnyError,                    // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let result = parse(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch for '{input}'");

                    // Printed data reads back unchanged
                    let displayed = format!("{actual}");
                    let reparsed = parse(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        displayed,
                        format!("{reparsed}"),
                        "{test_id}: round-trip display mismatch for '{input}'"
                    );
                }
                (Err(_), AnyError) => {}
                (Err(err), SpecificError(expected_text)) => {
                    assert!(
                        err.message.contains(expected_text),
                        "{test_id}: error '{}' should contain '{expected_text}'",
                        err.message
                    );
                }
                (Err(err), FailsWith(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: wrong kind for '{input}': {err:?}");
                }
                (Ok(actual), _) => {
                    panic!("{test_id}: expected error for '{input}', got {actual:?}");
                }
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success for '{input}', got error {err:?}");
                }
            }
        }
    }

    #[test]
    fn test_atoms() {
        run_parse_tests(vec![
            // Integers
            ("42", success(42)),
            ("-17", success(-17)),
            ("+5", success(5)),
            ("0", success(0)),
            ("9223372036854775807", success(i64::MAX)),
            ("-9223372036854775808", success(i64::MIN)),
            // Floats
            ("1.5", success(1.5)),
            ("-0.5", success(-0.5)),
            ("2e3", success(2000.0)),
            ("6.25e-2", success(0.0625)),
            // Symbols, including ones that merely start like numbers
            ("foo", success(sym("foo"))),
            ("+", success(sym("+"))),
            ("-", success(sym("-"))),
            ("call/cc", success(sym("call/cc"))),
            ("&rest", success(sym("&rest"))),
            ("cell-p", success(sym("cell-p"))),
            ("<=", success(sym("<="))),
            // Nil
            ("nil", success(nil())),
            ("()", success(nil())),
            ("(  )", success(nil())),
            // Strings
            ("\"hello\"", success("hello")),
            ("\"\"", success("")),
            (r#""a\nb""#, success("a\nb")),
            (r#""tab\there""#, success("tab\there")),
            (r#""say \"hi\"""#, success("say \"hi\"")),
            (r#""back\\slash""#, success("back\\slash")),
            ("\"λ unicode\"", success("λ unicode")),
            // Surrounding whitespace
            ("  \n 7 \t", success(7)),
        ]);
    }

    #[test]
    fn test_lists() {
        run_parse_tests(vec![
            ("(1 2 3)", success([1, 2, 3])),
            ("(+ 1 2)", success(val([sym("+"), val(1), val(2)]))),
            ("((a) (b c))", success(val([val([sym("a")]), val([sym("b"), sym("c")])]))),
            ("(a \"s\" 1.5)", success(val([sym("a"), val("s"), val(1.5)]))),
            ("(a . b)", success(Value::cons(sym("a"), sym("b")))),
            (
                "(a b . c)",
                success(Value::cons(sym("a"), Value::cons(sym("b"), sym("c")))),
            ),
            ("(a . (b))", success(val([sym("a"), sym("b")]))),
            ("(a . nil)", success(val([sym("a")]))),
            ("(nil)", success(val([nil()]))),
            ("(a(b)c)", success(val([sym("a"), val([sym("b")]), sym("c")]))),
        ]);
    }

    #[test]
    fn test_prefixes() {
        let wrap = |name: &str, inner: Value| val([sym(name), inner]);
        run_parse_tests(vec![
            ("'x", success(wrap("quote", sym("x")))),
            ("'(1 2)", success(wrap("quote", val([1, 2])))),
            ("`x", success(wrap("quasiquote", sym("x")))),
            (",x", success(wrap("unquote", sym("x")))),
            (",@xs", success(wrap("unquote-splicing", sym("xs")))),
            ("''a", success(wrap("quote", wrap("quote", sym("a"))))),
            (
                "`(a ,b ,@c)",
                success(wrap(
                    "quasiquote",
                    val([
                        sym("a"),
                        wrap("unquote", sym("b")),
                        wrap("unquote-splicing", sym("c")),
                    ]),
                )),
            ),
            ("' x", success(wrap("quote", sym("x")))),
        ]);
    }

    #[test]
    fn test_errors() {
        run_parse_tests(vec![
            ("", FailsWith(ParseErrorKind::Incomplete)),
            ("   ", FailsWith(ParseErrorKind::Incomplete)),
            ("(1 2", FailsWith(ParseErrorKind::Incomplete)),
            ("\"open", FailsWith(ParseErrorKind::Incomplete)),
            ("'", FailsWith(ParseErrorKind::Incomplete)),
            ("(a .", FailsWith(ParseErrorKind::Incomplete)),
            (")", FailsWith(ParseErrorKind::InvalidSyntax)),
            ("[1 2]", FailsWith(ParseErrorKind::InvalidSyntax)),
            ("(. a)", SpecificError("Invalid token: '.'")),
            ("a.b", SpecificError("Invalid token: 'a.b'")),
            ("1x", SpecificError("Invalid token: '1x'")),
            ("(a . b c)", FailsWith(ParseErrorKind::InvalidSyntax)),
            (r#""bad \q escape""#, SpecificError("Invalid escape sequence")),
            ("1 2", FailsWith(ParseErrorKind::TrailingContent)),
            ("(a))", SpecificError("Unexpected remaining input: ')'")),
            (
                "99999999999999999999",
                FailsWith(ParseErrorKind::ImplementationLimit),
            ),
            ("(1 99999999999999999999)", SpecificError("out of range")),
            ("(a b", AnyError),
        ]);
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&ok).is_ok());

        let n = MAX_PARSE_DEPTH + 10;
        let deep = format!("{}x{}", "(".repeat(n), ")".repeat(n));
        assert_eq!(parse(&deep).unwrap_err().kind, ParseErrorKind::TooDeeplyNested);

        let quotes = format!("{}x", "'".repeat(MAX_PARSE_DEPTH + 10));
        assert_eq!(parse(&quotes).unwrap_err().kind, ParseErrorKind::TooDeeplyNested);
    }

    #[test]
    fn test_comments() {
        let source = "; leading comment\n(a ; inside\n b) ; trailing";
        assert_eq!(parse(source).unwrap(), val([sym("a"), sym("b")]));

        let no_comments = ReaderConfig {
            handle_comments: false,
        };
        assert!(parse_with_config(source, no_comments).is_err());
        assert_eq!(parse_with_config("(a b)", no_comments).unwrap(), val([sym("a"), sym("b")]));
    }

    #[test]
    fn test_parse_program() {
        let program = parse_program("(setq a 1)\n; comment\n(+ a 2) 'done\n").unwrap();
        assert_eq!(
            program,
            val([
                val([sym("setq"), sym("a"), val(1)]),
                val([sym("+"), sym("a"), val(2)]),
                val([sym("quote"), sym("done")]),
            ])
        );

        assert_eq!(parse_program("").unwrap(), nil());
        assert_eq!(parse_program("  ; only a comment").unwrap(), nil());
        assert_eq!(
            parse_program("(ok) (broken").unwrap_err().kind,
            ParseErrorKind::Incomplete
        );
    }

    #[test]
    fn test_error_context() {
        let err = parse("(foo bar) baz").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingContent);
        assert_eq!(err.found.as_deref(), Some("b"));
        assert!(err.context.unwrap().contains("baz"));

        let err = parse("(list 1 (a.b))").unwrap_err();
        assert_eq!(err.found.as_deref(), Some("a"));
    }
}
