#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the rig console.
//!
//! The lexer uses `regal` to produce a bounded token stream, while the parser
//! composes `winnow` combinators over those tokens to build structured command
//! values. Keywords are matched case-insensitively.
//!
//! ```text
//! start <test-id> dwell=<duration> speeds=<value>[,<value>...]
//! abort
//! status
//! log [count]
//! help [topic]
//! ```

use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;

use crate::ramp::{MAX_SETPOINTS, Setpoints};

/// Maximum number of tokens produced per console line; sized for a full ramp.
pub const MAX_TOKENS: usize = 96;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Fractional or negative number (`0.5`, `.25`, `-0.1`, `-2`).
    #[regex(r"-?(?:[0-9]+\.[0-9]*|\.[0-9]+)|-[0-9]+", priority = 2)]
    Decimal,
    /// Duration literal ending in `ms` or `s`.
    #[regex(r"[0-9]+(?:ms|s)", priority = 2)]
    Duration,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9_-]*")]
    Ident,
    /// Equals sign for key/value assignments.
    #[token("=")]
    Equals,
    /// Comma separator between ramp values.
    #[token(",")]
    Comma,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer to avoid dynamic allocation in `no_std` environments.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownCommand {
        lexeme: &'a str,
    },
    UnknownKey {
        lexeme: &'a str,
    },
    DuplicateKey {
        key: &'static str,
    },
    MissingKey {
        key: &'static str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    TooManySpeeds {
        max: usize,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl<'a> fmt::Display for GrammarErrorKind<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::UnknownCommand { lexeme } => {
                write!(f, "unknown command `{lexeme}` (try `help`)")
            }
            GrammarErrorKind::UnknownKey { lexeme } => {
                write!(f, "unknown key `{lexeme}` (expected dwell or speeds)")
            }
            GrammarErrorKind::DuplicateKey { key } => write!(f, "`{key}` given twice"),
            GrammarErrorKind::MissingKey { key } => write!(f, "missing `{key}=`"),
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "invalid number at {span:?}")
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration literal at {span:?}")
            }
            GrammarErrorKind::TooManySpeeds { max } => {
                write!(f, "too many speeds (max {max})")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl<'a> fmt::Display for GrammarError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    const fn new(kind: GrammarErrorKind<'a>) -> Self {
        GrammarError { kind }
    }

    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError::new(match token {
            Some(tok) if tok.kind == TokenKind::Eol => GrammarErrorKind::UnexpectedEnd { expected },
            Some(tok) => GrammarErrorKind::UnexpectedToken {
                expected,
                found: Some(tok.kind),
                span: tok.span.clone(),
            },
            None => GrammarErrorKind::UnexpectedEnd { expected },
        })
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError::new(GrammarErrorKind::InvalidNumber {
            span: token.span.clone(),
        })
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError::new(GrammarErrorKind::InvalidDuration {
            span: token.span.clone(),
        })
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError::new(GrammarErrorKind::InvalidToken {
            span: token.span.clone(),
            lexeme: token.lexeme,
        })
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    type Inner = Self;

    fn from_input(input: &Input<'src, 'slice>) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn into_inner(self) -> Result<Self::Inner, Self> {
        Ok(self)
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

type Parsed<'src, T> = Result<T, ErrMode<GrammarError<'src>>>;

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl<'a> fmt::Display for ParseError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    Start(StartCommand<'a>),
    Abort,
    Status,
    Log(LogCommand),
    Help(HelpCommand<'a>),
}

/// `start` arguments. Speeds are passed through unclamped.
#[derive(Clone, Debug, PartialEq)]
pub struct StartCommand<'a> {
    pub test_id: &'a str,
    pub dwell: Duration,
    pub speeds: Setpoints,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogCommand {
    pub count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: MAX_TOKENS + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err)) | Err(ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    while let Some((token, remaining)) = input.split_first() {
        if token.kind == TokenKind::Eol {
            input = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;
        let word = keyword.lexeme;

        if word.eq_ignore_ascii_case("start") {
            start_args().parse_next(input).map(Command::Start)
        } else if word.eq_ignore_ascii_case("abort") {
            Ok(Command::Abort)
        } else if word.eq_ignore_ascii_case("status") {
            Ok(Command::Status)
        } else if word.eq_ignore_ascii_case("log") {
            let count = optional_count(input)?;
            Ok(Command::Log(LogCommand { count }))
        } else if word.eq_ignore_ascii_case("help") {
            let topic = optional_topic(input);
            Ok(Command::Help(HelpCommand { topic }))
        } else {
            Err(ErrMode::Cut(GrammarError::new(
                GrammarErrorKind::UnknownCommand { lexeme: word },
            )))
        }
    }
}

fn start_args<'src, 'slice>()
-> impl Parser<Input<'src, 'slice>, StartCommand<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let test_id = match input.split_first() {
            Some((token, rest)) if matches!(token.kind, TokenKind::Ident | TokenKind::Integer) => {
                *input = rest;
                token.lexeme
            }
            other => {
                return Err(ErrMode::Cut(GrammarError::unexpected(
                    "test id",
                    other.map(|(token, _)| token),
                )));
            }
        };

        let mut dwell = None;
        let mut speeds = None;

        while let Some((token, rest)) = input.split_first() {
            if token.kind == TokenKind::Eol {
                break;
            }
            if token.kind != TokenKind::Ident {
                return Err(ErrMode::Cut(GrammarError::unexpected(
                    "dwell= or speeds=",
                    Some(token),
                )));
            }
            *input = rest;
            let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;

            if token.lexeme.eq_ignore_ascii_case("dwell") {
                if dwell.is_some() {
                    return Err(duplicate("dwell"));
                }
                dwell = Some(dwell_value(input)?);
            } else if token.lexeme.eq_ignore_ascii_case("speeds") {
                if speeds.is_some() {
                    return Err(duplicate("speeds"));
                }
                speeds = Some(speed_list(input)?);
            } else {
                return Err(ErrMode::Cut(GrammarError::new(
                    GrammarErrorKind::UnknownKey {
                        lexeme: token.lexeme,
                    },
                )));
            }
        }

        let dwell = dwell.ok_or_else(|| missing("dwell"))?;
        let speeds = speeds.ok_or_else(|| missing("speeds"))?;
        Ok(StartCommand {
            test_id,
            dwell,
            speeds,
        })
    }
}

fn duplicate<'src>(key: &'static str) -> ErrMode<GrammarError<'src>> {
    ErrMode::Cut(GrammarError::new(GrammarErrorKind::DuplicateKey { key }))
}

fn missing<'src>(key: &'static str) -> ErrMode<GrammarError<'src>> {
    ErrMode::Cut(GrammarError::new(GrammarErrorKind::MissingKey { key }))
}

fn dwell_value<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
) -> Parsed<'src, Duration>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Duration => {
            *input = rest;
            parse_duration(token).map_err(ErrMode::Cut)
        }
        Some((token, rest)) if token.kind == TokenKind::Integer => {
            *input = rest;
            token
                .lexeme
                .parse::<u32>()
                .map(|millis| Duration::from_millis(millis.into()))
                .map_err(|_| ErrMode::Cut(GrammarError::invalid_duration(token)))
        }
        other => Err(ErrMode::Cut(GrammarError::unexpected(
            "duration",
            other.map(|(token, _)| token),
        ))),
    }
}

fn speed_list<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
) -> Parsed<'src, Setpoints>
where
    'src: 'slice,
{
    let mut speeds = Setpoints::new();
    loop {
        let token = match input.split_first() {
            Some((token, rest)) if matches!(token.kind, TokenKind::Decimal | TokenKind::Integer) => {
                *input = rest;
                token
            }
            other => {
                return Err(ErrMode::Cut(GrammarError::unexpected(
                    "speed value",
                    other.map(|(token, _)| token),
                )));
            }
        };

        let value = parse_number(token).map_err(ErrMode::Cut)?;
        if speeds.push(value).is_err() {
            return Err(ErrMode::Cut(GrammarError::new(
                GrammarErrorKind::TooManySpeeds { max: MAX_SETPOINTS },
            )));
        }

        match input.split_first() {
            Some((token, rest)) if token.kind == TokenKind::Comma => *input = rest,
            _ => return Ok(speeds),
        }
    }
}

fn optional_count<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
) -> Parsed<'src, Option<usize>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Integer => {
            *input = rest;
            token
                .lexeme
                .parse::<usize>()
                .map(Some)
                .map_err(|_| ErrMode::Cut(GrammarError::invalid_number(token)))
        }
        _ => Ok(None),
    }
}

fn optional_topic<'src, 'slice>(input: &mut Input<'src, 'slice>) -> Option<&'src str>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            *input = rest;
            Some(token.lexeme)
        }
        _ => None,
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_number<'a>(token: &Token<'a>) -> Result<f32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<f32>()
        .map_err(|_| GrammarError::invalid_number(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    if let Some(rest) = text.strip_suffix("ms") {
        let millis = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some(rest) = text.strip_suffix('s') {
        let seconds = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_secs(seconds.into()))
    } else {
        Err(GrammarError::invalid_duration(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    fn grammar_error(input: &str) -> GrammarErrorKind<'_> {
        match parse(input) {
            Err(ParseError::Grammar(err)) => err.kind,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_start_with_keys_in_any_order() {
        let expected = StartCommand {
            test_id: "bench-1",
            dwell: Duration::from_millis(250),
            speeds: Setpoints::from_slice(&[0.0, 0.5, 1.0]).unwrap(),
        };

        assert_eq!(
            parse_ok("start bench-1 dwell=250ms speeds=0,0.5,1.0"),
            Command::Start(expected.clone())
        );
        assert_eq!(
            parse_ok("start bench-1 speeds=0, 0.5 ,1.0 dwell=250ms\r\n"),
            Command::Start(expected)
        );
    }

    #[test]
    fn dwell_accepts_seconds_and_bare_milliseconds() {
        match parse_ok("start t dwell=2s speeds=.25") {
            Command::Start(start) => {
                assert_eq!(start.dwell, Duration::from_secs(2));
                assert_eq!(start.speeds.as_slice(), &[0.25]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        match parse_ok("start t dwell=1500 speeds=1") {
            Command::Start(start) => assert_eq!(start.dwell, Duration::from_millis(1_500)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_speeds_are_passed_through() {
        match parse_ok("start clamp dwell=10ms speeds=-0.5,1.5") {
            Command::Start(start) => assert_eq!(start.speeds.as_slice(), &[-0.5, 1.5]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn numeric_test_ids_are_accepted() {
        match parse_ok("start 42 dwell=1s speeds=0.1") {
            Command::Start(start) => assert_eq!(start.test_id, "42"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn start_requires_both_keys() {
        assert_eq!(
            grammar_error("start t dwell=1s"),
            GrammarErrorKind::MissingKey { key: "speeds" }
        );
        assert_eq!(
            grammar_error("start t speeds=0.1"),
            GrammarErrorKind::MissingKey { key: "dwell" }
        );
        assert_eq!(
            grammar_error("start t dwell=1s dwell=2s speeds=0.1"),
            GrammarErrorKind::DuplicateKey { key: "dwell" }
        );
        assert_eq!(
            grammar_error("start t delay=1s"),
            GrammarErrorKind::UnknownKey { lexeme: "delay" }
        );
    }

    #[test]
    fn start_without_id_reports_missing_test_id() {
        assert_eq!(
            grammar_error("start"),
            GrammarErrorKind::UnexpectedEnd {
                expected: "test id"
            }
        );
    }

    #[test]
    fn rejects_trailing_comma() {
        assert!(matches!(
            grammar_error("start t dwell=1s speeds=0.1,"),
            GrammarErrorKind::UnexpectedEnd {
                expected: "speed value"
            }
        ));
    }

    #[test]
    fn rejects_more_speeds_than_a_ramp_holds() {
        let mut line: heapless::String<256> = heapless::String::new();
        line.push_str("start t dwell=1s speeds=0").unwrap();
        for _ in 0..MAX_SETPOINTS {
            line.push_str(",0").unwrap();
        }

        assert_eq!(
            grammar_error(&line),
            GrammarErrorKind::TooManySpeeds { max: MAX_SETPOINTS }
        );
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_ok("abort"), Command::Abort);
        assert_eq!(parse_ok("STATUS"), Command::Status);
        assert_eq!(parse_ok("log"), Command::Log(LogCommand { count: None }));
        assert_eq!(
            parse_ok("log 20"),
            Command::Log(LogCommand { count: Some(20) })
        );
        assert_eq!(
            parse_ok("help start"),
            Command::Help(HelpCommand {
                topic: Some("start"),
            })
        );
        assert_eq!(parse_ok("Help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            grammar_error("reboot now"),
            GrammarErrorKind::UnknownCommand { lexeme: "reboot" }
        );
    }

    #[test]
    fn rejects_trailing_arguments() {
        assert!(matches!(
            grammar_error("abort now"),
            GrammarErrorKind::UnexpectedToken {
                expected: "end of command",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        assert!(matches!(
            grammar_error("status$"),
            GrammarErrorKind::InvalidToken { lexeme: "$", .. }
        ));
    }

    #[test]
    fn lexer_classifies_numbers() {
        let tokens = lex("250ms 12 0.5 -1 .75").expect("lexing should succeed");
        let kinds: HeaplessVec<TokenKind, 8> = tokens.iter().map(|token| token.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[
                TokenKind::Duration,
                TokenKind::Integer,
                TokenKind::Decimal,
                TokenKind::Decimal,
                TokenKind::Decimal,
            ]
        );
    }
}
