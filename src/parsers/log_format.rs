//! Compiles nginx `log_format` templates into line matchers.
//!
//! Templates use the same placeholder syntax as the `log_format`
//! directive (`$name` or `${name}`), so formats can be copied verbatim
//! from an nginx configuration.

use std::collections::BTreeSet;

use nom::branch::alt;
use nom::bytes::complete::{take_till1, take_while1};
use nom::character::complete::char;
use nom::combinator::map;
use nom::sequence::{delimited, preceded};
use nom::IResult;
use regex::Regex;

use crate::error::ConfigError;
use crate::record::{Record, Value};

/// nginx's built-in `combined` format.
pub const LOG_FORMAT_COMBINED: &str = "$remote_addr - $remote_user [$time_local] \
     \"$request\" $status $body_bytes_sent \
     \"$http_referer\" \"$http_user_agent\"";

/// Common log format with the forwarded-for address appended.
pub const LOG_FORMAT_COMMON: &str = "$remote_addr - $remote_user [$time_local] \
     \"$request\" $status $body_bytes_sent \
     \"$http_x_forwarded_for\"";

/// Variables that always log as a run of digits (or `-` when unset).
const NUMERIC_VARIABLES: &[&str] = &[
    "status",
    "body_bytes_sent",
    "bytes_sent",
    "request_length",
    "connection",
    "connection_requests",
    "pid",
];

/// Expands the names of built-in formats, returning anything else as is.
pub fn resolve_named_format(format: &str) -> &str {
    match format {
        "combined" => LOG_FORMAT_COMBINED,
        "common" => LOG_FORMAT_COMMON,
        other => other,
    }
}

/// Piece of a template: verbatim text or a named variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

/// How a variable's value is matched within a line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TokenClass {
    /// Everything up to the closing quote.
    Quoted,
    /// Everything up to the closing bracket.
    Bracketed,
    /// Digits, or the `-` sentinel.
    Numeric,
    /// Seconds with optional fraction, or `-`.
    Duration,
    /// `$time_local` outside of brackets: date plus UTC offset.
    LocalTime,
    /// A run of non-whitespace characters.
    Token,
}

impl TokenClass {
    fn rule(&self) -> &'static str {
        match *self {
            TokenClass::Quoted => r#"([^"]*)"#,
            TokenClass::Bracketed => r"([^\]]*)",
            TokenClass::Numeric => r"(-|\d*)",
            TokenClass::Duration => r"(-|\d+(?:\.\d+)?)",
            TokenClass::LocalTime => r"(\S+(?: [+-]\d{4})?)",
            TokenClass::Token => r"(\S*)",
        }
    }

    fn classify(name: &str, before: Option<char>, after: Option<char>) -> TokenClass {
        if before == Some('"') || after == Some('"') {
            return TokenClass::Quoted;
        }
        if before == Some('[') && after == Some(']') {
            return TokenClass::Bracketed;
        }
        if NUMERIC_VARIABLES.contains(&name) {
            return TokenClass::Numeric;
        }
        if name == "time_local" {
            return TokenClass::LocalTime;
        }
        // upstream_* timings list one value per upstream tried
        if name == "time_iso8601" || name.starts_with("upstream_") {
            return TokenClass::Token;
        }
        if name.contains("time") || name == "msec" {
            return TokenClass::Duration;
        }
        TokenClass::Token
    }
}

/// A parsed `log_format` template.
#[derive(Clone, Debug, PartialEq)]
pub struct LogFormat {
    template: String,
    segments: Vec<Segment>,
}

impl LogFormat {
    /// Splits `template` into literal and variable segments. Built-in
    /// format names are expanded first.
    pub fn parse(template: &str) -> Result<LogFormat, ConfigError> {
        let template = resolve_named_format(template);
        let mut segments = vec![];
        let mut rest = template;

        while !rest.is_empty() {
            match alt((parse_variable, parse_literal))(rest) {
                Ok((remaining, segment)) => {
                    segments.push(segment);
                    rest = remaining;
                }
                Err(_) => {
                    return Err(ConfigError::MalformedFormat {
                        offset: template.len() - rest.len(),
                        reason: "`$` must be followed by a variable name".to_owned(),
                    })
                }
            }
        }

        let format = LogFormat {
            template: template.to_owned(),
            segments,
        };

        let mut seen = BTreeSet::new();
        for name in format.variables() {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateVariable(name.to_owned()));
            }
        }
        if seen.is_empty() {
            return Err(ConfigError::NoVariables(format.template));
        }

        Ok(format)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable names in template order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match *segment {
            Segment::Variable(ref name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Builds the anchored matcher for this format.
    pub fn compile(&self) -> Result<Pattern, ConfigError> {
        let mut source = String::from("^");
        let mut names = vec![];

        for (i, segment) in self.segments.iter().enumerate() {
            match *segment {
                Segment::Literal(ref text) => source.push_str(&regex::escape(text)),
                Segment::Variable(ref name) => {
                    let before = i
                        .checked_sub(1)
                        .and_then(|j| literal_at(&self.segments, j))
                        .and_then(|text| text.chars().last());
                    let after = literal_at(&self.segments, i + 1).and_then(|text| text.chars().next());

                    source.push_str(TokenClass::classify(name, before, after).rule());
                    names.push(name.clone());
                }
            }
        }
        source.push('$');

        Ok(Pattern {
            regex: Regex::new(&source)?,
            names,
        })
    }
}

fn literal_at(segments: &[Segment], i: usize) -> Option<&str> {
    match segments.get(i) {
        Some(&Segment::Literal(ref text)) => Some(text),
        _ => None,
    }
}

fn is_variable_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn variable_name(i: &str) -> IResult<&str, &str> {
    take_while1(is_variable_char)(i)
}

fn parse_variable(i: &str) -> IResult<&str, Segment> {
    map(
        preceded(
            char('$'),
            alt((delimited(char('{'), variable_name, char('}')), variable_name)),
        ),
        |name: &str| Segment::Variable(name.to_owned()),
    )(i)
}

fn parse_literal(i: &str) -> IResult<&str, Segment> {
    map(take_till1(|c: char| c == '$'), |text: &str| {
        Segment::Literal(text.to_owned())
    })(i)
}

/// Compiles a template (or built-in format name) straight to a matcher.
pub fn build_pattern(template: &str) -> Result<Pattern, ConfigError> {
    LogFormat::parse(template)?.compile()
}

/// Sorted set of variable names a template exposes.
pub fn extract_variables(template: &str) -> Result<BTreeSet<String>, ConfigError> {
    let format = LogFormat::parse(template)?;

    Ok(format.variables().map(str::to_owned).collect())
}

/// Compiled matcher for one log format.
#[derive(Clone, Debug)]
pub struct Pattern {
    regex: Regex,
    names: Vec<String>,
}

impl Pattern {
    /// Matches a whole line, returning every variable as a string field.
    pub fn captures(&self, line: &str) -> Option<Record> {
        let captures = self.regex.captures(line)?;

        Some(
            self.names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    captures
                        .get(i + 1)
                        .map(|m| (name.clone(), Value::Str(m.as_str().to_owned())))
                })
                .collect(),
        )
    }
}
