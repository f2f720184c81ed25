//! Discovers the access log and its format from an nginx configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while1};
use nom::character::complete::{char, multispace1, not_line_ending};
use nom::combinator::{map, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use regex::Regex;

use super::log_format::LOG_FORMAT_COMBINED;
use super::conf_string;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nginx/nginx.conf";

// Guards against include cycles.
const MAX_INCLUDE_DEPTH: usize = 16;

lazy_static! {
    static ref CONF_PATH_REGEX: Regex = Regex::new(r"--conf-path=(\S*)").unwrap();
    static ref PREFIX_REGEX: Regex = Regex::new(r"--prefix=(\S*)").unwrap();
}

/// Location of the main nginx config, as reported by `nginx -V`.
pub fn detect_config_path() -> PathBuf {
    let output = match Command::new("nginx").arg("-V").output() {
        Ok(output) => output,
        Err(err) => {
            tracing::info!(error = %err, "cannot run nginx -V, assuming default config path");
            return PathBuf::from(DEFAULT_CONFIG_PATH);
        }
    };

    // nginx prints its build configuration on stderr
    config_path_from_version(&String::from_utf8_lossy(&output.stderr))
}

fn config_path_from_version(version: &str) -> PathBuf {
    if let Some(path) = CONF_PATH_REGEX.captures(version).and_then(|c| c.get(1)) {
        return PathBuf::from(path.as_str());
    }
    if let Some(prefix) = PREFIX_REGEX.captures(version).and_then(|c| c.get(1)) {
        return Path::new(prefix.as_str()).join("conf/nginx.conf");
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Semicolon,
    Open,
    Close,
}

fn skip(i: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((multispace1, recognize(pair(char('#'), not_line_ending))))),
    )(i)
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !";{}'\"#$".contains(c)
}

fn bare_word(i: &str) -> IResult<&str, String> {
    map(
        recognize(many1(alt((
            take_while1(is_word_char),
            recognize(delimited(tag("${"), take_until("}"), char('}'))),
            tag("$"),
        )))),
        str::to_owned,
    )(i)
}

fn token(i: &str) -> IResult<&str, Token> {
    preceded(
        skip,
        alt((
            value(Token::Semicolon, char(';')),
            value(Token::Open, char('{')),
            value(Token::Close, char('}')),
            map(conf_string, Token::Word),
            map(bare_word, Token::Word),
        )),
    )(i)
}

fn tokenize(source: &str) -> Result<Vec<Token>, usize> {
    let mut tokens = vec![];
    let mut rest = source;

    loop {
        let (after_skip, ()) = skip(rest).map_err(|_| source.len() - rest.len())?;
        if after_skip.is_empty() {
            return Ok(tokens);
        }
        match token(after_skip) {
            Ok((remaining, token)) => {
                tokens.push(token);
                rest = remaining;
            }
            Err(_) => return Err(source.len() - after_skip.len()),
        }
    }
}

/// A simple directive and its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
}

/// All simple directives of a configuration, includes expanded, in file
/// order. Block structure is flattened away.
#[derive(Clone, Debug, PartialEq)]
pub struct NginxConf {
    path: PathBuf,
    directives: Vec<Directive>,
}

impl NginxConf {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<NginxConf, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingServerConfig(path.to_owned()));
        }

        let mut directives = vec![];
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        collect_directives(path, base, 0, &mut directives)?;

        Ok(NginxConf {
            path: path.to_owned(),
            directives,
        })
    }

    pub fn parse(path: &Path, source: &str) -> Result<NginxConf, ConfigError> {
        Ok(NginxConf {
            path: path.to_owned(),
            directives: parse_directives(path, source)?,
        })
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// `(path, format name)` for every file-backed `access_log`.
    pub fn access_logs(&self) -> Vec<(String, String)> {
        self.directives
            .iter()
            .filter(|d| d.name == "access_log")
            .filter_map(|d| {
                let path = d.args.first()?;
                if path == "off" || path.starts_with("syslog:") {
                    return None;
                }
                let format = match d.args.get(1) {
                    Some(format) if !format.contains('=') => format.clone(),
                    _ => "combined".to_owned(),
                };
                Some((path.clone(), format))
            })
            .collect()
    }

    /// Format name to template for every `log_format`.
    pub fn log_formats(&self) -> BTreeMap<String, String> {
        self.directives
            .iter()
            .filter(|d| d.name == "log_format")
            .filter_map(|d| {
                let (name, parts) = d.args.split_first()?;
                let template: String = parts
                    .iter()
                    .filter(|part| !part.starts_with("escape="))
                    .map(String::as_str)
                    .collect();
                Some((name.clone(), template))
            })
            .collect()
    }

    /// The single configured access log and its format template.
    pub fn detect_log_config(&self) -> Result<(PathBuf, String), ConfigError> {
        let access_logs = self.access_logs();

        let (log_file, format_name) = match access_logs.len() {
            0 => return Err(ConfigError::NoAccessLog(self.path.clone())),
            1 => access_logs[0].clone(),
            _ => {
                return Err(ConfigError::AmbiguousAccessLog(
                    access_logs.into_iter().map(|(path, _)| path).collect(),
                ))
            }
        };

        if format_name == "combined" {
            return Ok((PathBuf::from(log_file), LOG_FORMAT_COMBINED.to_owned()));
        }
        match self.log_formats().remove(&format_name) {
            Some(template) => Ok((PathBuf::from(log_file), template)),
            None => Err(ConfigError::UnknownFormatName {
                path: log_file,
                format: format_name,
            }),
        }
    }

    /// Looks up a `log_format` by name, falling back to the built-ins.
    pub fn resolve_format(&self, name: &str) -> Option<String> {
        if name == "combined" {
            return Some(LOG_FORMAT_COMBINED.to_owned());
        }
        self.log_formats().remove(name)
    }
}

fn parse_directives(path: &Path, source: &str) -> Result<Vec<Directive>, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedServerConfig {
        path: path.to_owned(),
        reason,
    };

    let tokens = tokenize(source).map_err(|offset| malformed(format!("unexpected input at byte {}", offset)))?;

    let mut directives = vec![];
    let mut words: Vec<String> = vec![];
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::Word(word) => words.push(word),
            Token::Semicolon => {
                if words.is_empty() {
                    return Err(malformed("empty directive".to_owned()));
                }
                let name = words.remove(0);
                directives.push(Directive {
                    name,
                    args: std::mem::take(&mut words),
                });
            }
            Token::Open => {
                words.clear();
                depth += 1;
            }
            Token::Close => {
                if !words.is_empty() || depth == 0 {
                    return Err(malformed("unexpected \"}\"".to_owned()));
                }
                depth -= 1;
            }
        }
    }

    if !words.is_empty() {
        return Err(malformed("unexpected end of file, expecting \";\"".to_owned()));
    }
    if depth != 0 {
        return Err(malformed("unexpected end of file, expecting \"}\"".to_owned()));
    }

    Ok(directives)
}

fn collect_directives(path: &Path, base: &Path, depth: usize, out: &mut Vec<Directive>) -> Result<(), ConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::MalformedServerConfig {
            path: path.to_owned(),
            reason: "includes nested too deeply".to_owned(),
        });
    }

    let source = fs::read_to_string(path).map_err(|source| ConfigError::ReadServerConfig {
        path: path.to_owned(),
        source,
    })?;

    for directive in parse_directives(path, &source)? {
        if directive.name != "include" {
            out.push(directive);
            continue;
        }

        for pattern in &directive.args {
            let pattern = base.join(pattern);
            let paths = match glob::glob(&pattern.to_string_lossy()) {
                Ok(paths) => paths,
                Err(err) => {
                    tracing::warn!(pattern = %pattern.display(), error = %err, "skipping include");
                    continue;
                }
            };

            let mut included: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
            included.sort();
            for included in included {
                tracing::debug!(path = %included.display(), "including nginx config");
                collect_directives(&included, base, depth + 1, out)?;
            }
        }
    }

    Ok(())
}
