//! Parsers for the configuration-level languages: log format templates,
//! filter expressions and nginx configuration files.

pub mod filter;
pub mod log_format;
pub mod nginx_conf;

use nom::character::complete::one_of;
use nom::error::{Error, ErrorKind};
use nom::IResult;

/// Single- or double-quoted string with backslash escapes.
pub(crate) fn quoted_string(i: &str) -> IResult<&str, String> {
    quoted(i, false)
}

/// Quoted string as nginx reads it: unknown escapes such as `\d` keep
/// their backslash.
pub(crate) fn conf_string(i: &str) -> IResult<&str, String> {
    quoted(i, true)
}

fn quoted(i: &str, keep_unknown_escapes: bool) -> IResult<&str, String> {
    let (body, quote) = one_of("'\"")(i)?;
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        if c == quote {
            return Ok((&body[idx + 1..], out));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, escaped @ ('"' | '\'' | '\\'))) => out.push(escaped),
                Some((_, escaped)) => {
                    if keep_unknown_escapes {
                        out.push('\\');
                    }
                    out.push(escaped);
                }
                None => break,
            }
        } else {
            out.push(c);
        }
    }

    Err(nom::Err::Error(Error::new(i, ErrorKind::Char)))
}

#[cfg(test)]
mod tests {
    use super::{conf_string, quoted_string};

    #[test]
    fn it_parses_quoted_strings() {
        assert_eq!(quoted_string("'a b' rest"), Ok((" rest", "a b".to_owned())));
        assert_eq!(quoted_string(r#""say \"hi\"""#), Ok(("", "say \"hi\"".to_owned())));
        assert_eq!(quoted_string("''"), Ok(("", String::new())));
        assert!(quoted_string("'open").is_err());
        assert!(quoted_string("bare").is_err());
    }

    #[test]
    fn conf_strings_keep_unknown_escapes() {
        assert_eq!(conf_string(r"'\d+ \$x'"), Ok(("", r"\d+ \$x".to_owned())));
        assert_eq!(conf_string(r#""a\"b\\c\t""#), Ok(("", "a\"b\\c\t".to_owned())));
        assert_eq!(quoted_string(r"'\d'"), Ok(("", "d".to_owned())));
    }
}
