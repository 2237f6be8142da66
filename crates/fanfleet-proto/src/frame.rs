// ── Low-level frame shape ──
//
// Both protocol families share `SEQ|KEYWORD|payload...`: fields split on
// `|`, lists inside a field split on `,`. Everything here is total -- any
// input yields either fields or a `DecodeError`, never a panic.

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// Sequence number carried in the first field of every frame.
pub type Seq = u64;

/// Primary field delimiter (reserved, never appears inside a field).
pub const DELIMITER: char = '|';

/// Secondary delimiter for list-valued fields.
pub const LIST_DELIMITER: char = ',';

/// Delimiter between handshake parameters inside the configuration field.
pub const PARAM_DELIMITER: char = ' ';

/// Why a datagram was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram is empty")]
    Empty,

    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("wrong field count: expected {expected}, got {got}")]
    Arity { expected: &'static str, got: usize },

    #[error("field `{field}` is not a valid integer: {value:?}")]
    BadInteger { field: &'static str, value: String },

    #[error("field `{field}` is not a finite number: {value:?}")]
    BadNumber { field: &'static str, value: String },

    #[error("field `{field}` is not a port in 1-65535: {value:?}")]
    BadPort { field: &'static str, value: String },

    #[error("invalid hardware address {value:?}")]
    BadAddress { value: String },

    #[error("unknown keyword {0:?}")]
    UnknownKeyword(String),
}

/// Split a raw datagram into its sequence number and remaining fields.
pub(crate) fn split(bytes: &[u8]) -> Result<(Seq, Vec<&str>), DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut fields = text.split(DELIMITER);
    // `split` always yields at least one item for non-empty input.
    let seq_raw = fields.next().unwrap_or_default();
    let seq = parse_int("seq", seq_raw)?;
    Ok((seq, fields.collect()))
}

pub(crate) fn parse_int<T: FromStr>(field: &'static str, raw: &str) -> Result<T, DecodeError> {
    raw.parse().map_err(|_| DecodeError::BadInteger {
        field,
        value: raw.to_owned(),
    })
}

pub(crate) fn parse_number(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::BadNumber {
            field,
            value: raw.to_owned(),
        }),
    }
}

pub(crate) fn parse_port(field: &'static str, raw: &str) -> Result<u16, DecodeError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(DecodeError::BadPort {
            field,
            value: raw.to_owned(),
        }),
    }
}

/// Parse a `,`-separated list. An empty field is an empty list.
pub(crate) fn parse_list<T>(
    field: &'static str,
    raw: &str,
    parse: impl Fn(&'static str, &str) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(LIST_DELIMITER).map(|item| parse(field, item)).collect()
}

pub(crate) fn join_list<T: Display>(items: &[T]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(LIST_DELIMITER);
        }
        out.push_str(&item.to_string());
    }
    out
}

/// Duty cycles travel with four decimals.
pub(crate) fn format_duty_cycle(dc: f64) -> String {
    format!("{dc:.4}")
}

pub(crate) fn join_duty_cycles(dcs: &[f64]) -> String {
    let formatted: Vec<String> = dcs.iter().copied().map(format_duty_cycle).collect();
    formatted.join(",")
}

/// Strip the reserved delimiter out of free text placed in a field.
pub(crate) fn sanitize(text: &str) -> String {
    text.replace(DELIMITER, "/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn split_parses_sequence_and_fields() {
        let (seq, fields) = split(b"12|STD|a,b").unwrap();
        assert_eq!(seq, 12);
        assert_eq!(fields, vec!["STD", "a,b"]);
    }

    #[test]
    fn split_rejects_negative_and_garbage_sequence() {
        assert!(matches!(split(b"-1|X"), Err(DecodeError::BadInteger { .. })));
        assert!(matches!(split(b"abc"), Err(DecodeError::BadInteger { .. })));
        assert_eq!(split(b""), Err(DecodeError::Empty));
        assert_eq!(split(&[0xff, 0xfe]), Err(DecodeError::NotUtf8));
    }

    #[test]
    fn split_tolerates_trailing_newline() {
        let (seq, fields) = split(b"3|SHSK\n").unwrap();
        assert_eq!(seq, 3);
        assert_eq!(fields, vec!["SHSK"]);
    }

    #[test]
    fn empty_list_field_is_empty_vec() {
        let v: Vec<u32> = parse_list("rpm", "", parse_int).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn numbers_must_be_finite() {
        assert!(parse_number("dc", "NaN").is_err());
        assert!(parse_number("dc", "inf").is_err());
        assert_eq!(parse_number("dc", "0.25").unwrap(), 0.25);
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(parse_port("port", "0").is_err());
        assert!(parse_port("port", "65536").is_err());
        assert_eq!(parse_port("port", "65535").unwrap(), 65535);
    }
}
