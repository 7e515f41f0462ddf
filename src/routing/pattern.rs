//! Suffix patterns.
//!
//! A suffix pattern is literal text with printf-style placeholders:
//!
//! | placeholder | matches                      | natural conversion |
//! |-------------|------------------------------|--------------------|
//! | `%d`        | `-?[0-9]+`                   | [`Conversion::Int`]   |
//! | `%u`        | `[0-9]+`                     | [`Conversion::Int`]   |
//! | `%f`        | decimal float with exponent  | [`Conversion::Float`] |
//! | `%x`        | `[0-9a-fA-F]+`               | [`Conversion::Hex`]   |
//! | `%s`        | `[^/]+`                      | [`Conversion::Str`]   |
//!
//! `%%` is a literal percent sign. Matching is anchored at both ends; a
//! trailing `.ext` outside every placeholder is reported separately as the
//! format extension.

use crate::routing::RouteError;

/// How a captured substring is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Str,
    Int,
    Float,
    Hex,
}

impl Conversion {
    pub fn apply(self, raw: &str) -> Capture {
        match self {
            Conversion::Str => Capture::Str(raw.to_string()),
            Conversion::Int => raw.parse().map(Capture::Int).unwrap_or(Capture::None),
            Conversion::Float => raw.parse().map(Capture::Float).unwrap_or(Capture::None),
            Conversion::Hex => i64::from_str_radix(raw, 16)
                .map(Capture::Int)
                .unwrap_or(Capture::None),
        }
    }
}

/// A converted path capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Str(String),
    Int(i64),
    Float(f64),
    /// The capture did not survive its conversion (e.g. integer overflow).
    None,
}

impl Capture {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Capture::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Capture::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Capture::Float(f) => Some(*f),
            Capture::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Signed,
    Unsigned,
    Float,
    Hex,
    Segment,
}

impl Class {
    fn natural_conversion(self) -> Conversion {
        match self {
            Class::Signed | Class::Unsigned => Conversion::Int,
            Class::Float => Conversion::Float,
            Class::Hex => Conversion::Hex,
            Class::Segment => Conversion::Str,
        }
    }

    /// Characters that may appear anywhere in a match of this class.
    fn admits(self, c: char) -> bool {
        match self {
            Class::Signed => c.is_ascii_digit() || c == '-',
            Class::Unsigned => c.is_ascii_digit(),
            Class::Float => c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'),
            Class::Hex => c.is_ascii_hexdigit(),
            Class::Segment => c != '/',
        }
    }

    /// Whether a whole candidate string is a match.
    fn accepts(self, s: &str) -> bool {
        match self {
            Class::Signed => {
                let digits = s.strip_prefix('-').unwrap_or(s);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            Class::Unsigned | Class::Hex => !s.is_empty(),
            Class::Float => is_float(s),
            Class::Segment => !s.is_empty(),
        }
    }
}

/// `[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?`
fn is_float(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa = i > int_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        mantissa |= i > frac_start;
    }
    if !mantissa {
        return false;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == b.len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(Class),
}

/// A compiled suffix pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixPattern {
    source: String,
    segments: Vec<Segment>,
}

/// Result of a successful suffix match: capture spans and the extension.
#[derive(Debug, PartialEq, Eq)]
pub struct SuffixMatch<'a> {
    pub captures: Vec<&'a str>,
    pub ext: Option<&'a str>,
}

impl SuffixPattern {
    pub fn compile(source: &str) -> Result<Self, RouteError> {
        let bad = |reason: &str| RouteError::BadPattern {
            pattern: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            if c == '\n' {
                return Err(bad("newline in pattern"));
            }
            if c != '%' {
                literal.push(c);
                continue;
            }
            let class = match chars.next() {
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some('d') => Class::Signed,
                Some('u') => Class::Unsigned,
                Some('f') => Class::Float,
                Some('x') => Class::Hex,
                Some('s') => Class::Segment,
                Some(other) => return Err(bad(&format!("unknown placeholder %{other}"))),
                None => return Err(bad("dangling %")),
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Capture(class));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn empty() -> Self {
        Self {
            source: String::new(),
            segments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn capture_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Capture(_)))
            .count()
    }

    /// The conversions implied by each placeholder, in order.
    pub fn natural_conversions(&self) -> Vec<Conversion> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Capture(class) => Some(class.natural_conversion()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Matches the whole of `input`, optionally minus a trailing `.ext`.
    ///
    /// With `ext_first` the extension is split off before trying the full
    /// input; otherwise captures get the first chance to consume it.
    pub fn matches<'a>(&self, input: &'a str, ext_first: bool) -> Option<SuffixMatch<'a>> {
        let split = split_ext(input);
        let attempts: [Option<(&'a str, Option<&'a str>)>; 2] = if ext_first {
            [split, Some((input, None))]
        } else {
            [Some((input, None)), split]
        };

        for (body, ext) in attempts.into_iter().flatten() {
            let mut spans = Vec::with_capacity(self.segments.len());
            if match_segments(&self.segments, body, 0, &mut spans) {
                let captures = spans.into_iter().map(|(s, e)| &body[s..e]).collect();
                return Some(SuffixMatch { captures, ext });
            }
        }
        None
    }
}

/// Splits `name.ext` where `ext` is non-empty ASCII alphanumerics.
pub fn split_ext(input: &str) -> Option<(&str, Option<&str>)> {
    let dot = input.rfind('.')?;
    let ext = &input[dot + 1..];
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some((&input[..dot], Some(ext)))
}

/// Parses a remainder that must be exactly `.ext`.
pub fn parse_format_ext(rest: &str) -> Option<&str> {
    let ext = rest.strip_prefix('.')?;
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

fn match_segments(segments: &[Segment], input: &str, at: usize, spans: &mut Vec<(usize, usize)>) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return at == input.len();
    };
    let tail = &input[at..];
    match first {
        Segment::Literal(lit) => {
            tail.starts_with(lit.as_str()) && match_segments(rest, input, at + lit.len(), spans)
        }
        Segment::Capture(class) => {
            let run = tail
                .char_indices()
                .find(|(_, c)| !class.admits(*c))
                .map(|(i, _)| i)
                .unwrap_or(tail.len());
            // Greedy: longest candidate first, then back off.
            let mut ends: Vec<usize> = tail[..run]
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .collect();
            ends.reverse();
            for end in ends {
                if !class.accepts(&tail[..end]) {
                    continue;
                }
                spans.push((at, at + end));
                if match_segments(rest, input, at + end, spans) {
                    return true;
                }
                spans.pop();
            }
            false
        }
    }
}
