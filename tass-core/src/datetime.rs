//! Precision-preserving datetime codec.
//!
//! Timestamps exchanged with the API are naive local times written in a
//! handful of shapes (date only, second precision, fractional seconds, `T` or
//! space separated, optional trailing `Z`). `ParsedDatetime` remembers the
//! shape it was parsed from so that re-serializing reproduces the original
//! string instead of a generic ISO rendering.
//!
//! Format strings use strftime syntax, with `%f` meaning "fractional seconds"
//! whose rendered width is the remembered precision (0-6 digits).

use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TassError, TassResult};

/// `YYYY-mm-dd`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `YYYY-mm-ddTHH:MM:SS.fff...`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%f";

/// Midnight of the current day, millisecond precision.
pub const TODAY_MIDNIGHT_FORMAT: &str = "%Y-%m-%dT00:00:00.000";

/// Precision used when generating timestamps locally.
pub const DEFAULT_PRECISION: u8 = 3;

/// Highest fractional-second precision kept.
pub const MAX_PRECISION: u8 = 6;

/// Formats tried, in order, when no exact format is supplied.
pub const CANDIDATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S.%f",
    "%Y-%m-%dT%H:%M:%S.%fZ",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S.%f",
    "%Y-%m-%d %H:%M:%S.%fZ",
];

/// Object keys whose values are decoded as timestamps (compared case-insensitively).
pub const FIELD_CANDIDATES: &[&str] = &[
    // date fields
    "absent_date",
    "birth_date",
    "date_arrival",
    "dob",
    "doe",
    "dol",
    "end_date",
    "expiry_date",
    "finish_date",
    "jour_date",
    "last_occ_date",
    "lst_up_date",
    "note_date",
    "photo_update_on",
    "shed_end_date",
    "shed_start_date",
    "start_date",
    "str_ent_date",
    "term_date",
    "tran_date",
    "valid_date",
    "visa_expiry",
    // datetime fields
    "corr_date",
    "date_uploaded",
    "par_date",
    "update_on",
    "updated_on",
    // time fields
    "abs_from_time",
    "abs_to_time",
    "absent_time",
    "med_time",
];

const FRACTION_TOKEN: &str = "%f";
const FRACTION_SENTINEL: &str = "\u{0}frac\u{0}";

lazy_static! {
    static ref FRACTION_RE: Regex = Regex::new(r"\.(\d+)").expect("valid fraction regex");
    static ref ISO_TIMESTAMP_RE: Regex = Regex::new(
        r"^(\d{4})-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])T([01]\d|2[0-3]):([0-5]\d):([0-5]\d)(?:\.(\d{0,6}))?$"
    )
    .expect("valid ISO timestamp regex");
}

/// How a `ParsedDatetime` came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseMethod {
    /// Parsed with a caller-supplied format.
    Exact,
    /// Parsed by one of the candidate formats.
    Heuristic,
    /// Parsed by the last-resort ISO timestamp pattern.
    Pattern,
    /// Produced by arithmetic or conversion on another value.
    Derived,
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseMethod::Exact => "exact",
            ParseMethod::Heuristic => "heuristic",
            ParseMethod::Pattern => "pattern",
            ParseMethod::Derived => "derived",
        };
        f.write_str(s)
    }
}

/// A naive timestamp plus the metadata needed to write it back in its original shape.
///
/// Equality and ordering compare the timestamp only, never the metadata.
#[derive(Debug, Clone)]
pub struct ParsedDatetime {
    value: NaiveDateTime,
    format: Option<String>,
    precision: u8,
    method: Option<ParseMethod>,
    had_z: bool,
}

impl ParsedDatetime {
    /// Wrap a timestamp with an optional render format and precision.
    pub fn new(value: NaiveDateTime, format: Option<&str>, precision: u8) -> Self {
        Self {
            value,
            format: format.map(str::to_string),
            precision: precision.min(MAX_PRECISION),
            method: None,
            had_z: false,
        }
    }

    /// Wrap a timestamp with no format metadata; renders in the generic form.
    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self::new(value, None, 0)
    }

    /// Mark the value as carrying a trailing `Z` on serialization.
    pub fn with_zulu(mut self, had_z: bool) -> Self {
        self.had_z = had_z;
        self
    }

    /// Parse using the candidate formats, then the ISO pattern fallback.
    pub fn parse(input: &str) -> TassResult<Self> {
        Self::parse_with(input, CANDIDATE_FORMATS, None, None)
    }

    /// Parse using exactly `fmt`.
    pub fn parse_with_format(input: &str, fmt: &str) -> TassResult<Self> {
        Self::parse_with(input, CANDIDATE_FORMATS, Some(fmt), None)
    }

    /// Parse with full control over the candidate list, an exact format and the precision.
    ///
    /// When `fmt` is given only that format is tried. `precision` overrides the
    /// number of fractional digits inferred from the input.
    pub fn parse_with(
        input: &str,
        formats: &[&str],
        fmt: Option<&str>,
        precision: Option<u8>,
    ) -> TassResult<Self> {
        let (norm, had_z) = normalize_zulu(input);
        let precision = precision
            .unwrap_or_else(|| infer_precision(norm))
            .min(MAX_PRECISION);

        let finalize = |value: NaiveDateTime, used: &str, method: ParseMethod| Self {
            value,
            format: Some(used.to_string()),
            precision,
            method: Some(method),
            had_z,
        };

        if let Some(fmt) = fmt {
            return strptime(norm, fmt)
                .map(|value| finalize(value, fmt, ParseMethod::Exact))
                .ok_or_else(|| TassError::DatetimeParse {
                    input: input.to_string(),
                    attempted: vec![fmt.to_string()],
                });
        }

        let mut attempted: Vec<String> = Vec::with_capacity(formats.len());
        for candidate in formats {
            if let Some(value) = strptime(norm, candidate) {
                return Ok(finalize(value, candidate, ParseMethod::Heuristic));
            }
            if !attempted.iter().any(|a| a == candidate) {
                attempted.push(candidate.to_string());
            }
        }

        if let Some(value) = pattern_match(norm) {
            return Ok(finalize(value, TIMESTAMP_FORMAT, ParseMethod::Pattern));
        }

        Err(TassError::DatetimeParse {
            input: input.to_string(),
            attempted,
        })
    }

    /// The timestamp.
    pub fn value(&self) -> NaiveDateTime {
        self.value
    }

    /// The format that matched on parse, if any.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Fractional-second digits rendered by `%f` (0-6).
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// How the value was produced. `None` for values built directly.
    pub fn method(&self) -> Option<ParseMethod> {
        self.method
    }

    /// Whether the source string ended in `Z`.
    pub fn had_z(&self) -> bool {
        self.had_z
    }

    /// Render with `fmt`, truncating/padding `%f` to `precision` digits.
    ///
    /// Returns `None` if `fmt` is not a valid strftime format.
    pub fn format_precise(&self, fmt: &str, precision: u8) -> Option<String> {
        if !fmt.contains(FRACTION_TOKEN) {
            return render(&self.value, fmt);
        }
        let precision = usize::from(precision.min(MAX_PRECISION));
        let micros = format!("{:06}", (self.value.nanosecond() % 1_000_000_000) / 1_000);
        let out = render(&self.value, &fmt.replace(FRACTION_TOKEN, FRACTION_SENTINEL))?;
        Some(out.replace(FRACTION_SENTINEL, &micros[..precision]))
    }

    /// Add a duration, returning `None` on overflow.
    pub fn checked_add(&self, delta: TimeDelta) -> Option<Self> {
        self.value
            .checked_add_signed(delta)
            .map(|value| self.derive(value))
    }

    /// Subtract a duration, returning `None` on overflow.
    pub fn checked_sub(&self, delta: TimeDelta) -> Option<Self> {
        self.value
            .checked_sub_signed(delta)
            .map(|value| self.derive(value))
    }

    /// Replace the date part.
    pub fn with_date(&self, date: NaiveDate) -> Self {
        self.derive(date.and_time(self.value.time()))
    }

    /// Replace the time part.
    pub fn with_time(&self, time: NaiveTime) -> Self {
        self.derive(self.value.date().and_time(time))
    }

    /// Interpret the value as local time and convert it to the wall clock of `tz`.
    pub fn astimezone<Tz: TimeZone>(&self, tz: &Tz) -> Self {
        let converted = Local
            .from_local_datetime(&self.value)
            .earliest()
            .map(|local| local.with_timezone(tz).naive_local())
            .unwrap_or(self.value);
        self.derive(converted)
    }

    fn derive(&self, value: NaiveDateTime) -> Self {
        Self {
            value,
            format: self.format.clone(),
            precision: self.precision,
            method: Some(ParseMethod::Derived),
            had_z: self.had_z,
        }
    }

    fn generic_string(&self) -> String {
        let base = self.value.format("%Y-%m-%d %H:%M:%S").to_string();
        let micros = (self.value.nanosecond() % 1_000_000_000) / 1_000;
        if micros == 0 {
            base
        } else {
            format!("{base}.{micros:06}")
        }
    }
}

impl fmt::Display for ParsedDatetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fmt) = self.format.as_deref() {
            let fmt = fmt.strip_suffix('Z').unwrap_or(fmt);
            if let Some(s) = self.format_precise(fmt, self.precision) {
                let zulu = if self.had_z { "Z" } else { "" };
                return write!(f, "{s}{zulu}");
            }
        }
        f.write_str(&self.generic_string())
    }
}

impl FromStr for ParsedDatetime {
    type Err = TassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for ParsedDatetime {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for ParsedDatetime {}

impl PartialEq<NaiveDateTime> for ParsedDatetime {
    fn eq(&self, other: &NaiveDateTime) -> bool {
        self.value == *other
    }
}

impl PartialOrd for ParsedDatetime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedDatetime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Add<TimeDelta> for ParsedDatetime {
    type Output = ParsedDatetime;

    /// # Panics
    ///
    /// Panics if the result is out of range. Use [`ParsedDatetime::checked_add`] to handle that.
    fn add(self, rhs: TimeDelta) -> Self::Output {
        self.derive(self.value + rhs)
    }
}

impl Add<TimeDelta> for &ParsedDatetime {
    type Output = ParsedDatetime;

    /// # Panics
    ///
    /// Panics if the result is out of range. Use [`ParsedDatetime::checked_add`] to handle that.
    fn add(self, rhs: TimeDelta) -> Self::Output {
        self.derive(self.value + rhs)
    }
}

impl Sub<TimeDelta> for ParsedDatetime {
    type Output = ParsedDatetime;

    /// # Panics
    ///
    /// Panics if the result is out of range. Use [`ParsedDatetime::checked_sub`] to handle that.
    fn sub(self, rhs: TimeDelta) -> Self::Output {
        self.derive(self.value - rhs)
    }
}

impl Sub<TimeDelta> for &ParsedDatetime {
    type Output = ParsedDatetime;

    /// # Panics
    ///
    /// Panics if the result is out of range. Use [`ParsedDatetime::checked_sub`] to handle that.
    fn sub(self, rhs: TimeDelta) -> Self::Output {
        self.derive(self.value - rhs)
    }
}

impl Sub for &ParsedDatetime {
    type Output = TimeDelta;

    fn sub(self, rhs: &ParsedDatetime) -> Self::Output {
        self.value - rhs.value
    }
}

impl Sub for ParsedDatetime {
    type Output = TimeDelta;

    fn sub(self, rhs: ParsedDatetime) -> Self::Output {
        self.value - rhs.value
    }
}

impl Serialize for ParsedDatetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParsedDatetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Count the digits after the first decimal point, clamped to 6.
pub fn infer_precision(s: &str) -> u8 {
    FRACTION_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().len().min(usize::from(MAX_PRECISION)) as u8)
        .unwrap_or(0)
}

/// Strip a trailing `Z`/`z`, reporting whether one was present.
pub fn normalize_zulu(s: &str) -> (&str, bool) {
    match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(stripped) => (stripped, true),
        None => (s, false),
    }
}

/// Current local time rendered with `fmt` (default `TIMESTAMP_FORMAT`) at millisecond precision.
pub fn timestamp_now_as_str(fmt: Option<&str>) -> String {
    let fmt = fmt.unwrap_or(TIMESTAMP_FORMAT);
    ParsedDatetime::new(Local::now().naive_local(), Some(fmt), DEFAULT_PRECISION).to_string()
}

/// Today at midnight, e.g. `2026-10-18T00:00:00.000`.
pub fn today_midnight() -> String {
    timestamp_now_as_str(Some(TODAY_MIDNIGHT_FORMAT))
}

/// Today's date, e.g. `2026-10-18`.
pub fn today_as_str() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

/// Whether `key` names a known timestamp field.
pub fn is_datetime_field(key: &str) -> bool {
    FIELD_CANDIDATES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(key))
}

fn render(value: &NaiveDateTime, fmt: &str) -> Option<String> {
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return None;
    }
    // offset specifiers are valid items but fail on naive values
    let mut out = String::new();
    write!(out, "{}", value.format(fmt)).ok()?;
    Some(out)
}

/// Parse `input` against one strftime format. `%f` takes 1-6 trailing digits.
fn strptime(input: &str, fmt: &str) -> Option<NaiveDateTime> {
    let fmt = fmt.strip_suffix('Z').unwrap_or(fmt);

    let Some((head_fmt, tail)) = fmt.split_once(FRACTION_TOKEN) else {
        return parse_naive(input, fmt);
    };
    if tail.contains('%') {
        return None;
    }

    let rest = input.strip_suffix(tail)?;
    let digits = rest.len() - rest.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 || digits > usize::from(MAX_PRECISION) {
        return None;
    }
    let (head, frac) = rest.split_at(rest.len() - digits);
    let micros: u32 = format!("{frac:0<6}").parse().ok()?;

    parse_naive(head, head_fmt)?.with_nanosecond(micros * 1_000)
}

fn parse_naive(input: &str, fmt: &str) -> Option<NaiveDateTime> {
    if fmt.contains("%H") || fmt.contains("%T") {
        NaiveDateTime::parse_from_str(input, fmt).ok()
    } else {
        NaiveDate::parse_from_str(input, fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    }
}

fn pattern_match(input: &str) -> Option<NaiveDateTime> {
    let caps = ISO_TIMESTAMP_RE.captures(input)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?;

    let micros = match caps.get(7).map(|m| m.as_str()) {
        Some(frac) if !frac.is_empty() => format!("{frac:0<6}").parse::<u32>().ok()?,
        _ => 0,
    };
    let time = NaiveTime::from_hms_micro_opt(num(4)?, num(5)?, num(6)?, micros)?;

    Some(date.and_time(time))
}
