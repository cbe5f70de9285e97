//! # Template Interpolation
//!
//! Request paths, bodies and gRPC messages may embed placeholders that are expanded when the
//! descriptor is parsed:
//!
//! | Placeholder                          | Resolves to                                      |
//! |--------------------------------------|--------------------------------------------------|
//! | `{$currentDate}`                     | Today as `YYYY-MM-DD`                            |
//! | `{$currentDate\|days=1,months=-2}`   | Today shifted by the given offsets               |
//! | `{$currentTimestamp}`                | Milliseconds since the Unix epoch                |
//! | `{$random\|red,green,blue}`          | One element of the list, picked uniformly        |
//! | `{$range\|min=1,max=10}`             | A uniformly random integer in `[min, max]`       |
//!
//! Interpolation is a single left-to-right pass: resolved values are never scanned again.
//! Placeholders that cannot be resolved are left in the output byte-for-byte; malformed
//! parameters are reported with a `warn!` log and never abort the pass.
use chrono::{Datelike, Local, NaiveDate, TimeDelta, Utc};
use rand::{Rng, seq::SliceRandom};

const PLACEHOLDER_START: &str = "{$";
const PLACEHOLDER_END: char = '}';
const PARAMS_SEPARATOR: char = '|';
const DATE_FORMAT: &str = "%Y-%m-%d";

const CURRENT_DATE: &str = "currentDate";
const CURRENT_TIMESTAMP: &str = "currentTimestamp";
const RANDOM: &str = "random";
const RANGE: &str = "range";

/// Reasons a placeholder was left unresolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateWarning {
    #[error("Unknown placeholder '{0}'")]
    Unknown(String),

    #[error("Malformed placeholder '{0}'")]
    Malformed(String),

    #[error("Unsupported date component '{component}' in '{placeholder}'")]
    UnknownDateComponent {
        placeholder: String,
        component: String,
    },

    #[error("Date offsets in '{0}' are out of range")]
    DateOutOfRange(String),

    #[error("Placeholder '{0}' requires at least one element")]
    EmptyElements(String),

    #[error("Invalid range in '{placeholder}': min {min} > max {max}")]
    InvalidRange {
        placeholder: String,
        min: u64,
        max: u64,
    },
}

/// Scans `source` and replaces every placeholder with its resolved value.
///
/// Text outside placeholders is copied verbatim. See the module docs for the grammar.
pub fn interpolate(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find(PLACEHOLDER_START) {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];

        match placeholder_len(candidate) {
            Some(len) => {
                let span = &candidate[..len];
                match try_resolve(span) {
                    Ok(value) => output.push_str(&value),
                    Err(warning @ TemplateWarning::Unknown(_)) => {
                        tracing::debug!(%warning, "Leaving placeholder unresolved");
                        output.push_str(span);
                    }
                    Err(warning) => {
                        tracing::warn!(%warning, "Leaving placeholder unresolved");
                        output.push_str(span);
                    }
                }
                rest = &candidate[len..];
            }
            None => {
                output.push('{');
                rest = &candidate[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

/// Resolves a single placeholder such as `{$range|min=1,max=5}`.
///
/// Resolvers are selected by keyword containment, checked in the order
/// `currentDate`, `currentTimestamp`, `random`, `range`.
pub fn try_resolve(span: &str) -> Result<String, TemplateWarning> {
    let placeholder = Placeholder::parse(span)?;

    if span.contains(CURRENT_DATE) {
        current_date(&placeholder)
    } else if span.contains(CURRENT_TIMESTAMP) {
        Ok(current_timestamp())
    } else if span.contains(RANDOM) {
        random_element(&placeholder)
    } else if span.contains(RANGE) {
        random_in_range(&placeholder)
    } else {
        Err(TemplateWarning::Unknown(span.to_string()))
    }
}

struct Placeholder<'a> {
    raw: &'a str,
    name: &'a str,
    params: Option<&'a str>,
}

impl<'a> Placeholder<'a> {
    fn parse(raw: &'a str) -> Result<Self, TemplateWarning> {
        let body = raw
            .strip_prefix(PLACEHOLDER_START)
            .and_then(|s| s.strip_suffix(PLACEHOLDER_END))
            .ok_or_else(|| TemplateWarning::Malformed(raw.to_string()))?;

        let (name, params) = match body.split_once(PARAMS_SEPARATOR) {
            Some((name, params)) => (name, Some(params)),
            None => (body, None),
        };

        Ok(Self { raw, name, params })
    }

    fn expect_name(&self, name: &str) -> Result<(), TemplateWarning> {
        if self.name == name {
            Ok(())
        } else {
            Err(TemplateWarning::Malformed(self.raw.to_string()))
        }
    }
}

/// Length of the placeholder `s` starts with, if it is well formed.
fn placeholder_len(s: &str) -> Option<usize> {
    let inner = s.strip_prefix(PLACEHOLDER_START)?;

    if !inner.chars().next().is_some_and(is_word_char) {
        return None;
    }

    let end = inner.find(|c: char| !is_placeholder_char(c))?;

    inner[end..]
        .starts_with(PLACEHOLDER_END)
        .then_some(PLACEHOLDER_START.len() + end + PLACEHOLDER_END.len_utf8())
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_placeholder_char(c: char) -> bool {
    is_word_char(c) || matches!(c, '|' | '+' | '-' | '=' | ',')
}

// --- Resolvers ---

fn current_date(placeholder: &Placeholder<'_>) -> Result<String, TemplateWarning> {
    placeholder.expect_name(CURRENT_DATE)?;

    let offset = DateOffset::parse(placeholder)?;
    let today = Local::now().date_naive();

    offset
        .apply(today)
        .map(|date| date.format(DATE_FORMAT).to_string())
        .ok_or_else(|| TemplateWarning::DateOutOfRange(placeholder.raw.to_string()))
}

fn current_timestamp() -> String {
    Utc::now().timestamp_millis().to_string()
}

fn random_element(placeholder: &Placeholder<'_>) -> Result<String, TemplateWarning> {
    placeholder.expect_name(RANDOM)?;

    let list = placeholder
        .params
        .filter(|list| !list.is_empty())
        .ok_or_else(|| TemplateWarning::EmptyElements(placeholder.raw.to_string()))?;

    if !list.chars().all(|c| is_word_char(c) || c == '-' || c == ',') {
        return Err(TemplateWarning::Malformed(placeholder.raw.to_string()));
    }

    let elements: Vec<&str> = list.split(',').collect();

    elements
        .choose(&mut rand::thread_rng())
        .map(|element| element.to_string())
        .ok_or_else(|| TemplateWarning::EmptyElements(placeholder.raw.to_string()))
}

fn random_in_range(placeholder: &Placeholder<'_>) -> Result<String, TemplateWarning> {
    placeholder.expect_name(RANGE)?;

    let malformed = || TemplateWarning::Malformed(placeholder.raw.to_string());

    let (min, max) = placeholder
        .params
        .and_then(|params| params.split_once(','))
        .ok_or_else(malformed)?;

    let min = min
        .strip_prefix("min=")
        .and_then(parse_unsigned)
        .ok_or_else(malformed)?;
    let max = max
        .strip_prefix("max=")
        .and_then(parse_unsigned)
        .ok_or_else(malformed)?;

    if min > max {
        return Err(TemplateWarning::InvalidRange {
            placeholder: placeholder.raw.to_string(),
            min,
            max,
        });
    }

    Ok(rand::thread_rng().gen_range(min..=max).to_string())
}

fn parse_unsigned(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Calendar offsets of a `currentDate` placeholder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DateOffset {
    days: i64,
    months: i64,
    years: i64,
}

impl DateOffset {
    /// Accepts `days=1`, `days=+1`, `days-1` and `days+1` forms, in any order.
    /// An unparsable number counts as zero.
    fn parse(placeholder: &Placeholder<'_>) -> Result<Self, TemplateWarning> {
        let mut offset = Self::default();

        let components = placeholder
            .params
            .into_iter()
            .flat_map(|params| params.split(','))
            .filter(|component| !component.is_empty());

        for component in components {
            let split = component
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(component.len());
            let (key, value) = component.split_at(split);

            let slot = match key {
                "days" => &mut offset.days,
                "months" => &mut offset.months,
                "years" => &mut offset.years,
                _ => {
                    return Err(TemplateWarning::UnknownDateComponent {
                        placeholder: placeholder.raw.to_string(),
                        component: component.to_string(),
                    });
                }
            };

            let value = value.strip_prefix('=').unwrap_or(value);
            *slot = value.parse().unwrap_or(0);
        }

        Ok(offset)
    }

    /// Shifts `date` the way calendar `AddDate` does: months overflow into years first,
    /// then the day offset is applied so that e.g. Jan 31 + 1 month lands in March.
    fn apply(&self, date: NaiveDate) -> Option<NaiveDate> {
        let months = i64::from(date.year())
            .checked_mul(12)?
            .checked_add(i64::from(date.month0()))?
            .checked_add(self.years.checked_mul(12)?)?
            .checked_add(self.months)?;

        let year = i32::try_from(months.div_euclid(12)).ok()?;
        let month = u32::try_from(months.rem_euclid(12)).ok()? + 1;
        let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)?;

        let days = i64::from(date.day0()).checked_add(self.days)?;
        first_of_month.checked_add_signed(TimeDelta::try_days(days)?)
    }
}
