//! Time-of-day pattern matchers
//!
//! Two stateless rewrites, one per direction. Both replace every
//! non-overlapping match in a single pass and leave all other text intact.

use fancy_regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::warn;

/// 24-hour time not already followed by an AM/PM marker.
/// The trailing `:[0-9]` guard keeps "3:45:12 PM" from being split into a "3:45" match.
/// Word boundaries are ASCII-only (`[A-Za-z0-9_]`), so "é12:30" still matches.
static TIME_24: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?<![A-Za-z0-9_])([01]?[0-9]|2[0-3]):([0-5][0-9])(?::([0-5][0-9]))?(?![A-Za-z0-9_])(?!\s*(?:AM|PM|am|pm)|:[0-9])",
    )
    .expect("24-hour time pattern is valid")
});

/// 12-hour time with a required marker, case-insensitive, ASCII word boundaries.
static TIME_12: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?<![A-Za-z0-9_])(1[0-2]|0?[1-9]):([0-5][0-9])(?::([0-5][0-9]))?\s*(AM|PM)(?![A-Za-z0-9_])")
        .expect("12-hour time pattern is valid")
});

/// Conversion direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversionMode {
    /// 24-hour clock to 12-hour clock ("13:30" → "1:30 PM")
    #[default]
    #[serde(rename = "24to12")]
    To12Hour,
    /// 12-hour clock to 24-hour clock ("1:30 PM" → "13:30")
    #[serde(rename = "12to24")]
    To24Hour,
}

impl ConversionMode {
    /// Wire/storage name of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::To12Hour => "24to12",
            Self::To24Hour => "12to24",
        }
    }

    /// Rewrite all times in `text` for this direction
    pub fn convert(self, text: &str) -> Cow<'_, str> {
        match self {
            Self::To12Hour => convert_24_to_12(text),
            Self::To24Hour => convert_12_to_24(text),
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24to12" => Ok(Self::To12Hour),
            "12to24" => Ok(Self::To24Hour),
            other => Err(format!("unknown conversion mode '{other}' (expected 24to12 or 12to24)")),
        }
    }
}

/// Convert 24-hour times to 12-hour notation ("00:00" → "12:00 AM")
pub fn convert_24_to_12(text: &str) -> Cow<'_, str> {
    replace_times(&TIME_24, text, |caps| {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute = caps.get(2)?.as_str();
        let period = if hour >= 12 { "PM" } else { "AM" };
        let hour = match hour % 12 {
            0 => 12,
            h => h,
        };
        Some(match caps.get(3) {
            Some(second) => format!("{hour}:{minute}:{} {period}", second.as_str()),
            None => format!("{hour}:{minute} {period}"),
        })
    })
}

/// Convert 12-hour times to zero-padded 24-hour notation ("12:00 AM" → "00:00")
pub fn convert_12_to_24(text: &str) -> Cow<'_, str> {
    replace_times(&TIME_12, text, |caps| {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute = caps.get(2)?.as_str();
        let pm = caps.get(4)?.as_str().eq_ignore_ascii_case("PM");
        if pm && hour != 12 {
            hour += 12;
        } else if !pm && hour == 12 {
            hour = 0;
        }
        Some(match caps.get(3) {
            Some(second) => format!("{hour:02}:{minute}:{}", second.as_str()),
            None => format!("{hour:02}:{minute}"),
        })
    })
}

/// Replace every match of `pattern` with the output of `render`.
/// A match `render` rejects is copied through unchanged; a regex runtime
/// error leaves the rest of the text untouched.
fn replace_times<'t>(
    pattern: &Regex,
    text: &'t str,
    render: impl Fn(&Captures<'_>) -> Option<String>,
) -> Cow<'t, str> {
    let mut out = String::new();
    let mut last = 0;

    for caps in pattern.captures_iter(text) {
        let caps = match caps {
            Ok(caps) => caps,
            Err(e) => {
                warn!(error = %e, "time pattern failed mid-text, leaving remainder unchanged");
                break;
            }
        };
        let Some(whole) = caps.get(0) else { continue };
        let Some(replacement) = render(&caps) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replacement);
        last = whole.end();
    }

    if last == 0 && out.is_empty() {
        return Cow::Borrowed(text);
    }
    out.push_str(&text[last..]);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_24_to_12_midnight_and_seconds() {
        assert_eq!(convert_24_to_12("00:00"), "12:00 AM");
        assert_eq!(convert_24_to_12("13:30:05"), "1:30:05 PM");
        assert_eq!(convert_24_to_12("12:15"), "12:15 PM");
        assert_eq!(convert_24_to_12("9:07"), "9:07 AM");
    }

    #[test]
    fn test_12_to_24_edges() {
        assert_eq!(convert_12_to_24("12:00 AM"), "00:00");
        assert_eq!(convert_12_to_24("12:00 PM"), "12:00");
        assert_eq!(convert_12_to_24("11:59 PM"), "23:59");
        assert_eq!(convert_12_to_24("1:02:03 am"), "01:02:03");
        assert_eq!(convert_12_to_24("07:45pm"), "19:45");
    }

    #[test]
    fn test_24_to_12_skips_marked_times() {
        assert_eq!(convert_24_to_12("3:45 PM"), "3:45 PM");
        assert_eq!(convert_24_to_12("3:45PM"), "3:45PM");
        assert_eq!(convert_24_to_12("10:30 am"), "10:30 am");
        // Seconds field must not be split off a marked time
        assert_eq!(convert_24_to_12("3:45:12 PM"), "3:45:12 PM");
    }

    #[test]
    fn test_all_matches_replaced() {
        assert_eq!(
            convert_24_to_12("Opens 08:00, closes 22:30."),
            "Opens 8:00 AM, closes 10:30 PM."
        );
        assert_eq!(
            convert_12_to_24("From 9:00 AM to 5:30 PM daily"),
            "From 09:00 to 17:30 daily"
        );
    }

    #[test]
    fn test_embedded_numbers_not_matched() {
        assert_eq!(convert_24_to_12("123:45"), "123:45");
        assert_eq!(convert_24_to_12("24:00"), "24:00");
        assert_eq!(convert_24_to_12("12:60"), "12:60");
        assert_eq!(convert_24_to_12("ab12:30"), "ab12:30");
        assert_eq!(convert_12_to_24("13:00 PM"), "13:00 PM");
        assert_eq!(convert_12_to_24("5:30 PMS"), "5:30 PMS");
    }

    #[test]
    fn test_word_boundaries_are_ascii() {
        assert_eq!(convert_24_to_12("é12:30"), "é12:30 PM");
        assert_eq!(convert_24_to_12("18:05ñ"), "6:05 PMñ");
        assert_eq!(convert_12_to_24("à7:05 pm"), "à19:05");
        assert_eq!(convert_24_to_12("_12:30"), "_12:30");
        assert_eq!(convert_24_to_12("12:30x"), "12:30x");
    }

    #[test]
    fn test_unchanged_text_is_borrowed() {
        assert!(matches!(convert_24_to_12("no times here"), Cow::Borrowed(_)));
        assert!(matches!(convert_12_to_24("no times here"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_round_trip_every_hour() {
        for hour in 0..24 {
            for (minute, second) in [(0, None), (7, Some(59)), (59, Some(0))] {
                let original = match second {
                    Some(s) => format!("{hour:02}:{minute:02}:{s:02}"),
                    None => format!("{hour:02}:{minute:02}"),
                };
                let twelve = convert_24_to_12(&original).into_owned();
                assert_ne!(twelve, original);
                assert_eq!(convert_12_to_24(&twelve), original, "via {twelve}");
            }
        }
    }

    #[test]
    fn test_mode_dispatch_and_parse() {
        assert_eq!("24to12".parse::<ConversionMode>(), Ok(ConversionMode::To12Hour));
        assert_eq!("12to24".parse::<ConversionMode>(), Ok(ConversionMode::To24Hour));
        assert!("sideways".parse::<ConversionMode>().is_err());
        assert_eq!(ConversionMode::To24Hour.convert("6:00 PM"), "18:00");
        assert_eq!(ConversionMode::To12Hour.to_string(), "24to12");
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(serde_json::to_string(&ConversionMode::To24Hour).unwrap(), "\"12to24\"");
        let mode: ConversionMode = serde_json::from_str("\"24to12\"").unwrap();
        assert_eq!(mode, ConversionMode::To12Hour);
    }
}
