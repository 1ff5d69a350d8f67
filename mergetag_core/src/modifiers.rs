use chrono::DateTime;
use chrono::Datelike;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Timelike;
use serde::Serialize;

use crate::Warning;
use crate::lexer::unescape_body;

/// A modifier attached to a merge tag, e.g. `replace:"NSW":"New South
/// Wales"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifierCall {
	pub name: String,
	pub args: Vec<String>,
}

impl ModifierCall {
	pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			name: name.into(),
			args,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModifierKind {
	/// Uppercase the whole value.
	Upper,
	/// Lowercase the whole value.
	Lower,
	/// Capitalise the first character of every word.
	Ucwords,
	/// Capitalise the first character only.
	Ucfirst,
	/// Substitute the value's digits into a `%n` pattern.
	PhoneFormat,
	/// Parse the value as a date and reformat it.
	DateFormat,
	/// Replace every occurrence of a literal substring.
	Replace,
}

impl ModifierKind {
	pub fn from_name(name: &str) -> Option<Self> {
		let kind = match name.trim().to_ascii_lowercase().as_str() {
			"upper" => Self::Upper,
			"lower" => Self::Lower,
			"ucwords" => Self::Ucwords,
			"ucfirst" => Self::Ucfirst,
			"phone_format" | "phoneformat" => Self::PhoneFormat,
			"date_format" | "dateformat" => Self::DateFormat,
			"replace" => Self::Replace,
			_ => return None,
		};

		Some(kind)
	}

	/// Number of arguments the modifier takes.
	pub fn arity(self) -> usize {
		match self {
			Self::Upper | Self::Lower | Self::Ucwords | Self::Ucfirst => 0,
			Self::PhoneFormat | Self::DateFormat => 1,
			Self::Replace => 2,
		}
	}

	pub fn apply(self, value: &str, args: &[String]) -> String {
		match self {
			Self::Upper => value.to_uppercase(),
			Self::Lower => value.to_lowercase(),
			Self::Ucwords => ucwords(value),
			Self::Ucfirst => ucfirst(value),
			Self::PhoneFormat => format_phone(value, &args[0]),
			Self::DateFormat => format_date(value, &args[0]),
			Self::Replace => value.replace(args[0].as_str(), &args[1]),
		}
	}
}

impl std::fmt::Display for ModifierKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Upper => write!(f, "upper"),
			Self::Lower => write!(f, "lower"),
			Self::Ucwords => write!(f, "ucwords"),
			Self::Ucfirst => write!(f, "ucfirst"),
			Self::PhoneFormat => write!(f, "phone_format"),
			Self::DateFormat => write!(f, "date_format"),
			Self::Replace => write!(f, "replace"),
		}
	}
}

/// Apply a modifier chain left to right. Unknown modifiers and modifiers
/// with the wrong number of arguments are skipped with a warning.
pub fn apply_modifiers(
	tag: &str,
	mut value: String,
	calls: &[ModifierCall],
	warnings: &mut Vec<Warning>,
) -> String {
	for call in calls {
		let Some(kind) = ModifierKind::from_name(&call.name) else {
			tracing::warn!(tag, modifier = %call.name, "unknown modifier");
			warnings.push(Warning::UnknownModifier {
				tag: tag.to_string(),
				modifier: call.name.clone(),
			});
			continue;
		};

		if call.args.len() != kind.arity() {
			tracing::warn!(tag, modifier = %kind, got = call.args.len(), "invalid modifier arguments");
			warnings.push(Warning::InvalidModifierArgs {
				tag: tag.to_string(),
				modifier: kind.to_string(),
				expected: kind.arity().to_string(),
				got: call.args.len(),
			});
			continue;
		}

		value = kind.apply(&value, &call.args);
	}

	value
}

/// Parse the modifier chain of a decoded merge tag such as
/// `{$USR_ABN|phone_format:"%2 %3 %3 %3"|upper}`.
///
/// Arguments follow `:` and may be straight quoted (escapes resolved),
/// typographically quoted or bare. Separators inside quotes are literal.
pub fn parse_modifier_chain(tag_text: &str) -> Vec<ModifierCall> {
	let Some(pipe) = tag_text.find('|') else {
		return Vec::new();
	};
	let chain = &tag_text[pipe + 1..];
	let chain = chain.strip_suffix('}').unwrap_or(chain);

	let mut calls = Vec::new();
	let mut fields: Vec<String> = Vec::new();
	let mut chars = chain.chars().peekable();

	loop {
		while chars.next_if(|ch| ch.is_whitespace()).is_some() {}

		let field = match chars.peek().copied() {
			Some(open) if closing_quote(open).is_some() => {
				chars.next();
				let value = read_quoted(&mut chars, open);
				// Anything between the closing quote and the next separator is
				// dropped.
				while chars.next_if(|ch| *ch != ':' && *ch != '|').is_some() {}
				value
			}
			_ => {
				let mut bare = String::new();
				while let Some(ch) = chars.next_if(|ch| *ch != ':' && *ch != '|') {
					bare.push(ch);
				}
				bare.trim().to_string()
			}
		};
		fields.push(field);

		match chars.next() {
			Some(':') => {}
			_ => {
				let mut parts = std::mem::take(&mut fields).into_iter();
				if let Some(name) = parts.next() {
					if !name.is_empty() {
						calls.push(ModifierCall::new(name, parts.collect()));
					}
				}

				if chars.peek().is_none() {
					break;
				}
			}
		}
	}

	calls
}

fn closing_quote(open: char) -> Option<char> {
	match open {
		'"' => Some('"'),
		'\'' => Some('\''),
		'\u{201C}' => Some('\u{201D}'),
		'\u{2018}' => Some('\u{2019}'),
		_ => None,
	}
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, open: char) -> String {
	let close = closing_quote(open).unwrap_or(open);
	let straight = open == close;
	let mut inner = String::new();
	let mut escaped = false;

	for ch in chars.by_ref() {
		if escaped {
			inner.push(ch);
			escaped = false;
			continue;
		}

		if straight && ch == '\\' {
			inner.push(ch);
			escaped = true;
			continue;
		}

		if ch == close {
			break;
		}

		inner.push(ch);
	}

	if straight && inner.contains('\\') {
		unescape_body(&inner).unwrap_or(inner)
	} else {
		inner
	}
}

fn ucwords(value: &str) -> String {
	let mut result = String::with_capacity(value.len());
	let mut at_word_start = true;

	for ch in value.chars() {
		if at_word_start {
			result.extend(ch.to_uppercase());
		} else {
			result.push(ch);
		}
		at_word_start = ch.is_whitespace();
	}

	result
}

fn ucfirst(value: &str) -> String {
	let mut chars = value.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// Substitute digits into a phone pattern.
///
/// Each `%n` token in the pattern, read left to right, consumes the next
/// digit of the value and replaces every remaining occurrence of that token.
/// A repeated token such as `%3` therefore receives a single digit:
/// `"0412 345 678"` with `"%2 %3 %3 %3"` gives `"0 4 4 4"`.
pub fn format_phone(value: &str, pattern: &str) -> String {
	if value.trim().is_empty() {
		return String::new();
	}

	let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
	let pattern_chars: Vec<char> = pattern.chars().collect();
	let mut formatted = pattern.to_string();
	let mut next_digit = 0;

	for window in pattern_chars.windows(2) {
		if window[0] != '%' || !window[1].is_ascii_digit() {
			continue;
		}

		let Some(digit) = digits.get(next_digit) else {
			break;
		};

		let token: String = window.iter().collect();
		formatted = formatted.replace(&token, &digit.to_string());
		next_digit += 1;
	}

	formatted
}

const DATE_INPUT_FORMATS: [&str; 7] = [
	"%Y-%m-%d",
	"%d/%m/%Y",
	"%d-%m-%Y",
	"%Y/%m/%d",
	"%d %B %Y",
	"%B %d, %Y",
	"%d.%m.%Y",
];

const DATE_TIME_INPUT_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

const MONTHS: [&str; 12] = [
	"January",
	"February",
	"March",
	"April",
	"May",
	"June",
	"July",
	"August",
	"September",
	"October",
	"November",
	"December",
];

const WEEKDAYS: [&str; 7] = [
	"Monday",
	"Tuesday",
	"Wednesday",
	"Thursday",
	"Friday",
	"Saturday",
	"Sunday",
];

/// Reformat a date using PHP style pattern letters. Values that cannot be
/// parsed as a date are returned unchanged.
pub fn format_date(value: &str, pattern: &str) -> String {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return String::new();
	}

	match parse_date_time(trimmed) {
		Some(date_time) => render_date(&date_time, pattern),
		None => {
			tracing::debug!(value, "date_format could not parse value");
			value.to_string()
		}
	}
}

fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
	if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
		return Some(date_time.naive_local());
	}

	for format in DATE_TIME_INPUT_FORMATS {
		if let Ok(date_time) = NaiveDateTime::parse_from_str(value, format) {
			return Some(date_time);
		}
	}

	for format in DATE_INPUT_FORMATS {
		if let Ok(date) = NaiveDate::parse_from_str(value, format) {
			return date.and_hms_opt(0, 0, 0);
		}
	}

	if value.bytes().all(|byte| byte.is_ascii_digit()) && value.len() >= 9 {
		let seconds = value.parse::<i64>().ok()?;
		return DateTime::from_timestamp(seconds, 0).map(|date_time| date_time.naive_utc());
	}

	None
}

fn render_date(date_time: &NaiveDateTime, pattern: &str) -> String {
	let mut output = String::new();
	let mut chars = pattern.chars();
	let month = MONTHS[date_time.month0() as usize];
	let weekday = WEEKDAYS[date_time.weekday().num_days_from_monday() as usize];

	while let Some(ch) = chars.next() {
		match ch {
			'\\' => {
				if let Some(literal) = chars.next() {
					output.push(literal);
				}
			}
			'd' => output.push_str(&format!("{:02}", date_time.day())),
			'j' => output.push_str(&date_time.day().to_string()),
			'D' => output.push_str(&weekday[..3]),
			'l' => output.push_str(weekday),
			'S' => output.push_str(ordinal_suffix(date_time.day())),
			'm' => output.push_str(&format!("{:02}", date_time.month())),
			'n' => output.push_str(&date_time.month().to_string()),
			'F' => output.push_str(month),
			'M' => output.push_str(&month[..3]),
			'Y' => output.push_str(&date_time.year().to_string()),
			'y' => output.push_str(&format!("{:02}", date_time.year().rem_euclid(100))),
			'H' => output.push_str(&format!("{:02}", date_time.hour())),
			'G' => output.push_str(&date_time.hour().to_string()),
			'h' => output.push_str(&format!("{:02}", twelve_hour(date_time.hour()))),
			'g' => output.push_str(&twelve_hour(date_time.hour()).to_string()),
			'i' => output.push_str(&format!("{:02}", date_time.minute())),
			's' => output.push_str(&format!("{:02}", date_time.second())),
			'A' => output.push_str(if date_time.hour() < 12 { "AM" } else { "PM" }),
			'a' => output.push_str(if date_time.hour() < 12 { "am" } else { "pm" }),
			other => output.push(other),
		}
	}

	output
}

fn twelve_hour(hour: u32) -> u32 {
	match hour % 12 {
		0 => 12,
		other => other,
	}
}

fn ordinal_suffix(day: u32) -> &'static str {
	match (day % 10, day % 100) {
		(_, 11..=13) => "th",
		(1, _) => "st",
		(2, _) => "nd",
		(3, _) => "rd",
		_ => "th",
	}
}
