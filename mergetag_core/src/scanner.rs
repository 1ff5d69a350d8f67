use std::ops::Range;

use serde::Serialize;

use crate::LogicalText;
use crate::XmlPart;
use crate::config::DEFAULT_MAX_TAG_LENGTH;

/// How a merge tag occurrence was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
	/// `{$TAG}` inside a single run.
	Intact,
	/// The `$` was written as `&#36;`.
	EntityEncoded,
	/// Run markup interrupts the tag.
	SplitRun,
	/// No closing `}` before the next tag, the end of the part or the length
	/// limit.
	Truncated,
}

impl std::fmt::Display for CaptureMethod {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Intact => write!(f, "intact"),
			Self::EntityEncoded => write!(f, "entity-encoded"),
			Self::SplitRun => write!(f, "split-run"),
			Self::Truncated => write!(f, "truncated"),
		}
	}
}

/// A merge tag found in a part, before its name is recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTagOccurrence {
	/// Name of the part the tag was found in.
	pub part: String,
	/// Byte span in the original XML, embedded markup included.
	pub span: Range<usize>,
	/// Span in the logical text stream.
	pub logical: Range<usize>,
	/// The original XML covered by `span`.
	pub raw: String,
	pub method: CaptureMethod,
	/// Whether a `|modifier` chain follows the name.
	pub has_modifiers: bool,
}

impl RawTagOccurrence {
	/// The decoded tag text without markup, e.g. `{$USR_Name|upper}`.
	pub fn logical_text<'a>(&self, stream: &'a LogicalText<'_>) -> &'a str {
		stream.text().get(self.logical.clone()).unwrap_or_default()
	}
}

/// Finds merge tag occurrences in a logical text stream.
///
/// The scan is a single left-to-right pass. Every `{$` opens exactly one
/// occurrence and the cursor moves past its span before looking for the next
/// one, so a physical tag is never reported twice under different capture
/// methods.
#[derive(Debug, Clone, Copy)]
pub struct RunScanner {
	max_tag_length: usize,
}

impl Default for RunScanner {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_TAG_LENGTH)
	}
}

impl RunScanner {
	pub fn new(max_tag_length: usize) -> Self {
		Self { max_tag_length }
	}

	/// Scan one part.
	pub fn scan_part(&self, part: &XmlPart) -> Vec<RawTagOccurrence> {
		let stream = LogicalText::new(&part.xml);
		self.scan(&part.name, &stream)
	}

	/// Scan an already built stream.
	pub fn scan(&self, part: &str, stream: &LogicalText<'_>) -> Vec<RawTagOccurrence> {
		let text = stream.text();
		let mut occurrences = Vec::new();
		let mut cursor = 0;

		while let Some(found) = text.get(cursor..).and_then(|rest| rest.find("{$")) {
			let start = cursor + found;
			let body_start = start + 2;

			let (end, method) = match self.find_terminator(text, start, body_start) {
				Some(end) => {
					let logical = start..end;
					let method = if stream.is_entity_dollar(start + 1) {
						CaptureMethod::EntityEncoded
					} else if stream.is_split(&logical) {
						CaptureMethod::SplitRun
					} else {
						CaptureMethod::Intact
					};
					(end, method)
				}
				None => (truncated_end(text, body_start), CaptureMethod::Truncated),
			};

			let logical = start..end;
			let span = stream.source_span(&logical);
			let decoded = &text[logical.clone()];
			let occurrence = RawTagOccurrence {
				part: part.to_string(),
				raw: stream.source()[span.clone()].to_string(),
				span,
				has_modifiers: decoded.contains('|'),
				logical,
				method,
			};

			tracing::debug!(
				part,
				tag = decoded,
				method = %occurrence.method,
				"found merge tag occurrence"
			);

			occurrences.push(occurrence);
			cursor = end.max(body_start);
		}

		occurrences
	}

	/// Position just past the closing `}`. Braces inside quoted modifier
	/// arguments do not count, and inside straight quotes a backslash escapes
	/// the next character. Another `{` outside quotes, the end of the text or
	/// the length limit leave the tag unterminated.
	fn find_terminator(&self, text: &str, start: usize, body_start: usize) -> Option<usize> {
		let mut quote: Option<char> = None;
		let mut escaped = false;

		for (offset, ch) in text.get(body_start..)?.char_indices() {
			let position = body_start + offset;
			if position - start >= self.max_tag_length {
				return None;
			}

			if escaped {
				escaped = false;
				continue;
			}

			match (quote, ch) {
				(Some('"' | '\''), '\\') => escaped = true,
				(Some(open), _) if ch == closing_quote(open) => quote = None,
				(Some(_), _) => {}
				(None, '"' | '\'' | '\u{201C}' | '\u{2018}') => quote = Some(ch),
				(None, '}') => return Some(position + 1),
				(None, '{') => return None,
				(None, _) => {}
			}
		}

		None
	}
}

fn closing_quote(open: char) -> char {
	match open {
		'\u{201C}' => '\u{201D}',
		'\u{2018}' => '\u{2019}',
		other => other,
	}
}

/// End of an unterminated tag: the identifier plus any `|modifier` text that
/// directly follows it. Surrounding prose is never included.
fn truncated_end(text: &str, body_start: usize) -> usize {
	let rest = text.get(body_start..).unwrap_or_default();
	let name_len = rest
		.find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
		.unwrap_or(rest.len());
	let mut end = body_start + name_len;

	if rest[name_len..].starts_with('|') {
		let modifiers = &rest[name_len..];
		let modifiers_len = modifiers
			.find(|ch: char| ch.is_whitespace() || ch == '{' || ch == '}')
			.unwrap_or(modifiers.len());
		end += modifiers_len;
	}

	end
}
