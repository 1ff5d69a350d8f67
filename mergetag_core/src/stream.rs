//! The logical text stream of an XML part.
//!
//! Word processors split what the author typed as one merge tag across
//! several runs (`<w:r>` elements) whenever formatting, spell checking or
//! revision tracking touches part of it. [`LogicalText`] keeps only the
//! character data of `w:t` elements and decodes character entities so that
//! such a tag reads contiguously again, while remembering for every logical
//! byte which bytes of the original XML produced it. Edits expressed against
//! the logical stream can then be mapped back onto the original text without
//! touching markup.

use std::ops::Range;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;

/// The element whose character data is visible document text.
const TEXT_ELEMENT: &[u8] = b"w:t";

/// Flattened character data of an XML part with a byte map back to the
/// source.
#[derive(Debug, Clone)]
pub struct LogicalText<'a> {
	source: &'a str,
	text: String,
	/// Original byte range behind each logical byte. Every byte of a
	/// multi-byte character (or decoded entity) shares the same range.
	origin: Vec<Range<usize>>,
}

impl<'a> LogicalText<'a> {
	/// Build the logical stream for `source` from the character data of its
	/// `w:t` elements. Whitespace between runs is layout, not text, and is
	/// left out.
	pub fn new(source: &'a str) -> Self {
		let mut text = String::with_capacity(source.len() / 4);
		let mut origin = Vec::with_capacity(source.len() / 4);
		let mut reader = Reader::from_str(source);
		let mut in_text = false;

		loop {
			match reader.read_event() {
				Ok(Event::Start(element)) => in_text = element.name().as_ref() == TEXT_ELEMENT,
				Ok(Event::End(_)) => in_text = false,
				Ok(Event::Text(raw)) if in_text && !raw.is_empty() => {
					let range = text_range(source, reader.buffer_position(), raw.len());
					push_character_data(&mut text, &mut origin, source, range);
				}
				Ok(Event::Eof) => break,
				Ok(_) => {}
				Err(error) => {
					tracing::warn!(
						position = reader.buffer_position(),
						%error,
						"stopped reading malformed xml"
					);
					break;
				}
			}
		}

		Self {
			source,
			text,
			origin,
		}
	}

	/// The decoded character data.
	pub fn text(&self) -> &str {
		&self.text
	}

	/// The XML the stream was built from.
	pub fn source(&self) -> &'a str {
		self.source
	}

	pub fn len(&self) -> usize {
		self.text.len()
	}

	pub fn is_empty(&self) -> bool {
		self.text.is_empty()
	}

	/// Original byte range covering the logical range, markup in between
	/// included.
	pub fn source_span(&self, range: &Range<usize>) -> Range<usize> {
		if range.start >= range.end || range.end > self.origin.len() {
			let at = self.source_offset(range.start);
			return at..at;
		}

		self.origin[range.start].start..self.origin[range.end - 1].end
	}

	/// Original byte offset of a logical position. Positions at the end of
	/// the stream map to the end of the last character.
	pub fn source_offset(&self, position: usize) -> usize {
		match self.origin.get(position) {
			Some(range) => range.start,
			None => self.origin.last().map_or(0, |range| range.end),
		}
	}

	/// Contiguous runs of original character data that make up a logical
	/// range. Markup between two pieces is never part of either.
	pub fn pieces(&self, range: &Range<usize>) -> Vec<Range<usize>> {
		let mut pieces: Vec<Range<usize>> = Vec::new();
		let end = range.end.min(self.origin.len());

		for origin in self.origin.get(range.start..end).unwrap_or_default() {
			if let Some(last) = pieces.last_mut() {
				if origin.start >= last.start && origin.end <= last.end {
					continue;
				}
				if origin.start == last.end {
					last.end = origin.end;
					continue;
				}
			}
			pieces.push(origin.clone());
		}

		pieces
	}

	/// Whether the logical range is interrupted by markup in the original.
	pub fn is_split(&self, range: &Range<usize>) -> bool {
		self.pieces(range).len() > 1
	}

	/// Whether the logical byte at `position` was written as the numeric
	/// entity for `$`.
	pub fn is_entity_dollar(&self, position: usize) -> bool {
		self.origin.get(position).is_some_and(|range| {
			let raw = &self.source[range.clone()];
			raw.eq_ignore_ascii_case("&#36;") || raw.eq_ignore_ascii_case("&#x24;")
		})
	}
}

/// Source range of a text event of `len` raw bytes. The reader may already
/// have consumed the `<` that opens the next event.
fn text_range(source: &str, position: usize, len: usize) -> Range<usize> {
	let end = if source[..position].ends_with('<') {
		position - 1
	} else {
		position
	};
	end.saturating_sub(len)..end
}

/// Append raw character data, decoding one entity at a time so that each
/// decoded character maps back to its whole entity.
fn push_character_data(
	text: &mut String,
	origin: &mut Vec<Range<usize>>,
	source: &str,
	range: Range<usize>,
) {
	let raw = &source[range.clone()];
	let mut skip_until = 0;

	for (index, ch) in raw.char_indices() {
		if index < skip_until {
			continue;
		}

		let at = range.start + index;
		if ch == '&' {
			if let Some(end) = raw[index..].find(';').map(|semi| index + semi + 1) {
				if let Ok(decoded) = unescape(&raw[index..end]) {
					for decoded_char in decoded.chars() {
						push_char(text, origin, decoded_char, at..range.start + end);
					}
					skip_until = end;
					continue;
				}
			}
		}

		push_char(text, origin, ch, at..at + ch.len_utf8());
	}
}

fn push_char(text: &mut String, origin: &mut Vec<Range<usize>>, ch: char, range: Range<usize>) {
	text.push(ch);
	for _ in 0..ch.len_utf8() {
		origin.push(range.clone());
	}
}

/// A replacement expressed against the logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
	pub range: Range<usize>,
	pub replacement: String,
}

impl TextEdit {
	pub fn replace(range: Range<usize>, replacement: impl Into<String>) -> Self {
		Self {
			range,
			replacement: replacement.into(),
		}
	}

	pub fn delete(range: Range<usize>) -> Self {
		Self::replace(range, String::new())
	}
}

/// Apply logical edits to the original XML. Only character data is touched:
/// the first piece of each edited range receives the replacement and every
/// later piece is emptied, so the markup between pieces survives unchanged.
///
/// Edits must not overlap. They are applied rightmost first so that earlier
/// offsets stay valid.
pub fn apply_edits(stream: &LogicalText<'_>, edits: &[TextEdit]) -> String {
	let mut replacements: Vec<(Range<usize>, &str)> = Vec::new();

	for edit in edits {
		let pieces = stream.pieces(&edit.range);
		let mut pieces = pieces.into_iter();
		let Some(first) = pieces.next() else {
			continue;
		};
		replacements.push((first, edit.replacement.as_str()));
		replacements.extend(pieces.map(|piece| (piece, "")));
	}

	replacements.sort_by(|a, b| b.0.start.cmp(&a.0.start));

	let mut result = stream.source().to_string();
	for (range, replacement) in replacements {
		if range.start <= range.end && range.end <= result.len() {
			result.replace_range(range, replacement);
		}
	}

	result
}
