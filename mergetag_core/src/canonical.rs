use std::sync::LazyLock;

use derive_more::Deref;
use derive_more::Display;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::NameGrammar;
use crate::RawTagOccurrence;

static RE_MARKUP: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid markup regex"));
static RE_WHITESPACE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static RE_STRICT_NAME: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid strict name regex"));
static RE_MIXED_CASE_NAME: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid mixed case name regex")
});

/// A validated field name used as the dataset key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref, Display, Serialize)]
#[serde(transparent)]
pub struct CanonicalTag(String);

impl CanonicalTag {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_inner(self) -> String {
		self.0
	}
}

/// Maps one truncated stub to the full field name it was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRule {
	pub stub: String,
	pub canonical: String,
}

impl CorrectionRule {
	pub fn new(stub: impl Into<String>, canonical: impl Into<String>) -> Self {
		Self {
			stub: stub.into(),
			canonical: canonical.into(),
		}
	}
}

/// Ordered, read-only stub corrections. The first rule whose stub equals the
/// cleaned name wins. There is no prefix or fuzzy matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionTable {
	rules: Vec<CorrectionRule>,
}

impl CorrectionTable {
	pub fn new(rules: Vec<CorrectionRule>) -> Self {
		Self { rules }
	}

	/// Truncations observed in production templates.
	pub fn builtin() -> Self {
		Self::new(vec![
			CorrectionRule::new("USR_B", "USR_Business"),
			CorrectionRule::new("PT2_B", "PT2_Business"),
			CorrectionRule::new("USR_N", "USR_Name"),
			CorrectionRule::new("PT2_N", "PT2_Name"),
			CorrectionRule::new("USR_A", "USR_ABN"),
			CorrectionRule::new("PT2_A", "PT2_ABN"),
			CorrectionRule::new("C", "Concept"),
			CorrectionRule::new("P", "Pmt_Purpose"),
		])
	}

	pub fn rules(&self) -> &[CorrectionRule] {
		&self.rules
	}

	pub fn lookup(&self, stub: &str) -> Option<&str> {
		self.rules
			.iter()
			.find(|rule| rule.stub == stub)
			.map(|rule| rule.canonical.as_str())
	}
}

/// Recovers canonical tag names from raw occurrences.
#[derive(Debug, Clone)]
pub struct TagCanonicalizer {
	corrections: CorrectionTable,
	grammar: NameGrammar,
}

impl Default for TagCanonicalizer {
	fn default() -> Self {
		Self::new(CorrectionTable::builtin(), NameGrammar::default())
	}
}

impl TagCanonicalizer {
	pub fn new(corrections: CorrectionTable, grammar: NameGrammar) -> Self {
		Self {
			corrections,
			grammar,
		}
	}

	/// `None` when no valid name can be recovered.
	pub fn canonicalize(&self, occurrence: &RawTagOccurrence) -> Option<CanonicalTag> {
		self.canonicalize_text(&occurrence.raw)
	}

	/// Recover a name from raw tag text that may still contain markup.
	pub fn canonicalize_text(&self, raw: &str) -> Option<CanonicalTag> {
		let mut text = strip_markup(raw);

		text = text.strip_prefix('{').unwrap_or(&text).to_string();
		text = text
			.strip_prefix('$')
			.or_else(|| text.strip_prefix("&#36;"))
			.or_else(|| text.strip_prefix("&#x24;"))
			.unwrap_or(&text)
			.to_string();
		text = text.strip_suffix('}').unwrap_or(&text).to_string();

		if let Some(pipe) = text.find('|') {
			text.truncate(pipe);
		}

		let name = text.trim().trim_end_matches('_');
		let name = self.corrections.lookup(name).unwrap_or(name);

		if self.is_valid_name(name) {
			tracing::debug!(raw, name, "recovered canonical tag");
			Some(CanonicalTag(name.to_string()))
		} else {
			tracing::debug!(raw, name, "no canonical tag recovered");
			None
		}
	}

	pub fn is_valid_name(&self, name: &str) -> bool {
		let pattern = match self.grammar {
			NameGrammar::Strict => &*RE_STRICT_NAME,
			NameGrammar::MixedCase => &*RE_MIXED_CASE_NAME,
		};

		name.len() >= 2 && pattern.is_match(name)
	}
}

/// Remove every markup fragment and collapse whitespace.
fn strip_markup(raw: &str) -> String {
	let without_markup = RE_MARKUP.replace_all(raw, "");
	RE_WHITESPACE
		.replace_all(&without_markup, " ")
		.trim()
		.to_string()
}
