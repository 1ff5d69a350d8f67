use quick_xml::escape::escape;
use serde::Serialize;

use crate::Body;
use crate::CanonicalTag;
use crate::CaptureMethod;
use crate::Directive;
use crate::DirectiveParser;
use crate::DirectiveTree;
use crate::EngineConfig;
use crate::ErrorReport;
use crate::LogicalText;
use crate::MergeDataset;
use crate::MergeTagResult;
use crate::RawTagOccurrence;
use crate::RewrittenPart;
use crate::RunScanner;
use crate::TagCanonicalizer;
use crate::TagRef;
use crate::TemplatePackage;
use crate::Term;
use crate::TextEdit;
use crate::ValidationReport;
use crate::ValidationReporter;
use crate::Value;
use crate::Warning;
use crate::XmlPart;
use crate::apply_edits;
use crate::apply_modifiers;

/// The scan of one part: its logical stream, the tag occurrences found in it
/// and the names recovered from them.
#[derive(Debug, Clone)]
pub struct PartScan<'a> {
	pub part: &'a XmlPart,
	pub stream: LogicalText<'a>,
	pub occurrences: Vec<RawTagOccurrence>,
	/// Recovered name per occurrence, `None` when unrecoverable.
	pub tags: Vec<Option<CanonicalTag>>,
	pub warnings: Vec<Warning>,
}

impl PartScan<'_> {
	/// Tag references in document order, modifier chains parsed.
	pub fn tag_refs(&self) -> Vec<TagRef> {
		self.occurrences
			.iter()
			.zip(&self.tags)
			.enumerate()
			.map(|(index, (occurrence, tag))| {
				TagRef::from_occurrence(index, occurrence, tag.clone(), &self.stream)
			})
			.collect()
	}

	/// Recovered names in document order, repeats included.
	pub fn canonical_tags(&self) -> impl Iterator<Item = &CanonicalTag> {
		self.tags.iter().flatten()
	}
}

/// The merge of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartMerge {
	pub xml: String,
	/// Tags without a value, first occurrence order.
	pub unresolved: Vec<String>,
	pub warnings: Vec<Warning>,
}

/// Rewritten parts plus everything that went unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeResult {
	pub parts: Vec<RewrittenPart>,
	pub unresolved_tags: Vec<String>,
	pub warnings: Vec<Warning>,
}

/// A merged template: the new package bytes and how they were produced.
#[derive(Debug, Clone)]
pub struct MergedDocument {
	pub bytes: Vec<u8>,
	pub result: MergeResult,
}

/// Caller facing outcome of [`MergeEngine::merge`]. Fatal errors never panic
/// or propagate; they set `success` to false and fill `error`.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
	pub success: bool,
	#[serde(skip)]
	pub output: Option<Vec<u8>>,
	pub unresolved_tags: Vec<String>,
	pub warnings: Vec<Warning>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorReport>,
}

/// Validates and merges DOCX templates. Holds only read-only configuration,
/// so one engine can serve any number of concurrent operations.
#[derive(Debug, Clone)]
pub struct MergeEngine {
	config: EngineConfig,
	scanner: RunScanner,
	canonicalizer: TagCanonicalizer,
}

impl Default for MergeEngine {
	fn default() -> Self {
		Self::new(EngineConfig::default())
	}
}

impl MergeEngine {
	pub fn new(config: EngineConfig) -> Self {
		let scanner = RunScanner::new(config.max_tag_length);
		let canonicalizer = TagCanonicalizer::new(config.correction_table(), config.name_grammar);

		Self {
			config,
			scanner,
			canonicalizer,
		}
	}

	/// Find and canonicalise every tag in a part. Never fails: problems
	/// become warnings.
	pub fn scan_part<'a>(&self, part: &'a XmlPart) -> PartScan<'a> {
		let stream = LogicalText::new(&part.xml);
		let occurrences = self.scanner.scan(&part.name, &stream);
		let mut tags = Vec::with_capacity(occurrences.len());
		let mut warnings = Vec::new();

		for occurrence in &occurrences {
			let tag = self.canonicalizer.canonicalize(occurrence);
			let text = occurrence.logical_text(&stream).to_string();

			if occurrence.method == CaptureMethod::Truncated {
				tracing::warn!(part = %part.name, tag = %text, "unterminated merge tag");
				warnings.push(Warning::UnterminatedTag {
					part: part.name.clone(),
					raw: text,
				});
			} else if tag.is_none() {
				tracing::warn!(part = %part.name, tag = %text, "could not recover tag name");
				warnings.push(Warning::TagRecoveryFailure {
					part: part.name.clone(),
					raw: text,
				});
			}

			tags.push(tag);
		}

		PartScan {
			part,
			stream,
			occurrences,
			tags,
			warnings,
		}
	}

	/// Parse the directive tree of a scanned part.
	pub fn parse_part(&self, scan: &PartScan<'_>) -> MergeTagResult<DirectiveTree> {
		DirectiveParser::new(&scan.part.name, &scan.stream).parse(scan.tag_refs())
	}

	/// Validate a template without merging it. Structural directive errors
	/// are reported inside the returned report; only an unreadable package
	/// is an `Err`.
	#[tracing::instrument(level = "info", skip_all, fields(bytes = template.len()))]
	pub fn validate(&self, template: &[u8]) -> MergeTagResult<ValidationReport> {
		let package = TemplatePackage::open(template)?;
		let mut reporter = ValidationReporter::new();

		for part in package.parts() {
			let scan = self.scan_part(part);
			match self.parse_part(&scan) {
				Ok(tree) => reporter.add_part(&scan, Some(&tree)),
				Err(error) => {
					tracing::warn!(part = %part.name, %error, "template structure is invalid");
					reporter.add_part(&scan, None);
					reporter.add_error(&error);
				}
			}
		}

		for missing in package.missing_parts() {
			reporter.add_missing_part(missing);
		}

		let report = reporter.finish();
		tracing::info!(
			tags = report.tag_count,
			warnings = report.warnings.len(),
			errors = report.errors.len(),
			"validated template"
		);

		Ok(report)
	}

	/// Merge a dataset into a template. Never fails: fatal errors are
	/// reported through the outcome and produce no output bytes.
	pub fn merge(&self, template: &[u8], dataset: &MergeDataset) -> MergeOutcome {
		match self.try_merge(template, dataset) {
			Ok(document) => {
				MergeOutcome {
					success: true,
					output: Some(document.bytes),
					unresolved_tags: document.result.unresolved_tags,
					warnings: document.result.warnings,
					error: None,
				}
			}
			Err(error) => {
				tracing::warn!(%error, "merge aborted");
				MergeOutcome {
					success: false,
					output: None,
					unresolved_tags: Vec::new(),
					warnings: Vec::new(),
					error: Some(error.to_report()),
				}
			}
		}
	}

	/// Merge and re-package, propagating fatal errors.
	#[tracing::instrument(level = "info", skip_all, fields(bytes = template.len(), fields = dataset.len()))]
	pub fn try_merge(&self, template: &[u8], dataset: &MergeDataset) -> MergeTagResult<MergedDocument> {
		let package = TemplatePackage::open(template)?;
		let result = self.evaluate(&package, dataset)?;
		let bytes = package.write(&result.parts)?;

		tracing::info!(
			parts = result.parts.len(),
			unresolved = result.unresolved_tags.len(),
			warnings = result.warnings.len(),
			"merged template"
		);

		Ok(MergedDocument { bytes, result })
	}

	/// Evaluate every part of an opened package. Any structural error aborts
	/// the whole package.
	pub fn evaluate(&self, package: &TemplatePackage, dataset: &MergeDataset) -> MergeTagResult<MergeResult> {
		let mut result = MergeResult::default();

		for part in package.parts() {
			let merged = self.merge_part(part, dataset)?;
			for tag in merged.unresolved {
				if !result.unresolved_tags.contains(&tag) {
					result.warnings.push(Warning::UnresolvedTag { tag: tag.clone() });
					result.unresolved_tags.push(tag);
				}
			}
			result.warnings.extend(merged.warnings);
			result.parts.push(RewrittenPart {
				name: part.name.clone(),
				xml: merged.xml,
			});
		}

		for missing in package.missing_parts() {
			result.warnings.push(Warning::PartMissing {
				part: missing.clone(),
			});
		}

		Ok(result)
	}

	/// Merge a single part. The returned warnings exclude unresolved tags,
	/// which are listed separately so a package merge can report each once.
	pub fn merge_part(&self, part: &XmlPart, dataset: &MergeDataset) -> MergeTagResult<PartMerge> {
		let scan = self.scan_part(part);
		let tree = self.parse_part(&scan)?;

		let mut evaluator = Evaluator {
			config: &self.config,
			dataset,
			edits: Vec::new(),
			unresolved: Vec::new(),
			warnings: Vec::new(),
		};

		for directive in &tree.roots {
			evaluator.directive(directive);
		}

		let mut warnings = scan.warnings;
		warnings.extend(tree.warnings);
		warnings.extend(evaluator.warnings);

		Ok(PartMerge {
			xml: apply_edits(&scan.stream, &evaluator.edits),
			unresolved: evaluator.unresolved,
			warnings,
		})
	}
}

/// Validate with the default configuration.
pub fn validate(template: &[u8]) -> MergeTagResult<ValidationReport> {
	MergeEngine::default().validate(template)
}

/// Merge with the default configuration.
pub fn merge(template: &[u8], dataset: &MergeDataset) -> MergeOutcome {
	MergeEngine::default().merge(template, dataset)
}

/// Walks a directive tree and collects the text edits that realise it.
struct Evaluator<'e> {
	config: &'e EngineConfig,
	dataset: &'e MergeDataset,
	edits: Vec<TextEdit>,
	unresolved: Vec<String>,
	warnings: Vec<Warning>,
}

impl Evaluator<'_> {
	fn lookup(&self, field: &str) -> Option<&Value> {
		self.dataset.get(field).or_else(|| {
			self.config
				.alias_for(field)
				.and_then(|alias| self.dataset.get(alias))
		})
	}

	fn directive(&mut self, directive: &Directive) {
		match directive {
			Directive::TagRef(tag_ref) => self.tag(tag_ref),
			Directive::If(block) => {
				let chosen = if block.condition.evaluate(|term| self.test(term)) {
					Some(&block.then_branch)
				} else {
					block
						.else_ifs
						.iter()
						.find(|branch| branch.condition.evaluate(|term| self.test(term)))
						.map(|branch| &branch.body)
						.or(block.else_branch.as_ref())
				};

				tracing::debug!(
					condition = %block.condition.source,
					kept = chosen.is_some(),
					"evaluated if block"
				);
				self.keep_only(&block.span, chosen);
			}
			Directive::ListIf(block) => {
				let keep = self.lookup(&block.field).is_some_and(|value| {
					value.contains(&block.expected, self.config.listif_case_sensitive)
				});

				tracing::debug!(field = %block.field, expected = %block.expected, keep, "evaluated listif block");
				self.keep_only(&block.span, keep.then_some(&block.body));
			}
		}
	}

	/// Remove the whole block except the chosen body, which is evaluated in
	/// place.
	fn keep_only(&mut self, span: &std::ops::Range<usize>, body: Option<&Body>) {
		let Some(body) = body else {
			self.edits.push(TextEdit::delete(span.clone()));
			return;
		};

		self.edits.push(TextEdit::delete(span.start..body.span.start));
		for child in &body.children {
			self.directive(child);
		}
		self.edits.push(TextEdit::delete(body.span.end..span.end));
	}

	fn tag(&mut self, tag_ref: &TagRef) {
		let Some(tag) = &tag_ref.tag else {
			self.edits.push(TextEdit::delete(tag_ref.span.clone()));
			return;
		};

		let Some(value) = self.lookup(tag).map(Value::flatten) else {
			tracing::debug!(%tag, "no value for tag");
			if !self.unresolved.iter().any(|name| name == tag.as_str()) {
				self.unresolved.push(tag.to_string());
			}
			self.edits.push(TextEdit::delete(tag_ref.span.clone()));
			return;
		};

		let value = apply_modifiers(tag, value, &tag_ref.modifiers, &mut self.warnings);
		self.edits
			.push(TextEdit::replace(tag_ref.span.clone(), escape(&value)));
	}

	fn test(&self, term: &Term) -> bool {
		let value = self.lookup(term.field());

		match term {
			Term::NotEmpty { .. } => value.is_some_and(|value| !value.is_empty_value()),
			Term::Empty { .. } => value.is_none_or(Value::is_empty_value),
			Term::Equals { value: expected, .. } => {
				value.map(Value::flatten).unwrap_or_default() == *expected
			}
			Term::NotEquals { value: expected, .. } => {
				value.map(Value::flatten).unwrap_or_default() != *expected
			}
			Term::Count {
				comparison,
				value: expected,
				..
			} => {
				let count = value.map_or(0, Value::count);
				comparison.holds(i64::try_from(count).unwrap_or(i64::MAX), *expected)
			}
		}
	}
}
