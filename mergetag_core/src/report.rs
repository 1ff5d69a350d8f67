use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::Directive;
use crate::DirectiveTree;
use crate::ErrorReport;
use crate::MergeTagError;
use crate::ModifierKind;
use crate::PartScan;
use crate::Severity;
use crate::Warning;
use crate::section_label;

/// Validation findings for a whole template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
	/// Number of distinct canonical tags.
	pub tag_count: usize,
	/// Number of tag occurrences, unrecoverable ones included.
	pub occurrence_count: usize,
	/// Distinct canonical tags in first-seen order.
	pub tags: Vec<String>,
	pub directives: Vec<DirectiveSummary>,
	/// Modifier usage by name.
	pub modifiers: BTreeMap<String, usize>,
	pub sections: Vec<SectionSummary>,
	pub missing_parts: Vec<String>,
	pub warnings: Vec<Warning>,
	pub errors: Vec<ErrorReport>,
}

/// One `if` or `listif` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveSummary {
	pub part: String,
	pub kind: DirectiveKind,
	/// The condition as written.
	pub header: String,
	/// Number of branches, `else` included.
	pub branches: usize,
	/// Byte offset of the opening marker in the part XML.
	pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
	If,
	ListIf,
}

impl std::fmt::Display for DirectiveKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::If => write!(f, "if"),
			Self::ListIf => write!(f, "listif"),
		}
	}
}

/// Per part counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
	pub part: String,
	pub label: String,
	pub merge_tags: usize,
	pub conditionals: usize,
	pub modifiers: usize,
}

impl std::fmt::Display for SectionSummary {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}: {} merge tags, {} conditionals, {} modifiers",
			self.label, self.merge_tags, self.conditionals, self.modifiers
		)
	}
}

impl ValidationReport {
	/// No structural errors were found.
	pub fn is_valid(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn has_warnings(&self) -> bool {
		self.warnings
			.iter()
			.any(|warning| warning.severity() == Severity::Warning)
	}

	/// Plain text rendering for terminals and logs.
	pub fn render_text(&self) -> String {
		let mut output = String::new();
		let conditionals: usize = self.sections.iter().map(|section| section.conditionals).sum();
		let modifier_uses: usize = self.modifiers.values().sum();

		let _ = writeln!(output, "Validation Summary:");
		let _ = writeln!(
			output,
			"- Merge tags found: {} ({} occurrences)",
			self.tag_count, self.occurrence_count
		);
		let _ = writeln!(output, "- Conditional blocks: {conditionals}");
		let _ = writeln!(output, "- Modifiers used: {modifier_uses}");
		let _ = writeln!(output, "- Warnings: {}", self.warnings.len());
		let _ = writeln!(output, "- Errors: {}", self.errors.len());

		if !self.sections.is_empty() {
			let _ = writeln!(output, "\nSections:");
			for section in &self.sections {
				let _ = writeln!(output, "- {section}");
			}
		}

		if !self.missing_parts.is_empty() {
			let _ = writeln!(output, "\nMissing parts: {}", self.missing_parts.join(", "));
		}

		if !self.tags.is_empty() {
			let _ = writeln!(output, "\nTags:");
			for tag in &self.tags {
				let _ = writeln!(output, "- {tag}");
			}
		}

		if !self.modifiers.is_empty() {
			let _ = writeln!(output, "\nModifiers:");
			for (name, count) in &self.modifiers {
				let _ = writeln!(output, "- {name}: {count}");
			}
		}

		if !self.directives.is_empty() {
			let _ = writeln!(output, "\nDirectives:");
			for directive in &self.directives {
				let _ = writeln!(
					output,
					"- {} {} ({} branches) in {}",
					directive.kind,
					directive.header,
					directive.branches,
					section_label(&directive.part)
				);
			}
		}

		if !self.warnings.is_empty() {
			let _ = writeln!(output, "\nWarnings:");
			for warning in &self.warnings {
				let _ = writeln!(output, "- {warning}");
			}
		}

		if !self.errors.is_empty() {
			let _ = writeln!(output, "\nErrors:");
			for error in &self.errors {
				let _ = writeln!(output, "- [{}] {}", error.kind, error.message);
			}
		}

		output
	}
}

/// Accumulates scan and parse results into a [`ValidationReport`].
#[derive(Debug, Default)]
pub struct ValidationReporter {
	report: ValidationReport,
}

impl ValidationReporter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one scanned part. `tree` is `None` when the part's directives
	/// failed to parse; its tags and modifiers are still reported.
	pub fn add_part(&mut self, scan: &PartScan<'_>, tree: Option<&DirectiveTree>) {
		let report = &mut self.report;
		let part = &scan.part.name;

		for tag in scan.canonical_tags() {
			if !report.tags.iter().any(|known| known == tag.as_str()) {
				report.tags.push(tag.to_string());
			}
		}
		report.occurrence_count += scan.occurrences.len();

		let mut modifier_count = 0;
		for tag_ref in scan.tag_refs() {
			for call in &tag_ref.modifiers {
				let name = ModifierKind::from_name(&call.name)
					.map_or_else(|| call.name.clone(), |kind| kind.to_string());
				*report.modifiers.entry(name).or_default() += 1;
				modifier_count += 1;
			}
		}

		let mut conditionals = 0;
		if let Some(tree) = tree {
			tree.visit(|directive| {
				let summary = match directive {
					Directive::If(block) => {
						DirectiveSummary {
							part: part.clone(),
							kind: DirectiveKind::If,
							header: block.condition.source.clone(),
							branches: block.bodies().count(),
							offset: scan.stream.source_offset(block.span.start),
						}
					}
					Directive::ListIf(block) => {
						DirectiveSummary {
							part: part.clone(),
							kind: DirectiveKind::ListIf,
							header: format!("${} == \"{}\"", block.field, block.expected),
							branches: 1,
							offset: scan.stream.source_offset(block.span.start),
						}
					}
					Directive::TagRef(_) => return,
				};
				conditionals += 1;
				report.directives.push(summary);
			});
			report.warnings.extend(tree.warnings.iter().cloned());
		}

		report.warnings.extend(scan.warnings.iter().cloned());
		report.sections.push(SectionSummary {
			part: part.clone(),
			label: scan.part.section_label(),
			merge_tags: scan.occurrences.len(),
			conditionals,
			modifiers: modifier_count,
		});
		report.tag_count = report.tags.len();
	}

	/// Record a structural error found while parsing a part.
	pub fn add_error(&mut self, error: &MergeTagError) {
		self.report.errors.push(error.to_report());
	}

	pub fn add_missing_part(&mut self, part: &str) {
		self.report.missing_parts.push(part.to_string());
		self.report.warnings.push(Warning::PartMissing {
			part: part.to_string(),
		});
	}

	pub fn finish(self) -> ValidationReport {
		self.report
	}
}
