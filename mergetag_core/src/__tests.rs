use rstest::rstest;
use similar_asserts::assert_eq;

use super::__fixtures::*;
use super::*;

fn mixed_case_engine() -> MergeEngine {
	MergeEngine::new(EngineConfig {
		name_grammar: NameGrammar::MixedCase,
		..EngineConfig::default()
	})
}

fn warnings_of(warnings: &[Warning], kind: WarningKind) -> Vec<&Warning> {
	warnings
		.iter()
		.filter(|warning| warning.kind() == kind)
		.collect()
}

// Logical text stream

#[test]
fn logical_text_skips_markup_and_decodes_entities() {
	let stream = LogicalText::new("<w:r><w:t>{$US</w:t></w:r><w:r><w:t>ER} &amp; co</w:t></w:r>");

	assert_eq!(stream.text(), "{$USER} & co");
	assert!(stream.is_split(&(0..7)));
	assert!(!stream.is_split(&(0..3)));
}

#[test]
fn logical_text_detects_entity_encoded_dollar() {
	let stream = LogicalText::new("<w:t>{&#36;FOO}</w:t>");

	assert_eq!(stream.text(), "{$FOO}");
	assert!(stream.is_entity_dollar(1));
	assert_eq!(stream.source_span(&(0..6)), 5..15);
}

#[test]
fn split_edits_replace_first_piece_and_empty_the_rest() {
	let stream = LogicalText::new("<w:t>{$A</w:t><w:t>B}</w:t>");
	let output = apply_edits(&stream, &[TextEdit::replace(0..5, "x")]);

	assert_eq!(output, "<w:t>x</w:t><w:t></w:t>");
}

#[test]
fn edits_apply_rightmost_first() {
	let stream = LogicalText::new("<w:t>ab cd</w:t>");
	let output = apply_edits(
		&stream,
		&[TextEdit::replace(0..2, "first"), TextEdit::replace(3..5, "second")],
	);

	assert_eq!(output, "<w:t>first second</w:t>");
}

#[test]
fn logical_text_reads_only_text_elements() {
	let stream = LogicalText::new(
		"<w:p>\n  <w:r><w:t xml:space=\"preserve\">{$USR_ </w:t></w:r>\n  		 <w:r><w:instrText>PAGE</w:instrText><w:t>NAME}</w:t></w:r>\n</w:p>",
	);

	assert_eq!(stream.text(), "{$USR_ NAME}");
	assert!(stream.is_split(&(0..12)));
}

#[test]
fn indented_split_tag_is_recovered() -> MergeTagResult<()> {
	let body = "<w:p>\n  <w:r><w:t>{$USR_</w:t></w:r>\n  <w:r><w:t>NAME}</w:t></w:r>\n</w:p>";
	let bytes = docx(&[("word/document.xml", document_xml(body))]);
	let report = validate(&bytes)?;

	assert_eq!(report.tags, vec!["USR_NAME"]);
	assert!(warnings_of(&report.warnings, WarningKind::TagRecoveryFailure).is_empty());

	let dataset = MergeDataset::from_json_str(r#"{"USR_NAME": "Jane"}"#)?;
	let outcome = MergeEngine::default().merge(&bytes, &dataset);
	let output = outcome.output.unwrap_or_default();

	assert_eq!(document_text(&output), "Jane");
	assert!(read_part(&output, "word/document.xml").contains("</w:r>\n  <w:r>"));

	Ok(())
}

// Run scanner

#[rstest]
#[case::intact("<w:t>{$FOO}</w:t>", CaptureMethod::Intact, "{$FOO}")]
#[case::entity_encoded("<w:t>{&#36;FOO}</w:t>", CaptureMethod::EntityEncoded, "{$FOO}")]
#[case::split_run("<w:t>{$FO</w:t><w:t>O}</w:t>", CaptureMethod::SplitRun, "{$FOO}")]
#[case::truncated("<w:t>{$FOO and more</w:t>", CaptureMethod::Truncated, "{$FOO")]
#[case::quoted_brace(
	r#"<w:t>{$FOO|replace:"}":"x"}</w:t>"#,
	CaptureMethod::Intact,
	r#"{$FOO|replace:"}":"x"}"#
)]
#[case::escaped_quote(
	r#"<w:t>{$FOO|replace:"a\"}":"x"} tail</w:t>"#,
	CaptureMethod::Intact,
	r#"{$FOO|replace:"a\"}":"x"}"#
)]
fn scanner_classifies_capture_method(
	#[case] xml: &str,
	#[case] method: CaptureMethod,
	#[case] text: &str,
) {
	let stream = LogicalText::new(xml);
	let occurrences = RunScanner::default().scan(MAIN_PART, &stream);

	assert_eq!(occurrences.len(), 1);
	assert_eq!(occurrences[0].method, method);
	assert_eq!(occurrences[0].logical_text(&stream), text);
}

#[test]
fn scanner_counts_split_entity_tag_once() {
	let stream = LogicalText::new("<w:t>{&#36;FO</w:t><w:t>O}</w:t>");
	let occurrences = RunScanner::default().scan(MAIN_PART, &stream);

	assert_eq!(occurrences.len(), 1);
	assert_eq!(occurrences[0].method, CaptureMethod::EntityEncoded);
}

#[test]
fn scanner_stops_unterminated_tag_at_next_tag() {
	let stream = LogicalText::new("<w:t>{$FOO {$BAR}</w:t>");
	let occurrences = RunScanner::default().scan(MAIN_PART, &stream);
	let methods: Vec<_> = occurrences.iter().map(|occurrence| occurrence.method).collect();

	assert_eq!(methods, vec![CaptureMethod::Truncated, CaptureMethod::Intact]);
	assert_eq!(occurrences[1].logical_text(&stream), "{$BAR}");
}

#[test]
fn scanner_honours_max_tag_length() {
	let stream = LogicalText::new("<w:t>{$ABCDEFGHIJ}</w:t>");
	let occurrences = RunScanner::new(8).scan(MAIN_PART, &stream);

	assert_eq!(occurrences[0].method, CaptureMethod::Truncated);
}

#[test]
fn scanner_marks_modifier_chains() {
	let stream = LogicalText::new("<w:t>{$A|upper} {$B}</w:t>");
	let occurrences = RunScanner::default().scan(MAIN_PART, &stream);

	assert!(occurrences[0].has_modifiers);
	assert!(!occurrences[1].has_modifiers);
}

// Tag canonicalizer

#[rstest]
#[case::plain("{$FOO}", Some("FOO"))]
#[case::entity("{&#36;FOO_BAR}", Some("FOO_BAR"))]
#[case::hex_entity("{&#x24;FOO_BAR}", Some("FOO_BAR"))]
#[case::modifiers(r#"{$USR_ABN|phone_format:"%2 %3 %3 %3"}"#, Some("USR_ABN"))]
#[case::trailing_underscores("{$FOO__}", Some("FOO"))]
#[case::markup("{$US</w:t></w:r><w:r><w:t>ER}", Some("USER"))]
#[case::unterminated("{$FOO", Some("FOO"))]
#[case::single_character("{$F}", None)]
#[case::lower_case("{$lower}", None)]
#[case::inner_whitespace("{$US ER}", None)]
#[case::leading_digit("{$1ABC}", None)]
fn canonicalizer_recovers_strict_names(#[case] raw: &str, #[case] expected: Option<&str>) {
	let tag = TagCanonicalizer::default().canonicalize_text(raw);

	assert_eq!(tag.as_deref().map(String::as_str), expected);
}

#[test]
fn split_tag_recovers_without_markup() {
	let xml = split_tag_paragraph();
	let stream = LogicalText::new(&xml);
	let occurrences = RunScanner::default().scan(MAIN_PART, &stream);

	assert_eq!(occurrences.len(), 1);
	assert_eq!(occurrences[0].method, CaptureMethod::SplitRun);

	let canonicalizer = TagCanonicalizer::new(CorrectionTable::builtin(), NameGrammar::MixedCase);
	let tag = canonicalizer.canonicalize(&occurrences[0]);

	assert_eq!(tag.as_deref().map(String::as_str), Some("USR_Signatory_FN"));
	let tag = tag.map(CanonicalTag::into_inner).unwrap_or_default();
	assert!(!tag.contains(['<', '>']));
	assert!(!tag.contains(char::is_whitespace));
}

#[rstest]
#[case::business("{$USR_B}", "USR_Business")]
#[case::name("{$PT2_N}", "PT2_Name")]
#[case::concept("{$C}", "Concept")]
#[case::purpose("{$P}", "Pmt_Purpose")]
fn builtin_corrections_apply_under_mixed_case(#[case] raw: &str, #[case] expected: &str) {
	let canonicalizer = TagCanonicalizer::new(CorrectionTable::builtin(), NameGrammar::MixedCase);
	let tag = canonicalizer.canonicalize_text(raw);

	assert_eq!(tag.as_deref().map(String::as_str), Some(expected));
}

#[test]
fn corrections_match_exact_stubs_only() {
	let table = CorrectionTable::new(vec![CorrectionRule::new("NM", "NAME")]);
	let canonicalizer = TagCanonicalizer::new(table, NameGrammar::Strict);

	let exact = canonicalizer.canonicalize_text("{$NM}");
	let longer = canonicalizer.canonicalize_text("{$NMX}");

	assert_eq!(exact.as_deref().map(String::as_str), Some("NAME"));
	assert_eq!(longer.as_deref().map(String::as_str), Some("NMX"));
}

// Directive conditions

#[test]
fn condition_parses_equality() -> Result<(), ConditionError> {
	let condition = Condition::parse(r#"$Type == "Premium""#)?;

	assert_eq!(
		condition.first,
		Term::Equals {
			field: "Type".to_string(),
			value: "Premium".to_string(),
		}
	);
	assert!(condition.rest.is_empty());

	Ok(())
}

#[test]
fn condition_parses_smart_quotes() -> Result<(), ConditionError> {
	let condition = Condition::parse("$Type == \u{201C}Premium\u{201D}")?;

	assert_eq!(
		condition.first,
		Term::Equals {
			field: "Type".to_string(),
			value: "Premium".to_string(),
		}
	);

	Ok(())
}

#[test]
fn condition_parses_functions_and_connectives() -> Result<(), ConditionError> {
	let condition = Condition::parse("!empty($A) AND count($B) > 1 or empty($C)")?;
	let terms: Vec<_> = condition.terms().cloned().collect();

	assert_eq!(
		terms,
		vec![
			Term::NotEmpty {
				field: "A".to_string()
			},
			Term::Count {
				field: "B".to_string(),
				comparison: Comparison::GreaterThan,
				value: 1,
			},
			Term::Empty {
				field: "C".to_string()
			},
		]
	);
	assert!(condition.is_mixed());

	Ok(())
}

#[rstest]
#[case::single_equals(r#"$Type = "x""#)]
#[case::missing_parens("!empty $A")]
#[case::missing_value("$Type ==")]
#[case::dangling_connective(r#"$A == "1" and"#)]
#[case::no_connective(r#"$A == "1" $B == "2""#)]
#[case::empty("")]
fn condition_rejects_malformed_headers(#[case] source: &str) {
	assert!(Condition::parse(source).is_err());
}

#[test]
fn condition_evaluates_left_to_right() -> Result<(), ConditionError> {
	let condition = Condition::parse(r#"$A == "1" or $B == "1" and $C == "1""#)?;
	let truthy = ["A"];

	let result = condition.evaluate(|term| truthy.contains(&term.field()));

	assert!(!result);

	Ok(())
}

// Modifiers

#[test]
fn modifier_chain_parses_quoted_and_bare_arguments() {
	let quoted = parse_modifier_chain(r#"{$X|replace:"NSW":"New South Wales"|upper}"#);
	let bare = parse_modifier_chain("{$X|phone_format:%2 %3 %3 %3}");
	let pipe_in_quotes = parse_modifier_chain(r#"{$X|replace:"|":"/"}"#);
	let escaped = parse_modifier_chain(r#"{$X|replace:"a\"b":'it\'s'}"#);

	assert_eq!(
		quoted,
		vec![
			ModifierCall::new("replace", vec!["NSW".into(), "New South Wales".into()]),
			ModifierCall::new("upper", vec![]),
		]
	);
	assert_eq!(
		bare,
		vec![ModifierCall::new("phone_format", vec!["%2 %3 %3 %3".into()])]
	);
	assert_eq!(
		pipe_in_quotes,
		vec![ModifierCall::new("replace", vec!["|".into(), "/".into()])]
	);
	assert_eq!(
		escaped,
		vec![ModifierCall::new("replace", vec!["a\"b".into(), "it's".into()])]
	);
}

#[rstest]
#[case::upper("{$X|upper}", "jane", "JANE")]
#[case::upper_any_case("{$X|UPPER}", "jane", "JANE")]
#[case::lower("{$X|lower}", "JANE", "jane")]
#[case::ucwords("{$X|ucwords}", "jane citizen", "Jane Citizen")]
#[case::ucfirst("{$X|ucfirst}", "jane citizen", "Jane citizen")]
#[case::chain("{$X|lower|ucwords}", "JANE CITIZEN", "Jane Citizen")]
#[case::replace(r#"{$X|replace:"NSW":"New South Wales"}"#, "NSW", "New South Wales")]
#[case::phone_repeated_token(r#"{$X|phone_format:"%2 %3 %3 %3"}"#, "0412 345 678", "0 4 4 4")]
#[case::phone_distinct_tokens(
	r#"{$X|phone_format:"%1%2 %3%4%5%6 %7%8%9%0"}"#,
	"0212345678",
	"02 1234 5678"
)]
#[case::phone_empty(r#"{$X|phone_format:"%2 %3"}"#, "", "")]
#[case::date_long(r#"{$X|date_format:"d F Y"}"#, "2025-10-05", "05 October 2025")]
#[case::date_short_month(r#"{$X|date_format:"j M Y"}"#, "2025-10-05", "5 Oct 2025")]
#[case::date_ordinal(r#"{$X|date_format:"l jS F Y"}"#, "2025-10-05", "Sunday 5th October 2025")]
#[case::date_from_slashes(r#"{$X|date_format:"Y-m-d"}"#, "05/10/2025", "2025-10-05")]
#[case::date_from_words(r#"{$X|date_format:"d/m/Y"}"#, "5 October 2025", "05/10/2025")]
#[case::date_time(r#"{$X|date_format:"g:i A"}"#, "2025-10-05 14:30", "2:30 PM")]
#[case::date_smart_quotes("{$X|date_format:\u{201C}d/m/Y\u{201D}}", "2025-10-05", "05/10/2025")]
#[case::date_unparseable(r#"{$X|date_format:"d F Y"}"#, "not a date", "not a date")]
#[case::date_empty(r#"{$X|date_format:"d F Y"}"#, "", "")]
fn modifiers_transform_values(#[case] tag: &str, #[case] value: &str, #[case] expected: &str) {
	let mut warnings = Vec::new();
	let calls = parse_modifier_chain(tag);
	let result = apply_modifiers("X", value.to_string(), &calls, &mut warnings);

	assert_eq!(result, expected);
	assert_eq!(warnings, Vec::<Warning>::new());
}

#[test]
fn unknown_modifier_passes_value_through() {
	let mut warnings = Vec::new();
	let calls = parse_modifier_chain("{$X|shout|upper}");
	let result = apply_modifiers("X", "jane".to_string(), &calls, &mut warnings);

	assert_eq!(result, "JANE");
	assert_eq!(
		warnings,
		vec![Warning::UnknownModifier {
			tag: "X".to_string(),
			modifier: "shout".to_string(),
		}]
	);
}

#[test]
fn wrong_argument_count_is_skipped() {
	let mut warnings = Vec::new();
	let calls = parse_modifier_chain(r#"{$X|replace:"a"}"#);
	let result = apply_modifiers("X", "abc".to_string(), &calls, &mut warnings);

	assert_eq!(result, "abc");
	assert_eq!(
		warnings,
		vec![Warning::InvalidModifierArgs {
			tag: "X".to_string(),
			modifier: "replace".to_string(),
			expected: "2".to_string(),
			got: 1,
		}]
	);
}

// Dataset

#[rstest]
#[case::braced("{$NAME}", "NAME")]
#[case::dollar("$NAME", "NAME")]
#[case::padded("  NAME ", "NAME")]
fn dataset_keys_are_normalized(#[case] key: &str, #[case] expected: &str) {
	assert_eq!(normalize_key(key), expected);
}

#[test]
fn dataset_loads_json_values() -> MergeTagResult<()> {
	let dataset = MergeDataset::from_json_str(
		r#"{"A": "x", "B": ["1", "2"], "C": 3, "D": true, "E": null}"#,
	)?;

	assert_eq!(dataset.len(), 5);
	assert_eq!(dataset.get("A"), Some(&Value::Scalar("x".to_string())));
	assert_eq!(dataset.get("B").map(Value::flatten), Some("1 2".to_string()));
	assert_eq!(dataset.get("B").map(Value::count), Some(2));
	assert_eq!(dataset.get("C").map(Value::flatten), Some("3".to_string()));
	assert_eq!(dataset.get("D").map(Value::flatten), Some("true".to_string()));
	assert!(dataset.get("E").is_some_and(Value::is_empty_value));

	Ok(())
}

#[rstest]
#[case::nested_object(r#"{"A": {"B": "c"}}"#)]
#[case::top_level_array(r#"["A"]"#)]
#[case::invalid_json("{")]
fn dataset_rejects_unsupported_json(#[case] content: &str) {
	let error = MergeDataset::from_json_str(content).map(|_| ());

	assert_eq!(error.map_err(|error| error.kind()), Err(ErrorKind::DatasetParse));
}

// Config

#[test]
fn config_parses_toml() -> MergeTagResult<()> {
	let config = EngineConfig::from_toml_str(
		r#"
name_grammar = "mixed_case"
listif_case_sensitive = false

[[corrections]]
stub = "USR_B"
canonical = "USR_Brand"

[aliases]
Pmt_Agreements = "Pmt_Negotiate"
"#,
	)?;

	assert_eq!(config.name_grammar, NameGrammar::MixedCase);
	assert!(!config.listif_case_sensitive);
	assert_eq!(config.max_tag_length, DEFAULT_MAX_TAG_LENGTH);
	assert_eq!(config.alias_for("Pmt_Agreements"), Some("Pmt_Negotiate"));
	assert_eq!(config.correction_table().lookup("USR_B"), Some("USR_Brand"));
	assert_eq!(config.correction_table().lookup("PT2_B"), Some("PT2_Business"));

	Ok(())
}

#[test]
fn config_can_replace_builtin_corrections() -> MergeTagResult<()> {
	let config = EngineConfig::from_toml_str(
		r#"
replace_default_corrections = true

[[corrections]]
stub = "NM"
canonical = "NAME"
"#,
	)?;
	let table = config.correction_table();

	assert_eq!(table.rules().len(), 1);
	assert_eq!(table.lookup("USR_B"), None);

	Ok(())
}

#[rstest]
#[case::invalid_toml("name_grammar = ")]
#[case::unknown_grammar(r#"name_grammar = "loose""#)]
#[case::zero_length("max_tag_length = 0")]
fn config_rejects_invalid_toml(#[case] content: &str) {
	let result = EngineConfig::from_toml_str(content).map(|_| ());

	assert_eq!(result.map_err(|error| error.kind()), Err(ErrorKind::ConfigParse));
}

#[test]
fn config_is_discovered_from_candidates() -> MergeTagResult<()> {
	let tmp = tempfile::tempdir()?;
	assert_eq!(EngineConfig::load(tmp.path())?, None);

	std::fs::write(tmp.path().join(".mergetag.toml"), "max_tag_length = 64\n")?;
	let config = EngineConfig::load(tmp.path())?;

	assert_eq!(config.map(|config| config.max_tag_length), Some(64));

	Ok(())
}

// Package

#[test]
fn package_rejects_non_zip_bytes() {
	let result = TemplatePackage::open(b"plain text, not a package").map(|_| ());

	assert_eq!(result.map_err(|error| error.kind()), Err(ErrorKind::PackageFormat));
}

#[test]
fn package_requires_main_document() {
	let bytes = docx(&[("word/header1.xml", header_xml(&paragraph("x")))]);
	let Err(error) = TemplatePackage::open(&bytes) else {
		panic!("package without a main document should not open");
	};

	assert_eq!(error.kind(), ErrorKind::PackageFormat);
	assert!(error.to_string().contains("missing document.xml"));
}

#[test]
fn package_records_optional_parts() -> MergeTagResult<()> {
	let bytes = docx(&[
		("word/document.xml", document_xml(&paragraph("body"))),
		("word/header1.xml", header_xml(&paragraph("head"))),
	]);
	let package = TemplatePackage::open(&bytes)?;
	let labels: Vec<_> = package.parts().iter().map(XmlPart::section_label).collect();

	assert_eq!(labels, vec!["Main Document", "Header 1"]);
	assert_eq!(package.missing_parts().len(), 5);
	assert!(!package.missing_parts().contains(&"word/header1.xml".to_string()));

	Ok(())
}

#[test]
fn package_write_keeps_untouched_entries() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$NAME}"]);
	let package = TemplatePackage::open(&bytes)?;
	let output = package.write(&[RewrittenPart {
		name: MAIN_PART.to_string(),
		xml: document_xml(&paragraph("Jane")),
	}])?;
	let reopened = TemplatePackage::open(&output)?;

	assert_eq!(
		reopened.entry_names().collect::<Vec<_>>(),
		package.entry_names().collect::<Vec<_>>()
	);
	assert_eq!(read_entry(&output, "word/media/image1.png"), IMAGE_BYTES.to_vec());
	assert_eq!(read_part(&output, "[Content_Types].xml"), CONTENT_TYPES);
	assert_eq!(document_text(&output), "Jane");

	let mut archive = zip::ZipArchive::new(std::io::Cursor::new(output.as_slice()))
		.map_err(|error| MergeTagError::PackageFormat(error.to_string()))?;
	let image = archive
		.by_name("word/media/image1.png")
		.map_err(|error| MergeTagError::PackageFormat(error.to_string()))?;
	assert_eq!(image.compression(), zip::CompressionMethod::Stored);

	Ok(())
}

// Directive parser

#[rstest]
#[case::unclosed_if(r#"{if $A == "1"}X"#, ErrorKind::UnbalancedDirective)]
#[case::unopened_close("X{/if}", ErrorKind::UnbalancedDirective)]
#[case::stray_else("X{else}Y", ErrorKind::UnbalancedDirective)]
#[case::stray_elseif(r#"X{elseif $A == "1"}Y"#, ErrorKind::UnbalancedDirective)]
#[case::mismatched_close(r#"{if $A == "1"}X{/listif}"#, ErrorKind::UnbalancedDirective)]
#[case::unclosed_listif(r#"{listif $A == "1"}X"#, ErrorKind::UnbalancedDirective)]
#[case::second_else(r#"{if $A == "1"}X{else}Y{else}Z{/if}"#, ErrorKind::DirectiveSyntax)]
#[case::elseif_after_else(
	r#"{if $A == "1"}X{else}Y{elseif $B == "1"}Z{/if}"#,
	ErrorKind::DirectiveSyntax
)]
#[case::bad_condition(r#"{if $A = "1"}X{/if}"#, ErrorKind::DirectiveSyntax)]
#[case::listif_without_value("{listif $A}X{/listif}", ErrorKind::DirectiveSyntax)]
#[case::listif_with_connective(
	r#"{listif $A == "1" and $B == "2"}X{/listif}"#,
	ErrorKind::DirectiveSyntax
)]
#[case::unclosed_header(r#"{if $A == "1" X"#, ErrorKind::DirectiveSyntax)]
fn parser_rejects_malformed_structure(#[case] text: &str, #[case] kind: ErrorKind) {
	let xml = document_xml(&paragraph(text));
	let stream = LogicalText::new(&xml);
	let result = DirectiveParser::new(MAIN_PART, &stream).parse(Vec::new());

	assert_eq!(result.map(|_| ()).map_err(|error| error.kind()), Err(kind));
}

#[test]
fn parser_reports_unbalanced_marker() {
	let xml = document_xml(&paragraph(r#"{if $A == "1"}X"#));
	let stream = LogicalText::new(&xml);
	let Err(error) = DirectiveParser::new(MAIN_PART, &stream).parse(Vec::new()) else {
		panic!("an unclosed block should not parse");
	};

	let MergeTagError::UnbalancedDirective {
		part,
		directive,
		offset,
	} = error
	else {
		panic!("expected an unbalanced directive error");
	};

	assert_eq!(part, MAIN_PART);
	assert_eq!(directive, r#"{if $A == "1"}"#);
	assert_eq!(&xml[offset..offset + 3], "{if");
}

#[test]
fn parser_builds_nested_tree() -> MergeTagResult<()> {
	let engine = MergeEngine::default();
	let part = XmlPart::new(
		MAIN_PART,
		document_xml(&paragraph(
			r#"{if !empty($A)}[{if $B == "x"}{$B}{else}notB{/if}]{/if}{listif $L == "v"}{$C}{/listif}"#,
		)),
	);
	let scan = engine.scan_part(&part);
	let tree = engine.parse_part(&scan)?;

	assert_eq!(tree.roots.len(), 2);
	assert_eq!(tree.conditional_count(), 3);
	assert_eq!(tree.tag_refs().len(), 2);

	let Directive::If(outer) = &tree.roots[0] else {
		panic!("expected an if block first");
	};
	assert_eq!(outer.bodies().count(), 1);
	assert!(matches!(outer.then_branch.children[0], Directive::If(_)));

	Ok(())
}

#[test]
fn directive_keywords_are_case_sensitive() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["Dear {$NAME}", "Sign here {If applicable}"]);
	let dataset: MergeDataset = [("NAME", "Jane")].into_iter().collect();
	let outcome = MergeEngine::default().merge(&bytes, &dataset);

	assert!(outcome.success);
	assert!(outcome.error.is_none());
	assert_eq!(
		document_text(&outcome.output.unwrap_or_default()),
		"Dear JaneSign here {If applicable}"
	);

	let report = validate(&bytes)?;
	assert!(report.is_valid());
	assert!(report.directives.is_empty());

	Ok(())
}

#[rstest]
#[case::single_quoted_brace("{if $T == 'a}b'}yes{else}no{/if}", "a}b", "yes")]
#[case::escaped_single_quote(r"{if $T == 'it\'s'}yes{else}no{/if}", "it's", "yes")]
#[case::escaped_double_quote(r#"{if $T == "say \"hi\""}yes{else}no{/if}"#, "say \"hi\"", "yes")]
#[case::escaped_mismatch(r"{if $T == 'it\'s'}yes{else}no{/if}", "its", "no")]
fn merge_reads_quoted_condition_values(
	#[case] template: &str,
	#[case] value: &str,
	#[case] expected: &str,
) -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[template]);
	let dataset: MergeDataset = [("T", value)].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), expected);

	Ok(())
}

// Validation

#[test]
fn validation_is_idempotent() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[
		"{$FOO} and {$BAR|upper}",
		r#"{if $Type == "Premium"}A{else}B{/if}"#,
	]);
	let engine = MergeEngine::default();

	assert_eq!(engine.validate(&bytes)?, engine.validate(&bytes)?);

	Ok(())
}

#[test]
fn validation_counts_distinct_tags() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$FOO} and {$BAR} and {$FOO}"]);
	let report = validate(&bytes)?;

	assert_eq!(report.tags, vec!["FOO", "BAR"]);
	assert_eq!(report.tag_count, 2);
	assert_eq!(report.occurrence_count, 3);
	assert!(report.is_valid());

	Ok(())
}

#[test]
fn validation_counts_modifiers() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{$A|upper} {$B|UPPER|replace:"a":"b"}"#]);
	let report = validate(&bytes)?;
	let modifiers: Vec<_> = report
		.modifiers
		.iter()
		.map(|(name, count)| (name.as_str(), *count))
		.collect();

	assert_eq!(modifiers, vec![("replace", 1), ("upper", 2)]);
	assert_eq!(report.sections[0].modifiers, 3);

	Ok(())
}

#[test]
fn validation_reports_structural_errors_without_failing() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{$NAME} {if $A == "1"}X"#]);
	let report = validate(&bytes)?;

	assert!(!report.is_valid());
	assert_eq!(report.errors.len(), 1);
	assert_eq!(report.errors[0].kind, ErrorKind::UnbalancedDirective);
	assert_eq!(report.tags, vec!["NAME"]);
	assert!(report.directives.is_empty());

	Ok(())
}

#[test]
fn validation_warns_about_recovery_problems() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$x} {$NAME the end"]);
	let report = validate(&bytes)?;

	assert_eq!(
		warnings_of(&report.warnings, WarningKind::TagRecoveryFailure),
		vec![&Warning::TagRecoveryFailure {
			part: MAIN_PART.to_string(),
			raw: "{$x}".to_string(),
		}]
	);
	assert_eq!(
		warnings_of(&report.warnings, WarningKind::UnterminatedTag),
		vec![&Warning::UnterminatedTag {
			part: MAIN_PART.to_string(),
			raw: "{$NAME".to_string(),
		}]
	);
	assert_eq!(report.tags, vec!["NAME"]);
	assert!(report.has_warnings());

	Ok(())
}

#[test]
fn validation_warns_about_mixed_operators() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{if $A == "1" or $B == "1" and $C == "1"}x{/if}"#]);
	let report = validate(&bytes)?;

	assert_eq!(
		warnings_of(&report.warnings, WarningKind::MixedLogicalOperators).len(),
		1
	);
	assert!(report.is_valid());

	Ok(())
}

#[test]
fn validation_rejects_unreadable_package() {
	let result = validate(b"not a zip").map(|_| ());

	assert_eq!(result.map_err(|error| error.kind()), Err(ErrorKind::PackageFormat));
}

#[test]
fn validation_labels_sections() -> MergeTagResult<()> {
	let bytes = docx(&[
		("word/document.xml", document_xml(&paragraph("{$NAME}"))),
		(
			"word/footer2.xml",
			header_xml(&paragraph(r#"{if $A == "1"}{$PAGE}{/if}"#)),
		),
	]);
	let report = validate(&bytes)?;
	let sections: Vec<_> = report.sections.iter().map(ToString::to_string).collect();

	assert_eq!(
		sections,
		vec![
			"Main Document: 1 merge tags, 0 conditionals, 0 modifiers",
			"Footer 2: 1 merge tags, 1 conditionals, 0 modifiers",
		]
	);
	assert_eq!(
		warnings_of(&report.warnings, WarningKind::PartMissing).len(),
		5
	);
	assert!(!report.has_warnings());

	Ok(())
}

#[test]
fn validation_summary_renders_as_text() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[
		"Dear {$NAME|upper},",
		r#"{if $TYPE == "Premium"}Premium{else}Basic{/if}"#,
	]);
	let report = validate(&bytes)?;

	insta::assert_snapshot!(report.render_text(), @r#"
	Validation Summary:
	- Merge tags found: 1 (1 occurrences)
	- Conditional blocks: 1
	- Modifiers used: 1
	- Warnings: 6
	- Errors: 0

	Sections:
	- Main Document: 1 merge tags, 1 conditionals, 1 modifiers

	Missing parts: word/header1.xml, word/header2.xml, word/header3.xml, word/footer1.xml, word/footer2.xml, word/footer3.xml

	Tags:
	- NAME

	Modifiers:
	- upper: 1

	Directives:
	- if $TYPE == "Premium" (2 branches) in Main Document

	Warnings:
	- optional part `word/header1.xml` not present
	- optional part `word/header2.xml` not present
	- optional part `word/header3.xml` not present
	- optional part `word/footer1.xml` not present
	- optional part `word/footer2.xml` not present
	- optional part `word/footer3.xml` not present
	"#);

	Ok(())
}

// Merge

#[test]
fn merge_applies_modifiers() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["Name: {$NAME|upper}", r#"{$STATE|replace:"NSW":"New South Wales"}"#]);
	let dataset: MergeDataset = [("NAME", "jane"), ("STATE", "NSW")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "Name: JANENew South Wales");
	assert_eq!(merged.result.unresolved_tags, Vec::<String>::new());

	Ok(())
}

#[rstest]
#[case::first_branch("Premium", "A")]
#[case::second_branch("Basic", "B")]
#[case::else_branch("Other", "C")]
fn merge_keeps_exactly_one_branch(#[case] value: &str, #[case] expected: &str) -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[
		r#"{if $Type == "Premium"}A{elseif $Type == "Basic"}B{else}C{/if}"#,
	]);
	let dataset: MergeDataset = [("Type", value)].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), expected);

	Ok(())
}

#[rstest]
#[case::member(vec!["Option1", "Option3"], "Option1", "kept")]
#[case::not_member(vec!["Option1", "Option3"], "Option2", "")]
#[case::case_mismatch(vec!["option1"], "Option1", "")]
fn merge_listif_tests_membership(
	#[case] options: Vec<&str>,
	#[case] expected: &str,
	#[case] text: &str,
) -> MergeTagResult<()> {
	let template = format!(r#"{{listif $Options == "{expected}"}}kept{{/listif}}"#);
	let bytes = docx_with_paragraphs(&[template.as_str()]);
	let dataset: MergeDataset = [("Options", options)].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), text);

	Ok(())
}

#[test]
fn merge_listif_can_ignore_case() -> MergeTagResult<()> {
	let engine = MergeEngine::new(EngineConfig {
		listif_case_sensitive: false,
		..EngineConfig::default()
	});
	let bytes = docx_with_paragraphs(&[r#"{listif $Options == "Option1"}kept{/listif}"#]);
	let dataset: MergeDataset = [("Options", vec!["OPTION1"])].into_iter().collect();
	let merged = engine.try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "kept");

	Ok(())
}

#[rstest]
#[case::count_greater(r#"{if count($OPTS) > 1}many{else}few{/if}"#, "many")]
#[case::count_equal(r#"{if count($OPTS) == 2}two{/if}"#, "two")]
#[case::count_missing(r#"{if count($NONE) < 1}none{/if}"#, "none")]
#[case::not_empty(r#"{if !empty($NAME)}named{/if}"#, "named")]
#[case::empty_missing(r#"{if empty($NONE)}blank{/if}"#, "blank")]
#[case::not_equals(r#"{if $NAME != "Bob"}not bob{/if}"#, "not bob")]
#[case::list_equals(r#"{if $OPTS == "a b"}joined{/if}"#, "joined")]
#[case::nested(r#"{if !empty($NAME)}[{if $NAME == "x"}x{else}{$NAME}{/if}]{/if}"#, "[Jane]")]
#[case::missing_field_equals(r#"{if $NONE == ""}unset{/if}"#, "unset")]
fn merge_evaluates_condition_terms(#[case] template: &str, #[case] expected: &str) -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[template]);
	let mut dataset = MergeDataset::new();
	dataset.insert("OPTS", vec!["a", "b"]);
	dataset.insert("NAME", "Jane");
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), expected);
	assert_eq!(merged.result.unresolved_tags, Vec::<String>::new());

	Ok(())
}

#[test]
fn merge_reports_each_missing_tag_once() -> MergeTagResult<()> {
	let bytes = docx(&[
		("word/document.xml", document_xml(&paragraph("Hello {$NAME}! {$NAME}"))),
		("word/header1.xml", header_xml(&paragraph("{$NAME}"))),
	]);
	let merged = MergeEngine::default().try_merge(&bytes, &MergeDataset::new())?;

	assert_eq!(document_text(&merged.bytes), "Hello ! ");
	assert_eq!(part_text(&merged.bytes, "word/header1.xml"), "");
	assert_eq!(merged.result.unresolved_tags, vec!["NAME"]);
	assert_eq!(
		warnings_of(&merged.result.warnings, WarningKind::UnresolvedTag),
		vec![&Warning::UnresolvedTag {
			tag: "NAME".to_string()
		}]
	);

	Ok(())
}

#[test]
fn merge_ignores_tags_in_dropped_branches() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{if $A == "1"}{$MISSING}{/if}done"#]);
	let dataset: MergeDataset = [("A", "0")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "done");
	assert_eq!(merged.result.unresolved_tags, Vec::<String>::new());

	Ok(())
}

#[test]
fn merge_aborts_on_unbalanced_directive() {
	let bytes = docx_with_paragraphs(&["{$NAME}", r#"{if $A == "1"}X"#]);
	let dataset: MergeDataset = [("NAME", "Jane")].into_iter().collect();
	let outcome = merge(&bytes, &dataset);

	assert!(!outcome.success);
	assert!(outcome.output.is_none());
	assert_eq!(
		outcome.error.map(|error| error.kind),
		Some(ErrorKind::UnbalancedDirective)
	);
}

#[test]
fn merge_reports_unreadable_package() {
	let outcome = merge(b"garbage", &MergeDataset::new());

	assert!(!outcome.success);
	assert_eq!(
		outcome.error.map(|error| error.kind),
		Some(ErrorKind::PackageFormat)
	);
}

#[test]
fn merge_rewrites_split_runs_in_place() -> MergeTagResult<()> {
	let body = "<w:p><w:r><w:t>Dear {$FIRST_</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>NAME},</w:t></w:r></w:p>";
	let bytes = docx(&[("word/document.xml", document_xml(body))]);
	let dataset: MergeDataset = [("FIRST_NAME", "Jane")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(
		read_part(&merged.bytes, MAIN_PART),
		document_xml(
			"<w:p><w:r><w:t>Dear Jane</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>,</w:t></w:r></w:p>"
		)
	);

	Ok(())
}

#[test]
fn merge_escapes_values() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$COMPANY}"]);
	let dataset: MergeDataset = [("COMPANY", "A & B <Co>")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert!(read_part(&merged.bytes, MAIN_PART).contains("A &amp; B &lt;Co&gt;"));
	assert_eq!(document_text(&merged.bytes), "A & B <Co>");

	Ok(())
}

#[test]
fn merge_honours_escaped_quotes_in_modifier_arguments() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{$NAME|replace:"a\"b":"X"}"#]);
	let dataset: MergeDataset = [("NAME", "xa\"by")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "xXy");
	assert!(warnings_of(&merged.result.warnings, WarningKind::UnterminatedTag).is_empty());

	Ok(())
}

#[test]
fn merge_substitutes_entity_encoded_tags() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{&#36;FOO} end"]);
	let dataset: MergeDataset = [("FOO", "bar")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "bar end");

	Ok(())
}

#[test]
fn merge_substitutes_recoverable_unterminated_tags() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["Name {$NAME the end"]);
	let dataset: MergeDataset = [("NAME", "Jane")].into_iter().collect();
	let merged = MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "Name Jane the end");
	assert_eq!(
		warnings_of(&merged.result.warnings, WarningKind::UnterminatedTag).len(),
		1
	);

	Ok(())
}

#[test]
fn merge_removes_unrecoverable_fragments() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["a{$x}b"]);
	let merged = MergeEngine::default().try_merge(&bytes, &MergeDataset::new())?;

	assert_eq!(document_text(&merged.bytes), "ab");
	assert_eq!(
		warnings_of(&merged.result.warnings, WarningKind::TagRecoveryFailure).len(),
		1
	);
	assert_eq!(merged.result.unresolved_tags, Vec::<String>::new());

	Ok(())
}

#[test]
fn merge_falls_back_to_aliases() -> MergeTagResult<()> {
	let mut config = EngineConfig {
		name_grammar: NameGrammar::MixedCase,
		..EngineConfig::default()
	};
	config
		.aliases
		.insert("Pmt_Agreements".to_string(), "Pmt_Negotiate".to_string());
	let bytes = docx_with_paragraphs(&["{$Pmt_Agreements}"]);
	let dataset: MergeDataset = [("Pmt_Negotiate", "Yes")].into_iter().collect();
	let merged = MergeEngine::new(config).try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "Yes");

	Ok(())
}

#[test]
fn merge_recovers_split_mixed_case_tag() -> MergeTagResult<()> {
	let body = split_tag_paragraph();
	let bytes = docx(&[("word/document.xml", document_xml(&body))]);
	let dataset: MergeDataset = [("USR_Signatory_FN", "Jane")].into_iter().collect();
	let merged = mixed_case_engine().try_merge(&bytes, &dataset)?;

	assert_eq!(document_text(&merged.bytes), "Jane");
	assert!(read_part(&merged.bytes, MAIN_PART).contains("<w:rPr><w:b/></w:rPr>"));

	Ok(())
}

#[test]
fn merge_warns_about_modifier_problems() {
	let bytes = docx_with_paragraphs(&["{$NAME|shout}"]);
	let dataset: MergeDataset = [("NAME", "Jane")].into_iter().collect();
	let outcome = merge(&bytes, &dataset);

	assert!(outcome.success);
	assert_eq!(
		warnings_of(&outcome.warnings, WarningKind::UnknownModifier).len(),
		1
	);
	let output = outcome.output.unwrap_or_default();
	assert_eq!(document_text(&output), "Jane");
}

#[test]
fn merge_is_repeatable() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&[r#"{$NAME} {if $A == "1"}x{/if}"#]);
	let dataset: MergeDataset = [("NAME", "Jane"), ("A", "1")].into_iter().collect();
	let engine = MergeEngine::default();
	let first = engine.try_merge(&bytes, &dataset)?;
	let second = engine.try_merge(&bytes, &dataset)?;

	assert_eq!(first.result, second.result);
	assert_eq!(document_text(&first.bytes), document_text(&second.bytes));

	Ok(())
}

#[test]
fn merge_outcome_serializes_without_bytes() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$NAME}"]);
	let outcome = merge(&bytes, &MergeDataset::new());
	let json = serde_json::to_value(&outcome)
		.map_err(|error| MergeTagError::DatasetParse(error.to_string()))?;

	assert_eq!(json["success"], serde_json::json!(true));
	assert_eq!(json["unresolved_tags"], serde_json::json!(["NAME"]));
	assert!(json.get("output").is_none());
	assert!(json.get("error").is_none());
	assert_eq!(json["warnings"][0]["kind"], serde_json::json!("unresolved_tag"));

	Ok(())
}

#[test]
#[tracing_test::traced_test]
fn merge_logs_summary() -> MergeTagResult<()> {
	let bytes = docx_with_paragraphs(&["{$NAME}"]);
	let dataset: MergeDataset = [("NAME", "Jane")].into_iter().collect();
	MergeEngine::default().try_merge(&bytes, &dataset)?;

	assert!(logs_contain("merged template"));

	Ok(())
}
