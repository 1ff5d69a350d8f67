use std::ops::Range;

use serde::Serialize;

use crate::CanonicalTag;
use crate::LogicalText;
use crate::MergeTagError;
use crate::MergeTagResult;
use crate::ModifierCall;
use crate::RawTagOccurrence;
use crate::Warning;
use crate::lexer::tokenize;
use crate::parse_modifier_chain;
use crate::tokens::SpannedToken;
use crate::tokens::Token;

/// Operator of a `count($F) <op> n` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
	GreaterThan,
	Equal,
	LessThan,
}

impl Comparison {
	pub fn holds(self, left: i64, right: i64) -> bool {
		match self {
			Self::GreaterThan => left > right,
			Self::Equal => left == right,
			Self::LessThan => left < right,
		}
	}
}

impl std::fmt::Display for Comparison {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::GreaterThan => write!(f, ">"),
			Self::Equal => write!(f, "=="),
			Self::LessThan => write!(f, "<"),
		}
	}
}

/// A single test inside a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Term {
	/// `!empty($F)`
	NotEmpty { field: String },
	/// `empty($F)`
	Empty { field: String },
	/// `$F == "value"`
	Equals { field: String, value: String },
	/// `$F != "value"`
	NotEquals { field: String, value: String },
	/// `count($F) > 1`
	Count {
		field: String,
		comparison: Comparison,
		value: i64,
	},
}

impl Term {
	pub fn field(&self) -> &str {
		match self {
			Self::NotEmpty { field }
			| Self::Empty { field }
			| Self::Equals { field, .. }
			| Self::NotEquals { field, .. }
			| Self::Count { field, .. } => field,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
	And,
	Or,
}

/// A parsed condition. Terms combine strictly left to right without
/// precedence: `a or b and c` is `(a or b) and c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
	pub first: Term,
	pub rest: Vec<(Connective, Term)>,
	/// The condition as written, for reports.
	pub source: String,
}

impl Condition {
	pub fn parse(source: &str) -> Result<Self, ConditionError> {
		let tokens = tokenize(source).map_err(|error| ConditionError {
			offset: error.offset,
			message: error.message,
		})?;

		let mut parser = ConditionParser {
			tokens: &tokens,
			cursor: 0,
			end: source.len(),
		};

		let first = parser.term()?;
		let mut rest = Vec::new();

		while let Some(token) = parser.next() {
			let connective = match token.token {
				Token::And => Connective::And,
				Token::Or => Connective::Or,
				_ => {
					return Err(ConditionError {
						offset: token.span.start,
						message: format!("expected `and` or `or`, found `{}`", token.token),
					});
				}
			};
			rest.push((connective, parser.term()?));
		}

		Ok(Self {
			first,
			rest,
			source: source.to_string(),
		})
	}

	/// Whether `and` and `or` both appear.
	pub fn is_mixed(&self) -> bool {
		let has_and = self.rest.iter().any(|(c, _)| *c == Connective::And);
		let has_or = self.rest.iter().any(|(c, _)| *c == Connective::Or);
		has_and && has_or
	}

	pub fn terms(&self) -> impl Iterator<Item = &Term> {
		std::iter::once(&self.first).chain(self.rest.iter().map(|(_, term)| term))
	}

	/// Fold the term results left to right.
	pub fn evaluate(&self, mut test: impl FnMut(&Term) -> bool) -> bool {
		let mut result = test(&self.first);
		for (connective, term) in &self.rest {
			result = match connective {
				Connective::And => result && test(term),
				Connective::Or => result || test(term),
			};
		}
		result
	}
}

/// A malformed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionError {
	/// Byte offset inside the condition text.
	pub offset: usize,
	pub message: String,
}

struct ConditionParser<'t> {
	tokens: &'t [SpannedToken],
	cursor: usize,
	end: usize,
}

impl<'t> ConditionParser<'t> {
	fn peek(&self) -> Option<&'t Token> {
		self.tokens.get(self.cursor).map(|token| &token.token)
	}

	fn next(&mut self) -> Option<&'t SpannedToken> {
		let token = self.tokens.get(self.cursor);
		if token.is_some() {
			self.cursor += 1;
		}
		token
	}

	fn error(&self, message: impl Into<String>) -> ConditionError {
		let offset = self
			.tokens
			.get(self.cursor)
			.map_or(self.end, |token| token.span.start);
		ConditionError {
			offset,
			message: message.into(),
		}
	}

	fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
		if self.peek() == Some(expected) {
			self.cursor += 1;
			Ok(())
		} else {
			Err(self.error(format!("expected `{expected}`")))
		}
	}

	fn term(&mut self) -> Result<Term, ConditionError> {
		match self.peek() {
			Some(Token::Bang) => {
				self.cursor += 1;
				self.expect(&Token::Empty)?;
				let field = self.call_argument()?;
				Ok(Term::NotEmpty { field })
			}
			Some(Token::Empty) => {
				self.cursor += 1;
				let field = self.call_argument()?;
				Ok(Term::Empty { field })
			}
			Some(Token::Count) => {
				self.cursor += 1;
				let field = self.call_argument()?;
				let comparison = match self.peek() {
					Some(Token::GreaterThan) => Comparison::GreaterThan,
					Some(Token::Equals) => Comparison::Equal,
					Some(Token::LessThan) => Comparison::LessThan,
					_ => return Err(self.error("expected `>`, `==` or `<` after `count(...)`")),
				};
				self.cursor += 1;
				let Some(Token::Int(value)) = self.peek() else {
					return Err(self.error("expected an integer"));
				};
				self.cursor += 1;
				Ok(Term::Count {
					field,
					comparison,
					value: *value,
				})
			}
			Some(Token::Dollar | Token::Ident(_)) => {
				let field = self.field()?;
				let negated = match self.peek() {
					Some(Token::Equals) => false,
					Some(Token::NotEquals) => true,
					_ => return Err(self.error(format!("expected `==` or `!=` after `{field}`"))),
				};
				self.cursor += 1;
				let value = self.literal()?;
				Ok(if negated {
					Term::NotEquals { field, value }
				} else {
					Term::Equals { field, value }
				})
			}
			_ => Err(self.error("expected a condition")),
		}
	}

	/// `$FIELD` or `FIELD`.
	fn field(&mut self) -> Result<String, ConditionError> {
		if self.peek() == Some(&Token::Dollar) {
			self.cursor += 1;
		}

		match self.peek().and_then(Token::as_field_name) {
			Some(name) => {
				self.cursor += 1;
				Ok(name)
			}
			None => Err(self.error("expected a field name")),
		}
	}

	/// `( field )`
	fn call_argument(&mut self) -> Result<String, ConditionError> {
		self.expect(&Token::ParenOpen)?;
		let field = self.field()?;
		self.expect(&Token::ParenClose)?;
		Ok(field)
	}

	fn literal(&mut self) -> Result<String, ConditionError> {
		let value = match self.peek() {
			Some(Token::String(value, _)) => value.clone(),
			Some(Token::Int(value)) => value.to_string(),
			_ => return Err(self.error("expected a quoted value")),
		};
		self.cursor += 1;
		Ok(value)
	}
}

/// A contiguous region of the logical stream with the directives found
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
	pub span: Range<usize>,
	pub children: Vec<Directive>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElseIf {
	/// Span of the `{elseif ...}` marker.
	pub header: Range<usize>,
	pub condition: Condition,
	pub body: Body,
}

/// `{if}...{elseif}...{else}...{/if}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfBlock {
	/// From the start of `{if` to the end of `{/if}`.
	pub span: Range<usize>,
	pub condition: Condition,
	pub then_branch: Body,
	pub else_ifs: Vec<ElseIf>,
	pub else_branch: Option<Body>,
}

impl IfBlock {
	/// Every branch body in source order.
	pub fn bodies(&self) -> impl Iterator<Item = &Body> {
		std::iter::once(&self.then_branch)
			.chain(self.else_ifs.iter().map(|branch| &branch.body))
			.chain(self.else_branch.iter())
	}
}

/// `{listif $F == "value"}...{/listif}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListIfBlock {
	pub span: Range<usize>,
	pub field: String,
	pub expected: String,
	pub body: Body,
}

/// A merge tag reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
	/// Index into the part's occurrence list.
	pub occurrence: usize,
	/// Span in the logical stream.
	pub span: Range<usize>,
	/// `None` when no valid name could be recovered.
	pub tag: Option<CanonicalTag>,
	pub modifiers: Vec<ModifierCall>,
	/// The original XML of the tag.
	pub raw: String,
}

impl TagRef {
	pub fn from_occurrence(
		index: usize,
		occurrence: &RawTagOccurrence,
		tag: Option<CanonicalTag>,
		stream: &LogicalText<'_>,
	) -> Self {
		let modifiers = if occurrence.has_modifiers {
			parse_modifier_chain(occurrence.logical_text(stream))
		} else {
			Vec::new()
		};

		Self {
			occurrence: index,
			span: occurrence.logical.clone(),
			tag,
			modifiers,
			raw: occurrence.raw.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
	If(IfBlock),
	ListIf(ListIfBlock),
	TagRef(TagRef),
}

impl Directive {
	/// Visit this directive and every nested directive, depth first.
	pub fn visit<'t>(&'t self, visitor: &mut impl FnMut(&'t Directive)) {
		visitor(self);
		match self {
			Self::If(block) => {
				for body in block.bodies() {
					for child in &body.children {
						child.visit(visitor);
					}
				}
			}
			Self::ListIf(block) => {
				for child in &block.body.children {
					child.visit(visitor);
				}
			}
			Self::TagRef(_) => {}
		}
	}
}

/// The directives of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveTree {
	pub part: String,
	pub roots: Vec<Directive>,
	/// Non-fatal findings such as mixed `and`/`or`.
	pub warnings: Vec<Warning>,
}

impl DirectiveTree {
	pub fn visit<'t>(&'t self, mut visitor: impl FnMut(&'t Directive)) {
		for root in &self.roots {
			root.visit(&mut visitor);
		}
	}

	/// Every tag reference, including those in branches that may be dropped.
	pub fn tag_refs(&self) -> Vec<&TagRef> {
		let mut refs = Vec::new();
		self.visit(|directive| {
			if let Directive::TagRef(tag_ref) = directive {
				refs.push(tag_ref);
			}
		});
		refs
	}

	/// Number of `if` and `listif` blocks.
	pub fn conditional_count(&self) -> usize {
		let mut count = 0;
		self.visit(|directive| {
			if matches!(directive, Directive::If(_) | Directive::ListIf(_)) {
				count += 1;
			}
		});
		count
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerKind {
	If(Condition),
	ElseIf(Condition),
	Else,
	EndIf,
	ListIf { field: String, expected: String },
	EndListIf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Marker {
	kind: MarkerKind,
	/// From `{` to `}` inclusive.
	span: Range<usize>,
}

const KEYWORDS: [&str; 6] = ["/if", "/listif", "elseif", "else", "listif", "if"];

/// Parses the control flow blocks of one part into a [`DirectiveTree`].
///
/// Unbalanced nesting and malformed headers are fatal for the whole
/// template.
pub struct DirectiveParser<'s, 'a> {
	part: &'s str,
	stream: &'s LogicalText<'a>,
}

struct BranchCreator {
	header: Range<usize>,
	condition: Option<Condition>,
	body_start: usize,
	children: Vec<Directive>,
}

impl BranchCreator {
	fn into_body(self, end: usize) -> (Range<usize>, Option<Condition>, Body) {
		let body = Body {
			span: self.body_start..end,
			children: self.children,
		};
		(self.header, self.condition, body)
	}
}

enum BlockKind {
	If,
	ListIf { field: String, expected: String },
}

struct BlockCreator {
	kind: BlockKind,
	opening: Range<usize>,
	branches: Vec<(Range<usize>, Option<Condition>, Body)>,
	current: BranchCreator,
	has_else: bool,
}

impl BlockCreator {
	fn open(kind: BlockKind, marker_span: &Range<usize>, condition: Option<Condition>) -> Self {
		Self {
			kind,
			opening: marker_span.clone(),
			branches: Vec::new(),
			current: BranchCreator {
				header: marker_span.clone(),
				condition,
				body_start: marker_span.end,
				children: Vec::new(),
			},
			has_else: false,
		}
	}

	fn next_branch(&mut self, marker_span: &Range<usize>, condition: Option<Condition>) {
		let finished = std::mem::replace(
			&mut self.current,
			BranchCreator {
				header: marker_span.clone(),
				condition,
				body_start: marker_span.end,
				children: Vec::new(),
			},
		);
		self.branches.push(finished.into_body(marker_span.start));
	}

	fn into_directive(mut self, closing: &Range<usize>) -> Option<Directive> {
		let finished = self.current.into_body(closing.start);
		self.branches.push(finished);
		let span = self.opening.start..closing.end;
		let mut branches = self.branches.into_iter();

		match self.kind {
			BlockKind::ListIf { field, expected } => {
				let (_, _, body) = branches.next()?;
				Some(Directive::ListIf(ListIfBlock {
					span,
					field,
					expected,
					body,
				}))
			}
			BlockKind::If => {
				let (_, condition, then_branch) = branches.next()?;
				let condition = condition?;
				let mut else_ifs = Vec::new();
				let mut else_branch = None;

				for (header, condition, body) in branches {
					match condition {
						Some(condition) => {
							else_ifs.push(ElseIf {
								header,
								condition,
								body,
							});
						}
						None => else_branch = Some(body),
					}
				}

				Some(Directive::If(IfBlock {
					span,
					condition,
					then_branch,
					else_ifs,
					else_branch,
				}))
			}
		}
	}
}

impl<'s, 'a> DirectiveParser<'s, 'a> {
	pub fn new(part: &'s str, stream: &'s LogicalText<'a>) -> Self {
		Self { part, stream }
	}

	/// Build the tree from the part's tag references, which must be ordered
	/// by position. Tags inside a directive header belong to the header and
	/// are dropped.
	#[tracing::instrument(level = "debug", skip_all, fields(part = self.part))]
	pub fn parse(&self, tags: Vec<TagRef>) -> MergeTagResult<DirectiveTree> {
		let markers = self.find_markers(&tags)?;
		let mut warnings = Vec::new();
		let mut roots: Vec<Directive> = Vec::new();
		let mut pending: Vec<BlockCreator> = Vec::new();
		let mut tags = tags.into_iter().peekable();

		for Marker { kind, span } in markers {
			while let Some(tag) = tags.next_if(|tag| tag.span.start < span.start) {
				push_child(&mut pending, &mut roots, Directive::TagRef(tag));
			}
			while tags.next_if(|tag| tag.span.start < span.end).is_some() {}

			match kind {
				MarkerKind::If(condition) => {
					self.check_mixed(&condition, &mut warnings);
					pending.push(BlockCreator::open(BlockKind::If, &span, Some(condition)));
				}
				MarkerKind::ListIf { field, expected } => {
					pending.push(BlockCreator::open(
						BlockKind::ListIf { field, expected },
						&span,
						None,
					));
				}
				MarkerKind::ElseIf(condition) => {
					self.check_mixed(&condition, &mut warnings);
					let creator = self.open_if(&mut pending, &span)?;
					if creator.has_else {
						return Err(self.syntax_error(&span, "`elseif` after `else`"));
					}
					creator.next_branch(&span, Some(condition));
				}
				MarkerKind::Else => {
					let creator = self.open_if(&mut pending, &span)?;
					if creator.has_else {
						return Err(self.syntax_error(&span, "second `else` in the same block"));
					}
					creator.has_else = true;
					creator.next_branch(&span, None);
				}
				MarkerKind::EndIf => {
					let directive = self.close_block(&mut pending, &span, true)?;
					push_child(&mut pending, &mut roots, directive);
				}
				MarkerKind::EndListIf => {
					let directive = self.close_block(&mut pending, &span, false)?;
					push_child(&mut pending, &mut roots, directive);
				}
			}
		}

		for tag in tags {
			push_child(&mut pending, &mut roots, Directive::TagRef(tag));
		}

		if let Some(creator) = pending.last() {
			return Err(self.unbalanced(&creator.opening));
		}

		Ok(DirectiveTree {
			part: self.part.to_string(),
			roots,
			warnings,
		})
	}

	fn open_if<'p>(
		&self,
		pending: &'p mut [BlockCreator],
		span: &Range<usize>,
	) -> MergeTagResult<&'p mut BlockCreator> {
		match pending.last_mut() {
			Some(creator) if matches!(creator.kind, BlockKind::If) => Ok(creator),
			_ => Err(self.unbalanced(span)),
		}
	}

	/// Pop the innermost block, which must be of the kind the closing marker
	/// ends.
	fn close_block(
		&self,
		pending: &mut Vec<BlockCreator>,
		span: &Range<usize>,
		closes_if: bool,
	) -> MergeTagResult<Directive> {
		let matches_top = pending
			.last()
			.is_some_and(|creator| matches!(creator.kind, BlockKind::If) == closes_if);
		if !matches_top {
			return Err(self.unbalanced(span));
		}

		pending
			.pop()
			.and_then(|creator| creator.into_directive(span))
			.ok_or_else(|| self.unbalanced(span))
	}

	fn check_mixed(&self, condition: &Condition, warnings: &mut Vec<Warning>) {
		if condition.is_mixed() {
			tracing::warn!(part = self.part, condition = %condition.source, "mixed and/or in condition");
			warnings.push(Warning::MixedLogicalOperators {
				part: self.part.to_string(),
				condition: condition.source.clone(),
			});
		}
	}

	fn unbalanced(&self, span: &Range<usize>) -> MergeTagError {
		MergeTagError::UnbalancedDirective {
			part: self.part.to_string(),
			directive: self.stream.text()[span.clone()].to_string(),
			offset: self.stream.source_offset(span.start),
		}
	}

	fn syntax_error(&self, span: &Range<usize>, message: impl Into<String>) -> MergeTagError {
		self.syntax_error_at(span.start, message)
	}

	fn syntax_error_at(&self, position: usize, message: impl Into<String>) -> MergeTagError {
		MergeTagError::DirectiveSyntax {
			part: self.part.to_string(),
			message: message.into(),
			offset: self.stream.source_offset(position),
		}
	}

	/// Find every directive marker outside of merge tags, in order.
	fn find_markers(&self, tags: &[TagRef]) -> MergeTagResult<Vec<Marker>> {
		let text = self.stream.text();
		let mut markers = Vec::new();
		let mut cursor = 0;
		let mut next_tag = 0;

		while let Some(found) = text.get(cursor..).and_then(|rest| rest.find('{')) {
			let start = cursor + found;
			cursor = start + 1;

			while tags.get(next_tag).is_some_and(|tag| tag.span.end <= start) {
				next_tag += 1;
			}
			if tags.get(next_tag).is_some_and(|tag| tag.span.start <= start) {
				continue;
			}

			let Some(keyword) = match_keyword(&text[start + 1..]) else {
				continue;
			};

			let header_start = start + 1 + keyword.len();
			let Some(close) = find_closing_brace(text, header_start) else {
				return Err(self.syntax_error_at(start, format!("`{{{keyword}` has no closing `}}`")));
			};

			let header = &text[header_start..close];
			let span = start..close + 1;
			let kind = self.marker_kind(keyword, header, header_start)?;

			tracing::debug!(part = self.part, marker = &text[span.clone()], "found directive");
			markers.push(Marker { kind, span });
			cursor = close + 1;
		}

		Ok(markers)
	}

	fn marker_kind(&self, keyword: &str, header: &str, header_start: usize) -> MergeTagResult<MarkerKind> {
		let trimmed = header.trim();
		let leading = header.len() - header.trim_start().len();

		let parse_condition = |what: &str| -> MergeTagResult<Condition> {
			if trimmed.is_empty() {
				return Err(self.syntax_error_at(header_start, format!("`{what}` needs a condition")));
			}
			Condition::parse(trimmed).map_err(|error| {
				self.syntax_error_at(header_start + leading + error.offset, error.message)
			})
		};

		let kind = match keyword {
			"if" => MarkerKind::If(parse_condition("if")?),
			"elseif" => MarkerKind::ElseIf(parse_condition("elseif")?),
			"listif" => {
				let condition = parse_condition("listif")?;
				match (condition.first, condition.rest.is_empty()) {
					(Term::Equals { field, value }, true) => {
						MarkerKind::ListIf {
							field,
							expected: value,
						}
					}
					_ => {
						return Err(self.syntax_error_at(
							header_start,
							"`listif` expects `$FIELD == \"value\"`",
						));
					}
				}
			}
			other => {
				if !trimmed.is_empty() {
					return Err(self.syntax_error_at(
						header_start + leading,
						format!("unexpected `{trimmed}` after `{other}`"),
					));
				}
				match other {
					"else" => MarkerKind::Else,
					"/if" => MarkerKind::EndIf,
					_ => MarkerKind::EndListIf,
				}
			}
		};

		Ok(kind)
	}
}

fn push_child(pending: &mut [BlockCreator], roots: &mut Vec<Directive>, directive: Directive) {
	match pending.last_mut() {
		Some(creator) => creator.current.children.push(directive),
		None => roots.push(directive),
	}
}

/// The directive keyword at the start of `rest`, if any. Keywords are
/// lowercase, so `{If applicable}` is prose. The keyword must not run on into
/// a longer word, so `{iffy}` and `{elsewhere}` are plain text too.
fn match_keyword(rest: &str) -> Option<&'static str> {
	KEYWORDS.into_iter().find(|keyword| {
		rest.starts_with(keyword)
			&& !rest[keyword.len()..]
				.chars()
				.next()
				.is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
	})
}

/// Position of the `}` closing a directive header. Braces inside quotes are
/// literal, a backslash inside straight quotes escapes the next character and
/// an unquoted `{` means the header was never closed.
fn find_closing_brace(text: &str, from: usize) -> Option<usize> {
	let mut quote: Option<char> = None;
	let mut escaped = false;

	for (offset, ch) in text.get(from..)?.char_indices() {
		if escaped {
			escaped = false;
			continue;
		}

		match (quote, ch) {
			(Some('"' | '\''), '\\') => escaped = true,
			(Some('"'), '"')
			| (Some('\''), '\'')
			| (Some('\u{201C}'), '\u{201D}')
			| (Some('\u{2018}'), '\u{2019}') => quote = None,
			(Some(_), _) => {}
			(None, '"' | '\'' | '\u{201C}' | '\u{2018}') => quote = Some(ch),
			(None, '}') => return Some(from + offset),
			(None, '{') => return None,
			(None, _) => {}
		}
	}

	None
}
