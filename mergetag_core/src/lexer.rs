use logos::Logos;
use snailquote::unescape;

use crate::tokens::SpannedToken;
use crate::tokens::Token;

/// Raw tokens produced by logos for a directive header.
#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n\x{A0}]+")]
enum RawToken {
	#[token("$")]
	Dollar,
	#[token("!")]
	Bang,
	#[token("(")]
	ParenOpen,
	#[token(")")]
	ParenClose,
	#[token("==")]
	Equals,
	#[token("!=")]
	NotEquals,
	#[token(">")]
	GreaterThan,
	#[token("<")]
	LessThan,
	#[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
	Ident,
	#[regex(r"-?[0-9]+")]
	Integer,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuotedString,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuotedString,
	#[regex("“[^”]*”")]
	SmartDoubleQuotedString,
	#[regex("‘[^’]*’")]
	SmartSingleQuotedString,
}

/// A header fragment the lexer could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
	/// Byte offset inside the header text.
	pub offset: usize,
	pub message: String,
}

/// Tokenize a directive header.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexError> {
	let mut tokens = Vec::new();

	for (result, span) in RawToken::lexer(source).spanned() {
		let slice = &source[span.clone()];
		let Ok(raw) = result else {
			return Err(LexError {
				offset: span.start,
				message: format!("unexpected `{slice}`"),
			});
		};

		let token = match raw {
			RawToken::Dollar => Token::Dollar,
			RawToken::Bang => Token::Bang,
			RawToken::ParenOpen => Token::ParenOpen,
			RawToken::ParenClose => Token::ParenClose,
			RawToken::Equals => Token::Equals,
			RawToken::NotEquals => Token::NotEquals,
			RawToken::GreaterThan => Token::GreaterThan,
			RawToken::LessThan => Token::LessThan,
			RawToken::Ident => keyword_or_ident(slice),
			RawToken::Integer => {
				let value = slice.parse::<i64>().map_err(|error| LexError {
					offset: span.start,
					message: format!("invalid integer `{slice}`: {error}"),
				})?;
				Token::Int(value)
			}
			RawToken::DoubleQuotedString | RawToken::SingleQuotedString => {
				let value = unquote(slice).ok_or_else(|| LexError {
					offset: span.start,
					message: format!("invalid escape in {slice}"),
				})?;
				Token::String(value, slice.chars().next().unwrap_or('"'))
			}
			RawToken::SmartDoubleQuotedString => {
				Token::String(strip_quotes(slice).to_string(), '\u{201C}')
			}
			RawToken::SmartSingleQuotedString => {
				Token::String(strip_quotes(slice).to_string(), '\u{2018}')
			}
		};

		tokens.push(SpannedToken { token, span });
	}

	Ok(tokens)
}

fn keyword_or_ident(slice: &str) -> Token {
	match slice.to_ascii_lowercase().as_str() {
		"and" => Token::And,
		"or" => Token::Or,
		"empty" => Token::Empty,
		"count" => Token::Count,
		_ => Token::Ident(slice.to_string()),
	}
}

/// Remove the surrounding quote characters, whatever their width.
pub(crate) fn strip_quotes(slice: &str) -> &str {
	let mut chars = slice.chars();
	chars.next();
	chars.next_back();
	chars.as_str()
}

/// Strip quotes from a straight-quoted literal and resolve escapes.
pub(crate) fn unquote(slice: &str) -> Option<String> {
	let inner = strip_quotes(slice);
	if inner.contains('\\') {
		unescape_body(inner)
	} else {
		Some(inner.to_string())
	}
}

/// Resolve the backslash escapes in the body of a straight-quoted literal of
/// either quote kind. The body is re-quoted as a double-quoted string first so
/// that snailquote reads `\"` and `\'` as escapes rather than quote changes.
pub(crate) fn unescape_body(inner: &str) -> Option<String> {
	let mut quoted = String::with_capacity(inner.len() + 2);
	let mut escaped = false;
	quoted.push('"');

	for ch in inner.chars() {
		match (escaped, ch) {
			(true, '\'') => {
				quoted.pop();
				quoted.push('\'');
				escaped = false;
			}
			(false, '"') => quoted.push_str("\\\""),
			(false, '\\') => {
				quoted.push('\\');
				escaped = true;
			}
			_ => {
				quoted.push(ch);
				escaped = false;
			}
		}
	}

	quoted.push('"');
	unescape(&quoted).ok()
}
