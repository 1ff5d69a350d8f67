use std::fmt::Display;
use std::ops::Range;

/// Tokens of a directive header such as `$Type == "Premium" and
/// !empty($Name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
	/// `$`
	Dollar,
	/// `!`
	Bang,
	/// `(`
	ParenOpen,
	/// `)`
	ParenClose,
	/// `==`
	Equals,
	/// `!=`
	NotEquals,
	/// `>`
	GreaterThan,
	/// `<`
	LessThan,
	/// `and`
	And,
	/// `or`
	Or,
	/// `empty`
	Empty,
	/// `count`
	Count,
	/// A field name, e.g. `USR_Name`
	Ident(String),
	/// An integer, e.g. `2`
	Int(i64),
	/// A quoted string with the opening quote character.
	String(String, char),
}

impl Token {
	/// The identifier text for tokens usable as a field name. Keywords count
	/// so that a field called `count` can still be referenced as `$count`.
	pub fn as_field_name(&self) -> Option<String> {
		match self {
			Token::Ident(name) => Some(name.clone()),
			Token::And | Token::Or | Token::Empty | Token::Count => Some(self.to_string()),
			_ => None,
		}
	}
}

impl Display for Token {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Token::Dollar => write!(f, "$"),
			Token::Bang => write!(f, "!"),
			Token::ParenOpen => write!(f, "("),
			Token::ParenClose => write!(f, ")"),
			Token::Equals => write!(f, "=="),
			Token::NotEquals => write!(f, "!="),
			Token::GreaterThan => write!(f, ">"),
			Token::LessThan => write!(f, "<"),
			Token::And => write!(f, "and"),
			Token::Or => write!(f, "or"),
			Token::Empty => write!(f, "empty"),
			Token::Count => write!(f, "count"),
			Token::Ident(ident) => write!(f, "{ident}"),
			Token::Int(number) => write!(f, "{number}"),
			Token::String(string, quote) => {
				let closing = match quote {
					'\u{201C}' => '\u{201D}',
					'\u{2018}' => '\u{2019}',
					other => *other,
				};
				write!(f, "{quote}{string}{closing}")
			}
		}
	}
}

/// A token with its byte span inside the header text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedToken {
	pub token: Token,
	pub span: Range<usize>,
}
