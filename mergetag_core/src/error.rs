use miette::Diagnostic;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum MergeTagError {
	#[error(transparent)]
	#[diagnostic(code(mergetag::io_error))]
	Io(#[from] std::io::Error),

	#[error("invalid template package: {0}")]
	#[diagnostic(
		code(mergetag::package_format),
		help("re-upload the template as a .docx file saved by a word processor")
	)]
	PackageFormat(String),

	#[error("failed to write merged package: {0}")]
	#[diagnostic(code(mergetag::package_write))]
	PackageWrite(String),

	#[error("unbalanced directive `{directive}` in `{part}` at byte {offset}")]
	#[diagnostic(
		code(mergetag::unbalanced_directive),
		help(
			"every `{{if}}` needs a matching `{{/if}}` and every `{{listif}}` a matching \
			 `{{/listif}}` within the same document part"
		)
	)]
	UnbalancedDirective {
		part: String,
		directive: String,
		offset: usize,
	},

	#[error("invalid directive in `{part}` at byte {offset}: {message}")]
	#[diagnostic(
		code(mergetag::directive_syntax),
		help(
			"conditions support `!empty($F)`, `empty($F)`, `$F == \"value\"`, `$F != \"value\"` \
			 and `count($F) > 1` joined with `and` / `or`"
		)
	)]
	DirectiveSyntax {
		part: String,
		message: String,
		offset: usize,
	},

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(mergetag::config_parse),
		help("check that mergetag.toml is valid TOML with [[corrections]] and/or [aliases]")
	)]
	ConfigParse(String),

	#[error("failed to parse merge dataset: {0}")]
	#[diagnostic(
		code(mergetag::dataset_parse),
		help("the dataset must be a JSON object of strings, arrays of strings, numbers or booleans")
	)]
	DatasetParse(String),
}

impl MergeTagError {
	/// The stable kind callers branch on.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Io(_) => ErrorKind::Io,
			Self::PackageFormat(_) => ErrorKind::PackageFormat,
			Self::PackageWrite(_) => ErrorKind::PackageWrite,
			Self::UnbalancedDirective { .. } => ErrorKind::UnbalancedDirective,
			Self::DirectiveSyntax { .. } => ErrorKind::DirectiveSyntax,
			Self::ConfigParse(_) => ErrorKind::ConfigParse,
			Self::DatasetParse(_) => ErrorKind::DatasetParse,
		}
	}

	/// Convert into the structured `kind + message` form handed to callers.
	pub fn to_report(&self) -> ErrorReport {
		ErrorReport {
			kind: self.kind(),
			message: self.to_string(),
		}
	}
}

/// Machine readable classification of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
	Io,
	PackageFormat,
	PackageWrite,
	UnbalancedDirective,
	DirectiveSyntax,
	ConfigParse,
	DatasetParse,
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Io => write!(f, "io"),
			Self::PackageFormat => write!(f, "package_format"),
			Self::PackageWrite => write!(f, "package_write"),
			Self::UnbalancedDirective => write!(f, "unbalanced_directive"),
			Self::DirectiveSyntax => write!(f, "directive_syntax"),
			Self::ConfigParse => write!(f, "config_parse"),
			Self::DatasetParse => write!(f, "dataset_parse"),
		}
	}
}

/// A fatal error flattened to `kind + message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
	pub kind: ErrorKind,
	pub message: String,
}

/// A non-fatal finding. Warnings accumulate alongside a best-effort result
/// instead of stopping the operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Warning {
	/// A tag fragment could not be recovered into a valid tag name.
	TagRecoveryFailure { part: String, raw: String },
	/// A canonical tag has no entry in the merge dataset.
	UnresolvedTag { tag: String },
	/// A modifier name is not known; the value passed through.
	UnknownModifier { tag: String, modifier: String },
	/// A known modifier received the wrong number of arguments.
	InvalidModifierArgs {
		tag: String,
		modifier: String,
		expected: String,
		got: usize,
	},
	/// A merge tag has no closing `}`.
	UnterminatedTag { part: String, raw: String },
	/// A condition mixes `and` with `or`; it is evaluated strictly left to
	/// right.
	MixedLogicalOperators { part: String, condition: String },
	/// An optional document part is absent from the package.
	PartMissing { part: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum WarningKind {
	TagRecoveryFailure,
	UnresolvedTag,
	UnknownModifier,
	InvalidModifierArgs,
	UnterminatedTag,
	MixedLogicalOperators,
	PartMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Info,
	Warning,
}

impl Warning {
	pub fn kind(&self) -> WarningKind {
		match self {
			Self::TagRecoveryFailure { .. } => WarningKind::TagRecoveryFailure,
			Self::UnresolvedTag { .. } => WarningKind::UnresolvedTag,
			Self::UnknownModifier { .. } => WarningKind::UnknownModifier,
			Self::InvalidModifierArgs { .. } => WarningKind::InvalidModifierArgs,
			Self::UnterminatedTag { .. } => WarningKind::UnterminatedTag,
			Self::MixedLogicalOperators { .. } => WarningKind::MixedLogicalOperators,
			Self::PartMissing { .. } => WarningKind::PartMissing,
		}
	}

	pub fn severity(&self) -> Severity {
		match self {
			Self::PartMissing { .. } => Severity::Info,
			_ => Severity::Warning,
		}
	}
}

impl std::fmt::Display for Warning {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::TagRecoveryFailure { part, raw } => {
				write!(f, "could not recover a tag name from `{raw}` in {part}")
			}
			Self::UnresolvedTag { tag } => {
				write!(f, "no value supplied for `{tag}`; substituted an empty string")
			}
			Self::UnknownModifier { tag, modifier } => {
				write!(f, "unknown modifier `{modifier}` on `{tag}`; value left unchanged")
			}
			Self::InvalidModifierArgs {
				tag,
				modifier,
				expected,
				got,
			} => {
				write!(
					f,
					"modifier `{modifier}` on `{tag}` expects {expected} argument(s), got {got}"
				)
			}
			Self::UnterminatedTag { part, raw } => {
				write!(f, "merge tag `{raw}` in {part} has no closing `}}`")
			}
			Self::MixedLogicalOperators { part, condition } => {
				write!(
					f,
					"condition `{condition}` in {part} mixes `and` and `or`; evaluated left to right"
				)
			}
			Self::PartMissing { part } => write!(f, "optional part `{part}` not present"),
		}
	}
}

impl Serialize for Warning {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		let mut state = serializer.serialize_struct("Warning", 3)?;
		state.serialize_field("kind", &self.kind())?;
		state.serialize_field("severity", &self.severity())?;
		state.serialize_field("message", &self.to_string())?;
		state.end()
	}
}

pub type MergeTagResult<T> = Result<T, MergeTagError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
