use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::CorrectionRule;
use crate::CorrectionTable;
use crate::MergeTagError;
use crate::MergeTagResult;

/// Default number of logical bytes a merge tag may span before it is treated
/// as unterminated.
pub const DEFAULT_MAX_TAG_LENGTH: usize = 256;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = [
	"mergetag.toml",
	".mergetag.toml",
	".config/mergetag.toml",
];

/// Which field names count as valid canonical tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameGrammar {
	/// `^[A-Z_][A-Z0-9_]*$`
	#[default]
	Strict,
	/// `^[A-Za-z_][A-Za-z0-9_]*$`, for templates using names like `USR_Name`.
	MixedCase,
}

/// Engine configuration loaded from `mergetag.toml`.
///
/// ```toml
/// name_grammar = "mixed_case"
/// listif_case_sensitive = true
/// max_tag_length = 256
/// replace_default_corrections = false
///
/// [[corrections]]
/// stub = "USR_S"
/// canonical = "USR_Signatory"
///
/// [aliases]
/// Pmt_Agreements = "Pmt_Negotiate"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Correction rules consulted before the built-in table.
	pub corrections: Vec<CorrectionRule>,
	/// When true the built-in corrections are dropped instead of extended.
	pub replace_default_corrections: bool,
	pub name_grammar: NameGrammar,
	/// Whether `listif` membership compares values case-sensitively.
	pub listif_case_sensitive: bool,
	/// Template field name to dataset field name, consulted when the template
	/// name itself has no value.
	pub aliases: HashMap<String, String>,
	pub max_tag_length: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			corrections: Vec::new(),
			replace_default_corrections: false,
			name_grammar: NameGrammar::default(),
			listif_case_sensitive: true,
			aliases: HashMap::new(),
			max_tag_length: DEFAULT_MAX_TAG_LENGTH,
		}
	}
}

impl EngineConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> MergeTagResult<Option<EngineConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		Self::load_file(&config_path).map(Some)
	}

	/// Load the config from an explicit path.
	pub fn load_file(path: &Path) -> MergeTagResult<EngineConfig> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml_str(&content)
	}

	pub fn from_toml_str(content: &str) -> MergeTagResult<EngineConfig> {
		let config: EngineConfig =
			toml::from_str(content).map_err(|e| MergeTagError::ConfigParse(e.to_string()))?;

		if config.max_tag_length == 0 {
			return Err(MergeTagError::ConfigParse(
				"`max_tag_length` must be greater than zero".to_string(),
			));
		}

		Ok(config)
	}

	/// The effective correction table: configured rules first, then the
	/// built-in rules unless they were replaced.
	pub fn correction_table(&self) -> CorrectionTable {
		let mut rules = self.corrections.clone();
		if !self.replace_default_corrections {
			rules.extend(CorrectionTable::builtin().rules().iter().cloned());
		}
		CorrectionTable::new(rules)
	}

	/// The dataset field to fall back to for a template field.
	pub fn alias_for(&self, field: &str) -> Option<&str> {
		self.aliases.get(field).map(String::as_str)
	}
}
