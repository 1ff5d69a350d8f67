use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::MergeTagError;
use crate::MergeTagResult;

/// A merge value. Checkbox and multi-select fields arrive as lists, every
/// other field as a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
	Scalar(String),
	List(Vec<String>),
}

impl Value {
	/// The text substituted for a direct tag reference. List items are joined
	/// with a single space in selection order.
	pub fn flatten(&self) -> String {
		match self {
			Self::Scalar(value) => value.clone(),
			Self::List(items) => items.join(" "),
		}
	}

	/// An empty scalar, or a list without a single non-empty item.
	pub fn is_empty_value(&self) -> bool {
		match self {
			Self::Scalar(value) => value.is_empty(),
			Self::List(items) => items.iter().all(String::is_empty),
		}
	}

	/// Number of selected items. A scalar counts as one when non-empty.
	pub fn count(&self) -> usize {
		match self {
			Self::Scalar(value) => usize::from(!value.is_empty()),
			Self::List(items) => items.len(),
		}
	}

	/// Membership for `listif`: any list item, or the scalar itself, equal to
	/// `expected`.
	pub fn contains(&self, expected: &str, case_sensitive: bool) -> bool {
		let matches = |candidate: &str| {
			if case_sensitive {
				candidate == expected
			} else {
				candidate.to_lowercase() == expected.to_lowercase()
			}
		};

		match self {
			Self::Scalar(value) => matches(value),
			Self::List(items) => items.iter().any(|item| matches(item)),
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::Scalar(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Scalar(value)
	}
}

impl From<Vec<String>> for Value {
	fn from(items: Vec<String>) -> Self {
		Self::List(items)
	}
}

impl From<Vec<&str>> for Value {
	fn from(items: Vec<&str>) -> Self {
		Self::List(items.into_iter().map(ToString::to_string).collect())
	}
}

/// Field values for one merge. Insertion order is kept so reports list the
/// fields the way the caller supplied them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeDataset {
	entries: Vec<(String, Value)>,
	index: HashMap<String, usize>,
}

impl MergeDataset {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a value, replacing any earlier value for the same key. Keys
	/// written as `{$NAME}` or `$NAME` are stored as `NAME`.
	pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<Value>) {
		let key = normalize_key(key.as_ref());
		let value = value.into();

		if let Some(&position) = self.index.get(&key) {
			self.entries[position].1 = value;
			return;
		}

		self.index.insert(key.clone(), self.entries.len());
		self.entries.push((key, value));
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.index
			.get(key)
			.and_then(|&position| self.entries.get(position))
			.map(|(_, value)| value)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries
			.iter()
			.map(|(key, value)| (key.as_str(), value))
	}

	/// Load a dataset from a JSON object. Strings become scalars, arrays
	/// become lists, numbers and booleans are stringified and `null` is an
	/// empty scalar.
	pub fn from_json_str(content: &str) -> MergeTagResult<Self> {
		let parsed: serde_json::Value = serde_json::from_str(content)
			.map_err(|error| MergeTagError::DatasetParse(error.to_string()))?;

		let serde_json::Value::Object(object) = parsed else {
			return Err(MergeTagError::DatasetParse(
				"expected a JSON object at the top level".to_string(),
			));
		};

		let mut dataset = Self::new();
		for (key, value) in object {
			let value = match value {
				serde_json::Value::Array(items) => {
					let items = items
						.into_iter()
						.map(|item| json_scalar(&key, item))
						.collect::<MergeTagResult<Vec<_>>>()?;
					Value::List(items)
				}
				other => Value::Scalar(json_scalar(&key, other)?),
			};
			dataset.insert(&key, value);
		}

		Ok(dataset)
	}
}

impl<K, V> FromIterator<(K, V)> for MergeDataset
where
	K: AsRef<str>,
	V: Into<Value>,
{
	fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
		let mut dataset = Self::new();
		for (key, value) in iter {
			dataset.insert(key, value);
		}
		dataset
	}
}

fn json_scalar(key: &str, value: serde_json::Value) -> MergeTagResult<String> {
	match value {
		serde_json::Value::Null => Ok(String::new()),
		serde_json::Value::Bool(flag) => Ok(flag.to_string()),
		serde_json::Value::Number(number) => Ok(number.to_string()),
		serde_json::Value::String(text) => Ok(text),
		serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
			Err(MergeTagError::DatasetParse(format!(
				"field `{key}` must be a string, number, boolean, null or an array of those"
			)))
		}
	}
}

/// Strip merge tag decoration from a dataset key.
pub fn normalize_key(key: &str) -> String {
	let key = key.trim();
	let key = key
		.strip_prefix('{')
		.and_then(|rest| rest.strip_suffix('}'))
		.unwrap_or(key);
	key.strip_prefix('$').unwrap_or(key).trim().to_string()
}
