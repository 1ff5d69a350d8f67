use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::MergeTagError;
use crate::MergeTagResult;

/// The main document body. Every template must carry it.
pub const MAIN_PART: &str = "word/document.xml";

/// Header and footer parts scanned when present.
pub const OPTIONAL_PARTS: [&str; 6] = [
	"word/header1.xml",
	"word/header2.xml",
	"word/header3.xml",
	"word/footer1.xml",
	"word/footer2.xml",
	"word/footer3.xml",
];

/// One XML text part of the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPart {
	pub name: String,
	pub xml: String,
}

impl XmlPart {
	pub fn new(name: impl Into<String>, xml: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			xml: xml.into(),
		}
	}

	/// Human readable section label: `Main Document`, `Header 2`,
	/// `Footer 1`. Unknown part names fall back to the entry name.
	pub fn section_label(&self) -> String {
		section_label(&self.name)
	}
}

pub fn section_label(name: &str) -> String {
	if name == MAIN_PART {
		return "Main Document".to_string();
	}

	let stem = name
		.strip_prefix("word/")
		.and_then(|rest| rest.strip_suffix(".xml"))
		.unwrap_or(name);

	for (prefix, label) in [("header", "Header"), ("footer", "Footer")] {
		if let Some(number) = stem.strip_prefix(prefix) {
			if !number.is_empty() && number.bytes().all(|byte| byte.is_ascii_digit()) {
				return format!("{label} {number}");
			}
		}
	}

	name.to_string()
}

/// A replacement body for an XML part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPart {
	pub name: String,
	pub xml: String,
}

/// An opened DOCX template: every zip entry in original order plus the text
/// parts the engine scans.
#[derive(Debug, Clone)]
pub struct TemplatePackage {
	entries: Vec<(String, Vec<u8>)>,
	parts: Vec<XmlPart>,
	missing: Vec<String>,
}

impl TemplatePackage {
	/// Read the package. A corrupt zip, a missing main part or a part that is
	/// not UTF-8 is a `PackageFormat` error. Absent headers and footers are
	/// only recorded.
	#[tracing::instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
	pub fn open(bytes: &[u8]) -> MergeTagResult<Self> {
		let mut archive = ZipArchive::new(Cursor::new(bytes))
			.map_err(|error| MergeTagError::PackageFormat(error.to_string()))?;

		let mut entries = Vec::with_capacity(archive.len());
		for index in 0..archive.len() {
			let mut entry = archive
				.by_index(index)
				.map_err(|error| MergeTagError::PackageFormat(error.to_string()))?;
			let name = entry.name().to_string();
			let mut data = Vec::new();
			entry
				.read_to_end(&mut data)
				.map_err(|error| MergeTagError::PackageFormat(format!("{name}: {error}")))?;
			entries.push((name, data));
		}

		let mut parts = Vec::new();
		let mut missing = Vec::new();

		for name in std::iter::once(MAIN_PART).chain(OPTIONAL_PARTS) {
			let Some((_, data)) = entries.iter().find(|(entry, _)| entry == name) else {
				if name == MAIN_PART {
					return Err(MergeTagError::PackageFormat(
						"missing document.xml".to_string(),
					));
				}
				tracing::debug!(part = name, "optional part not present");
				missing.push(name.to_string());
				continue;
			};

			let xml = String::from_utf8(data.clone()).map_err(|error| {
				MergeTagError::PackageFormat(format!("{name} is not valid UTF-8: {error}"))
			})?;
			parts.push(XmlPart::new(name, xml));
		}

		tracing::debug!(
			entries = entries.len(),
			parts = parts.len(),
			"opened template package"
		);

		Ok(Self {
			entries,
			parts,
			missing,
		})
	}

	/// Scannable parts, main document first.
	pub fn parts(&self) -> &[XmlPart] {
		&self.parts
	}

	/// Optional parts that were not found.
	pub fn missing_parts(&self) -> &[String] {
		&self.missing
	}

	/// Names of every zip entry in original order.
	pub fn entry_names(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|(name, _)| name.as_str())
	}

	/// Re-emit the package with the given parts replaced. Every other entry is
	/// copied unchanged. Media is stored, everything else deflated.
	pub fn write(&self, rewritten: &[RewrittenPart]) -> MergeTagResult<Vec<u8>> {
		let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
		let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
		let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

		for (name, data) in &self.entries {
			let options = if name.starts_with("word/media/") {
				stored
			} else {
				deflated
			};

			if name.ends_with('/') {
				zip.add_directory(name.as_str(), options)
					.map_err(|error| MergeTagError::PackageWrite(error.to_string()))?;
				continue;
			}

			let data = rewritten
				.iter()
				.find(|part| &part.name == name)
				.map_or(data.as_slice(), |part| part.xml.as_bytes());

			zip.start_file(name.as_str(), options)
				.map_err(|error| MergeTagError::PackageWrite(error.to_string()))?;
			zip.write_all(data)?;
		}

		let cursor = zip
			.finish()
			.map_err(|error| MergeTagError::PackageWrite(error.to_string()))?;

		Ok(cursor.into_inner())
	}
}
