#![allow(dead_code)]

use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use assert_cmd::Command;
use insta_cmd::get_cargo_bin;
use mergetag_core::AnyResult;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub fn mergetag_cmd(cwd: &Path) -> Command {
	let mut cmd = Command::new(get_cargo_bin("mergetag"));
	cmd.env("NO_COLOR", "1")
		.env_remove("MERGETAG_LOG")
		.current_dir(cwd);
	cmd
}

/// Write a single-part template whose paragraphs are the given texts.
pub fn write_template(dir: &Path, name: &str, paragraphs: &[&str]) -> AnyResult<PathBuf> {
	let body: String = paragraphs
		.iter()
		.map(|text| format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>"))
		.collect();
	let document = format!(
		r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
	);

	let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
	let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
	zip.start_file("[Content_Types].xml", options)?;
	zip.write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types/>"#)?;
	zip.start_file("word/document.xml", options)?;
	zip.write_all(document.as_bytes())?;
	let bytes = zip.finish()?.into_inner();

	let path = dir.join(name);
	std::fs::write(&path, bytes)?;
	Ok(path)
}

/// Visible text of the main document of a merged package.
pub fn document_text(path: &Path) -> AnyResult<String> {
	let bytes = std::fs::read(path)?;
	let mut archive = ZipArchive::new(Cursor::new(bytes))?;
	let mut entry = archive.by_name("word/document.xml")?;
	let mut xml = String::new();
	entry.read_to_string(&mut xml)?;

	Ok(mergetag_core::LogicalText::new(&xml).text().to_string())
}
