use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::LogicalText;

pub const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;

/// Bytes standing in for an embedded image.
pub const IMAGE_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4];

/// Wrap body XML in a `w:document`.
pub fn document_xml(body: &str) -> String {
	format!(
		r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
	)
}

/// Wrap body XML in a `w:hdr`.
pub fn header_xml(body: &str) -> String {
	format!(
		r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:hdr xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">{body}</w:hdr>"#
	)
}

/// A paragraph holding a single run.
pub fn paragraph(text: &str) -> String {
	format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
}

/// `{$USR_Signatory_FN}` split over three runs, the middle one bold.
pub fn split_tag_paragraph() -> String {
	"<w:p><w:r><w:t>{$USR_</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>Signatory</w:t></w:r><w:r><w:t>_FN}</w:t></w:r></w:p>"
		.to_string()
}

/// Build a package from named parts. Content types come first and an image
/// is added so that untouched entries can be checked.
pub fn docx(parts: &[(&str, String)]) -> Vec<u8> {
	let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
	let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
	let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

	zip.start_file("[Content_Types].xml", deflated)
		.expect("start content types");
	zip.write_all(CONTENT_TYPES.as_bytes())
		.expect("write content types");

	for (name, xml) in parts {
		zip.start_file(*name, deflated).expect("start part");
		zip.write_all(xml.as_bytes()).expect("write part");
	}

	zip.start_file("word/media/image1.png", stored)
		.expect("start image");
	zip.write_all(IMAGE_BYTES).expect("write image");

	zip.finish().expect("finish zip").into_inner()
}

/// A package whose main document is the given paragraphs.
pub fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
	let body: String = paragraphs.iter().map(|text| paragraph(text)).collect();
	docx(&[("word/document.xml", document_xml(&body))])
}

/// Raw bytes of one entry.
pub fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
	let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
	let mut entry = archive.by_name(name).expect("entry exists");
	let mut data = Vec::new();
	entry.read_to_end(&mut data).expect("read entry");
	data
}

/// XML of one part of a package.
pub fn read_part(bytes: &[u8], name: &str) -> String {
	String::from_utf8(read_entry(bytes, name)).expect("utf-8 part")
}

/// Visible text of one part of a package.
pub fn part_text(bytes: &[u8], name: &str) -> String {
	let xml = read_part(bytes, name);
	LogicalText::new(&xml).text().to_string()
}

/// Visible text of the main document.
pub fn document_text(bytes: &[u8]) -> String {
	part_text(bytes, "word/document.xml")
}
