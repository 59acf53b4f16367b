//! Plain-text extraction for uploaded student documents.
//!
//! The parser only ever sees plain text; binary formats are unwrapped here.
//! DOCX files are read straight out of the archive's `word/document.xml`
//! rather than through a full document model, which is all the answer sheets
//! need.

use std::{fs, io::Read, path::Path};

use anyhow::{Context, Result, anyhow};
use pdf_extract::extract_text as extract_pdf_text;
use quick_xml::{Reader as XmlReader, events::Event};
use zip::ZipArchive;

/// Reads a document's full text based on its file extension.
pub fn read_document_text(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let content = match extension.as_str() {
        "pdf" => extract_pdf_text(path)
            .with_context(|| format!("failed to extract PDF text from {}", path.display()))?,
        "docx" => extract_docx_text(path)?,
        "txt" => fs::read_to_string(path)
            .with_context(|| format!("failed to read text file {}", path.display()))?,
        other => return Err(anyhow!("Unsupported file type: {}", other)),
    };

    Ok(content.trim().to_string())
}

/// Derives a student display name from an uploaded file's base name.
pub fn student_name_from_filename(original_name: &str) -> String {
    Path::new(original_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(original_name)
        .to_string()
}

fn extract_docx_text(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open DOCX file {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("failed to open DOCX archive {}", path.display()))?;

    let mut document = archive
        .by_name("word/document.xml")
        .with_context(|| format!("missing word/document.xml in {}", path.display()))?;

    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .with_context(|| format!("failed to read DOCX XML for {}", path.display()))?;

    let mut reader = XmlReader::from_str(&xml);
    let mut buf = Vec::new();
    let mut output = String::new();
    let mut in_text_node = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text_node = true,
                b"w:tab" => output.push('\t'),
                b"w:br" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_node {
                    let value = e.unescape().map_err(|err| anyhow!(err))?.into_owned();
                    output.push_str(&value);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text_node = false,
                // Paragraph ends become line breaks so the bullet parser sees
                // one answer per line.
                b"w:p" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow!("failed to parse DOCX XML: {}", err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(output.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use super::*;

    fn write_docx(dir: &Path, name: &str, document_xml: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let file = fs::File::create(&path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn reads_plain_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Alice.txt");
        fs::write(&path, "  • A1\n• A2  \n").unwrap();
        assert_eq!(read_document_text(&path).unwrap(), "• A1\n• A2");
    }

    #[test]
    fn rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.xlsx");
        fs::write(&path, "irrelevant").unwrap();
        let err = read_document_text(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));
    }

    #[test]
    fn extracts_docx_paragraphs_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Bob</w:t></w:r></w:p>
    <w:p><w:r><w:t>• first answer</w:t></w:r></w:p>
    <w:p><w:r><w:t>• second answer</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let path = write_docx(dir.path(), "Bob.docx", xml);
        let text = read_document_text(&path).unwrap();
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(lines, vec!["Bob", "• first answer", "• second answer"]);
    }

    #[test]
    fn corrupt_docx_reports_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, "not a zip archive").unwrap();
        assert!(read_document_text(&path).is_err());
    }

    #[test]
    fn filename_stem_becomes_student_name() {
        assert_eq!(
            student_name_from_filename("Alice Smith.docx"),
            "Alice Smith"
        );
        assert_eq!(student_name_from_filename("bob.final.txt"), "bob.final");
        assert_eq!(student_name_from_filename("carol"), "carol");
    }
}
