//! Per-format document loaders.
//!
//! Every supported file becomes one or more [`Document`]s holding plain
//! text. PDFs yield one document per page; Office formats are read
//! straight from their OOXML parts.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use quick_xml::{Reader, events::Event};
use rayon::prelude::*;
use zip::ZipArchive;

use crate::{
    error::{Error, Result},
    walker::DiscoveredFile,
};

/// Text extracted from one source file (or one page of it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source: PathBuf,
    /// Zero-based page index for paginated formats.
    pub page: Option<usize>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Word,
    Spreadsheet,
    Presentation,
}

impl DocumentFormat {
    /// Pick the loader for a path from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::Word),
            "xlsx" => Some(Self::Spreadsheet),
            "pptx" => Some(Self::Presentation),
            _ => None,
        }
    }
}

/// Outcome of loading a batch of files.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    /// Files that could not be read, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Load every file in parallel. A file that fails is logged and recorded
/// in the report; it never aborts the batch.
pub fn load_documents(files: &[DiscoveredFile]) -> LoadReport {
    let results: Vec<_> = files
        .par_iter()
        .map(|file| (file, load_file(&file.absolute_path)))
        .collect();

    let mut report = LoadReport::default();
    for (file, result) in results {
        match result {
            Ok(docs) => report.documents.extend(
                docs.into_iter().filter(|d| !d.content.trim().is_empty()),
            ),
            Err(e) => {
                tracing::warn!(
                    path = %file.relative_path.display(),
                    error = %e,
                    "skipping unreadable document"
                );
                report
                    .failures
                    .push((file.absolute_path.clone(), e.to_string()));
            }
        }
    }
    report
}

/// Load a single file with the loader matching its extension.
pub fn load_file(path: &Path) -> Result<Vec<Document>> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| Error::Load {
        path: path.to_path_buf(),
        reason: "unsupported file extension".into(),
    })?;

    let wrap = |e: Error| Error::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let single = |content: String| {
        vec![Document {
            source: path.to_path_buf(),
            page: None,
            content,
        }]
    };

    match format {
        DocumentFormat::Text => {
            let bytes = std::fs::read(path).map_err(|e| wrap(e.into()))?;
            Ok(single(String::from_utf8_lossy(&bytes).into_owned()))
        }
        DocumentFormat::Pdf => load_pdf(path).map_err(wrap),
        DocumentFormat::Word => load_word(path).map(single).map_err(wrap),
        DocumentFormat::Spreadsheet => {
            load_spreadsheet(path).map(single).map_err(wrap)
        }
        DocumentFormat::Presentation => {
            load_presentation(path).map(single).map_err(wrap)
        }
    }
}

fn load_pdf(path: &Path) -> Result<Vec<Document>> {
    let doc = lopdf::Document::load(path)?;
    let mut documents = Vec::new();

    for (index, page_number) in doc.get_pages().keys().enumerate() {
        match doc.extract_text(&[*page_number]) {
            Ok(content) => documents.push(Document {
                source: path.to_path_buf(),
                page: Some(index),
                content,
            }),
            Err(e) => tracing::warn!(
                path = %path.display(),
                page = page_number,
                error = %e,
                "failed to extract text from page, skipping"
            ),
        }
    }

    Ok(documents)
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Names of archive parts `{prefix}{N}.xml`, ordered by `N`.
fn numbered_parts(archive: &ZipArchive<File>, prefix: &str) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?;
            Some((n.parse().ok()?, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

fn load_word(path: &Path) -> Result<String> {
    let mut archive = open_archive(path)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    paragraph_text(&xml)
}

fn load_presentation(path: &Path) -> Result<String> {
    let mut archive = open_archive(path)?;
    let mut slides = Vec::new();
    for part in numbered_parts(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &part)?;
        let text = paragraph_text(&xml)?;
        if !text.trim().is_empty() {
            slides.push(text.trim_end().to_string());
        }
    }
    Ok(slides.join("\n\n"))
}

fn load_spreadsheet(path: &Path) -> Result<String> {
    let mut archive = open_archive(path)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(Error::Zip(zip::result::ZipError::FileNotFound)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut sheets = Vec::new();
    for part in numbered_parts(&archive, "xl/worksheets/sheet") {
        let xml = read_entry(&mut archive, &part)?;
        let text = sheet_text(&xml, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

/// Extract the text runs (`t`) of a WordprocessingML or DrawingML part,
/// one line per paragraph (`p`).
fn paragraph_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                in_run = true
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" | b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run => out.push_str(&t.unescape()?),
            Event::CData(t) if in_run => {
                out.push_str(&String::from_utf8_lossy(&t))
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

/// The shared string table of a workbook, in index order.
fn shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new())
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// Render a worksheet as tab-separated rows.
fn sheet_text(xml: &str, shared: &[String]) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    value.clear();
                    cell_type = match e
                        .try_get_attribute("t")
                        .map_err(quick_xml::Error::from)?
                    {
                        Some(attr) => Some(attr.unescape_value()?.into_owned()),
                        None => None,
                    };
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => value.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match cell_type.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        _ => value.clone(),
                    };
                    if !text.is_empty() {
                        row.push(text);
                    }
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::{SimpleFileOptions, ZipWriter};

    use super::*;

    fn write_zip(path: &Path, parts: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.TXT")),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.doc")),
            Some(DocumentFormat::Word)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("a.png")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn loads_plain_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "first\n\nsecond").unwrap();

        let docs = load_file(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "first\n\nsecond");
        assert_eq!(docs[0].page, None);
        assert_eq!(docs[0].source, path);
    }

    fn write_pdf(path: &Path, pages: &[&str]) {
        use lopdf::{
            Object,
            Stream,
            content::{Content, Operation},
            dictionary,
        };

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let media_box: Vec<Object> =
            vec![0.into(), 0.into(), 595.into(), 842.into()];
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => media_box,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn loads_pdf_one_document_per_page() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("guide.pdf");
        write_pdf(&path, &["Hello page one", "Second page here"]);

        let docs = load_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page, Some(0));
        assert_eq!(docs[0].content.trim(), "Hello page one");
        assert_eq!(docs[1].page, Some(1));
        assert_eq!(docs[1].content.trim(), "Second page here");
        assert!(docs.iter().all(|d| d.source == path));
    }

    #[test]
    fn loads_docx_paragraphs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.docx");
        write_zip(
            &path,
            &[(
                "word/document.xml",
                r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Bonjour</w:t></w:r><w:r><w:t xml:space="preserve"> le monde</w:t></w:r></w:p>
    <w:p><w:r><w:t>Fish &amp; chips</w:t><w:tab/><w:t>ok</w:t></w:r></w:p>
  </w:body>
</w:document>"#,
            )],
        );

        let docs = load_file(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "Bonjour le monde\nFish & chips\tok\n");
    }

    #[test]
    fn loads_pptx_slides_in_numeric_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deck.pptx");
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
            )
        };
        let s2 = slide("second");
        let s10 = slide("tenth");
        let s1 = slide("first");
        write_zip(
            &path,
            &[
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
            ],
        );

        let docs = load_file(&path).unwrap();
        assert_eq!(docs[0].content, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn loads_xlsx_with_shared_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.xlsx");
        write_zip(
            &path,
            &[
                (
                    "xl/sharedStrings.xml",
                    r#"<sst><si><t>name</t></si><si><t>price</t></si><si><r><t>ap</t></r><r><t>ple</t></r></si></sst>"#,
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>3.5</v></c></row>
<row r="3"><c r="A3" t="inlineStr"><is><t>pear</t></is></c></row>
</sheetData></worksheet>"#,
                ),
            ],
        );

        let docs = load_file(&path).unwrap();
        assert_eq!(docs[0].content, "name\tprice\napple\t3.5\npear");
    }

    #[test]
    fn broken_files_are_reported_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.pdf"), "not a pdf").unwrap();
        std::fs::write(tmp.path().join("bad.docx"), "not a zip").unwrap();
        std::fs::write(tmp.path().join("good.txt"), "hello").unwrap();
        std::fs::write(tmp.path().join("blank.txt"), "  \n ").unwrap();

        let files = crate::walker::discover_files(tmp.path(), false).unwrap();
        let report = load_documents(&files);

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].content, "hello");
        assert_eq!(report.failures.len(), 2);
    }
}
