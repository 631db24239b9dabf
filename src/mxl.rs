//! MXL file handler: reads compressed MusicXML (.mxl) archives.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml   declares the root MusicXML file path
//!   - <rootfile>.xml           the actual MusicXML content
//!   - (optional) other files   images, sounds, etc.

use std::io::{Cursor, Read, Seek};

use log::debug;
use zip::ZipArchive;

use crate::error::PracticeError;
use crate::model::Score;
use crate::parser;

/// Read and parse a .mxl file from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<Score, PracticeError> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::parse_musicxml(&xml)
}

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String, PracticeError> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| PracticeError::Archive(format!("cannot open archive: {e}")))?;

    let root_path = locate_root_file(&mut archive)?;
    debug!("mxl root file: {root_path}");
    read_entry(&mut archive, &root_path)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, PracticeError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| PracticeError::Archive(format!("'{name}' not found in archive: {e}")))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| PracticeError::Archive(format!("cannot read '{name}': {e}")))?;
    Ok(text)
}

/// Find the root MusicXML path, preferring the container manifest and
/// falling back to the first score-looking entry.
fn locate_root_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<String, PracticeError> {
    if archive.by_name("META-INF/container.xml").is_ok() {
        let manifest = read_entry(archive, "META-INF/container.xml")?;
        return rootfile_from_container(&manifest);
    }

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    names
        .iter()
        .find(|name| {
            !name.starts_with("META-INF/")
                && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        })
        .cloned()
        .ok_or_else(|| {
            PracticeError::Archive(format!("no MusicXML file in archive; entries: {names:?}"))
        })
}

fn rootfile_from_container(manifest: &str) -> Result<String, PracticeError> {
    let doc = roxmltree::Document::parse(manifest)
        .map_err(|e| PracticeError::Archive(format!("bad container.xml: {e}")))?;
    doc.descendants()
        .filter(|n| n.tag_name().name() == "rootfile")
        .find_map(|n| n.attribute("full-path"))
        .map(String::from)
        .ok_or_else(|| PracticeError::Archive("no rootfile in container.xml".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_the_root_file() {
        let manifest = r#"<?xml version="1.0"?>
<container><rootfiles><rootfile full-path="score.xml" media-type="application/vnd.recordare.musicxml+xml"/></rootfiles></container>"#;
        assert_eq!(rootfile_from_container(manifest).unwrap(), "score.xml");
    }

    #[test]
    fn container_without_rootfile_is_an_error() {
        let manifest = "<container><rootfiles/></container>";
        assert!(matches!(
            rootfile_from_container(manifest),
            Err(PracticeError::Archive(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_not_an_archive() {
        assert!(matches!(
            parse_mxl(b"definitely not a zip"),
            Err(PracticeError::Archive(_))
        ));
    }
}
