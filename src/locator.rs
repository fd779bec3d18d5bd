//! Nested archive locator
//!
//! Containers may hold other containers. The locator walks an archive's
//! members in listing order, recursing into any member that is itself a
//! zip, and returns the first member whose base name contains the target
//! fragment, parsed as a record tree. Nested containers are read fully
//! into memory before reopening (zip needs random access); non-matching
//! regular members are never extracted.

use std::io::{Cursor, Read, Seek};
use std::sync::OnceLock;

use regex::Regex;
use xmltree::Element;
use zip::ZipArchive;

use crate::error::{NormalizeError, Result};

/// Default cap on container nesting. Exceeding it is a locate error for
/// the item, not a crash.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Cached regex matching an XML declaration
static XML_DECLARATION_REGEX: OnceLock<Regex> = OnceLock::new();

fn xml_declaration_regex() -> &'static Regex {
    XML_DECLARATION_REGEX
        .get_or_init(|| Regex::new(r"<\?xml[^>]*\?>").expect("Failed to compile declaration regex"))
}

/// Search `archive` for the first member whose base name contains
/// `fragment`, descending into nested zip members up to `max_depth`
/// levels. Returns `Ok(None)` when nothing matches at any depth.
pub fn find_member_tree<R: Read + Seek>(
    fragment: &str,
    archive: &mut ZipArchive<R>,
    max_depth: usize,
) -> Result<Option<Element>> {
    search(fragment, archive, max_depth, max_depth)
}

fn search<R: Read + Seek>(
    fragment: &str,
    archive: &mut ZipArchive<R>,
    depth_left: usize,
    max_depth: usize,
) -> Result<Option<Element>> {
    if depth_left == 0 {
        return Err(NormalizeError::NestingTooDeep { max_depth });
    }

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let name = member.name().to_string();

        if name.ends_with(".zip") {
            let mut bytes = Vec::with_capacity(member.size() as usize);
            member.read_to_end(&mut bytes)?;
            drop(member);

            let mut nested = ZipArchive::new(Cursor::new(bytes))?;
            if let Some(tree) = search(fragment, &mut nested, depth_left - 1, max_depth)? {
                return Ok(Some(tree));
            }
        } else {
            let base_name = name.rsplit('/').next().unwrap_or(&name);
            if base_name.contains(fragment) {
                let mut bytes = Vec::with_capacity(member.size() as usize);
                member.read_to_end(&mut bytes)?;
                return parse_record_bytes(&bytes).map(Some);
            }
        }
    }

    Ok(None)
}

/// Parse member bytes as a record tree.
///
/// Some exports concatenate several documents into one member without a
/// wrapping root. When the straight parse fails, the content is repaired
/// by dropping the XML declarations and wrapping everything in a synthetic
/// `<root>` element; if that also fails, the original parse error
/// propagates.
pub fn parse_record_bytes(bytes: &[u8]) -> Result<Element> {
    match Element::parse(bytes) {
        Ok(tree) => Ok(tree),
        Err(parse_error) => {
            let text = String::from_utf8_lossy(bytes);
            let body = xml_declaration_regex().replace_all(&text, "");
            let repaired = format!("<root>{}</root>", body);
            match Element::parse(repaired.as_bytes()) {
                Ok(tree) => Ok(tree),
                Err(_) => Err(NormalizeError::XmlParse(parse_error)),
            }
        }
    }
}
