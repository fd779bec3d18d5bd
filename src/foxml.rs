//! FOXML record model
//!
//! A record tree is one digital object's FOXML wrapper, parsed into a
//! mutable namespace-aware tree. This module holds the namespace table,
//! the control-group sentinels, descendant lookup over datastreams, the
//! managed/inline classifier, and canonical serialization back to bytes.

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::error::{NormalizeError, Result};

/// FOXML wrapper namespace
pub const FOXML_NS: &str = "info:fedora/fedora-system:def/foxml#";
/// MODS descriptive metadata namespace
pub const MODS_NS: &str = "http://www.loc.gov/mods/v3";
/// XML Schema instance namespace
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// XLink namespace
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Role ID of the governed descriptive-metadata datastream
pub const MODS_DATASTREAM_ID: &str = "MODS";
/// Control-group sentinel for externally stored content
pub const CONTROL_GROUP_MANAGED: &str = "M";
/// Control-group sentinel for embedded content
pub const CONTROL_GROUP_INLINE: &str = "X";

/// Base name of the record file inside a container or companion archive
pub const RECORD_FILENAME: &str = "foxml.xml";

fn is_foxml_element(element: &Element, name: &str) -> bool {
    element.name == name && element.namespace.as_deref() == Some(FOXML_NS)
}

/// Find the datastream descriptor with the given role ID, searching
/// descendants in document order.
pub fn find_datastream<'a>(root: &'a Element, id: &str) -> Option<&'a Element> {
    if is_foxml_element(root, "datastream")
        && root.attributes.get("ID").map(String::as_str) == Some(id)
    {
        return Some(root);
    }
    for child in &root.children {
        if let XMLNode::Element(element) = child
            && let Some(found) = find_datastream(element, id)
        {
            return Some(found);
        }
    }
    None
}

/// Mutable variant of [`find_datastream`].
pub fn find_datastream_mut<'a>(root: &'a mut Element, id: &str) -> Option<&'a mut Element> {
    if is_foxml_element(root, "datastream")
        && root.attributes.get("ID").map(String::as_str) == Some(id)
    {
        return Some(root);
    }
    for child in root.children.iter_mut() {
        if let XMLNode::Element(element) = child
            && let Some(found) = find_datastream_mut(element, id)
        {
            return Some(found);
        }
    }
    None
}

/// Direct `datastreamVersion` children of a datastream descriptor.
pub fn version_elements_mut(datastream: &mut Element) -> Vec<&mut Element> {
    datastream
        .children
        .iter_mut()
        .filter_map(|node| match node {
            XMLNode::Element(element) if is_foxml_element(element, "datastreamVersion") => {
                Some(element)
            }
            _ => None,
        })
        .collect()
}

/// Report whether the record's MODS datastream is externally stored.
///
/// A record with no MODS datastream is treated as already inline, so a
/// transformed record never classifies as managed on a re-run.
pub fn is_managed(record: &Element) -> bool {
    match find_datastream(record, MODS_DATASTREAM_ID) {
        Some(datastream) => {
            datastream.attributes.get("CONTROL_GROUP").map(String::as_str)
                == Some(CONTROL_GROUP_MANAGED)
        }
        None => false,
    }
}

/// Serialize a record tree to an XML string with its declaration, keeping
/// the originally-declared prefixes on untouched elements. Indentation is
/// left to the external formatter.
pub fn serialize(record: &Element) -> Result<String> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false);
    record
        .write_with_config(&mut buf, config)
        .map_err(|e| NormalizeError::XmlSerialize {
            details: e.to_string(),
        })?;
    String::from_utf8(buf).map_err(|e| NormalizeError::XmlSerialize {
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANAGED_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject xmlns:foxml="info:fedora/fedora-system:def/foxml#" PID="coll:1">
  <foxml:datastream ID="DC" CONTROL_GROUP="X">
    <foxml:datastreamVersion ID="DC1.0"/>
  </foxml:datastream>
  <foxml:datastream ID="MODS" STATE="A" CONTROL_GROUP="M">
    <foxml:datastreamVersion ID="MODS.0" MIMETYPE="application/xml">
      <foxml:contentLocation TYPE="INTERNAL_ID" REF="coll:1+MODS+MODS.0"/>
    </foxml:datastreamVersion>
  </foxml:datastream>
</foxml:digitalObject>"#;

    const INLINE_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject xmlns:foxml="info:fedora/fedora-system:def/foxml#" PID="coll:2">
  <foxml:datastream ID="MODS" CONTROL_GROUP="X">
    <foxml:datastreamVersion ID="MODS.0"/>
  </foxml:datastream>
</foxml:digitalObject>"#;

    const NO_MODS_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject xmlns:foxml="info:fedora/fedora-system:def/foxml#" PID="coll:3">
  <foxml:datastream ID="DC" CONTROL_GROUP="X"/>
</foxml:digitalObject>"#;

    #[test]
    fn test_managed_record_classifies_managed() {
        let record = Element::parse(MANAGED_RECORD.as_bytes()).unwrap();
        assert!(is_managed(&record));
    }

    #[test]
    fn test_inline_record_classifies_unmanaged() {
        let record = Element::parse(INLINE_RECORD.as_bytes()).unwrap();
        assert!(!is_managed(&record));
    }

    #[test]
    fn test_record_without_mods_classifies_unmanaged() {
        let record = Element::parse(NO_MODS_RECORD.as_bytes()).unwrap();
        assert!(!is_managed(&record));
        assert!(find_datastream(&record, MODS_DATASTREAM_ID).is_none());
    }

    #[test]
    fn test_find_datastream_by_role() {
        let record = Element::parse(MANAGED_RECORD.as_bytes()).unwrap();
        let mods = find_datastream(&record, "MODS").unwrap();
        assert_eq!(
            mods.attributes.get("CONTROL_GROUP").map(String::as_str),
            Some("M")
        );
        let dc = find_datastream(&record, "DC").unwrap();
        assert_eq!(dc.attributes.get("ID").map(String::as_str), Some("DC"));
    }

    #[test]
    fn test_version_elements() {
        let mut record = Element::parse(MANAGED_RECORD.as_bytes()).unwrap();
        let mods = find_datastream_mut(&mut record, "MODS").unwrap();
        let versions = version_elements_mut(mods);
        assert_eq!(versions.len(), 1);
        assert_eq!(
            versions[0].attributes.get("ID").map(String::as_str),
            Some("MODS.0")
        );
    }

    #[test]
    fn test_serialize_round_trips_content() {
        let record = Element::parse(MANAGED_RECORD.as_bytes()).unwrap();
        let serialized = serialize(&record).unwrap();
        assert!(serialized.starts_with("<?xml"));
        let reparsed = Element::parse(serialized.as_bytes()).unwrap();
        assert!(is_managed(&reparsed));
        assert_eq!(reparsed.name, "digitalObject");
        assert_eq!(reparsed.prefix.as_deref(), Some("foxml"));
    }
}
