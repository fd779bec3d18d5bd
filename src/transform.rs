//! Managed-to-inline rewrite
//!
//! Relocates the externally stored MODS content of a managed record into
//! the record itself. For every version of the MODS datastream: the
//! control group flips to inline, the contentLocation pointer is dropped,
//! the content document is fetched from the source container by version
//! ID, foreign prefixes are stripped from it, and the result is spliced
//! into the record under a fresh `xmlContent`/`mods` wrapper carrying the
//! canonical MODS namespace declarations.
//!
//! Callers must gate this behind [`crate::foxml::is_managed`]: the rewrite
//! is not self-detecting, and invoking it on an already-inline record
//! fails because no external content resolves.

use std::io::{Read, Seek};

use xmltree::{Element, Namespace, XMLNode};
use zip::ZipArchive;

use crate::error::{Result, TransformError};
use crate::foxml::{
    CONTROL_GROUP_INLINE, FOXML_NS, MODS_DATASTREAM_ID, MODS_NS, XLINK_NS, XSI_NS,
    find_datastream_mut, version_elements_mut,
};
use crate::locator;

/// Rewrite `record` in place from managed to inline MODS, fetching the
/// externally stored content from `source` (the input container, distinct
/// from the archive the record itself was read from).
pub fn managed_to_inline<R: Read + Seek>(
    record: &mut Element,
    source: &mut ZipArchive<R>,
    max_depth: usize,
) -> Result<()> {
    let datastream = find_datastream_mut(record, MODS_DATASTREAM_ID)
        .ok_or(TransformError::DatastreamMissing)?;

    datastream.attributes.insert(
        "CONTROL_GROUP".to_string(),
        CONTROL_GROUP_INLINE.to_string(),
    );

    for version in version_elements_mut(datastream) {
        // The pointer is obsolete once content is embedded; absent is fine.
        version.children.retain(|node| {
            !matches!(node,
                XMLNode::Element(element)
                    if element.name == "contentLocation"
                        && element.namespace.as_deref() == Some(FOXML_NS))
        });

        let version_id = version
            .attributes
            .get("ID")
            .cloned()
            .ok_or(TransformError::VersionIdMissing)?;

        let mut content = locator::find_member_tree(&version_id, source, max_depth)?.ok_or(
            TransformError::ContentMissing {
                id: version_id.clone(),
            },
        )?;
        strip_prefixes(&mut content);

        let mut wrapper = mods_wrapper();
        wrapper.children.append(&mut content.children);

        let mut xml_content = Element::new("xmlContent");
        xml_content.prefix = Some("foxml".to_string());
        xml_content.namespace = Some(FOXML_NS.to_string());
        xml_content.children.push(XMLNode::Element(wrapper));

        version.children.push(XMLNode::Element(xml_content));
    }

    Ok(())
}

/// The role wrapper for embedded MODS content, declaring the four
/// canonical namespaces the embedded schema requires: the default
/// namespace, the self-referential `mods` alias, the schema-instance
/// namespace and the linking namespace.
fn mods_wrapper() -> Element {
    let mut namespaces = Namespace::empty();
    namespaces.put("", MODS_NS);
    namespaces.put("mods", MODS_NS);
    namespaces.put("xsi", XSI_NS);
    namespaces.put("xlink", XLINK_NS);

    let mut wrapper = Element::new("mods");
    wrapper.namespace = Some(MODS_NS.to_string());
    wrapper.namespaces = Some(namespaces);
    wrapper
}

/// Strip namespace qualification from a fetched content tree.
///
/// Tags lose their prefix and namespace binding on every element. For
/// attributes, the explicit rule is: any *value* still carrying a
/// `{uri}local` qualified form (a leak from serializers that expand
/// MODS/xlink-style linking attributes) is truncated to the text after the
/// first `}`. Attribute keys are never rewritten.
fn strip_prefixes(element: &mut Element) {
    element.prefix = None;
    element.namespace = None;
    element.namespaces = None;

    for value in element.attributes.values_mut() {
        if let Some(position) = value.find('}') {
            *value = value[position + 1..].to_string();
        }
    }

    for child in element.children.iter_mut() {
        if let XMLNode::Element(child_element) = child {
            strip_prefixes(child_element);
        }
    }
}
