//! Streaming edits of whole domain documents.
//!
//! Documents are rewritten event by event with quick-xml, so everything this
//! module does not touch (comments, unknown elements, attribute order) passes
//! through unchanged.

use std::collections::{BTreeMap, HashSet};

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{DocumentError, DocumentResult};

type XmlWriter = Writer<Vec<u8>>;

fn write(writer: &mut XmlWriter, event: Event<'_>) -> DocumentResult<()> {
    writer.write_event(event).map_err(DocumentError::new)
}

fn write_raw(writer: &mut XmlWriter, fragment: &str) -> DocumentResult<()> {
    write(writer, Event::Text(BytesText::from_escaped(fragment)))
}

fn finish(writer: XmlWriter) -> DocumentResult<String> {
    String::from_utf8(writer.into_inner()).map_err(DocumentError::new)
}

fn read<'a>(reader: &mut Reader<&'a [u8]>) -> DocumentResult<Event<'a>> {
    reader
        .read_event()
        .map_err(|e| DocumentError::new(format!("unparseable document: {}", e)))
}

/// Replace the text content of top-level elements (children of the root).
///
/// Every named element must exist in the document.
pub(crate) fn set_fields(document: &str, fields: &[(&str, String)]) -> DocumentResult<String> {
    let mut reader = Reader::from_str(document);
    let mut writer = Writer::new(Vec::new());
    let mut seen = HashSet::new();
    let mut depth = 0usize;

    loop {
        match read(&mut reader)? {
            Event::Eof => break,
            Event::Start(start) => {
                let field = (depth == 1)
                    .then(|| fields.iter().find(|(name, _)| start.name().as_ref() == name.as_bytes()))
                    .flatten();

                let Some((name, value)) = field else {
                    depth += 1;
                    write(&mut writer, Event::Start(start))?;
                    continue;
                };

                // Drop the old content up to the matching end tag.
                let mut nested = 1usize;
                while nested > 0 {
                    match read(&mut reader)? {
                        Event::Start(_) => nested += 1,
                        Event::End(_) => nested -= 1,
                        Event::Eof => {
                            return Err(DocumentError::new(format!("unterminated <{}> element", name)));
                        }
                        _ => {}
                    }
                }

                let end = start.to_end().into_owned();
                write(&mut writer, Event::Start(start))?;
                write(&mut writer, Event::Text(BytesText::new(value)))?;
                write(&mut writer, Event::End(end))?;
                seen.insert(*name);
            }
            Event::Empty(start) => {
                let field = (depth == 1)
                    .then(|| fields.iter().find(|(name, _)| start.name().as_ref() == name.as_bytes()))
                    .flatten();

                match field {
                    Some((name, value)) => {
                        let end = start.to_end().into_owned();
                        write(&mut writer, Event::Start(start))?;
                        write(&mut writer, Event::Text(BytesText::new(value)))?;
                        write(&mut writer, Event::End(end))?;
                        seen.insert(*name);
                    }
                    None => write(&mut writer, Event::Empty(start))?,
                }
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                write(&mut writer, Event::End(end))?;
            }
            other => write(&mut writer, other)?,
        }
    }

    if let Some((missing, _)) = fields.iter().find(|(name, _)| !seen.contains(name)) {
        return Err(DocumentError::new(format!("document has no <{}> element", missing)));
    }

    finish(writer)
}

/// Append raw device fragments at the end of the top-level `<devices>` element.
pub(crate) fn append_devices(document: &str, fragments: &[String]) -> DocumentResult<String> {
    append_children(document, 1, "devices", fragments)
}

/// Append raw fragments at the end of the first `name` element found at
/// `level` (0 is the root element).
pub(crate) fn append_children(
    document: &str,
    level: usize,
    name: &str,
    fragments: &[String],
) -> DocumentResult<String> {
    let mut reader = Reader::from_str(document);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut found = false;

    loop {
        match read(&mut reader)? {
            Event::Eof => break,
            Event::Start(start) => {
                depth += 1;
                write(&mut writer, Event::Start(start))?;
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                if !found && depth == level && end.name().as_ref() == name.as_bytes() {
                    for fragment in fragments {
                        write_raw(&mut writer, fragment)?;
                    }
                    found = true;
                }
                write(&mut writer, Event::End(end))?;
            }
            Event::Empty(start)
                if !found && depth == level && start.name().as_ref() == name.as_bytes() =>
            {
                let end = start.to_end().into_owned();
                write(&mut writer, Event::Start(start))?;
                for fragment in fragments {
                    write_raw(&mut writer, fragment)?;
                }
                write(&mut writer, Event::End(end))?;
                found = true;
            }
            other => write(&mut writer, other)?,
        }
    }

    if !found {
        return Err(DocumentError::new(format!("document has no <{}> element", name)));
    }

    finish(writer)
}

/// Serialize an empty element carrying `attributes`, e.g. `<source pool="a"/>`.
pub(crate) fn empty_element(name: &str, attributes: &BTreeMap<String, String>) -> DocumentResult<String> {
    let element = BytesStart::new(name)
        .with_attributes(attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let mut writer = Writer::new(Vec::new());
    write(&mut writer, Event::Empty(element))?;
    finish(writer)
}

fn attributes(element: &BytesStart<'_>) -> DocumentResult<BTreeMap<String, String>> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(DocumentError::new)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(DocumentError::new)?.into_owned();
            Ok((key, value))
        })
        .collect()
}

fn target_dev(element: &BytesStart<'_>) -> DocumentResult<Option<String>> {
    element
        .try_get_attribute("dev")
        .map_err(DocumentError::new)?
        .map(|attr| attr.unescape_value().map(|v| v.into_owned()))
        .transpose()
        .map_err(DocumentError::new)
}

/// Attributes of the `<source>` child of the `<disk>` targeting `target`.
///
/// Works on whole domain documents and on standalone disk fragments.
/// `None` when no such disk exists or it has no source.
pub(crate) fn disk_source_attributes(
    document: &str,
    target: &str,
) -> DocumentResult<Option<BTreeMap<String, String>>> {
    let mut reader = Reader::from_str(document);

    loop {
        match read(&mut reader)? {
            Event::Eof => return Ok(None),
            Event::Start(start) if start.name().as_ref() == b"disk" => {
                let mut source = None;
                let mut dev = None;
                let mut nested = 1usize;

                while nested > 0 {
                    let event = read(&mut reader)?;
                    match &event {
                        Event::Start(e) | Event::Empty(e) if nested == 1 => match e.name().as_ref() {
                            b"source" => source = Some(attributes(e)?),
                            b"target" => dev = target_dev(e)?,
                            _ => {}
                        },
                        Event::Eof => return Err(DocumentError::new("unterminated <disk> element")),
                        _ => {}
                    }
                    match event {
                        Event::Start(_) => nested += 1,
                        Event::End(_) => nested -= 1,
                        _ => {}
                    }
                }

                if dev.as_deref() == Some(target) {
                    return Ok(source);
                }
            }
            _ => {}
        }
    }
}

/// Remove the `<disk>` whose `<target dev=...>` equals `target`.
///
/// Returns `None` when no such disk exists.
pub(crate) fn remove_disk(document: &str, target: &str) -> DocumentResult<Option<String>> {
    let mut reader = Reader::from_str(document);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut removed = false;

    loop {
        match read(&mut reader)? {
            Event::Eof => break,
            Event::Start(start) if depth == 2 && start.name().as_ref() == b"disk" => {
                let mut buffered = vec![Event::Start(start)];
                let mut matches = false;
                let mut nested = 1usize;

                while nested > 0 {
                    let event = read(&mut reader)?;
                    match &event {
                        Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"target" => {
                            matches |= target_dev(e)?.as_deref() == Some(target);
                        }
                        Event::Eof => return Err(DocumentError::new("unterminated <disk> element")),
                        _ => {}
                    }
                    match &event {
                        Event::Start(_) => nested += 1,
                        Event::End(_) => nested -= 1,
                        _ => {}
                    }
                    buffered.push(event);
                }

                if matches && !removed {
                    removed = true;
                } else {
                    for event in buffered {
                        write(&mut writer, event)?;
                    }
                }
            }
            Event::Start(start) => {
                depth += 1;
                write(&mut writer, Event::Start(start))?;
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                write(&mut writer, Event::End(end))?;
            }
            other => write(&mut writer, other)?,
        }
    }

    if !removed {
        return Ok(None);
    }

    finish(writer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<domain type='kvm'><name>template</name><uuid/>\
        <memory unit='MiB'>128</memory>\
        <devices><disk type='file' device='disk'><target dev='vda' bus='virtio'/></disk>\
        <disk type='file' device='disk'><target dev='vdb' bus='virtio'/></disk>\
        <console type='pty'/></devices></domain>";

    #[test]
    fn test_set_fields() {
        let out = set_fields(
            DOC,
            &[
                ("name", "Testicek".to_string()),
                ("uuid", "d56f7b2c-e531-405f-8fb1-e37764970231".to_string()),
                ("memory", "256".to_string()),
            ],
        )
        .unwrap();

        assert!(out.contains("<name>Testicek</name>"));
        assert!(out.contains("<uuid>d56f7b2c-e531-405f-8fb1-e37764970231</uuid>"));
        assert!(out.contains("<memory unit='MiB'>256</memory>"));
        assert!(!out.contains("template"));
        assert!(out.contains("<console type='pty'/>"));
    }

    #[test]
    fn test_set_fields_escapes_text() {
        let out = set_fields(DOC, &[("name", "a<b".to_string())]).unwrap();
        assert!(out.contains("<name>a&lt;b</name>"));
    }

    #[test]
    fn test_set_missing_field_fails() {
        let err = set_fields(DOC, &[("vcpu", "1".to_string())]).unwrap_err();
        assert!(err.to_string().contains("no <"));
    }

    #[test]
    fn test_append_devices() {
        let out = append_devices(DOC, &["<interface type='bridge'/>".to_string()]).unwrap();
        assert!(out.ends_with("<console type='pty'/><interface type='bridge'/></devices></domain>"));
    }

    #[test]
    fn test_append_into_empty_devices() {
        let out = append_devices("<domain><devices/></domain>", &["<disk/>".to_string()]).unwrap();
        assert_eq!(out, "<domain><devices><disk/></devices></domain>");
    }

    #[test]
    fn test_append_without_devices_fails() {
        let err = append_devices("<domain/>", &[]).unwrap_err();
        assert!(err.to_string().contains("no <"));
    }

    #[test]
    fn test_append_into_root_element() {
        let out = append_children(
            "<disk type='volume'><target dev='vdb'/></disk>",
            0,
            "disk",
            &["<source pool='default'/>".to_string()],
        )
        .unwrap();
        assert_eq!(out, "<disk type='volume'><target dev='vdb'/><source pool='default'/></disk>");
    }

    #[test]
    fn test_empty_element_carries_attributes() {
        let attrs = BTreeMap::from([
            ("pool".to_string(), "default".to_string()),
            ("volume".to_string(), "a&b.qcow2".to_string()),
        ]);
        let out = empty_element("source", &attrs).unwrap();
        assert!(out.starts_with("<source "));
        assert!(out.contains("pool=\"default\""));
        assert!(out.contains("volume=\"a&amp;b.qcow2\""));
    }

    #[test]
    fn test_disk_source_attributes() {
        let doc = "<domain><devices>\
            <disk type='file'><source file='/a.img'/><target dev='vda'/></disk>\
            <disk type='volume'><driver name='qemu'/><source pool='default' volume='b.qcow2'>\
            <seclabel model='dac'/></source><target dev='vdb'/></disk>\
            <disk type='file' device='floppy'><target dev='fda'/></disk>\
            </devices></domain>";

        let attrs = disk_source_attributes(doc, "vdb").unwrap().unwrap();
        assert_eq!(attrs.get("pool").map(String::as_str), Some("default"));
        assert_eq!(attrs.get("volume").map(String::as_str), Some("b.qcow2"));
        assert_eq!(attrs.len(), 2);

        assert!(disk_source_attributes(doc, "fda").unwrap().is_none());
        assert!(disk_source_attributes(doc, "vdz").unwrap().is_none());
    }

    #[test]
    fn test_remove_disk() {
        let out = remove_disk(DOC, "vda").unwrap().unwrap();
        assert!(!out.contains("'vda'"));
        assert!(out.contains("'vdb'"));

        assert!(remove_disk(DOC, "vdz").unwrap().is_none());
    }
}
