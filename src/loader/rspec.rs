use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::domain::topology::{Hop, Link, Node, Path, Stitching, Topology};
use crate::domain::util::id::{AggregateId, LinkId, NodeId, PathId};
use crate::domain::vlan::{VLAN_MAX, VlanRange};
use crate::error::{Error, Result};

/// Parses an rspec document into a [`Topology`].
///
/// The text must be well-formed XML containing exactly one top-level `rspec`
/// element with zero or more `node`, `link` and at most one `stitching`
/// child. Document order is preserved everywhere; hop order along a path is
/// the physical sequence of the circuit. Unknown elements are skipped, so
/// rspec extensions the workflow does not need pass through harmlessly.
///
/// Parsing is pure: no side effect beyond allocation.
pub fn parse(text: &str) -> Result<Topology> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut topology: Option<Topology> = None;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"rspec" => {
                if topology.is_some() {
                    return Err(Error::ParseError(
                        "More than one top-level rspec element".to_string(),
                    ));
                }
                topology = Some(parse_rspec(&mut reader)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"rspec" => {
                if topology.is_some() {
                    return Err(Error::ParseError(
                        "More than one top-level rspec element".to_string(),
                    ));
                }
                topology = Some(Topology { nodes: Vec::new(), links: Vec::new(), stitching: None });
            }
            Event::Start(e) | Event::Empty(e) => {
                return Err(Error::ParseError(format!(
                    "Unexpected top-level element '{}', expected 'rspec'",
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
            Event::Eof => break,
            // XML declaration, comments, whitespace
            _ => {}
        }
    }

    let topology = topology
        .ok_or_else(|| Error::ParseError("Document contains no rspec element".to_string()))?;
    topology.validate()?;
    Ok(topology)
}

fn parse_rspec(reader: &mut Reader<&[u8]>) -> Result<Topology> {
    let mut nodes = Vec::new();
    let mut links = Vec::new();
    let mut stitching: Option<Stitching> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.name().as_ref() {
                b"node" => {
                    let node = parse_node_attrs(&e)?;
                    skip_element(reader, &e)?;
                    nodes.push(node);
                }
                b"link" => links.push(parse_link(reader, &e)?),
                b"stitching" => {
                    if stitching.is_some() {
                        return Err(Error::ParseError(
                            "More than one stitching element".to_string(),
                        ));
                    }
                    stitching = Some(parse_stitching(reader)?);
                }
                _ => skip_element(reader, &e)?,
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"node" => nodes.push(parse_node_attrs(&e)?),
                b"link" => {
                    let client_id = LinkId::new(require_attr(&e, "client_id")?);
                    links.push(Link { client_id, aggregates: Vec::new() });
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"rspec" => break,
            Event::Eof => {
                return Err(Error::ParseError("Unexpected end of document".to_string()));
            }
            _ => {}
        }
    }
    Ok(Topology { nodes, links, stitching })
}

fn parse_node_attrs(e: &BytesStart<'_>) -> Result<Node> {
    Ok(Node {
        client_id: NodeId::new(require_attr(e, "client_id")?),
        aggregate: AggregateId::new(require_attr(e, "component_manager_id")?),
    })
}

fn parse_link(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Link> {
    let client_id = LinkId::new(require_attr(start, "client_id")?);
    let mut aggregates = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"component_manager" => {
                aggregates.push(AggregateId::new(require_attr(&e, "name")?));
            }
            Event::Start(e) => skip_element(reader, &e)?,
            Event::End(e) if e.name().as_ref() == b"link" => break,
            Event::Eof => {
                return Err(Error::ParseError("Unexpected end of document".to_string()));
            }
            _ => {}
        }
    }
    Ok(Link { client_id, aggregates })
}

fn parse_stitching(reader: &mut Reader<&[u8]>) -> Result<Stitching> {
    let mut paths = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"path" => {
                paths.push(parse_path(reader, &e)?);
            }
            Event::Start(e) => skip_element(reader, &e)?,
            Event::End(e) if e.name().as_ref() == b"stitching" => break,
            Event::Eof => {
                return Err(Error::ParseError("Unexpected end of document".to_string()));
            }
            _ => {}
        }
    }
    Ok(Stitching { paths })
}

fn parse_path(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Path> {
    let id = PathId::new(require_attr(start, "id")?);
    let mut hops = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"hop" => {
                hops.push(parse_hop(reader, &e)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"hop" => {
                hops.push(hop_from_attrs(&e, VlanRange::any(), None, false)?);
            }
            Event::Start(e) => skip_element(reader, &e)?,
            Event::End(e) if e.name().as_ref() == b"path" => break,
            Event::Eof => {
                return Err(Error::ParseError("Unexpected end of document".to_string()));
            }
            _ => {}
        }
    }
    Ok(Path { id, hops })
}

fn parse_hop(reader: &mut Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Hop> {
    let mut vlan_range = VlanRange::any();
    let mut suggested = None;
    let mut translation = false;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.name().as_ref() {
                b"vlanRangeAvailability" => {
                    vlan_range = VlanRange::from_spec(&read_text(reader, &e)?)?;
                }
                b"suggestedVLANRange" => {
                    suggested = parse_suggested(&read_text(reader, &e)?)?;
                }
                b"vlanTranslation" => {
                    translation = read_text(reader, &e)?.trim() == "true";
                }
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.name().as_ref() == b"hop" => break,
            Event::Eof => {
                return Err(Error::ParseError("Unexpected end of document".to_string()));
            }
            _ => {}
        }
    }
    hop_from_attrs(start, vlan_range, suggested, translation)
}

fn hop_from_attrs(
    e: &BytesStart<'_>,
    vlan_range: VlanRange,
    suggested_vlan: Option<u16>,
    vlan_translation: bool,
) -> Result<Hop> {
    let id_text = require_attr(e, "id")?;
    let id: u32 = id_text
        .parse()
        .map_err(|_| Error::ParseError(format!("Hop id '{}' is not numeric", id_text)))?;
    Ok(Hop {
        id,
        aggregate: AggregateId::new(require_attr(e, "aggregate")?),
        vlan_range,
        suggested_vlan,
        vlan_translation,
        import_vlans_from: None,
    })
}

fn parse_suggested(text: &str) -> Result<Option<u16>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") {
        return Ok(None);
    }
    let tag: u32 = trimmed.parse().map_err(|_| {
        Error::ParseError(format!("Suggested VLAN '{}' is not a tag", trimmed))
    })?;
    if tag > VLAN_MAX as u32 {
        return Err(Error::RangeError(format!(
            "VLAN tag {} is outside [0, {}]",
            tag, VLAN_MAX
        )));
    }
    Ok(Some(tag as u16))
}

fn require_attr(e: &BytesStart<'_>, name: &str) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::ParseError(err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(attr
                .unescape_value()
                .map_err(xml_err)?
                .into_owned());
        }
    }
    Err(Error::ParseError(format!(
        "Element '{}' is missing attribute '{}'",
        String::from_utf8_lossy(e.name().as_ref()),
        name
    )))
}

fn read_text(reader: &mut Reader<&[u8]>, e: &BytesStart<'_>) -> Result<String> {
    let end = e.to_end().into_owned();
    Ok(reader
        .read_text(end.name())
        .map_err(xml_err)?
        .into_owned())
}

fn skip_element(reader: &mut Reader<&[u8]>, e: &BytesStart<'_>) -> Result<()> {
    let end = e.to_end().into_owned();
    reader.read_to_end(end.name()).map_err(xml_err)?;
    Ok(())
}

fn xml_err(err: impl std::fmt::Display) -> Error {
    Error::ParseError(err.to_string())
}

/// Serializes a [`Topology`] back into rspec text.
///
/// The output is deterministic for a given topology (fixed attribute and
/// element order), which is what makes the manifest combiner's output
/// byte-for-byte reproducible.
pub fn to_xml(topology: &Topology) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut rspec = BytesStart::new("rspec");
    rspec.push_attribute(("type", "manifest"));
    writer.write_event(Event::Start(rspec)).map_err(xml_err)?;

    for node in &topology.nodes {
        let mut el = BytesStart::new("node");
        el.push_attribute(("client_id", node.client_id.as_str()));
        el.push_attribute(("component_manager_id", node.aggregate.as_str()));
        writer.write_event(Event::Empty(el)).map_err(xml_err)?;
    }

    for link in &topology.links {
        let mut el = BytesStart::new("link");
        el.push_attribute(("client_id", link.client_id.as_str()));
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for aggregate in &link.aggregates {
            let mut cm = BytesStart::new("component_manager");
            cm.push_attribute(("name", aggregate.as_str()));
            writer.write_event(Event::Empty(cm)).map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("link")))
            .map_err(xml_err)?;
    }

    if let Some(stitching) = &topology.stitching {
        writer
            .write_event(Event::Start(BytesStart::new("stitching")))
            .map_err(xml_err)?;
        for path in &stitching.paths {
            let mut el = BytesStart::new("path");
            el.push_attribute(("id", path.id.as_str()));
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            for hop in &path.hops {
                write_hop(&mut writer, hop)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("path")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("stitching")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("rspec")))
        .map_err(xml_err)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| Error::ParseError(format!("Serialized rspec is not UTF-8: {}", e)))
}

fn write_hop(writer: &mut Writer<Vec<u8>>, hop: &Hop) -> Result<()> {
    let mut el = BytesStart::new("hop");
    let id = hop.id.to_string();
    el.push_attribute(("id", id.as_str()));
    el.push_attribute(("aggregate", hop.aggregate.as_str()));
    writer.write_event(Event::Start(el)).map_err(xml_err)?;

    write_text_element(writer, "vlanRangeAvailability", &hop.vlan_range.to_string())?;
    let suggested = match hop.suggested_vlan {
        Some(tag) => tag.to_string(),
        None => "any".to_string(),
    };
    write_text_element(writer, "suggestedVLANRange", &suggested)?;
    write_text_element(writer, "vlanTranslation", if hop.vlan_translation { "true" } else { "false" })?;

    writer
        .write_event(Event::End(BytesEnd::new("hop")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}
