//! The XML payload formats exchanged with getEccSoapServer: the ConfigId
//! triple, the ConfigIdList returned by GetConfigIDs, and the DataLinkSet
//! describing where each data source streams to.
use super::error::EccError;
use crate::store::entities::{ConnectionType, DataRouter, DataSource};
use quick_xml::events::Event;
use quick_xml::Reader;

const CONFIG_ROOT_TAG: &[u8] = b"ConfigId";
const CONFIG_LIST_TAG: &[u8] = b"ConfigIdList";
const SUB_CONFIG_TAG: &[u8] = b"SubConfigId";

/// One link between a data sender and the router receiving its stream,
/// as the ECC server wants to see it
#[derive(Debug, Clone, PartialEq)]
pub struct DataLink {
    pub sender_id: String,
    pub router_name: String,
    pub router_ip: String,
    pub router_port: u16,
    pub router_type: ConnectionType,
}

impl DataLink {
    /// Build the link for one source from its router row
    pub fn new(source: &DataSource, router: &DataRouter) -> Self {
        Self {
            sender_id: source.name.clone(),
            router_name: router.name.clone(),
            router_ip: router.ip_address.clone(),
            router_port: router.port,
            router_type: router.connection_type,
        }
    }
}

/// Serialize a config triple to the ConfigId payload format
pub fn config_id_to_xml(describe: &str, prepare: &str, configure: &str) -> String {
    format!(
        r#"<ConfigId>
    <SubConfigId type="describe">{describe}</SubConfigId>
    <SubConfigId type="prepare">{prepare}</SubConfigId>
    <SubConfigId type="configure">{configure}</SubConfigId>
</ConfigId>"#
    )
}

/// Serialize the full link table for one ECC server, one DataLink element
/// per source it drives
pub fn data_link_set_to_xml(links: &[DataLink]) -> String {
    let mut body = String::from("<DataLinkSet>\n");
    for link in links {
        body.push_str(&format!(
            "    <DataLink>\n        <DataSender id=\"{}\" />\n        <DataRouter name=\"{}\" ipAddress=\"{}\" port=\"{}\" type=\"{}\" />\n    </DataLink>\n",
            link.sender_id, link.router_name, link.router_ip, link.router_port, link.router_type
        ));
    }
    body.push_str("</DataLinkSet>");
    body
}

/// Parse a single ConfigId payload. The root tag must be ConfigId and
/// every SubConfigId must carry one of the three known type attributes.
pub fn config_id_from_xml(xml: &str) -> Result<(String, String, String), EccError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) => continue,
            Event::Start(e) => {
                if e.local_name().as_ref() != CONFIG_ROOT_TAG {
                    return Err(EccError::MalformedXml(format!(
                        "expected a ConfigId root, found {}",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                return read_config_body(&mut reader);
            }
            _ => return Err(EccError::MalformedXml(String::from("no ConfigId root"))),
        }
    }
}

/// Parse the ConfigIdList body returned by GetConfigIDs into the triples
/// it contains
pub fn config_id_list_from_xml(xml: &str) -> Result<Vec<(String, String, String)>, EccError> {
    let mut reader = Reader::from_str(xml);
    let mut triples = Vec::new();
    let mut saw_root = false;
    loop {
        match reader.read_event()? {
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) => continue,
            Event::Start(e) if !saw_root => {
                if e.local_name().as_ref() != CONFIG_LIST_TAG {
                    return Err(EccError::MalformedXml(format!(
                        "expected a ConfigIdList root, found {}",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                saw_root = true;
            }
            Event::Start(e) => {
                if e.local_name().as_ref() != CONFIG_ROOT_TAG {
                    return Err(EccError::MalformedXml(format!(
                        "unexpected element {} in ConfigIdList",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                triples.push(read_config_body(&mut reader)?);
            }
            Event::End(_) | Event::Eof => break,
            _ => continue,
        }
    }
    if !saw_root {
        return Err(EccError::MalformedXml(String::from("no ConfigIdList root")));
    }
    Ok(triples)
}

/// Consume the children of an already-opened ConfigId element through its
/// end tag, collecting the three sub-config names
fn read_config_body(reader: &mut Reader<&[u8]>) -> Result<(String, String, String), EccError> {
    let mut describe: Option<String> = None;
    let mut prepare: Option<String> = None;
    let mut configure: Option<String> = None;
    let mut pending: Option<Vec<u8>> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() != SUB_CONFIG_TAG {
                    return Err(EccError::MalformedXml(format!(
                        "unexpected element {} in ConfigId",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                let mut kind: Option<Vec<u8>> = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"type" {
                        kind = Some(attr.value.to_vec());
                    }
                }
                match kind {
                    Some(k) => match k.as_slice() {
                        b"describe" | b"prepare" | b"configure" => pending = Some(k),
                        _ => {
                            return Err(EccError::UnknownConfigType(String::from_utf8(k)?));
                        }
                    },
                    None => return Err(EccError::UnknownConfigType(String::from("(none)"))),
                }
            }
            Event::Text(t) => {
                let value = String::from_utf8(t.to_vec())?.trim().to_string();
                match pending.as_deref() {
                    Some(b"describe") => describe = Some(value),
                    Some(b"prepare") => prepare = Some(value),
                    Some(b"configure") => configure = Some(value),
                    _ => (),
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == CONFIG_ROOT_TAG {
                    break;
                }
                pending = None;
            }
            Event::Eof => {
                return Err(EccError::MalformedXml(String::from(
                    "ConfigId element was not closed",
                )))
            }
            _ => continue,
        }
    }

    match (describe, prepare, configure) {
        (Some(d), Some(p), Some(c)) => Ok((d, p, c)),
        _ => Err(EccError::MalformedXml(String::from(
            "ConfigId is missing one of describe/prepare/configure",
        ))),
    }
}
