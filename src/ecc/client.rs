//! SOAP plumbing for getEccSoapServer. The service is driven the simple
//! way: hand-composed envelopes POSTed over HTTP, replies picked apart
//! with quick-xml. The [`EccClient`] trait is the seam the rest of the
//! crate talks through so tests can substitute canned replies.
use super::error::EccError;
use super::operation::EccOperation;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// The SOAP protocol header for ECC
const ECC_SOAP_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <SOAP-ENV:Envelope
    xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:SOAP-ENC="http://schemas.xmlsoap.org/soap/encoding/"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns="urn:ecc">
    <SOAP-ENV:Body>
"#;

const ECC_SOAP_FOOTER: &str = r#"
    </SOAP-ENV:Body>
    </SOAP-ENV:Envelope>
"#;

//120s (2min) timeouts to match ECCServer/Client
const CONNECTION_TIMEOUT_SEC: u64 = 120;

/// Reply to a GetState call
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EccStatusResponse {
    pub error_code: i32,
    pub error_message: String,
    pub state: i32,
    pub transition: i32,
}

/// Reply to a transition or GetConfigIDs call. For GetConfigIDs the text
/// field carries the ConfigIdList body.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EccOperationResponse {
    pub error_code: i32,
    pub error_message: String,
    pub text: String,
}

/// The nine SOAP operations, reduced to the three shapes the control
/// plane needs
#[async_trait]
pub trait EccClient: Send + Sync {
    async fn get_state(&self) -> Result<EccStatusResponse, EccError>;
    async fn get_config_ids(&self) -> Result<EccOperationResponse, EccError>;
    async fn transition(
        &self,
        op: EccOperation,
        config_xml: &str,
        datalink_xml: &str,
    ) -> Result<EccOperationResponse, EccError>;
}

/// Produces a client bound to one endpoint URL. Tasks go through this so
/// tests can hand back fakes.
pub trait EccClientFactory: Send + Sync {
    fn client(&self, url: &str) -> Result<Arc<dyn EccClient>, EccError>;
}

/// The production client
#[derive(Debug)]
pub struct SoapEccClient {
    url: String,
    connection: Client,
}

impl SoapEccClient {
    pub fn new(url: &str) -> Result<Self, EccError> {
        let timeout = Duration::from_secs(CONNECTION_TIMEOUT_SEC);
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            connection: client,
        })
    }

    async fn post(&self, body: String) -> Result<String, EccError> {
        let response = self
            .connection
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl EccClient for SoapEccClient {
    async fn get_state(&self) -> Result<EccStatusResponse, EccError> {
        let message = format!("{ECC_SOAP_HEADER}<GetState>\n</GetState>\n{ECC_SOAP_FOOTER}");
        let reply = self.post(message).await?;
        parse_status_reply(&reply)
    }

    async fn get_config_ids(&self) -> Result<EccOperationResponse, EccError> {
        let message =
            format!("{ECC_SOAP_HEADER}<GetConfigIDs>\n</GetConfigIDs>\n{ECC_SOAP_FOOTER}");
        let reply = self.post(message).await?;
        parse_operation_reply(&reply)
    }

    async fn transition(
        &self,
        op: EccOperation,
        config_xml: &str,
        datalink_xml: &str,
    ) -> Result<EccOperationResponse, EccError> {
        let message = format!(
            "{ECC_SOAP_HEADER}<{op}>\n<configID>\n{config_xml}\n</configID>\n<table>\n{datalink_xml}\n</table>\n</{op}>\n{ECC_SOAP_FOOTER}"
        );
        let reply = self.post(message).await?;
        parse_operation_reply(&reply)
    }
}

/// Factory for the production client
#[derive(Debug, Default, Clone)]
pub struct SoapClientFactory;

impl EccClientFactory for SoapClientFactory {
    fn client(&self, url: &str) -> Result<Arc<dyn EccClient>, EccError> {
        Ok(Arc::new(SoapEccClient::new(url)?))
    }
}

/// Flatten a reply envelope to (leaf tag, text) pairs. The interesting
/// fields sit at unpredictable depths depending on the server build, so
/// we scan rather than walk a fixed structure.
fn reply_fields(xml: &str) -> Result<Vec<(String, String)>, EccError> {
    let mut reader = Reader::from_str(xml);
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                current = Some(String::from_utf8(e.local_name().as_ref().to_vec())?);
            }
            Event::Text(t) => {
                if let Some(tag) = &current {
                    let text = t.unescape()?.trim().to_string();
                    match fields.iter_mut().find(|(name, _)| name == tag) {
                        Some((_, existing)) => existing.push_str(&text),
                        None => fields.push((tag.clone(), text)),
                    }
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => continue,
        }
    }
    Ok(fields)
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(tag, _)| tag == name)
        .map(|(_, text)| text.as_str())
}

fn parse_status_reply(xml: &str) -> Result<EccStatusResponse, EccError> {
    let fields = reply_fields(xml)?;
    Ok(EccStatusResponse {
        error_code: field(&fields, "ErrorCode")
            .ok_or(EccError::MissingReplyField("ErrorCode"))?
            .parse()?,
        error_message: field(&fields, "ErrorMessage").unwrap_or("").to_string(),
        state: field(&fields, "State")
            .ok_or(EccError::MissingReplyField("State"))?
            .parse()?,
        transition: field(&fields, "Transition")
            .ok_or(EccError::MissingReplyField("Transition"))?
            .parse()?,
    })
}

fn parse_operation_reply(xml: &str) -> Result<EccOperationResponse, EccError> {
    let fields = reply_fields(xml)?;
    Ok(EccOperationResponse {
        error_code: field(&fields, "ErrorCode")
            .ok_or(EccError::MissingReplyField("ErrorCode"))?
            .parse()?,
        error_message: field(&fields, "ErrorMessage").unwrap_or("").to_string(),
        text: field(&fields, "Text").unwrap_or("").to_string(),
    })
}
