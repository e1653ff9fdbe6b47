//! Everything about driving a getEccSoapServer: the transition graph,
//! the SOAP client, the XML payloads, and the store-backed operations.
pub mod client;
pub mod controller;
pub mod error;
pub mod operation;
#[cfg(test)]
pub mod testing;
pub mod xml;
