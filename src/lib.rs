//! Control plane for a GET-based data acquisition farm. The library
//! drives the getEccSoapServer state machine of every CoBo and MuTAnT,
//! watches the dataRouter processes over SSH, owns run boundaries, and
//! schedules all of that through a bounded task dispatcher. The HTTP
//! surface operators click on lives elsewhere and consumes this crate.
pub mod config;
pub mod ecc;
pub mod fleet;
pub mod poller;
pub mod remote;
pub mod store;
pub mod tasks;
