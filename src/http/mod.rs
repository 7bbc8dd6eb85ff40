pub mod client;
pub mod response;
pub mod transport;
pub mod types;

pub use client::ReqwestTransport;
pub use response::{RequestPreview, ResponseData, ResponsePreview};
pub use transport::{CancelRegistry, OutgoingRequest, Transport, TransportError, TransportResponse};
pub use types::{Method, Url};
