// aerolink-api: async client for the Siegenia AEROPAC WebSocket device protocol.
//
// One `DeviceClient` drives one device connection: authenticated login,
// correlated request/response multiplexing over a single socket, push
// notification delivery, and periodic keepalive.

pub mod error;
pub mod protocol;

mod correlation;
mod router;
mod session;
mod transport;

pub use error::Error;
pub use protocol::{RequestEnvelope, ResponseEnvelope, device_type_name};
pub use session::{DeviceClient, DeviceConfig, PushObserver};
