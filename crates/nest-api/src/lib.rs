// nest-api: Async Rust client for the Nest REST API (thermostats, structures, streaming)

pub mod client;
pub mod error;
pub mod models;
pub mod stream;
pub mod structure;
pub mod thermostat;
pub mod transport;

pub use client::{ClientConfig, DEFAULT_API_URL, NestClient};
pub use error::{Error, ErrorKind};
pub use models::{
    AwayMode, ClientBound, Devices, Eta, HvacMode, StreamEvent, Structure, StructuresEvent,
    Thermostat,
};
pub use stream::{ReconnectConfig, StreamHandle, StreamState};
pub use transport::{TlsMode, TransportConfig};
