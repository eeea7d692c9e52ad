//! Client-facing entry point: wires the read and write paths behind one retry loop.
mod store_client;
mod wiring;

pub use store_client::StoreClient;
pub use wiring::try_create_store_client;
pub use wiring::try_create_store_client_with_clock;
pub use wiring::StoreClientConfig;
pub use wiring::StoreClientCreationError;
