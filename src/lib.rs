//! # routewire
//!
//! Async client for a length-prefixed, route-addressed binary protocol.
//!
//! A connection carries four kinds of packets: requests (answered by a
//! response with the same correlation id), responses, one-way notifies, and
//! server pushes delivered to route listeners.
//!
//! ## Layers
//!
//! - [`codec`]: payload encodings (raw, MsgPack, JSON)
//! - [`protocol`]: header, packet envelope, framing and id generation
//! - [`correlator`]: pending-request table with timeouts and cancellation
//! - [`listener`]: push subscriptions per route
//! - [`Client`]: ties them to a byte stream
//!
//! ## Example
//!
//! ```ignore
//! use routewire::Client;
//!
//! #[tokio::main]
//! async fn main() -> routewire::Result<()> {
//!     let client = Client::builder()
//!         .route("test.echo", 7)
//!         .connect_tcp("127.0.0.1:3010")
//!         .await?;
//!
//!     let (status, reply) = client.request::<_, String>("test.echo", "hello").await?;
//!     assert!(status.is_success());
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod route;
pub mod transport;
pub mod writer;

mod client;

pub use client::{typed_reply, Client, ClientBuilder, ClientStatus, ErrorHook};
pub use codec::EncodingType;
pub use config::ClientConfig;
pub use correlator::{PendingReply, RequestCorrelator};
pub use error::{Result, RoutewireError};
pub use listener::{ListenerHandle, ListenerRegistry};
pub use protocol::{Status, StatusCode};
pub use route::{IntoRoute, RouteTable};
