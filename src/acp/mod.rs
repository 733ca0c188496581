//! Agent Client Protocol (ACP) runtime.
//!
//! A bidirectional JSON-RPC connection between an editor (the *client*) and
//! an agent process, carried as newline-delimited JSON over a byte stream
//! (normally the agent's stdin/stdout).
//!
//! Layers, leaves first:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based frame
//!   splitting with a per-line size limit.
//! - `transport`: framed read half, write-locked frame sink, stdio helpers.
//! - `message`: request / response / notification shapes and the JSON codec.
//! - `connection`: reader loop, id correlation, concurrent dispatch, teardown.
//! - `update`: `session/update` variants and tool-call ordering enforcement.
//! - `schema` and `methods`: typed parameters and the closed method tables.
//! - `agent` / `client`: role adapters over [`connection::Connection`].

pub mod agent;
pub mod client;
pub mod codec;
pub mod connection;
pub mod message;
pub mod methods;
pub mod schema;
pub mod transport;
pub mod update;
