// podium-server: in-memory quiz session engine and resource manager.
//
// The transport layer (rooms, websockets, payload shaping) and the SQL
// schema live elsewhere; this crate owns authoritative session state, the
// process-wide registry, and the best-effort persistence boundary.

pub mod config;
pub mod events;
pub mod registry;
pub mod session;
pub mod store;
