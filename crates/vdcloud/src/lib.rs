//! vdcloud: ephemeral, resource-constrained terminal sandboxes.
//!
//! Sandboxes are containers created through the Docker Engine API. Clients
//! create and start one over HTTP, then attach a WebSocket that is ferried
//! to the container's attach socket.

pub mod api;
pub mod attach;
pub mod config;
pub mod container;
pub mod endpoint;
pub mod profile;
pub mod session;

#[cfg(test)]
mod test_support;
