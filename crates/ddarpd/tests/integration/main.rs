//! DDARP integration test harness.
//!
//! Engine-level scenarios drive the stores and the routing engine directly
//! with explicit instants, so nothing here sleeps its way to convergence.
//! The probe tests exchange real datagrams over localhost sockets.

mod convergence;
mod dijkstra;
mod expiry;
mod probes;
mod wire;
