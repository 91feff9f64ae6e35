//! Datagram transport.

pub mod udp;
