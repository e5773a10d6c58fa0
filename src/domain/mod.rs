pub mod aggregate;
pub mod am_client;
pub mod graph;
pub mod launcher;
pub mod manifest;
pub mod scs;
pub mod session;
pub mod topology;
pub mod util;
pub mod vlan;
