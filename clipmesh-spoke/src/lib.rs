//! Library surface for the spoke binary, split out so integration tests
//! can drive a real `PeerSession` without shelling out to the built
//! binary.

pub mod session;
