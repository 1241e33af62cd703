//! # Communications interface crate.
//!
//! Provides the packets exchanged between the field controller and the robots, and the network
//! transport which carries them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Packet definitions and the JSON codec
pub mod packet;

/// Network module
pub mod net;
