//! Integration test common infrastructure.
//!
//! Provides a scripted stanza gateway for the relay to connect to and a
//! handle on a spawned relay process.

pub mod gateway;
pub mod relay;

#[allow(unused_imports)]
pub use gateway::{FakeGateway, GatewayPeer};
#[allow(unused_imports)]
pub use relay::TestRelay;
