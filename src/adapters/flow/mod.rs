//! Flow blockchain transports
//!
//! `FlowRestTransport` polls a Flow Access node over REST;
//! `MockChainTransport` serves scripted or synthetic streams.

pub mod client_mock;
pub mod client_rest;

pub use client_mock::MockChainTransport;
pub use client_rest::FlowRestTransport;
