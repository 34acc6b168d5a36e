//! Switchboard Core
//!
//! Transport-agnostic domain logic for the call session bridge: the single
//! mutable session record shared by the three connection legs, the wire
//! protocol spoken to the realtime model service, and the function-call
//! dispatcher with its built-in tools. The service crate supplies the
//! sockets; everything here is testable without one.

pub mod dispatch;
pub mod realtime;
pub mod session;
pub mod tools;
