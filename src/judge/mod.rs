//! Judge-facing side of the bridge: one connection task per judge,
//! relaying grading packets between the socket and the dispatcher.

pub mod connection;

pub use connection::JudgeConnection;
