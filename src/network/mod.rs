//! Network subsystem: transport sockets and the sender thread

pub mod sender;
pub mod socket;

pub use sender::{FileMirror, SendWorker, SenderExit};
pub use socket::TransportSocket;
