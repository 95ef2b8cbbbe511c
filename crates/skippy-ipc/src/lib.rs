//! IPC server: newline-delimited JSON over a Unix-domain socket.

pub mod protocol;
pub mod server;

pub use protocol::{IpcRequest, IpcResponse, OutputTarget};
pub use server::{run, IpcHost};
