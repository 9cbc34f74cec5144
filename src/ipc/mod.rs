//! IPC server for viewer UI communication

pub mod protocol;
pub mod server;

pub use server::IpcServer;
