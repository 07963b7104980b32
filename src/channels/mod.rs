//! Channel abstraction and its transports.

pub mod channel;
pub mod email;
pub mod filesystem;
pub mod pop3;

pub use channel::Channel;
pub use email::EmailChannel;
pub use filesystem::FilesystemChannel;
