//! SINLI relay — moves SINLI business documents between transports.
//!
//! A transfer run drains one [`channels::Channel`] into another:
//! filesystem mailbox to email mailbox or any other pairing. Messages
//! are processed one at a time; a failed message is logged and left
//! pending for the next run, never acknowledged.

pub mod channels;
pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
