//! Channel contract — the transport-neutral message endpoint.

use crate::error::ChannelError;
use crate::message::SinliMessage;

/// A transport endpoint through which SINLI messages are enumerated,
/// fetched, delivered, and acknowledged.
///
/// A channel instance owns its transport state (directory scan, mailbox
/// credentials and cache) for the duration of one orchestration run. All
/// operations block the calling thread; there is no intra-run parallelism.
pub trait Channel {
    /// Short transport name, used in log lines.
    fn name(&self) -> &'static str;

    /// List the ids of messages not yet consumed, in a transport-defined
    /// order that is stable within one call.
    ///
    /// Each call re-walks the tree or re-lists the mailbox; the result is
    /// a snapshot, not a live feed.
    fn enumerate_pending(&mut self) -> Result<Vec<String>, ChannelError>;

    /// Reconstruct the message identified by `id`.
    ///
    /// Fails with [`ChannelError::NotFound`] when the id is unknown to
    /// this channel instance.
    fn fetch(&mut self, id: &str) -> Result<SinliMessage, ChannelError>;

    /// Hand the message to the transport for outbound delivery.
    fn deliver(&mut self, message: &SinliMessage) -> Result<(), ChannelError>;

    /// Mark the item consumed so it will not reappear in future
    /// enumerations.
    ///
    /// Acknowledging an id that no longer exists logs an error and
    /// returns `Ok` — a vanished item is tolerated, not fatal.
    fn acknowledge(&mut self, id: &str) -> Result<(), ChannelError>;

    /// Release held resources. Safe to call more than once.
    fn release(&mut self);
}
