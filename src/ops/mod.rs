//! Per-operation state machines.
//!
//! Each module holds both roles of one operation: `initiate` runs on the
//! side issuing the command, `serve` on the side holding the files. Both
//! walk the same Init -> (Data) -> Done handshake over a [`Link`].
//!
//! Protocol faults never leave these functions: initiators retry through
//! [`Link::exchange`], holders answer whatever arrives and ignore the rest.
//! What comes back is an [`Outcome`] (initiator) or a [`HolderExit`]
//! (holder).

pub mod delete;
pub mod fetch;
pub mod list;
pub mod shutdown;
pub mod upload;

use crate::config::Config;
use crate::store::Store;
use crate::transfer::channel::Link;
use crate::transfer::protocol::{Frame, Operation, Phase};
use crate::transport::Transport;
use bytes::Bytes;
use colored::Colorize;
use std::fmt;

/// Everything a state machine needs, passed explicitly per call.
pub struct Context<'a, T: Transport + ?Sized> {
    pub link: Link<'a, T>,
    pub config: &'a Config,
    pub store: &'a Store,
    /// Stamped onto the Init this side sends
    pub sequence: u32,
}

impl<'a, T: Transport + ?Sized> Context<'a, T> {
    pub fn new(link: Link<'a, T>, config: &'a Config, store: &'a Store) -> Self {
        Self {
            link,
            config,
            store,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

// =============================================================================
// Initiator results
// =============================================================================

/// User-visible result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Fetched { name: String, bytes: usize },
    /// Remote file missing, empty, or unreadable
    NotFound { name: String },
    Uploaded { name: String, bytes: usize },
    /// Local file to upload does not exist
    LocalNotFound { name: String },
    /// Remote refused to open the target for writing
    Rejected { name: String },
    /// Remote received everything but could not write the file
    UploadFailed { name: String },
    Deleted { name: String },
    DeleteFailed { name: String },
    Listed { entries: Vec<String> },
    ShutdownConfirmed,
    ShutdownTimedOut { attempts: u32 },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Fetched { .. }
                | Self::Uploaded { .. }
                | Self::Deleted { .. }
                | Self::Listed { .. }
                | Self::ShutdownConfirmed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetched { name, bytes } => {
                write!(f, "{} {} ({} bytes)", "Fetched".green(), name, bytes)
            }
            Self::NotFound { name } => write!(f, "{} {}", "Not found on server:".yellow(), name),
            Self::Uploaded { name, bytes } => {
                write!(f, "{} {} ({} bytes)", "Uploaded".green(), name, bytes)
            }
            Self::LocalNotFound { name } => {
                write!(f, "{} {}", "No such local file:".yellow(), name)
            }
            Self::Rejected { name } => {
                write!(f, "{} {}", "Server could not open for write:".yellow(), name)
            }
            Self::UploadFailed { name } => {
                write!(f, "{} {}", "Server failed to write:".red(), name)
            }
            Self::Deleted { name } => write!(f, "{} {}", "Deleted".green(), name),
            Self::DeleteFailed { name } => write!(f, "{} {}", "Delete failed:".red(), name),
            Self::Listed { entries } => {
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", entry)?;
                }
                Ok(())
            }
            Self::ShutdownConfirmed => write!(f, "{}", "Server shut down".green()),
            Self::ShutdownTimedOut { attempts } => write!(
                f,
                "{} (no answer after {} attempts)",
                "Shutdown timed out".red(),
                attempts
            ),
        }
    }
}

// =============================================================================
// Holder side
// =============================================================================

/// How a holder state machine handed control back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderExit {
    /// Done exchange answered. `reply` answered the Init and `done` the
    /// Done; both are replayed to late duplicates.
    Completed { reply: Frame, done: Frame },
    /// Finished without a Done exchange (not found, rejected)
    Ended,
    /// The peer started another operation; dispatch this Init next
    Preempted(Frame),
    /// The peer went quiet for the configured idle limit
    Abandoned,
    /// Shutdown acknowledged; stop serving
    Shutdown,
}

/// What a holder's wait for the next frame produced.
pub(crate) enum Event {
    Frame(Frame),
    Idle,
    Preempted(Frame),
    Abandoned,
}

/// Receive loop shared by the holder state machines.
///
/// Only a byte-identical copy of the opening Init counts as a retransmit;
/// any other Init from the peer ends this holder.
pub(crate) struct Holder<'c, 'a, T: Transport + ?Sized> {
    ctx: &'c Context<'a, T>,
    operation: Operation,
    init: Bytes,
    idle: u32,
}

impl<'c, 'a, T: Transport + ?Sized> Holder<'c, 'a, T> {
    pub(crate) fn new(ctx: &'c Context<'a, T>, init: &Frame) -> Self {
        Self {
            ctx,
            operation: init.operation(),
            init: init.encode(),
            idle: 0,
        }
    }

    pub(crate) async fn next(&mut self) -> Event {
        loop {
            let Some(frame) = self.ctx.link.recv(self.ctx.config.timeout()).await else {
                self.idle += 1;
                if let Some(limit) = self.ctx.config.idle_limit() {
                    if self.idle >= limit {
                        tracing::warn!(
                            "Abandoning {} with {}: idle for {} windows",
                            self.operation.name(),
                            self.ctx.link.peer(),
                            self.idle
                        );
                        return Event::Abandoned;
                    }
                }
                return Event::Idle;
            };

            let same_operation = frame.operation() == self.operation;
            if same_operation && (frame.phase() != Phase::Init || frame.encode() == self.init) {
                self.idle = 0;
                return Event::Frame(frame);
            }
            if frame.phase() == Phase::Init {
                tracing::debug!(
                    "{} preempted by {} from {}",
                    self.operation.name(),
                    frame.operation().name(),
                    self.ctx.link.peer()
                );
                return Event::Preempted(frame);
            }
            tracing::trace!(
                "Ignoring stray {} {:?} during {}",
                frame.operation().name(),
                frame.phase(),
                self.operation.name()
            );
        }
    }
}
