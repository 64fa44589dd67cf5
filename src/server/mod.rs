//! Server mode - runs as `udpft-server <port>`
//!
//! One dispatcher loop: wait for a frame, hand an Init to the matching
//! holder state machine, and run that machine until its Done exchange
//! resolves. Operations never interleave.

use crate::config::Config;
use crate::error::Result;
use crate::ops::{self, Context, HolderExit};
use crate::store::Store;
use crate::transfer::channel::{recv_any, Link};
use crate::transfer::protocol::{Frame, Operation, Phase};
use crate::transport::Transport;
use std::net::SocketAddr;
use tokio::time::Instant;

/// What the dispatcher does after handling one frame.
enum Step {
    Continue,
    /// A holder was preempted by this Init from the same peer
    Redispatch(Frame, SocketAddr),
    Stop,
}

/// The last operation whose Done exchange was answered.
///
/// Late duplicates of its Init get the Init reply again and late Done
/// frames get the Done answer again, without running the operation twice.
struct Finished {
    peer: SocketAddr,
    init: Frame,
    reply: Frame,
    done: Frame,
    /// The peer repeated the Init after Done. Data that follows means the
    /// peer is running the same command again.
    repeated: bool,
}

impl Finished {
    fn is_from(&self, peer: SocketAddr, operation: Operation) -> bool {
        self.peer == peer && self.init.operation() == operation
    }
}

pub struct Server<T: Transport> {
    transport: T,
    store: Store,
    config: Config,
    finished: Option<Finished>,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, store: Store, config: Config) -> Self {
        Self {
            transport,
            store,
            config,
            finished: None,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Serve until a Shutdown request is acknowledged.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            "Serving {} on {}",
            self.store.root().display(),
            self.local_addr()?
        );

        let mut pending = None;
        loop {
            let (frame, peer) = match pending.take() {
                Some(next) => next,
                None => {
                    let deadline = Instant::now() + self.config.timeout();
                    match recv_any(&self.transport, deadline).await {
                        Some(received) => received,
                        None => continue,
                    }
                }
            };

            match self.dispatch(frame, peer).await {
                Step::Continue => {}
                Step::Redispatch(frame, peer) => pending = Some((frame, peer)),
                Step::Stop => {
                    tracing::info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame, peer: SocketAddr) -> Step {
        match frame.phase() {
            Phase::Init => {
                if self.replay_init(&frame, peer).await {
                    Step::Continue
                } else {
                    self.serve(frame, peer).await
                }
            }
            Phase::Done => {
                self.replay_done(&frame, peer).await;
                Step::Continue
            }
            Phase::Data => match self.rerun(&frame, peer) {
                Some(init) => {
                    tracing::debug!("{} repeated by {}", init.operation().name(), peer);
                    self.serve(init, peer).await
                }
                None => {
                    tracing::trace!(
                        "Discarding orphan {} data frame from {}",
                        frame.operation().name(),
                        peer
                    );
                    Step::Continue
                }
            },
        }
    }

    /// Run the holder for one operation to completion.
    async fn serve(&mut self, init: Frame, peer: SocketAddr) -> Step {
        let operation = init.operation();
        let opening = init.clone();
        self.finished = None;

        let exit = {
            let ctx = Context::new(Link::new(&self.transport, peer), &self.config, &self.store);
            match operation {
                Operation::Fetch => ops::fetch::serve(&ctx, init).await,
                Operation::Upload => ops::upload::serve(&ctx, init).await,
                Operation::Delete => ops::delete::serve(&ctx, init).await,
                Operation::List => ops::list::serve(&ctx, init).await,
                Operation::Shutdown => ops::shutdown::serve(&ctx, init).await,
            }
        };

        match exit {
            Ok(HolderExit::Completed { reply, done }) => {
                tracing::debug!("{} with {} complete", operation.name(), peer);
                self.finished = Some(Finished {
                    peer,
                    init: opening,
                    reply,
                    done,
                    repeated: false,
                });
                Step::Continue
            }
            Ok(HolderExit::Ended) | Ok(HolderExit::Abandoned) => Step::Continue,
            Ok(HolderExit::Preempted(next)) => Step::Redispatch(next, peer),
            Ok(HolderExit::Shutdown) => Step::Stop,
            Err(e) => {
                tracing::warn!("{} from {} failed: {}", operation.name(), peer, e);
                Step::Continue
            }
        }
    }

    /// Answer a byte-identical copy of the finished operation's Init.
    async fn replay_init(&mut self, init: &Frame, peer: SocketAddr) -> bool {
        let Some(finished) = self.finished.as_mut() else {
            return false;
        };
        if !finished.is_from(peer, init.operation()) || finished.init.encode() != init.encode() {
            return false;
        }
        finished.repeated = true;
        tracing::debug!("Replaying {} Init reply to {}", init.operation().name(), peer);
        Link::new(&self.transport, peer).send(&finished.reply).await;
        true
    }

    /// Answer a retransmitted Done for an operation that already finished.
    async fn replay_done(&self, request: &Frame, peer: SocketAddr) {
        match &self.finished {
            Some(finished) if finished.is_from(peer, request.operation()) => {
                tracing::debug!("Replaying {} Done to {}", request.operation().name(), peer);
                Link::new(&self.transport, peer).send(&finished.done).await;
            }
            _ => tracing::trace!(
                "Discarding {} Done from {} with nothing to replay",
                request.operation().name(),
                peer
            ),
        }
    }

    /// The Init to run again when Data follows a repeated Init.
    fn rerun(&self, data: &Frame, peer: SocketAddr) -> Option<Frame> {
        self.finished
            .as_ref()
            .filter(|f| f.repeated && f.is_from(peer, data.operation()))
            .map(|f| f.init.clone())
    }
}
