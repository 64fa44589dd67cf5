//! Retry channel: send, wait a bounded window, resend.
//!
//! A [`Link`] binds a transport to one peer. Frames from other addresses
//! and undecodable blocks are dropped on receipt; frames the caller's
//! matcher rejects are discarded without ending the wait. Only an elapsed
//! window triggers a resend, and the [`RetryPolicy`] decides how many
//! resends are allowed and how long each window is.

use crate::error::{Result, TransferError};
use crate::transfer::protocol::{Frame, MESSAGE_SIZE};
use crate::transport::Transport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Receive window for the first attempt
    pub timeout: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Window multiplier per consecutive failed attempt
    pub backoff: f64,
    /// Upper bound on a backed-off window
    pub max_timeout: Duration,
}

impl RetryPolicy {
    pub fn unbounded(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: None,
            backoff: 1.0,
            max_timeout: timeout,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Receive window after `failures` consecutive failed attempts.
    pub fn window(&self, failures: u32) -> Duration {
        if self.backoff <= 1.0 || failures == 0 {
            return self.timeout;
        }
        let factor = self.backoff.powi(failures.min(64) as i32);
        self.timeout.mul_f64(factor).min(self.max_timeout.max(self.timeout))
    }

    /// Whether a 1-based `attempt` is within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Receive one frame from any address, until `deadline`.
///
/// Undecodable blocks are skipped. Returns `None` when the deadline passes.
pub async fn recv_any<T: Transport + ?Sized>(
    transport: &T,
    deadline: Instant,
) -> Option<(Frame, SocketAddr)> {
    let mut buf = [0u8; MESSAGE_SIZE];
    loop {
        match tokio::time::timeout_at(deadline, transport.recv_from(&mut buf)).await {
            Err(_) => return None,
            Ok(Err(e)) => {
                // ICMP errors and the like: the datagram is gone, wait out the window
                tracing::debug!("Receive failed: {}", e);
                tokio::time::sleep_until(deadline).await;
                return None;
            }
            Ok(Ok((n, from))) => match Frame::decode(&buf[..n]) {
                Ok(frame) => return Some((frame, from)),
                Err(e) => tracing::trace!("Dropping datagram from {}: {}", from, e),
            },
        }
    }
}

/// Transport bound to a single peer address.
pub struct Link<'a, T: Transport + ?Sized> {
    transport: &'a T,
    peer: SocketAddr,
}

impl<'a, T: Transport + ?Sized> Clone for Link<'a, T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport,
            peer: self.peer,
        }
    }
}

impl<'a, T: Transport + ?Sized> Link<'a, T> {
    pub fn new(transport: &'a T, peer: SocketAddr) -> Self {
        Self { transport, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one frame. A failed send is a lost datagram, not an error.
    pub async fn send(&self, frame: &Frame) {
        if let Err(e) = self.transport.send_to(&frame.encode(), self.peer).await {
            tracing::warn!(
                "Send of {} {:?} to {} failed: {}",
                frame.operation().name(),
                frame.phase(),
                self.peer,
                e
            );
        }
    }

    pub async fn send_all(&self, frames: &[Frame]) {
        for frame in frames {
            self.send(frame).await;
        }
    }

    /// Next frame from the peer before `deadline`.
    pub async fn recv_until(&self, deadline: Instant) -> Option<Frame> {
        loop {
            let (frame, from) = recv_any(self.transport, deadline).await?;
            if from == self.peer {
                return Some(frame);
            }
            tracing::trace!("Ignoring {} frame from {}", frame.operation().name(), from);
        }
    }

    pub async fn recv(&self, window: Duration) -> Option<Frame> {
        self.recv_until(Instant::now() + window).await
    }

    /// Send `requests` and wait for a frame accepted by `matcher`, resending
    /// every time a receive window elapses.
    ///
    /// Fails with [`TransferError::RetriesExhausted`] once the policy's
    /// attempt budget is spent.
    pub async fn exchange<F>(
        &self,
        requests: &[Frame],
        policy: &RetryPolicy,
        mut matcher: F,
    ) -> Result<Frame>
    where
        F: FnMut(&Frame) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            if !policy.allows(attempt + 1) {
                return Err(TransferError::RetriesExhausted(attempt));
            }
            let window = policy.window(attempt);
            attempt += 1;

            self.send_all(requests).await;
            let deadline = Instant::now() + window;
            while let Some(frame) = self.recv_until(deadline).await {
                if matcher(&frame) {
                    return Ok(frame);
                }
                tracing::trace!(
                    "Discarding unexpected {} {:?}",
                    frame.operation().name(),
                    frame.phase()
                );
            }
            tracing::debug!(
                "No response from {} (attempt {}), retransmitting",
                self.peer,
                attempt
            );
        }
    }
}
