//! Shutdown: stop the holder.
//!
//! A single Init with a small retry budget. The holder answers with a burst
//! of identical acknowledgments since it will not be around to answer a
//! retransmission.

use super::{Context, HolderExit, Outcome};
use crate::error::{Result, TransferError};
use crate::transfer::protocol::{Frame, Operation, Phase};
use crate::transport::Transport;

const OP: Operation = Operation::Shutdown;

pub async fn initiate<T: Transport + ?Sized>(ctx: &Context<'_, T>) -> Result<Outcome> {
    let policy = ctx.config.shutdown_policy();
    let request = Frame::signal(OP, Phase::Init)?;

    match ctx
        .link
        .exchange(&[request], &policy, |f| f.is(OP, Phase::Init))
        .await
    {
        Ok(_) => Ok(Outcome::ShutdownConfirmed),
        Err(TransferError::RetriesExhausted(attempts)) => {
            tracing::warn!("No shutdown acknowledgment from {}", ctx.link.peer());
            Ok(Outcome::ShutdownTimedOut { attempts })
        }
        Err(e) => Err(e),
    }
}

pub async fn serve<T: Transport + ?Sized>(ctx: &Context<'_, T>, _init: Frame) -> Result<HolderExit> {
    tracing::info!("Shutdown requested by {}", ctx.link.peer());
    let ack = Frame::signal(OP, Phase::Init)?;
    for _ in 0..ctx.config.shutdown.ack_copies {
        ctx.link.send(&ack).await;
    }
    Ok(HolderExit::Shutdown)
}
