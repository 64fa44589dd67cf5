//! Delete: remove a file on the holder.
//!
//! The holder acknowledges Init before removing, then reports whether the
//! removal worked in its Done answer.

use super::{Context, Event, Holder, HolderExit, Outcome};
use crate::error::Result;
use crate::transfer::protocol::{Frame, NameRequest, Operation, Phase, Status};
use crate::transport::Transport;

const OP: Operation = Operation::Delete;

pub async fn initiate<T: Transport + ?Sized>(ctx: &Context<'_, T>, name: &str) -> Result<Outcome> {
    let policy = ctx.config.retry_policy();

    let request = NameRequest::new(name)
        .encode(OP)?
        .stamped(ctx.sequence);
    ctx.link
        .exchange(&[request], &policy, |f| f.is(OP, Phase::Init))
        .await?;

    let done = Frame::signal(OP, Phase::Done)?;
    let reply = ctx
        .link
        .exchange(&[done], &policy, |f| f.is(OP, Phase::Done))
        .await?;

    let name = name.to_string();
    if Status::decode(&reply)?.ok {
        tracing::info!("Deleted {}", name);
        Ok(Outcome::Deleted { name })
    } else {
        Ok(Outcome::DeleteFailed { name })
    }
}

pub async fn serve<T: Transport + ?Sized>(ctx: &Context<'_, T>, init: Frame) -> Result<HolderExit> {
    let request = NameRequest::decode(&init)?;
    let ack = Frame::signal(OP, Phase::Init)?;
    ctx.link.send(&ack).await;

    let removed = ctx.store.remove(&request.name).await;
    tracing::info!(
        "{} deleting {}: {}",
        ctx.link.peer(),
        request.name,
        if removed { "removed" } else { "failed" }
    );

    let mut holder = Holder::new(ctx, &init);
    loop {
        match holder.next().await {
            Event::Frame(frame) => match frame.phase() {
                Phase::Done => {
                    let done = Status { ok: removed }.encode(OP, Phase::Done)?;
                    ctx.link.send(&done).await;
                    return Ok(HolderExit::Completed { reply: ack, done });
                }
                // Re-acknowledge; the file is not removed twice
                _ => ctx.link.send(&ack).await,
            },
            Event::Idle => {}
            Event::Preempted(frame) => return Ok(HolderExit::Preempted(frame)),
            Event::Abandoned => return Ok(HolderExit::Abandoned),
        }
    }
}
