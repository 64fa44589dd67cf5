//! List: fetch the holder's directory listing in a single frame.

use super::{Context, Event, Holder, HolderExit, Outcome};
use crate::error::Result;
use crate::transfer::protocol::{Frame, Listing, Operation, Phase};
use crate::transport::Transport;

const OP: Operation = Operation::List;

pub async fn initiate<T: Transport + ?Sized>(ctx: &Context<'_, T>) -> Result<Outcome> {
    let policy = ctx.config.retry_policy();

    let init = Frame::signal(OP, Phase::Init)?.stamped(ctx.sequence);
    ctx.link
        .exchange(&[init], &policy, |f| f.is(OP, Phase::Init))
        .await?;

    let request = Frame::signal(OP, Phase::Data)?;
    let reply = ctx
        .link
        .exchange(&[request], &policy, |f| f.is(OP, Phase::Data))
        .await?;
    let listing = Listing::decode(&reply)?;

    let done = Frame::signal(OP, Phase::Done)?;
    ctx.link
        .exchange(&[done], &policy, |f| f.is(OP, Phase::Done))
        .await?;

    Ok(Outcome::Listed {
        entries: listing.entries(),
    })
}

pub async fn serve<T: Transport + ?Sized>(ctx: &Context<'_, T>, init: Frame) -> Result<HolderExit> {
    let ack = Frame::signal(OP, Phase::Init)?;
    ctx.link.send(&ack).await;

    let mut holder = Holder::new(ctx, &init);
    loop {
        match holder.next().await {
            Event::Frame(frame) => match frame.phase() {
                Phase::Init => ctx.link.send(&ack).await,
                Phase::Data => {
                    // Enumerated fresh for every request
                    let entries = match ctx.store.list().await {
                        Ok(entries) => entries,
                        Err(e) => {
                            tracing::warn!(
                                "Cannot list {}: {}",
                                ctx.store.root().display(),
                                e
                            );
                            Vec::new()
                        }
                    };
                    tracing::debug!("Listing {} entries for {}", entries.len(), ctx.link.peer());
                    ctx.link
                        .send(&Listing::from_entries(entries).encode()?)
                        .await;
                }
                Phase::Done => {
                    let done = Frame::signal(OP, Phase::Done)?;
                    ctx.link.send(&done).await;
                    return Ok(HolderExit::Completed { reply: ack, done });
                }
            },
            Event::Idle => {}
            Event::Preempted(frame) => return Ok(HolderExit::Preempted(frame)),
            Event::Abandoned => return Ok(HolderExit::Abandoned),
        }
    }
}
