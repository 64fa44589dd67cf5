//! Fetch: copy a file from the holder to the initiator.
//!
//! The initiator pulls. It asks for the burst starting at its cursor and
//! asks again whenever a receive window passes without data, so a lost
//! frame costs one window plus one targeted burst.

use super::{Context, Event, Holder, HolderExit, Outcome};
use crate::error::{Result, TransferError};
use crate::store::Store;
use crate::transfer::channel::RetryPolicy;
use crate::transfer::protocol::{
    CursorReport, DataFrame, Frame, LengthReply, NameRequest, Operation, Phase,
};
use crate::transfer::tracker::{FrameSource, Tracker};
use crate::transport::Transport;
use indicatif::ProgressBar;

const OP: Operation = Operation::Fetch;

// =============================================================================
// Initiator
// =============================================================================

pub async fn initiate<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    name: &str,
    progress: &ProgressBar,
) -> Result<Outcome> {
    let policy = ctx.config.retry_policy();

    let request = NameRequest::new(name)
        .encode(OP)?
        .stamped(ctx.sequence);
    let reply = ctx
        .link
        .exchange(&[request], &policy, |f| f.is(OP, Phase::Init))
        .await?;
    let length = LengthReply::decode(&reply)?;
    if length.is_not_found() {
        tracing::info!("{} not available on {}", name, ctx.link.peer());
        return Ok(Outcome::NotFound {
            name: name.to_string(),
        });
    }

    let mut tracker = Tracker::new(length.length as usize)?;
    tracing::debug!(
        "Fetching {}: {} bytes in {} frames",
        name,
        tracker.file_len(),
        tracker.frame_count()
    );
    progress.set_length(tracker.frame_count() as u64);
    receive_frames(ctx, &mut tracker, &policy, progress).await?;

    let done = Frame::signal(OP, Phase::Done)?;
    ctx.link
        .exchange(&[done], &policy, |f| f.is(OP, Phase::Done))
        .await?;

    let bytes = tracker.file_len();
    let staged = ctx.store.stage(name).await?;
    staged.commit(&tracker.into_contents()).await?;
    tracing::info!("Fetched {} ({} bytes)", name, bytes);

    Ok(Outcome::Fetched {
        name: name.to_string(),
        bytes,
    })
}

/// Data phase: request from the cursor until every frame is in.
async fn receive_frames<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    tracker: &mut Tracker,
    policy: &RetryPolicy,
    progress: &ProgressBar,
) -> Result<()> {
    let mut failures = 0u32;
    request_from(ctx, tracker.cursor()).await?;

    while !tracker.is_complete() {
        let Some(frame) = ctx.link.recv(policy.window(failures)).await else {
            failures += 1;
            if !policy.allows(failures + 1) {
                return Err(TransferError::RetriesExhausted(failures));
            }
            request_from(ctx, tracker.cursor()).await?;
            continue;
        };

        if !frame.is(OP, Phase::Data) {
            tracing::trace!(
                "Discarding {} {:?} during fetch",
                frame.operation().name(),
                frame.phase()
            );
            continue;
        }
        let data = match DataFrame::decode(&frame) {
            Ok(data) => data,
            Err(e) => {
                tracing::trace!("Discarding data frame: {}", e);
                continue;
            }
        };
        failures = 0;
        match tracker.mark_received(data.index as usize, &data.body) {
            Ok(true) => progress.inc(1),
            Ok(false) => {}
            Err(e) => tracing::trace!("Discarding data frame: {}", e),
        }
    }
    Ok(())
}

async fn request_from<T: Transport + ?Sized>(ctx: &Context<'_, T>, cursor: usize) -> Result<()> {
    tracing::debug!("Requesting frames from {}", cursor);
    let request = CursorReport {
        operation: OP,
        cursor: cursor as u16,
    }
    .encode()?;
    ctx.link.send(&request).await;
    Ok(())
}

// =============================================================================
// Holder
// =============================================================================

pub async fn serve<T: Transport + ?Sized>(ctx: &Context<'_, T>, init: Frame) -> Result<HolderExit> {
    let request = NameRequest::decode(&init)?;
    tracing::info!("{} fetching {}", ctx.link.peer(), request.name);

    let Some(source) = load(ctx.store, &request.name).await else {
        ctx.link.send(&LengthReply::NOT_FOUND.encode()?).await;
        return Ok(HolderExit::Ended);
    };
    let length_reply = LengthReply {
        length: source.len() as u32,
    }
    .encode()?;
    ctx.link.send(&length_reply).await;

    let burst = ctx.config.transfer.fetch_burst;
    let mut holder = Holder::new(ctx, &init);
    loop {
        match holder.next().await {
            Event::Frame(frame) => match frame.phase() {
                // Our length reply was lost
                Phase::Init => ctx.link.send(&length_reply).await,
                Phase::Data => {
                    let Ok(report) = CursorReport::decode(&frame) else {
                        continue;
                    };
                    send_burst(ctx, &source, report.cursor as usize, burst).await?;
                }
                Phase::Done => {
                    let ack = Frame::signal(OP, Phase::Done)?;
                    ctx.link.send(&ack).await;
                    tracing::info!("Sent {} to {}", request.name, ctx.link.peer());
                    return Ok(HolderExit::Completed {
                        reply: length_reply,
                        done: ack,
                    });
                }
            },
            Event::Idle => {}
            Event::Preempted(frame) => return Ok(HolderExit::Preempted(frame)),
            Event::Abandoned => return Ok(HolderExit::Abandoned),
        }
    }
}

/// File contents to serve, or `None` when the answer must be "not found".
async fn load(store: &Store, name: &str) -> Option<FrameSource> {
    let data = match store.read(name).await {
        Ok(Some(data)) => data,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", name, e);
            return None;
        }
    };
    match FrameSource::new(data) {
        Ok(source) if !source.is_empty() => Some(source),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Refusing to serve {}: {}", name, e);
            None
        }
    }
}

async fn send_burst<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    source: &FrameSource,
    start: usize,
    size: usize,
) -> Result<()> {
    let range = source.burst(start, size);
    tracing::trace!("Sending frames {:?} to {}", range, ctx.link.peer());
    for index in range {
        let Some(body) = source.body(index) else {
            break;
        };
        let frame = DataFrame {
            operation: OP,
            index: index as u16,
            body,
        }
        .encode()?;
        ctx.link.send(&frame).await;
    }
    Ok(())
}
