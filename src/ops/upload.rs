//! Upload: copy a file from the initiator to the holder.
//!
//! The uploader pushes a burst from the holder's last reported cursor and
//! closes every burst with a Done frame. The holder answers that Done with
//! its cursor while frames are missing, and with the Done acknowledgment
//! once the file is complete and committed.

use super::{Context, Event, Holder, HolderExit, Outcome};
use crate::error::Result;
use crate::store::StagedFile;
use crate::transfer::channel::RetryPolicy;
use crate::transfer::protocol::{
    CursorReport, DataFrame, Frame, Operation, Phase, Status, UploadInit, MAX_FILE_LEN,
};
use crate::transfer::tracker::{FrameSource, Tracker};
use crate::transport::Transport;
use indicatif::ProgressBar;

const OP: Operation = Operation::Upload;

// =============================================================================
// Initiator
// =============================================================================

pub async fn initiate<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    name: &str,
    progress: &ProgressBar,
) -> Result<Outcome> {
    let Some(data) = ctx.store.read(name).await? else {
        return Ok(Outcome::LocalNotFound {
            name: name.to_string(),
        });
    };
    let source = FrameSource::new(data)?;
    let policy = ctx.config.retry_policy();

    let init = UploadInit {
        length: source.len() as u32,
        name: name.to_string(),
    }
    .encode()?
    .stamped(ctx.sequence);
    let reply = ctx
        .link
        .exchange(&[init], &policy, |f| f.is(OP, Phase::Init))
        .await?;
    if !Status::decode(&reply)?.ok {
        tracing::info!("{} refused {}", ctx.link.peer(), name);
        return Ok(Outcome::Rejected {
            name: name.to_string(),
        });
    }

    tracing::debug!(
        "Uploading {}: {} bytes in {} frames",
        name,
        source.len(),
        source.frame_count()
    );
    progress.set_length(source.frame_count() as u64);
    let done = push_frames(ctx, &source, &policy, progress).await?;

    let bytes = source.len();
    if Status::decode(&done)?.ok {
        tracing::info!("Uploaded {} ({} bytes)", name, bytes);
        Ok(Outcome::Uploaded {
            name: name.to_string(),
            bytes,
        })
    } else {
        Ok(Outcome::UploadFailed {
            name: name.to_string(),
        })
    }
}

/// Data phase. Returns the holder's Done acknowledgment.
async fn push_frames<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    source: &FrameSource,
    policy: &RetryPolicy,
    progress: &ProgressBar,
) -> Result<Frame> {
    let count = source.frame_count();
    let burst = ctx.config.transfer.upload_burst;
    let closing = Frame::signal(OP, Phase::Done)?;
    let mut cursor = 0usize;

    loop {
        let mut frames = Vec::with_capacity(burst + 1);
        for index in source.burst(cursor, burst) {
            let Some(body) = source.body(index) else {
                break;
            };
            frames.push(
                DataFrame {
                    operation: OP,
                    index: index as u16,
                    body,
                }
                .encode()?,
            );
        }
        frames.push(closing.clone());

        let reply = ctx
            .link
            .exchange(&frames, policy, |f| {
                f.is(OP, Phase::Done) || f.is(OP, Phase::Data)
            })
            .await?;
        if reply.phase() == Phase::Done {
            progress.set_position(count as u64);
            return Ok(reply);
        }

        let report = CursorReport::decode(&reply)?;
        cursor = report.cursor as usize;
        progress.set_position(cursor.min(count) as u64);
        if cursor >= count {
            // Holder has everything; only the Done exchange is left
            return ctx
                .link
                .exchange(&[closing], policy, |f| f.is(OP, Phase::Done))
                .await;
        }
        tracing::debug!("Holder reports cursor {}/{}", cursor, count);
    }
}

// =============================================================================
// Holder
// =============================================================================

pub async fn serve<T: Transport + ?Sized>(ctx: &Context<'_, T>, init: Frame) -> Result<HolderExit> {
    let request = UploadInit::decode(&init)?;
    tracing::info!(
        "{} uploading {} ({} bytes)",
        ctx.link.peer(),
        request.name,
        request.length
    );

    let Some((mut tracker, staged)) = open(ctx, &request).await else {
        ctx.link
            .send(&Status { ok: false }.encode(OP, Phase::Init)?)
            .await;
        return Ok(HolderExit::Ended);
    };
    let accept = Status { ok: true }.encode(OP, Phase::Init)?;
    ctx.link.send(&accept).await;

    let mut staged = Some(staged);
    let mut data_seen = false;
    let mut holder = Holder::new(ctx, &init);
    loop {
        match holder.next().await {
            Event::Frame(frame) => match frame.phase() {
                // Our accept was lost
                Phase::Init => ctx.link.send(&accept).await,
                Phase::Data => {
                    data_seen = true;
                    let Ok(data) = DataFrame::decode(&frame) else {
                        continue;
                    };
                    if let Err(e) = tracker.mark_received(data.index as usize, &data.body) {
                        tracing::trace!("Discarding data frame: {}", e);
                    }
                    if tracker.is_complete() {
                        report_cursor(ctx, &tracker).await?;
                    }
                }
                Phase::Done => {
                    data_seen = true;
                    if !tracker.is_complete() {
                        report_cursor(ctx, &tracker).await?;
                        continue;
                    }
                    let ok = commit(&request.name, staged.take(), tracker).await;
                    let ack = Status { ok }.encode(OP, Phase::Done)?;
                    ctx.link.send(&ack).await;
                    return Ok(HolderExit::Completed {
                        reply: accept,
                        done: ack,
                    });
                }
            },
            Event::Idle if data_seen && !tracker.is_complete() => {
                report_cursor(ctx, &tracker).await?;
            }
            Event::Idle => {}
            Event::Preempted(frame) => return Ok(HolderExit::Preempted(frame)),
            Event::Abandoned => return Ok(HolderExit::Abandoned),
        }
    }
}

/// Reassembly buffer and staging file, or `None` to reject the upload.
async fn open<T: Transport + ?Sized>(
    ctx: &Context<'_, T>,
    request: &UploadInit,
) -> Option<(Tracker, StagedFile)> {
    if request.length as u64 > MAX_FILE_LEN {
        tracing::warn!(
            "Rejecting {}: {} bytes is over the {} byte limit",
            request.name,
            request.length,
            MAX_FILE_LEN
        );
        return None;
    }
    let tracker = match Tracker::new(request.length as usize) {
        Ok(tracker) => tracker,
        Err(e) => {
            tracing::warn!("Rejecting {}: {}", request.name, e);
            return None;
        }
    };
    match ctx.store.stage(&request.name).await {
        Ok(staged) => Some((tracker, staged)),
        Err(e) => {
            tracing::warn!("Rejecting {}: cannot open for write: {}", request.name, e);
            None
        }
    }
}

async fn report_cursor<T: Transport + ?Sized>(ctx: &Context<'_, T>, tracker: &Tracker) -> Result<()> {
    let report = CursorReport {
        operation: OP,
        cursor: tracker.cursor() as u16,
    }
    .encode()?;
    ctx.link.send(&report).await;
    Ok(())
}

/// Write the reassembled file. Runs at most once per upload: the staged
/// file is consumed by the first call.
async fn commit(name: &str, staged: Option<StagedFile>, tracker: Tracker) -> bool {
    let Some(staged) = staged else {
        return false;
    };
    let len = tracker.file_len();
    match staged.commit(&tracker.into_contents()).await {
        Ok(()) => {
            tracing::info!("Received {} ({} bytes)", name, len);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to write {}: {}", name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;
    use crate::transfer::channel::Link;
    use crate::transport::MemoryTransport;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.network.timeout_ms = 10;
        config.retry.max_timeout_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_holder_rejects_unwritable_target() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().join("missing-dir"));
        let config = fast_config();
        let (server, client) = MemoryTransport::pair(
            "127.0.0.1:9100".parse().unwrap(),
            "127.0.0.1:9101".parse().unwrap(),
        );

        let ctx = Context::new(
            Link::new(&server, client.local_addr().unwrap()),
            &config,
            &store,
        );
        let init = UploadInit {
            length: 10,
            name: "x.bin".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(serve(&ctx, init).await.unwrap(), HolderExit::Ended);

        let reply = Link::new(&client, server.local_addr().unwrap())
            .recv(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(reply.is(OP, Phase::Init));
        assert!(!Status::decode(&reply).unwrap().ok);
    }

    #[tokio::test]
    async fn test_premature_done_gets_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let config = fast_config();
        let (server, client) = MemoryTransport::pair(
            "127.0.0.1:9110".parse().unwrap(),
            "127.0.0.1:9111".parse().unwrap(),
        );
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();
        let root = tmp.path().to_path_buf();

        let holder = tokio::spawn(async move {
            let ctx = Context::new(Link::new(&server, client_addr), &config, &store);
            let init = UploadInit {
                length: 2000,
                name: "two.bin".to_string(),
            }
            .encode()
            .unwrap();
            serve(&ctx, init).await.unwrap()
        });

        let link = Link::new(&client, server_addr);
        let window = Duration::from_millis(100);
        assert!(Status::decode(&link.recv(window).await.unwrap()).unwrap().ok);

        // Frame 1 only, then Done: the holder still wants frame 0
        let body = bytes::Bytes::from(vec![2u8; 978]);
        let second = DataFrame {
            operation: OP,
            index: 1,
            body,
        };
        link.send(&second.encode().unwrap()).await;
        link.send(&Frame::signal(OP, Phase::Done).unwrap()).await;
        let reply = link.recv(window).await.unwrap();
        assert_eq!(CursorReport::decode(&reply).unwrap().cursor, 0);
        assert!(!root.join("two.bin").exists());

        let first = DataFrame {
            operation: OP,
            index: 0,
            body: bytes::Bytes::from(vec![1u8; 1022]),
        };
        link.send(&first.encode().unwrap()).await;
        // Completion is announced on the frame that fills the last gap;
        // idle reports from before it may still be queued
        loop {
            let reply = link.recv(window).await.unwrap();
            if CursorReport::decode(&reply).unwrap().cursor == 2 {
                break;
            }
        }

        link.send(&Frame::signal(OP, Phase::Done).unwrap()).await;
        let reply = link.recv(window).await.unwrap();
        assert!(reply.is(OP, Phase::Done));
        assert!(Status::decode(&reply).unwrap().ok);
        assert!(matches!(holder.await.unwrap(), HolderExit::Completed { .. }));

        let written = std::fs::read(root.join("two.bin")).unwrap();
        assert_eq!(written.len(), 2000);
        assert!(written[..1022].iter().all(|&b| b == 1));
        assert!(written[1022..].iter().all(|&b| b == 2));
    }
}
