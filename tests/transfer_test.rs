#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use udpft::transfer::protocol::{
        DataFrame, Frame, Operation, Phase, Status, UploadInit, FRAME_BODY_SIZE,
    };
    use udpft::transfer::Link;
    use udpft::transport::{DropFilter, Fault, FaultModel, MemoryTransport, Transport};
    use udpft::{Client, Command, Config, Outcome, Server, Store};

    const CLIENT_ADDR: &str = "10.0.0.1:40000";
    const SERVER_ADDR: &str = "10.0.0.2:6969";

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.network.timeout_ms = 50;
        config.retry.max_timeout_ms = 50;
        config.transfer.fetch_burst = 8;
        config.transfer.upload_burst = 8;
        config.transfer.progress = false;
        config
    }

    /// 20 % uniform loss, reproducible per seed.
    fn lossy(seed: u64) -> DropFilter {
        let mut rng = StdRng::seed_from_u64(seed);
        Box::new(move |_| rng.gen_bool(0.2))
    }

    /// 10 % late duplicates and 10 % reordering, reproducible per seed.
    fn disorderly(seed: u64) -> FaultModel {
        let mut rng = StdRng::seed_from_u64(seed);
        Box::new(move |_| match rng.gen_range(0..10) {
            0 => Fault::Duplicate,
            1 => Fault::Delay,
            _ => Fault::Deliver,
        })
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    struct Session {
        client: Client<MemoryTransport>,
        server: JoinHandle<udpft::Result<()>>,
        local: TempDir,
        remote: TempDir,
    }

    enum Network {
        Clean,
        Lossy(u64),
        Disorderly(u64),
    }

    fn start(network: Network) -> anyhow::Result<Session> {
        let local = TempDir::new()?;
        let remote = TempDir::new()?;
        let client_addr: SocketAddr = CLIENT_ADDR.parse()?;
        let server_addr: SocketAddr = SERVER_ADDR.parse()?;

        let (mut client_end, mut server_end) = MemoryTransport::pair(client_addr, server_addr);
        match network {
            Network::Clean => {}
            Network::Lossy(seed) => {
                client_end = client_end.with_drop_filter(lossy(seed));
                server_end = server_end.with_drop_filter(lossy(seed.wrapping_add(1)));
            }
            Network::Disorderly(seed) => {
                client_end = client_end.with_fault_model(disorderly(seed));
                server_end = server_end.with_fault_model(disorderly(seed.wrapping_add(1)));
            }
        }

        let server = Server::new(server_end, Store::new(remote.path()), fast_config());
        let server = tokio::spawn(server.run());
        let client = Client::new(
            client_end,
            server_addr,
            Store::new(local.path()),
            fast_config(),
        );
        Ok(Session {
            client,
            server,
            local,
            remote,
        })
    }

    async fn within<F: std::future::Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(30), f)
            .await
            .expect("operation did not finish")
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    #[tokio::test]
    async fn test_fetch_roundtrip() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        let data = pattern(FRAME_BODY_SIZE * 20 + 17);
        fs::write(session.remote.path().join("data.bin"), &data)?;

        let outcome = within(session.client.execute(&Command::Get("data.bin".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::Fetched {
                name: "data.bin".into(),
                bytes: data.len()
            }
        );
        assert_eq!(fs::read(session.local.path().join("data.bin"))?, data);

        within(session.client.execute(&Command::Exit)).await?;
        within(session.server).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_missing_reports_not_found() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;

        let outcome = within(session.client.execute(&Command::Get("nope.txt".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::NotFound {
                name: "nope.txt".into()
            }
        );
        assert!(!outcome.is_success());
        assert_eq!(fs::read_dir(session.local.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_empty_file_reports_not_found() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        fs::write(session.remote.path().join("empty.txt"), b"")?;

        let outcome = within(session.client.execute(&Command::Get("empty.txt".into()))).await?;
        assert!(matches!(outcome, Outcome::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_fifty_frames_under_loss() -> anyhow::Result<()> {
        let session = start(Network::Lossy(0x5eed))?;
        let data = pattern(FRAME_BODY_SIZE * 50);
        fs::write(session.remote.path().join("lossy.bin"), &data)?;

        let outcome = within(session.client.execute(&Command::Get("lossy.bin".into()))).await?;
        assert!(matches!(outcome, Outcome::Fetched { bytes, .. } if bytes == data.len()));
        assert_eq!(fs::read(session.local.path().join("lossy.bin"))?, data);

        session.server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_under_reordering_and_duplication() -> anyhow::Result<()> {
        let session = start(Network::Disorderly(7))?;
        let data = pattern(FRAME_BODY_SIZE * 40 + 99);
        fs::write(session.remote.path().join("shuffled.bin"), &data)?;

        let outcome = within(session.client.execute(&Command::Get("shuffled.bin".into()))).await?;
        assert!(matches!(outcome, Outcome::Fetched { bytes, .. } if bytes == data.len()));
        assert_eq!(fs::read(session.local.path().join("shuffled.bin"))?, data);

        // A later command still resolves on its own
        let outcome = within(session.client.execute(&Command::List)).await?;
        assert_eq!(
            outcome,
            Outcome::Listed {
                entries: vec!["shuffled.bin".into()]
            }
        );

        session.server.abort();
        Ok(())
    }

    // =========================================================================
    // Upload
    // =========================================================================

    #[tokio::test]
    async fn test_upload_roundtrip() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        let data = pattern(FRAME_BODY_SIZE * 30 + 1);
        fs::write(session.local.path().join("up.bin"), &data)?;

        let outcome = within(session.client.execute(&Command::Put("up.bin".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::Uploaded {
                name: "up.bin".into(),
                bytes: data.len()
            }
        );
        assert_eq!(fs::read(session.remote.path().join("up.bin"))?, data);

        // No staging leftovers next to the target
        let names: Vec<_> = fs::read_dir(session.remote.path())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<_, _>>()?;
        assert_eq!(names.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_under_loss() -> anyhow::Result<()> {
        let session = start(Network::Lossy(42))?;
        let data = pattern(FRAME_BODY_SIZE * 25 + 300);
        fs::write(session.local.path().join("lossy-up.bin"), &data)?;

        let outcome = within(session.client.execute(&Command::Put("lossy-up.bin".into()))).await?;
        assert!(outcome.is_success(), "{:?}", outcome);
        assert_eq!(fs::read(session.remote.path().join("lossy-up.bin"))?, data);

        session.server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_under_reordering_and_duplication() -> anyhow::Result<()> {
        let session = start(Network::Disorderly(11))?;
        let data = pattern(FRAME_BODY_SIZE * 30 + 5);
        fs::write(session.local.path().join("shuffled-up.bin"), &data)?;

        let outcome =
            within(session.client.execute(&Command::Put("shuffled-up.bin".into()))).await?;
        assert!(outcome.is_success(), "{:?}", outcome);
        assert_eq!(fs::read(session.remote.path().join("shuffled-up.bin"))?, data);

        session.server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_empty_file() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        fs::write(session.local.path().join("empty.txt"), b"")?;

        let outcome = within(session.client.execute(&Command::Put("empty.txt".into()))).await?;
        assert!(matches!(outcome, Outcome::Uploaded { bytes: 0, .. }));
        assert_eq!(fs::read(session.remote.path().join("empty.txt"))?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_missing_local_file() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;

        let outcome = within(session.client.execute(&Command::Put("ghost.txt".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::LocalNotFound {
                name: "ghost.txt".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_commits_once_on_repeated_done() -> anyhow::Result<()> {
        let remote = TempDir::new()?;
        let (client_end, server_end) =
            MemoryTransport::pair(CLIENT_ADDR.parse()?, SERVER_ADDR.parse()?);
        let server_addr = server_end.local_addr()?;
        let server = Server::new(server_end, Store::new(remote.path()), fast_config());
        let server = tokio::spawn(server.run());

        let link = Link::new(&client_end, server_addr);
        let window = Duration::from_millis(500);
        let init = UploadInit {
            length: 5,
            name: "once.txt".into(),
        };
        link.send(&init.encode()?).await;
        let accept = link.recv(window).await.expect("accept");
        assert!(Status::decode(&accept)?.ok);

        let data = DataFrame {
            operation: Operation::Upload,
            index: 0,
            body: bytes::Bytes::from_static(b"hello"),
        };
        link.send(&data.encode()?).await;
        let report = link.recv(window).await.expect("cursor report");
        assert!(report.is(Operation::Upload, Phase::Data));

        let done = Frame::signal(Operation::Upload, Phase::Done)?;
        link.send(&done).await;
        let first = link.recv(window).await.expect("done ack");
        assert!(Status::decode(&first)?.ok);
        assert_eq!(fs::read(remote.path().join("once.txt"))?, b"hello");

        // A second commit would overwrite this
        fs::write(remote.path().join("once.txt"), b"changed")?;
        link.send(&done).await;
        link.send(&done).await;
        assert_eq!(link.recv(window).await.expect("replay"), first);
        assert_eq!(link.recv(window).await.expect("replay"), first);
        assert_eq!(fs::read(remote.path().join("once.txt"))?, b"changed");

        server.abort();
        Ok(())
    }

    // =========================================================================
    // Delete / List / Shutdown
    // =========================================================================

    #[tokio::test]
    async fn test_delete() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        fs::write(session.remote.path().join("old.log"), b"bye")?;

        let outcome = within(session.client.execute(&Command::Delete("old.log".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::Deleted {
                name: "old.log".into()
            }
        );
        assert!(!session.remote.path().join("old.log").exists());

        let outcome = within(session.client.execute(&Command::Delete("old.log".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::DeleteFailed {
                name: "old.log".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_with_init_duplicated_after_done() -> anyhow::Result<()> {
        let local = TempDir::new()?;
        let remote = TempDir::new()?;
        fs::write(remote.path().join("once.log"), b"bye")?;
        let (client_end, server_end) =
            MemoryTransport::pair(CLIENT_ADDR.parse()?, SERVER_ADDR.parse()?);
        let server_addr = server_end.local_addr()?;

        // The Init copy trails the Done, and the first Done answer is lost,
        // so the retransmitted Done reaches the server after the copy
        let mut init_copied = false;
        let client_end = client_end.with_fault_model(Box::new(move |buf: &[u8]| {
            match Frame::decode(buf) {
                Ok(f) if f.is(Operation::Delete, Phase::Init) && !init_copied => {
                    init_copied = true;
                    Fault::Duplicate
                }
                _ => Fault::Deliver,
            }
        }));
        let mut done_dropped = false;
        let server_end = server_end.with_fault_model(Box::new(move |buf: &[u8]| {
            match Frame::decode(buf) {
                Ok(f) if f.is(Operation::Delete, Phase::Done) && !done_dropped => {
                    done_dropped = true;
                    Fault::Drop
                }
                _ => Fault::Deliver,
            }
        }));

        let server = Server::new(server_end, Store::new(remote.path()), fast_config());
        let server = tokio::spawn(server.run());
        let client = Client::new(client_end, server_addr, Store::new(local.path()), fast_config());

        let outcome = within(client.execute(&Command::Delete("once.log".into()))).await?;
        assert_eq!(
            outcome,
            Outcome::Deleted {
                name: "once.log".into()
            }
        );
        assert!(!remote.path().join("once.log").exists());

        within(client.execute(&Command::Exit)).await?;
        within(server).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_list_sorted_and_fresh() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        fs::write(session.remote.path().join("b.txt"), b"b")?;
        fs::write(session.remote.path().join("a.txt"), b"a")?;

        let outcome = within(session.client.execute(&Command::List)).await?;
        assert_eq!(
            outcome,
            Outcome::Listed {
                entries: vec!["a.txt".into(), "b.txt".into()]
            }
        );

        fs::write(session.remote.path().join("c.txt"), b"c")?;
        let outcome = within(session.client.execute(&Command::List)).await?;
        assert!(matches!(outcome, Outcome::Listed { ref entries } if entries.len() == 3));
        Ok(())
    }

    #[tokio::test]
    async fn test_commands_in_sequence() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;
        fs::write(session.local.path().join("note.txt"), b"remember")?;

        let ok = within(session.client.run_commands(["put note.txt", "ls", "del note.txt", "exit"]))
            .await;
        assert!(ok);
        assert!(!session.remote.path().join("note.txt").exists());
        within(session.server).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_confirmed() -> anyhow::Result<()> {
        let session = start(Network::Clean)?;

        let outcome = within(session.client.execute(&Command::Exit)).await?;
        assert_eq!(outcome, Outcome::ShutdownConfirmed);
        within(session.server).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_unreachable_gives_up_after_five() -> anyhow::Result<()> {
        let (client_end, server_end) =
            MemoryTransport::pair(CLIENT_ADDR.parse()?, SERVER_ADDR.parse()?);
        let server_addr = server_end.local_addr()?;
        drop(server_end);

        let sent = client_end.sent_counter();
        let local = TempDir::new()?;
        let client = Client::new(client_end, server_addr, Store::new(local.path()), fast_config());

        let outcome = within(client.execute(&Command::Exit)).await?;
        assert_eq!(outcome, Outcome::ShutdownTimedOut { attempts: 5 });
        assert_eq!(sent.load(std::sync::atomic::Ordering::SeqCst), 5);
        Ok(())
    }
}
