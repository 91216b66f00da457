//! Socket-level integration tests: a real server on an ephemeral port,
//! raw TCP clients speaking the wire protocol.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use grid_arena::{
    config::ArenaConfig,
    protocol::{ClientCommand, ServerEvent, read_event, write_command},
    server::ArenaServer,
};
use tokio::{
    io::BufReader,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(3);

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start_server(dir: &Path, min_players: usize, max_players: usize) -> Result<TestServer> {
    let config = ArenaConfig {
        min_players,
        max_players,
        score_path: dir.join("scores.txt"),
        audit_path: dir.join("arena.log"),
        reset_delay: Duration::from_millis(100),
        fallback_interval: Duration::from_millis(20),
        ..ArenaConfig::default()
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = ArenaServer::new(listener, config).await?;
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok(TestServer {
        addr,
        shutdown: shutdown_tx,
        task,
    })
}

struct Player {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Player {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Connects and walks the whole handshake: join, claim a symbol, and
    /// read the seated confirmation.
    async fn join(addr: SocketAddr, name: &str, symbol: char) -> Result<Self> {
        let mut player = Self::connect(addr).await?;
        player
            .send(ClientCommand::Join {
                name: name.to_string(),
            })
            .await?;
        player.send(ClientCommand::Symbol { symbol }).await?;
        let granted = player
            .wait_for(|e| matches!(e, ServerEvent::Symbol { .. }))
            .await?;
        assert_eq!(granted, ServerEvent::Symbol { symbol });
        Ok(player)
    }

    async fn send(&mut self, command: ClientCommand) -> Result<()> {
        write_command(&mut self.writer, &command).await?;
        Ok(())
    }

    async fn place(&mut self, row: usize, col: usize) -> Result<()> {
        self.send(ClientCommand::Move { row, col }).await
    }

    /// Reads events until one matches, discarding the rest. Board and
    /// informational broadcasts arrive interleaved with what a test is
    /// really waiting on.
    async fn wait_for<F>(&mut self, accept: F) -> Result<ServerEvent>
    where
        F: Fn(&ServerEvent) -> bool,
    {
        loop {
            let event = timeout(WAIT, read_event(&mut self.reader))
                .await
                .expect("event deadline")?
                .expect("server closed the connection early");
            if accept(&event) {
                return Ok(event);
            }
        }
    }

    async fn wait_for_turn(&mut self) -> Result<()> {
        self.wait_for(|e| matches!(e, ServerEvent::YourTurn)).await?;
        Ok(())
    }

    async fn expect_invalid(&mut self, needle: &str) -> Result<()> {
        let event = self
            .wait_for(|e| matches!(e, ServerEvent::Invalid { .. }))
            .await?;
        match event {
            ServerEvent::Invalid { reason } => {
                assert!(
                    reason.contains(needle),
                    "expected INVALID containing {needle:?}, got {reason:?}"
                );
            }
            other => panic!("expected INVALID, got {other:?}"),
        }
        Ok(())
    }
}

async fn stop(server: TestServer) {
    let _ = server.shutdown.send(());
    let _ = timeout(WAIT, server.task).await.expect("server exit deadline");
}

#[tokio::test]
async fn three_players_play_a_round_through_reset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let server = start_server(dir.path(), 3, 5).await?;

    let mut alice = Player::join(server.addr, "alice", 'X').await?;
    let mut bob = Player::join(server.addr, "bob", 'Y').await?;
    let mut carol = Player::join(server.addr, "carol", 'Z').await?;

    // Turn order is join order: the round opens on alice.
    alice.wait_for_turn().await?;
    alice.place(1, 1).await?;

    // Moving onto an occupied cell is rejected and the turn stays with bob.
    bob.wait_for_turn().await?;
    bob.place(1, 1).await?;
    bob.expect_invalid("cell already taken").await?;
    bob.place(0, 0).await?;

    carol.wait_for_turn().await?;
    // Out-of-turn moves are rejected and mutate nothing: alice can still
    // take the same cell once the rotation reaches her.
    alice.place(1, 0).await?;
    alice.expect_invalid("not your turn").await?;
    carol.place(2, 2).await?;

    alice.wait_for_turn().await?;
    alice.place(1, 0).await?;
    bob.wait_for_turn().await?;
    bob.place(0, 1).await?;
    carol.wait_for_turn().await?;
    carol.place(2, 0).await?;

    // Alice completes the middle row: (1,0) (1,1) (1,2).
    alice.wait_for_turn().await?;
    alice.place(1, 2).await?;

    let verdict = alice
        .wait_for(|e| matches!(e, ServerEvent::Win { .. }))
        .await?;
    assert_eq!(
        verdict,
        ServerEvent::Win {
            name: "alice".into()
        }
    );
    bob.wait_for(|e| matches!(e, ServerEvent::Lose)).await?;
    carol.wait_for(|e| matches!(e, ServerEvent::Lose)).await?;

    // After the reset delay everyone sees an empty board again and alice,
    // still the first eligible slot, opens the next round.
    carol
        .wait_for(
            |e| matches!(e, ServerEvent::Board { cells } if cells.chars().all(|c| c == '.')),
        )
        .await?;
    alice.wait_for_turn().await?;

    stop(server).await;
    Ok(())
}

#[tokio::test]
async fn winning_rewrites_scores_and_resets_the_board() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let server = start_server(dir.path(), 2, 5).await?;

    let mut alice = Player::join(server.addr, "alice", 'X').await?;
    let mut bob = Player::join(server.addr, "bob", 'Y').await?;

    // Alice takes the top row while bob fills the middle one.
    alice.wait_for_turn().await?;
    alice.place(0, 0).await?;
    bob.wait_for_turn().await?;
    bob.place(1, 0).await?;
    alice.wait_for_turn().await?;
    alice.place(0, 1).await?;
    bob.wait_for_turn().await?;
    bob.place(1, 1).await?;
    alice.wait_for_turn().await?;
    alice.place(0, 2).await?;

    let verdict = alice
        .wait_for(|e| matches!(e, ServerEvent::Win { .. }))
        .await?;
    assert_eq!(
        verdict,
        ServerEvent::Win {
            name: "alice".into()
        }
    );
    bob.wait_for(|e| matches!(e, ServerEvent::Lose)).await?;

    // Moves are refused until the reset lands.
    bob.place(2, 2).await?;
    bob.expect_invalid("round already ended").await?;

    // After the reset delay the board comes back empty and a fresh round
    // starts with both players still seated.
    bob.wait_for(
        |e| matches!(e, ServerEvent::Board { cells } if cells.chars().all(|c| c == '.')),
    )
    .await?;
    alice.wait_for_turn().await?;

    let scores = std::fs::read_to_string(dir.path().join("scores.txt"))?;
    assert_eq!(scores, "alice 1\n");

    stop(server).await;
    Ok(())
}

#[tokio::test]
async fn full_table_turns_connections_away() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let server = start_server(dir.path(), 2, 2).await?;

    let _alice = Player::join(server.addr, "alice", 'X').await?;
    let _bob = Player::join(server.addr, "bob", 'Y').await?;

    let mut late = Player::connect(server.addr).await?;
    let notice = late
        .wait_for(|e| matches!(e, ServerEvent::Message { .. }))
        .await?;
    match notice {
        ServerEvent::Message { text } => assert!(text.contains("full")),
        other => panic!("expected a full-table notice, got {other:?}"),
    }

    stop(server).await;
    Ok(())
}

#[tokio::test]
async fn disconnects_drop_out_of_rotation_without_stalling() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let server = start_server(dir.path(), 3, 5).await?;

    let mut alice = Player::join(server.addr, "alice", 'X').await?;
    let bob = Player::join(server.addr, "bob", 'Y').await?;
    let mut carol = Player::join(server.addr, "carol", 'Z').await?;

    alice.wait_for_turn().await?;
    // Bob hangs up before ever moving; alice's move must rotate straight
    // past his retired slot to carol.
    drop(bob);
    alice.place(0, 0).await?;
    carol.wait_for_turn().await?;
    carol.place(1, 1).await?;
    alice.wait_for_turn().await?;

    // The audit trail recorded game events and the consumer flushed them.
    let audit = std::fs::read_to_string(dir.path().join("arena.log"))?;
    assert!(audit.contains("connected"));

    stop(server).await;
    Ok(())
}
