//! Per-connection player handler.
//!
//! Each accepted connection gets one task running the join → symbol → move
//! session, plus a small writer task that drains the slot's outbox to the
//! socket. The handler owns its slot for the connection's whole life and
//! releases it exactly once on the way out; everything the client is told
//! goes through the outbox so delivery order is a single queue.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::protocol::{self, ClientCommand, ServerEvent};
use crate::scores::{self, ScoreTable};
use crate::state::{Arena, MoveOutcome, SlotHandle, SymbolError};

pub async fn handle_connection(stream: TcpStream, arena: Arc<Arena>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (outbox, events) = mpsc::unbounded_channel();
    let handle = match arena.register_slot(outbox.clone()) {
        Some(handle) => handle,
        None => return refuse_full(writer, peer).await,
    };
    let writer_task = tokio::spawn(pump_events(events, writer));

    info!(?peer, conn_id = handle.conn_id, slot = handle.index, "player connected");
    let result = run_session(&arena, &mut reader, &outbox, handle).await;

    arena.release_slot(handle.index);
    drop(outbox);
    // The writer drains whatever is still queued, then ends with the channel.
    let _ = writer_task.await;

    info!(?peer, conn_id = handle.conn_id, "player disconnected");
    result
}

async fn refuse_full<W>(mut writer: W, peer: Option<SocketAddr>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    info!(?peer, "turning away connection, no free slot");
    protocol::write_event(
        &mut writer,
        &ServerEvent::Message {
            text: "server is full, try again later".to_string(),
        },
    )
    .await?;
    Ok(())
}

async fn pump_events<W>(mut events: UnboundedReceiver<ServerEvent>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        if let Err(err) = protocol::write_event(&mut writer, &event).await {
            debug!(error = ?err, "failed to deliver event, stopping writer");
            break;
        }
    }
}

/// The session state machine. Returns when the peer quits, hangs up, or the
/// read half fails; the caller handles slot cleanup.
async fn run_session<R>(
    arena: &Arena,
    reader: &mut R,
    outbox: &UnboundedSender<ServerEvent>,
    handle: SlotHandle,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    send(
        outbox,
        ServerEvent::Message {
            text: "welcome to grid arena, join with JOIN <name>".to_string(),
        },
    );

    if register_name(arena, reader, outbox, handle).await?.is_none() {
        return Ok(());
    }
    if choose_symbol(arena, reader, outbox, handle).await?.is_none() {
        return Ok(());
    }
    play_rounds(arena, reader, outbox, handle).await
}

async fn register_name<R>(
    arena: &Arena,
    reader: &mut R,
    outbox: &UnboundedSender<ServerEvent>,
    handle: SlotHandle,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match protocol::read_line(reader).await? {
            Some(line) => line,
            None => return Ok(None),
        };

        match ClientCommand::parse(&line) {
            Ok(ClientCommand::Join { name }) => match arena.set_name(handle.index, &name) {
                Ok(()) => {
                    send(
                        outbox,
                        ServerEvent::Message {
                            text: format!(
                                "hello {name}, choose a symbol with SYMBOL <c>, available: {}",
                                symbol_list(arena)
                            ),
                        },
                    );
                    return Ok(Some(name));
                }
                Err(err) => send_invalid(outbox, err.to_string()),
            },
            Ok(ClientCommand::Quit) => return Ok(None),
            Ok(_) => send_invalid(outbox, "join first with JOIN <name>".to_string()),
            Err(err) => send_invalid(outbox, err.to_string()),
        }
    }
}

async fn choose_symbol<R>(
    arena: &Arena,
    reader: &mut R,
    outbox: &UnboundedSender<ServerEvent>,
    handle: SlotHandle,
) -> Result<Option<char>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match protocol::read_line(reader).await? {
            Some(line) => line,
            None => return Ok(None),
        };

        match ClientCommand::parse(&line) {
            Ok(ClientCommand::Symbol { symbol }) => {
                match arena.claim_symbol(handle.index, symbol) {
                    Ok(granted) => {
                        send(outbox, ServerEvent::Symbol { symbol: granted });
                        send(
                            outbox,
                            ServerEvent::Message {
                                text: "you are seated, the round starts when enough players are in"
                                    .to_string(),
                            },
                        );
                        return Ok(Some(granted));
                    }
                    Err(err @ (SymbolError::NotOffered | SymbolError::Taken)) => send_invalid(
                        outbox,
                        format!("{err}, available: {}", symbol_list(arena)),
                    ),
                    Err(err) => send_invalid(outbox, err.to_string()),
                }
            }
            Ok(ClientCommand::Quit) => return Ok(None),
            Ok(ClientCommand::Join { .. }) => {
                send_invalid(outbox, "you already joined".to_string())
            }
            Ok(_) => send_invalid(outbox, "choose your symbol first".to_string()),
            Err(err) => send_invalid(outbox, err.to_string()),
        }
    }
}

async fn play_rounds<R>(
    arena: &Arena,
    reader: &mut R,
    outbox: &UnboundedSender<ServerEvent>,
    handle: SlotHandle,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match protocol::read_line(reader).await? {
            Some(line) => line,
            None => return Ok(()),
        };

        match ClientCommand::parse(&line) {
            Ok(ClientCommand::Move { row, col }) => {
                match arena.apply_move(handle.index, row, col) {
                    // The scheduler broadcasts the new board and turn.
                    Ok(MoveOutcome::Placed) | Ok(MoveOutcome::Drawn) => {}
                    Ok(MoveOutcome::Won { name, scores }) => {
                        persist_scores(arena, &name, &scores).await;
                    }
                    Err(err) => send_invalid(outbox, err.to_string()),
                }
            }
            Ok(ClientCommand::Quit) => return Ok(()),
            Ok(ClientCommand::Join { .. }) => {
                send_invalid(outbox, "you already joined".to_string())
            }
            Ok(ClientCommand::Symbol { .. }) => {
                send_invalid(outbox, "your symbol is already set".to_string())
            }
            Err(err) => send_invalid(outbox, err.to_string()),
        }
    }
}

/// Best-effort score write after a win. A failed write is reported and the
/// round carries on.
async fn persist_scores(arena: &Arena, winner: &str, scores: &ScoreTable) {
    let path = &arena.config().score_path;
    if let Err(err) = scores::save(path, scores).await {
        warn!(error = ?err, winner, "failed to persist scores");
        arena.audit_log().emit(format!("score write failed: {err:#}"));
    }
}

fn symbol_list(arena: &Arena) -> String {
    let available = arena.available_symbols();
    let mut list = String::new();
    for (i, symbol) in available.iter().enumerate() {
        if i > 0 {
            list.push(' ');
        }
        list.push(*symbol);
    }
    list
}

fn send(outbox: &UnboundedSender<ServerEvent>, event: ServerEvent) {
    // A dead outbox means the writer already gave up; the read side will
    // notice the broken connection on its own.
    let _ = outbox.send(event);
}

fn send_invalid(outbox: &UnboundedSender<ServerEvent>, reason: String) {
    send(outbox, ServerEvent::Invalid { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    use crate::config::ArenaConfig;
    use crate::scores::ScoreTable;

    const WAIT: Duration = Duration::from_secs(1);

    fn quiet_arena() -> Arc<Arena> {
        let config = ArenaConfig {
            min_players: 2,
            ..ArenaConfig::default()
        };
        Arc::new(Arena::new(config, ScoreTable::new()).expect("arena"))
    }

    async fn next_event(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("event deadline")
            .expect("outbox open")
    }

    async fn expect_invalid(rx: &mut UnboundedReceiver<ServerEvent>, needle: &str) {
        match next_event(rx).await {
            ServerEvent::Invalid { reason } => {
                assert!(
                    reason.contains(needle),
                    "expected reason containing {needle:?}, got {reason:?}"
                );
            }
            other => panic!("expected INVALID, got {other:?}"),
        }
    }

    fn start_session(
        arena: &Arc<Arena>,
    ) -> (
        tokio::io::DuplexStream,
        UnboundedReceiver<ServerEvent>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (client, server) = tokio::io::duplex(1024);
        let (outbox, rx) = mpsc::unbounded_channel();
        let handle = arena.register_slot(outbox.clone()).expect("free slot");

        let arena = Arc::clone(arena);
        let session = tokio::spawn(async move {
            let mut reader = BufReader::new(server);
            let result = run_session(&arena, &mut reader, &outbox, handle).await;
            arena.release_slot(handle.index);
            result
        });

        (client, rx, session)
    }

    #[tokio::test]
    async fn handshake_walks_join_then_symbol() {
        let arena = quiet_arena();
        let (mut client, mut rx, session) = start_session(&arena);

        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::Message { text } if text.contains("JOIN")
        ));

        client.write_all(b"JOIN alice\n").await.expect("join");
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::Message { text } if text.contains("SYMBOL")
        ));

        client.write_all(b"SYMBOL x\n").await.expect("symbol");
        assert_eq!(
            next_event(&mut rx).await,
            ServerEvent::Symbol { symbol: 'X' },
            "claims are normalized to the offered set"
        );
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::Message { text } if text.contains("seated")
        ));

        client.write_all(b"QUIT\n").await.expect("quit");
        timeout(WAIT, session)
            .await
            .expect("session deadline")
            .expect("session task")
            .expect("session result");
    }

    #[tokio::test]
    async fn out_of_order_commands_are_rejected_without_harm() {
        let arena = quiet_arena();
        let (mut client, mut rx, session) = start_session(&arena);
        next_event(&mut rx).await; // welcome

        client.write_all(b"MOVE 0 0\n").await.expect("early move");
        expect_invalid(&mut rx, "join first").await;

        client.write_all(b"JOIN alice smith\n").await.expect("bad join");
        expect_invalid(&mut rx, "spaces").await;

        client.write_all(b"JOIN alice\n").await.expect("join");
        next_event(&mut rx).await; // symbol prompt

        client.write_all(b"MOVE 0 0\n").await.expect("early move");
        expect_invalid(&mut rx, "symbol first").await;

        client.write_all(b"SYMBOL ?\n").await.expect("bad symbol");
        expect_invalid(&mut rx, "not offered").await;

        drop(client);
        timeout(WAIT, session)
            .await
            .expect("session deadline")
            .expect("session task")
            .expect("session result");
    }

    #[tokio::test]
    async fn taken_symbols_prompt_for_another_choice() {
        let arena = quiet_arena();

        let (seed_tx, _seed_rx) = mpsc::unbounded_channel();
        let seed = arena.register_slot(seed_tx).expect("seed slot");
        arena.set_name(seed.index, "bob").expect("seed name");
        arena.claim_symbol(seed.index, 'X').expect("seed symbol");

        let (mut client, mut rx, session) = start_session(&arena);
        next_event(&mut rx).await; // welcome

        client.write_all(b"JOIN alice\n").await.expect("join");
        // Joined-table notice lands on bob, not alice; next for alice is the
        // symbol prompt.
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::Message { text } if !text.contains('X')
        ));

        client.write_all(b"SYMBOL X\n").await.expect("taken symbol");
        expect_invalid(&mut rx, "taken").await;

        client.write_all(b"SYMBOL Y\n").await.expect("free symbol");
        assert_eq!(next_event(&mut rx).await, ServerEvent::Symbol { symbol: 'Y' });

        drop(client);
        timeout(WAIT, session)
            .await
            .expect("session deadline")
            .expect("session task")
            .expect("session result");
    }
}
