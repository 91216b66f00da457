//! Interactive terminal client.
//!
//! Connects, joins with the configured name, then multiplexes stdin and
//! server events until the player quits or the server goes away. The board
//! arrives as a flattened string and is drawn as a bordered grid with row
//! and column indices, so a move is typed exactly as the prompt shows it.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{ClientCommand, ServerEvent, read_event, write_command},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_command(
        &mut writer,
        &ClientCommand::Join {
            name: args.name.clone(),
        },
    )
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    print_help().await?;
    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(
    BufReader<tokio::net::tcp::OwnedReadHalf>,
    tokio::net::tcp::OwnedWriteHalf,
)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            event = read_event(reader) => {
                if !handle_server_event(event).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_event(event: io::Result<Option<ServerEvent>>) -> Result<bool> {
    match event? {
        Some(event) => {
            render_server_event(event).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_command(writer, &ClientCommand::Quit).await?;
        write_stdout("*** leaving the arena").await?;
        return Ok(false);
    }

    match interpret_input(text) {
        Some(command) => {
            write_command(writer, &command).await?;
        }
        None => print_help().await?,
    }
    Ok(true)
}

/// Maps a typed line onto a wire command. A lone non-digit character is a
/// symbol choice; two numbers are a move; anything else earns the usage
/// hint and nothing goes on the wire.
fn interpret_input(text: &str) -> Option<ClientCommand> {
    let mut chars = text.chars();
    if let (Some(symbol), None) = (chars.next(), chars.next()) {
        if !symbol.is_ascii_digit() {
            return Some(ClientCommand::Symbol { symbol });
        }
    }

    let mut numbers = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty());
    let row = numbers.next()?.parse().ok()?;
    let col = numbers.next()?.parse().ok()?;
    match numbers.next() {
        Some(_) => None,
        None => Some(ClientCommand::Move { row, col }),
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut tokio::net::tcp::OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_server_event(event: ServerEvent) -> io::Result<()> {
    match event {
        ServerEvent::Symbol { symbol } => {
            write_stdout(&format!("*** you are symbol {symbol}")).await
        }
        ServerEvent::Board { cells } => match render_board(&cells) {
            Some(grid) => write_stdout(&grid).await,
            None => write_stdout(&format!("*** board: {cells}")).await,
        },
        ServerEvent::YourTurn => write_stdout("== your turn, move with: <row> <col>").await,
        ServerEvent::Message { text } => write_stdout(&format!("*** {text}")).await,
        ServerEvent::Invalid { reason } => write_stderr(&format!("!!! {reason}")).await,
        ServerEvent::Win { name } => write_stdout(&format!("*** {name} wins the round")).await,
        ServerEvent::Lose => write_stdout("*** you lost this round").await,
        ServerEvent::Draw => write_stdout("*** the round is a draw").await,
    }
}

/// Draws the flattened board as a bordered grid. `None` when the cell count
/// is not a perfect square, which would mean a garbled line.
fn render_board(cells: &str) -> Option<String> {
    let glyphs: Vec<char> = cells.chars().collect();
    let size = board_side(glyphs.len())?;

    let mut grid = String::new();
    grid.push_str("   ");
    for col in 0..size {
        let _ = write!(grid, "{col:^4}");
    }
    grid.push('\n');

    let border = format!("   {}+\n", "+---".repeat(size));
    grid.push_str(&border);
    for row in 0..size {
        let _ = write!(grid, "{row:>2} ");
        for col in 0..size {
            let _ = write!(grid, "| {} ", glyphs[row * size + col]);
        }
        grid.push_str("|\n");
        grid.push_str(&border);
    }

    Some(grid)
}

fn board_side(cell_count: usize) -> Option<usize> {
    let side = (1..=cell_count).find(|side| side * side >= cell_count)?;
    (side * side == cell_count).then_some(side)
}

async fn print_help() -> io::Result<()> {
    write_stdout(concat!(
        "*** enter your move as: row col  (example: 1 2), ",
        "a single character to pick a symbol, or /quit to leave"
    ))
    .await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_characters_become_symbol_choices() {
        assert_eq!(
            interpret_input("x"),
            Some(ClientCommand::Symbol { symbol: 'x' })
        );
        assert_eq!(
            interpret_input("Z"),
            Some(ClientCommand::Symbol { symbol: 'Z' })
        );
        // A lone digit is an incomplete move, not a symbol.
        assert_eq!(interpret_input("5"), None);
    }

    #[test]
    fn coordinate_pairs_become_moves() {
        assert_eq!(
            interpret_input("1 2"),
            Some(ClientCommand::Move { row: 1, col: 2 })
        );
        assert_eq!(
            interpret_input("0,0"),
            Some(ClientCommand::Move { row: 0, col: 0 })
        );
        assert_eq!(
            interpret_input("2, 1"),
            Some(ClientCommand::Move { row: 2, col: 1 })
        );
    }

    #[test]
    fn garbage_input_stays_local() {
        assert_eq!(interpret_input("move please"), None);
        assert_eq!(interpret_input("1 2 3"), None);
        assert_eq!(interpret_input("xy"), None);
        assert_eq!(interpret_input("-1 0"), None);
    }

    #[test]
    fn board_renders_with_indices_and_borders() {
        let grid = render_board("X...Y...Z").expect("square board");
        assert!(grid.contains("| X |"));
        assert!(grid.contains(" 2 |"));
        let borders = grid.matches("+---+---+---+").count();
        assert_eq!(borders, 4, "three rows need four border lines");
    }

    #[test]
    fn non_square_boards_are_rejected() {
        assert!(render_board("X...Y").is_none());
        assert!(render_board("").is_none());
        assert!(render_board("....").is_some());
    }
}
