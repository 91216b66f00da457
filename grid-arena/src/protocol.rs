//! Line-oriented wire protocol shared by the server, the terminal client,
//! and the tests.
//!
//! Every command and event travels as one UTF-8 text line. Commands carry an
//! uppercase keyword followed by whitespace-separated arguments; `MESSAGE`
//! and `INVALID` payloads keep the rest of the line verbatim so human text
//! survives untouched.

use std::fmt;
use std::io;

use anyhow::{Result, anyhow, bail, ensure};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Join { name: String },
    Symbol { symbol: char },
    Move { row: usize, col: usize },
    Quit,
}

impl ClientCommand {
    /// Parses one wire line. Keywords are case-insensitive; arguments are
    /// validated strictly so the caller can echo the error back as an
    /// `INVALID` reason.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().ok_or_else(|| anyhow!("empty command"))?;

        let command = match keyword.to_ascii_uppercase().as_str() {
            "JOIN" => {
                let name = parts.next().ok_or_else(|| anyhow!("JOIN needs a name"))?;
                ensure!(
                    parts.next().is_none(),
                    "player names cannot contain spaces"
                );
                Self::Join {
                    name: name.to_string(),
                }
            }
            "SYMBOL" => {
                let token = parts
                    .next()
                    .ok_or_else(|| anyhow!("SYMBOL needs a character"))?;
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(symbol), None) => Self::Symbol { symbol },
                    _ => bail!("a symbol is a single character"),
                }
            }
            "MOVE" => {
                let row = parse_coordinate(parts.next(), "row")?;
                let col = parse_coordinate(parts.next(), "column")?;
                ensure!(
                    parts.next().is_none(),
                    "MOVE takes exactly two numbers: row and column"
                );
                Self::Move { row, col }
            }
            "QUIT" => Self::Quit,
            other => bail!("unknown command '{other}'"),
        };

        Ok(command)
    }
}

fn parse_coordinate(token: Option<&str>, which: &str) -> Result<usize> {
    let token = token.ok_or_else(|| anyhow!("MOVE needs a row and a column"))?;
    token
        .parse()
        .map_err(|_| anyhow!("{which} must be a non-negative number"))
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Join { name } => write!(f, "JOIN {name}"),
            ClientCommand::Symbol { symbol } => write!(f, "SYMBOL {symbol}"),
            ClientCommand::Move { row, col } => write!(f, "MOVE {row} {col}"),
            ClientCommand::Quit => write!(f, "QUIT"),
        }
    }
}

/// Events the server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Symbol { symbol: char },
    Board { cells: String },
    YourTurn,
    Message { text: String },
    Invalid { reason: String },
    Win { name: String },
    Lose,
    Draw,
}

impl ServerEvent {
    pub fn parse(line: &str) -> Result<Self> {
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim_start()),
            None => (line, ""),
        };

        let event = match keyword {
            "SYMBOL" => {
                let mut chars = rest.trim_end().chars();
                match (chars.next(), chars.next()) {
                    (Some(symbol), None) => Self::Symbol { symbol },
                    _ => bail!("SYMBOL carries a single character"),
                }
            }
            "BOARD" => Self::Board {
                cells: rest.trim_end().to_string(),
            },
            "YOUR_TURN" => Self::YourTurn,
            "MESSAGE" => Self::Message {
                text: rest.to_string(),
            },
            "INVALID" => Self::Invalid {
                reason: rest.to_string(),
            },
            "WIN" => {
                let name = rest.trim_end();
                ensure!(!name.is_empty(), "WIN carries the winner's name");
                Self::Win {
                    name: name.to_string(),
                }
            }
            "LOSE" => Self::Lose,
            "DRAW" => Self::Draw,
            other => bail!("unknown event '{other}'"),
        };

        Ok(event)
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Symbol { symbol } => write!(f, "SYMBOL {symbol}"),
            ServerEvent::Board { cells } => write!(f, "BOARD {cells}"),
            ServerEvent::YourTurn => write!(f, "YOUR_TURN"),
            ServerEvent::Message { text } => write!(f, "MESSAGE {text}"),
            ServerEvent::Invalid { reason } => write!(f, "INVALID {reason}"),
            ServerEvent::Win { name } => write!(f, "WIN {name}"),
            ServerEvent::Lose => write!(f, "LOSE"),
            ServerEvent::Draw => write!(f, "DRAW"),
        }
    }
}

/// Reads the next non-blank line with its endings trimmed. `None` on EOF.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

/// Reads and parses the next server event. Used where server output is
/// trusted (the client and the tests); a malformed line is an I/O-level
/// failure there, not something to re-prompt over.
pub async fn read_event<R>(reader: &mut R) -> io::Result<Option<ServerEvent>>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await? {
        Some(line) => ServerEvent::parse(&line).map(Some).map_err(to_io_error),
        None => Ok(None),
    }
}

pub async fn write_event<W>(writer: &mut W, event: &ServerEvent) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_wire_line(writer, &event.to_string()).await
}

pub async fn write_command<W>(writer: &mut W, command: &ClientCommand) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_wire_line(writer, &command.to_string()).await
}

async fn write_wire_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Flush per line so peers see turn updates without buffering delays.
    let mut encoded = line.as_bytes().to_vec();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: anyhow::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}
