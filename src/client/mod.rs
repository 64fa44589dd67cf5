//! Client command driver.
//!
//! Parses `get|put|del|ls|exit` commands and runs each one to completion
//! against a single server address before accepting the next.

use crate::config::Config;
use crate::error::Result;
use crate::ops::{self, Context, Outcome};
use crate::store::Store;
use crate::transfer::channel::Link;
use crate::transport::Transport;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const USAGE: &str = "commands: get <name> | put <name> | del <name> | ls | exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Put(String),
    Delete(String),
    List,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{0}' needs a file name")]
    MissingName(&'static str),
    #[error("'{0}' takes no arguments")]
    UnexpectedArgument(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let named = |verb: &'static str| {
            if rest.is_empty() {
                Err(CommandError::MissingName(verb))
            } else {
                Ok(rest.to_string())
            }
        };
        let bare = |verb: &'static str, command: Command| {
            if rest.is_empty() {
                Ok(command)
            } else {
                Err(CommandError::UnexpectedArgument(verb))
            }
        };

        match verb {
            "" => Err(CommandError::Empty),
            "get" => named("get").map(Command::Get),
            "put" => named("put").map(Command::Put),
            "del" => named("del").map(Command::Delete),
            "ls" => bare("ls", Command::List),
            "exit" => bare("exit", Command::Exit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get(name) => write!(f, "get {}", name),
            Self::Put(name) => write!(f, "put {}", name),
            Self::Delete(name) => write!(f, "del {}", name),
            Self::List => write!(f, "ls"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

pub struct Client<T: Transport> {
    transport: T,
    peer: SocketAddr,
    store: Store,
    config: Config,
    /// Commands issued so far
    sequence: AtomicU32,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, peer: SocketAddr, store: Store, config: Config) -> Self {
        Self {
            transport,
            peer,
            store,
            config,
            sequence: AtomicU32::new(0),
        }
    }

    /// Run one command. `exit` shuts the server down.
    pub async fn execute(&self, command: &Command) -> Result<Outcome> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ctx = Context::new(Link::new(&self.transport, self.peer), &self.config, &self.store)
            .with_sequence(sequence);
        tracing::debug!("Executing '{}' against {}", command, self.peer);

        match command {
            Command::Get(name) => {
                let progress = self.progress_bar(name);
                let outcome = ops::fetch::initiate(&ctx, name, &progress).await;
                progress.finish_and_clear();
                outcome
            }
            Command::Put(name) => {
                let progress = self.progress_bar(name);
                let outcome = ops::upload::initiate(&ctx, name, &progress).await;
                progress.finish_and_clear();
                outcome
            }
            Command::Delete(name) => ops::delete::initiate(&ctx, name).await,
            Command::List => ops::list::initiate(&ctx).await,
            Command::Exit => ops::shutdown::initiate(&ctx).await,
        }
    }

    fn progress_bar(&self, name: &str) -> ProgressBar {
        if !self.config.transfer.progress {
            return ProgressBar::hidden();
        }
        // Draws to stderr, and not at all when stderr is not a terminal
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(name.to_string());
        bar
    }

    /// Run commands in order, stopping after `exit`. Returns whether every
    /// command succeeded.
    pub async fn run_commands<I, S>(&self, lines: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut all_ok = true;
        for line in lines {
            match self.run_line(line.as_ref()).await {
                LineResult::Exit(ok) => return all_ok && ok,
                LineResult::Done(ok) => all_ok &= ok,
            }
        }
        all_ok
    }

    /// Interactive prompt on stdin until `exit` or end of input.
    pub async fn run_interactive(&self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("{}", USAGE);
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                println!();
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }
            if let LineResult::Exit(_) = self.run_line(&line).await {
                return Ok(());
            }
        }
    }

    async fn run_line(&self, line: &str) -> LineResult {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{} {}", e.to_string().yellow(), USAGE);
                return LineResult::Done(false);
            }
        };

        let ok = match self.execute(&command).await {
            Ok(outcome) => {
                println!("{}", outcome);
                outcome.is_success()
            }
            Err(e) => {
                println!("{} {}", "Error:".red().bold(), e);
                false
            }
        };
        if command == Command::Exit {
            LineResult::Exit(ok)
        } else {
            LineResult::Done(ok)
        }
    }
}

enum LineResult {
    Done(bool),
    Exit(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "get notes.txt".parse::<Command>(),
            Ok(Command::Get("notes.txt".to_string()))
        );
        assert_eq!(
            "  put   a b.txt ".parse::<Command>(),
            Ok(Command::Put("a b.txt".to_string()))
        );
        assert_eq!(
            "del x".parse::<Command>(),
            Ok(Command::Delete("x".to_string()))
        );
        assert_eq!("ls".parse::<Command>(), Ok(Command::List));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Exit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("get".parse::<Command>(), Err(CommandError::MissingName("get")));
        assert_eq!(
            "ls -la".parse::<Command>(),
            Err(CommandError::UnexpectedArgument("ls"))
        );
        assert_eq!(
            "rm x".parse::<Command>(),
            Err(CommandError::Unknown("rm".to_string()))
        );
    }

    #[test]
    fn test_display_roundtrip() {
        for command in [
            Command::Get("a".into()),
            Command::Put("b".into()),
            Command::Delete("c".into()),
            Command::List,
            Command::Exit,
        ] {
            assert_eq!(command.to_string().parse::<Command>(), Ok(command));
        }
    }
}
