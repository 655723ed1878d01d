pub mod command;
pub mod executable;
pub mod get;
pub mod hget;
pub mod hgetall;
pub mod hset;
pub mod ping;
pub mod set;

use bytes::Bytes;
use std::collections::HashMap;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;

use command::Command as Command_;
use get::Get;
use hget::HGet;
use hgetall::HGetAll;
use hset::HSet;
use ping::Ping;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Get(Get),
    HGet(HGet),
    HGetAll(HGetAll),
    HSet(HSet),
    Set(Set),

    Command(Command_),
    Ping(Ping),
}

impl Command {
    /// Whether the command mutates the store and therefore has to be appended to the log.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set(_) | Command::HSet(_))
    }
}

impl Executable for Command {
    fn exec(self, store: &Store) -> Frame {
        match self {
            Command::Command(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::HGet(cmd) => cmd.exec(store),
            Command::HGetAll(cmd) => cmd.exec(store),
            Command::HSet(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

type Parse = fn(&mut CommandParser) -> Result<Command, CommandParserError>;

/// Maps an uppercase command name to the function that validates its arguments and builds the
/// executable command.
pub struct Registry {
    commands: HashMap<&'static str, Parse>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };

        registry.register("COMMAND", |p| Command_::try_from(p).map(Command::Command));
        registry.register("GET", |p| Get::try_from(p).map(Command::Get));
        registry.register("HGET", |p| HGet::try_from(p).map(Command::HGet));
        registry.register("HGETALL", |p| HGetAll::try_from(p).map(Command::HGetAll));
        registry.register("HSET", |p| HSet::try_from(p).map(Command::HSet));
        registry.register("PING", |p| Ping::try_from(p).map(Command::Ping));
        registry.register("SET", |p| Set::try_from(p).map(Command::Set));

        registry
    }

    fn register(&mut self, name: &'static str, parse: Parse) {
        self.commands.insert(name, parse);
    }

    /// Turns a request into a command. Clients send commands as RESP arrays whose first element
    /// is the case-insensitive command name and the rest its arguments.
    pub fn parse(&self, frame: Frame) -> Result<Command, CommandParserError> {
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let mut parts = frames.into_iter();
        let command_name = match parts.next() {
            Some(Frame::Bulk(bytes)) => str::from_utf8(&bytes[..])?.to_uppercase(),
            Some(Frame::Simple(s)) => s.to_uppercase(),
            Some(frame) => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "bulk string".to_string(),
                    actual: frame,
                })
            }
            None => return Err(CommandParserError::EmptyRequest),
        };

        let (&name, parse) = self
            .commands
            .get_key_value(command_name.as_str())
            .ok_or(CommandParserError::UnknownCommand {
                command: command_name,
            })?;

        let parser = &mut CommandParser { name, parts };
        let command = parse(parser)?;
        parser.finish()?;

        Ok(command)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CommandParser {
    name: &'static str,
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        self.parts.next().ok_or_else(|| self.wrong_arity())
    }

    fn has_next(&self) -> bool {
        self.parts.len() > 0
    }

    /// Arguments are binary safe. A `Simple` frame is taken as its UTF-8 bytes.
    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        match self.next_frame()? {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Fails when arguments are left over, which means the command was given too many.
    fn finish(&mut self) -> Result<(), CommandParserError> {
        if self.has_next() {
            return Err(self.wrong_arity());
        }
        Ok(())
    }

    fn wrong_arity(&self) -> CommandParserError {
        CommandParserError::WrongArity {
            command: self.name.to_lowercase(),
        }
    }
}

/// Failures to turn a request into a command. The messages are sent verbatim to the client as
/// error replies.
#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("ERR Protocol error: expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR Protocol error: empty request")]
    EmptyRequest,
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("ERR wrong number of arguments for the '{command}' command")]
    WrongArity { command: String },
    #[error("ERR Protocol error: invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
}

impl From<CommandParserError> for Frame {
    fn from(err: CommandParserError) -> Self {
        Frame::Error(err.to_string())
    }
}
