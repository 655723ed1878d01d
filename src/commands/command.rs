use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;

/// Stub kept for client compatibility: `redis-cli` sends `COMMAND DOCS` on connect. Any
/// arguments are accepted and ignored.
#[derive(Debug, PartialEq)]
pub struct Command {}

impl Executable for Command {
    fn exec(self, _store: &Store) -> Frame {
        Frame::Simple("OK".to_string())
    }
}

impl TryFrom<&mut CommandParser> for Command {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        while parser.has_next() {
            parser.next_frame()?;
        }
        Ok(Self {})
    }
}
