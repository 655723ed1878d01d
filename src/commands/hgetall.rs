use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;

/// Returns every field and value of the hash stored at `key`, flattened as
/// `field1, value1, field2, value2, ...` in no particular order. A hash that was never created
/// yields `nil`.
///
/// Ref: <https://redis.io/docs/latest/commands/hgetall/>
#[derive(Debug, PartialEq)]
pub struct HGetAll {
    pub key: Bytes,
}

impl Executable for HGetAll {
    fn exec(self, store: &Store) -> Frame {
        let Some(pairs) = store.hgetall(&self.key) else {
            return Frame::Null;
        };

        let frames = pairs
            .into_iter()
            .flat_map(|(field, value)| [Frame::Bulk(field), Frame::Bulk(value)])
            .collect();

        Frame::Array(frames)
    }
}

impl TryFrom<&mut CommandParser> for HGetAll {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}
