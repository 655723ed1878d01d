use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::{self, Frame};

pub struct Connection {
    pub id: Uuid,
    // Bytes read from the socket are buffered by `Framed` until a whole frame can be decoded.
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Self::with_codec(stream, FrameCodec::default())
    }

    pub fn with_codec(stream: TcpStream, codec: FrameCodec) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            framed: Framed::new(stream, codec),
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.framed.get_ref().peer_addr()
    }

    /// Reads the next frame. `None` means the peer closed the connection on a frame boundary;
    /// closing it halfway through a frame is an [`frame::Error::UnexpectedEof`].
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        self.framed.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), frame::Error> {
        self.framed.send(frame).await
    }
}
