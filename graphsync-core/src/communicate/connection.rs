/*
    connection.rs - Byte transports the communicator runs over

    A connection moves whole frames. `recv` returns one newline-terminated
    frame, or an empty buffer once the peer is gone.

    Adapters:
    - MemoryConnection: in-process pair over unbounded tokio channels
    - LineConnection: any AsyncBufRead + AsyncWrite (sockets, pipes, stdio)
*/

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

#[async_trait]
pub trait Connection: Send + 'static {
    /// Write one frame, returning the number of bytes written
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Read one frame; empty at end of stream
    async fn recv(&mut self) -> io::Result<Vec<u8>>;

    async fn close(&mut self) -> io::Result<()>;
}

/// One end of an in-process connection
#[derive(Debug)]
pub struct MemoryConnection {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryConnection {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryConnection { tx: Some(a_tx), rx: a_rx },
            MemoryConnection { tx: Some(b_tx), rx: b_rx },
        )
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        tx.send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(frame.len())
    }

    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.rx.recv().await.unwrap_or_default())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// Newline-delimited frames over a buffered reader and a writer
pub struct LineConnection<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> LineConnection<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        LineConnection { reader, writer }
    }
}

impl<S> LineConnection<BufReader<ReadHalf<S>>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split a duplex stream such as a `TcpStream`
    pub fn from_stream(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        LineConnection { reader: BufReader::new(read), writer: write }
    }
}

#[async_trait]
impl<R, W> Connection for LineConnection<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(frame.len())
    }

    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line).await?;
        Ok(line)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
