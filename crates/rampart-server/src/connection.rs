//! Per-connection transport loop.
//!
//! Reads length-prefixed frames off the socket, feeds them to the
//! processor, and writes the replies back. The loop ends when the peer
//! hangs up, when the processor reports a terminal error, or when the
//! daemon broadcasts shutdown; the crypto session dies with the task.

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use rampart_core::wire::{Frame, FrameHeader, HEADER_LENGTH};

use crate::processor::Processor;

/// Read one frame. `Ok(None)` means the peer closed the connection.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<(FrameHeader, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_LENGTH];
    match reader.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let header = FrameHeader::decode(&header_bytes);
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((header, payload)))
}

/// Write one frame, header and payload in a single buffer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await
}

/// Drive one connection to completion.
///
/// Generic over the stream so tests can run it over an in-memory duplex
/// pipe. The shutdown receiver carries the number of seconds announced to
/// established clients before the listener goes away.
pub async fn serve<S>(
    stream: S,
    mut processor: Processor,
    mut shutdown: broadcast::Receiver<i32>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                let Some((header, payload)) = result.context("reading frame")? else {
                    tracing::debug!("peer closed the connection");
                    return Ok(());
                };
                tracing::trace!(
                    opcode = header.opcode,
                    length = header.length,
                    state = ?processor.session_state(),
                    "frame received"
                );
                let output = processor
                    .handle_frame(header.opcode, &payload)
                    .context("processing frame")?;
                for frame in &output.frames {
                    write_frame(&mut writer, frame).await.context("writing frame")?;
                }
                if output.close {
                    tracing::debug!("processor requested hangup");
                    return Ok(());
                }
            }

            notice = shutdown.recv() => {
                if let Ok(seconds) = notice {
                    if let Some(frame) = processor.shutdown_frame(seconds)? {
                        write_frame(&mut writer, &frame).await.context("writing shutdown notice")?;
                    }
                }
                tracing::debug!("connection closing for shutdown");
                return Ok(());
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
