//! Newline-delimited JSON framing
//!
//! Each envelope is a single line of JSON followed by `\n`.

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::envelope::Envelope;
use crate::error::BusError;

/// Write one envelope as a line
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope, max_frame_bytes: usize) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
{
    let line = envelope.encode()?;
    if line.len() > max_frame_bytes {
        return Err(BusError::FrameTooLarge {
            size: line.len(),
            max: max_frame_bytes,
        });
    }

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next envelope, skipping blank lines
///
/// Returns `Ok(None)` at end of stream. An oversized, non-UTF-8 or malformed line is reported
/// as an error but leaves the reader usable for the following lines; only `BusError::Io`
/// means the stream itself failed.
pub async fn read_frame<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_frame_bytes: usize,
) -> Result<Option<Envelope>, BusError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        line.clear();
        let limit = max_frame_bytes.saturating_add(1) as u64;
        let bytes_read = (&mut *reader).take(limit).read_until(b'\n', line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.last() != Some(&b'\n') && bytes_read as u64 >= limit {
            return Err(BusError::FrameTooLarge {
                size: bytes_read,
                max: max_frame_bytes,
            });
        }

        let bytes = line.trim_ascii();
        if bytes.is_empty() {
            continue;
        }

        return Envelope::decode_bytes(bytes).map(Some);
    }
}

/// Decode every frame arriving on `stream` into `tx` until either side goes away
pub(crate) async fn pump_frames(stream: TcpStream, tx: mpsc::Sender<Envelope>, peer: SocketAddr, max_frame_bytes: usize) {
    debug!(%peer, "pump_frames: reading from peer");
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        match read_frame(&mut reader, &mut line, max_frame_bytes).await {
            Ok(Some(envelope)) => {
                trace!(%peer, "recv frame {}", envelope);
                if tx.send(envelope).await.is_err() {
                    debug!(%peer, "pump_frames: receiver dropped");
                    break;
                }
            }
            Ok(None) => {
                debug!(%peer, "pump_frames: peer disconnected");
                break;
            }
            Err(BusError::Io(e)) => {
                debug!(%peer, error = %e, "pump_frames: read failed");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Dropping malformed frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read() {
        let env = Envelope::request("w1", "add", Params::positional(vec![json!(1), json!(2)]));
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, &env, 1024).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = BufReader::new(buf.as_slice());
        let mut line = Vec::new();
        let read = read_frame(&mut reader, &mut line, 1024).await.unwrap().unwrap();
        assert_eq!(read, env);
        assert!(read_frame(&mut reader, &mut line, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_oversized() {
        let env = Envelope::request("w1", "echo", Params::positional(vec![json!("x".repeat(200))]));
        let mut buf: Vec<u8> = Vec::new();
        let err = write_frame(&mut buf, &env, 64).await.unwrap_err();
        assert!(matches!(err, BusError::FrameTooLarge { max: 64, .. }));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines() {
        let data = b"\n\n{\"operation\":\"ping\"}\n";
        let mut reader = BufReader::new(&data[..]);
        let mut line = Vec::new();
        let env = read_frame(&mut reader, &mut line, 1024).await.unwrap().unwrap();
        assert_eq!(env.operation(), Some("ping"));
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_poison_reader() {
        let data = b"{\"operation\":\"ping\",\"bogus\":1}\n{\"operation\":\"close\"}\n";
        let mut reader = BufReader::new(&data[..]);
        let mut line = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut line, 1024).await,
            Err(BusError::Codec(_))
        ));
        let env = read_frame(&mut reader, &mut line, 1024).await.unwrap().unwrap();
        assert_eq!(env.operation(), Some("close"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_poison_reader() {
        let data = b"\xff\xfe garbage\n{\"operation\":\"ping\"}\n";
        let mut reader = BufReader::new(&data[..]);
        let mut line = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut line, 1024).await,
            Err(BusError::Codec(_))
        ));
        let env = read_frame(&mut reader, &mut line, 1024).await.unwrap().unwrap();
        assert_eq!(env.operation(), Some("ping"));
    }

    #[tokio::test]
    async fn test_oversized_line_split_inside_a_character() {
        // The size cut lands between the two bytes of 'é'
        let long = format!("{{\"operation\":\"{}\"}}\n{{\"operation\":\"close\"}}\n", "é".repeat(20));
        let mut reader = BufReader::new(long.as_bytes());
        let mut line = Vec::new();
        let err = read_frame(&mut reader, &mut line, 32).await.unwrap_err();
        assert!(matches!(err, BusError::FrameTooLarge { max: 32, .. }));

        // The rest of the oversized line is dropped as malformed, then reading resumes
        loop {
            match read_frame(&mut reader, &mut line, 32).await {
                Ok(Some(env)) => {
                    assert_eq!(env.operation(), Some("close"));
                    break;
                }
                Ok(None) => panic!("stream ended before the valid frame"),
                Err(BusError::Io(e)) => panic!("reader failed: {e}"),
                Err(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_line() {
        let long = format!("{{\"operation\":\"{}\"}}\n", "x".repeat(100));
        let mut reader = BufReader::new(long.as_bytes());
        let mut line = Vec::new();
        let err = read_frame(&mut reader, &mut line, 16).await.unwrap_err();
        assert!(matches!(err, BusError::FrameTooLarge { max: 16, .. }));
    }
}
