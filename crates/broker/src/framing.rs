//! Length-prefixed JSON framing shared by the client transport and the
//! kernel subprocess transport: a `u32` little-endian byte length
//! followed by a `serde_json`-encoded body.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes one length-prefixed JSON frame and flushes.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
	T: Serialize,
{
	let buf = serde_json::to_vec(value)
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
	writer.write_u32_le(buf.len() as u32).await?;
	writer.write_all(&buf).await?;
	writer.flush().await
}

/// Reads one length-prefixed JSON frame. Returns `Ok(None)` on a clean EOF
/// between frames (no partial frame was started).
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
	R: AsyncRead + Unpin,
	T: DeserializeOwned,
{
	let len = match reader.read_u32_le().await {
		Ok(len) => len,
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	};
	let mut buf = vec![0u8; len as usize];
	reader.read_exact(&mut buf).await?;
	serde_json::from_slice(&buf)
		.map(Some)
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
