//! Relaying the attach stream of a running container.

use std::io::IsTerminal;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::docker::{Attachment, OutputChunk};
use crate::error::Result;

/// How the host side consumes the container's streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Bidirectional TTY relay with the host terminal in raw mode.
    Interactive,
    /// Forward stdout/stderr to the host's stdout/stderr.
    Stream,
    /// Collect stdout and return it; stderr goes to the host's stderr.
    Capture,
    /// Forward output lines to the debug log.
    Log,
}

impl AttachMode {
    /// Interactive when stdin and stdout are terminals, streaming otherwise.
    pub fn detect() -> Self {
        if std::io::stdin().is_terminal() && std::io::stdout().is_terminal() {
            AttachMode::Interactive
        } else {
            AttachMode::Stream
        }
    }

    /// Whether the container should get a TTY.
    pub fn wants_tty(self) -> bool {
        self == AttachMode::Interactive
    }
}

/// Puts the host terminal in raw mode until dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Option<Self> {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot switch terminal to raw mode");
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Current host terminal size as (rows, cols).
pub fn terminal_size() -> Option<(u16, u16)> {
    crossterm::terminal::size().ok().map(|(cols, rows)| (rows, cols))
}

/// Relay `attachment` until the container closes its output.
///
/// Host stdin is forwarded in [`AttachMode::Interactive`] and
/// [`AttachMode::Stream`] and closed once exhausted; the other modes close
/// the container's stdin before relaying. Returns the captured stdout in
/// [`AttachMode::Capture`], `None` otherwise.
pub async fn relay(attachment: Attachment, mode: AttachMode) -> Result<Option<Vec<u8>>> {
    let Attachment { mut output, mut input } = attachment;

    let _raw = match mode {
        AttachMode::Interactive => RawModeGuard::enable(),
        _ => None,
    };
    let stdin_task = match mode {
        AttachMode::Interactive | AttachMode::Stream => Some(tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            if let Err(e) = tokio::io::copy(&mut stdin, &mut input).await {
                tracing::debug!(error = %e, "stdin relay ended");
            }
            let _ = input.shutdown().await;
        })),
        AttachMode::Capture | AttachMode::Log => {
            // The container sees EOF on stdin right away.
            if let Err(e) = input.shutdown().await {
                tracing::debug!(error = %e, "Cannot close container stdin");
            }
            None
        }
    };

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut captured = Vec::new();

    let result = async {
        while let Some(chunk) = output.next().await {
            match (chunk?, mode) {
                (OutputChunk::Stdout(bytes), AttachMode::Capture) => {
                    captured.extend_from_slice(&bytes)
                }
                (OutputChunk::Stdout(bytes), AttachMode::Interactive | AttachMode::Stream) => {
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
                (OutputChunk::Stderr(bytes), AttachMode::Log)
                | (OutputChunk::Stdout(bytes), AttachMode::Log) => {
                    for line in String::from_utf8_lossy(&bytes).lines() {
                        tracing::debug!(target: "din::container", "{}", line);
                    }
                }
                (OutputChunk::Stderr(bytes), _) => {
                    stderr.write_all(&bytes).await?;
                    stderr.flush().await?;
                }
            }
        }
        Ok::<_, crate::error::Error>(())
    }
    .await;

    if let Some(task) = stdin_task {
        task.abort();
    }
    result?;

    Ok((mode == AttachMode::Capture).then_some(captured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;

    /// Writer that records whether it was shut down.
    struct ClosingSink(Arc<AtomicBool>);

    impl AsyncWrite for ClosingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.0.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    fn attachment(chunks: Vec<OutputChunk>) -> Attachment {
        Attachment {
            output: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
            input: Box::pin(tokio::io::sink()),
        }
    }

    #[tokio::test]
    async fn test_non_interactive_modes_close_container_stdin() {
        for mode in [AttachMode::Capture, AttachMode::Log] {
            let closed = Arc::new(AtomicBool::new(false));
            let attachment = Attachment {
                output: futures::stream::iter(Vec::new()).boxed(),
                input: Box::pin(ClosingSink(closed.clone())),
            };
            relay(attachment, mode).await.unwrap();
            assert!(closed.load(Ordering::SeqCst), "stdin left open in {:?}", mode);
        }
    }

    #[tokio::test]
    async fn test_capture_collects_stdout_only() {
        let captured = relay(
            attachment(vec![
                OutputChunk::Stdout(Bytes::from_static(b"hel")),
                OutputChunk::Stderr(Bytes::from_static(b"noise\n")),
                OutputChunk::Stdout(Bytes::from_static(b"lo\n")),
            ]),
            AttachMode::Capture,
        )
        .await
        .unwrap();
        assert_eq!(captured.as_deref(), Some(&b"hello\n"[..]));
    }

    #[tokio::test]
    async fn test_log_mode_returns_nothing() {
        let captured = relay(
            attachment(vec![OutputChunk::Stdout(Bytes::from_static(b"building\n"))]),
            AttachMode::Log,
        )
        .await
        .unwrap();
        assert!(captured.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let failing = Attachment {
            output: futures::stream::iter(vec![Err(crate::error::Error::Interrupted)]).boxed(),
            input: Box::pin(tokio::io::sink()),
        };
        assert!(relay(failing, AttachMode::Capture).await.is_err());
    }

    #[test]
    fn test_only_interactive_wants_tty() {
        assert!(AttachMode::Interactive.wants_tty());
        assert!(!AttachMode::Stream.wants_tty());
        assert!(!AttachMode::Capture.wants_tty());
        assert!(!AttachMode::Log.wants_tty());
    }
}
