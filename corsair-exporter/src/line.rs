//! Newline-delimited framing over an async byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Splits a byte stream into `\n`-terminated lines.
///
/// Bytes after the last newline are dropped when the stream closes, so a
/// record cut short by a dying process is never emitted.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a readable stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::with_capacity(512),
        }
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    ///
    /// Returns `Ok(None)` once the stream is closed.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;

            if read == 0 {
                // EOF: whatever is left never saw its delimiter
                self.buf.clear();
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                // read_until only stops short of the delimiter at EOF;
                // loop once more to observe it
                continue;
            }

            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }

            return Ok(Some(std::mem::take(&mut self.buf)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect<R: AsyncRead + Unpin>(mut reader: LineReader<R>) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_splits_on_newline() {
        let reader = LineReader::new(&b"one\ntwo\n\nthree\n"[..]);
        let lines = collect(reader).await;

        assert_eq!(
            lines,
            vec![b"one".to_vec(), b"two".to_vec(), b"".to_vec(), b"three".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let reader = LineReader::new(&b"{\"voltage\": 12}\r\n"[..]);
        let lines = collect(reader).await;

        assert_eq!(lines, vec![b"{\"voltage\": 12}".to_vec()]);
    }

    #[tokio::test]
    async fn test_discards_unterminated_tail() {
        let reader = LineReader::new(&b"complete\npartial"[..]);
        let lines = collect(reader).await;

        assert_eq!(lines, vec![b"complete".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let reader = LineReader::new(&b""[..]);
        assert!(collect(reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let stream = chunked_stream(&[&b"{\"temper"[..], &b"ature\": 4"[..], &b"0}\n{\"volt"[..]]);
        let lines = collect(LineReader::new(stream)).await;

        assert_eq!(lines, vec![b"{\"temperature\": 40}".to_vec()]);
    }

    /// A reader that yields each chunk on a separate read.
    fn chunked_stream(chunks: &[&[u8]]) -> impl AsyncRead + Unpin + use<> {
        let mut builder = tokio_test::io::Builder::new();
        for chunk in chunks {
            builder.read(chunk);
        }
        builder.build()
    }
}
