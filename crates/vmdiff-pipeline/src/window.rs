//! Bounded byte window over a seekable stream

use std::io::{self, Read, Seek, SeekFrom};

/// A reader that exposes only `[start, start + length)` of an underlying
/// stream.
///
/// Used to read one block (or a batch of blocks) from an image file without
/// memory mapping it.
///
/// # Example
///
/// ```rust
/// use vmdiff_pipeline::ByteWindow;
/// use std::io::Cursor;
///
/// let data: Vec<u8> = (0..=255).collect();
/// let block = ByteWindow::new(Cursor::new(data), 16, 4).unwrap().read_all().unwrap();
/// assert_eq!(block, vec![16, 17, 18, 19]);
/// ```
pub struct ByteWindow<R: Read + Seek> {
    inner: R,
    start: u64,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> ByteWindow<R> {
    /// Create a window of exactly `length` bytes starting at `start`
    ///
    /// # Errors
    ///
    /// Returns an error if seeking to the start position fails
    pub fn new(mut inner: R, start: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;

        Ok(Self {
            inner,
            start,
            length,
            position: 0,
        })
    }

    /// Create a window that is shortened to stop at the end of the stream
    ///
    /// A `start` at or past the end produces an empty window.
    pub fn clamped(mut inner: R, start: u64, length: u64) -> io::Result<Self> {
        let end_of_stream = inner.seek(SeekFrom::End(0))?;
        let available = end_of_stream.saturating_sub(start);
        let start = start.min(end_of_stream);
        Self::new(inner, start, length.min(available))
    }

    /// Offset of the window within the underlying stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the window
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Current position within the window
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left between the current position and the end of the window
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    /// Read everything left in the window
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let capacity = usize::try_from(self.remaining()).unwrap_or(0);
        let mut buf = Vec::with_capacity(capacity);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read + Seek> Read for ByteWindow<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }

        let to_read = usize::try_from(remaining).map_or(buf.len(), |r| buf.len().min(r));

        self.inner.seek(SeekFrom::Start(self.start + self.position))?;
        let bytes_read = self.inner.read(&mut buf[..to_read])?;
        self.position += bytes_read as u64;

        Ok(bytes_read)
    }
}

impl<R: Read + Seek> Seek for ByteWindow<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => self.length as i128 + offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
        };

        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek before beginning of window",
            ));
        }

        if new_pos > self.length as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek beyond end of window",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}
