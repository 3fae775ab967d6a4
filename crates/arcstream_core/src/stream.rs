//! Stream adapters between caller-supplied byte streams and the codec.
//!
//! The codec pulls input through [`ReadCallback`] and pushes output through
//! [`WriteCallback`]. Each stream kind gets exactly one adapter, so position
//! bookkeeping lives here and nowhere else.

use std::borrow::Cow;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Largest block handed to the codec by a single read callback
pub const READ_CHUNK_SIZE: usize = 2048;

/// A stream that is both readable and seekable
pub trait SeekRead: Read + Seek {}

impl<T: Read + Seek> SeekRead for T {}

/// A byte-producing resource handed to the core
pub enum ByteSource<'a> {
    /// Fully materialized bytes; bound directly without the callback path
    Memory(Cow<'a, [u8]>),
    /// A stream supporting absolute repositioning
    Seekable(Box<dyn SeekRead + 'a>),
    /// A single-pass stream
    Stream(Box<dyn Read + 'a>),
}

impl<'a> ByteSource<'a> {
    pub fn memory(bytes: impl Into<Cow<'a, [u8]>>) -> Self {
        ByteSource::Memory(bytes.into())
    }

    pub fn seekable<S: Read + Seek + 'a>(stream: S) -> Self {
        ByteSource::Seekable(Box::new(stream))
    }

    pub fn stream<R: Read + 'a>(reader: R) -> Self {
        ByteSource::Stream(Box::new(reader))
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self, ByteSource::Stream(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ByteSource::Memory(_) => "memory",
            ByteSource::Seekable(_) => "seekable",
            ByteSource::Stream(_) => "stream",
        }
    }

    /// Bind the source to a reader the codec can pull from.
    pub(crate) fn into_reader(self) -> Box<dyn Read + 'a> {
        match self {
            ByteSource::Memory(bytes) => Box::new(Cursor::new(bytes)),
            ByteSource::Seekable(stream) => {
                Box::new(CallbackReader::new(SeekableAdapter::new(stream)))
            }
            ByteSource::Stream(reader) => {
                Box::new(CallbackReader::new(ForwardAdapter::new(reader)))
            }
        }
    }
}

impl<'a> From<&'a [u8]> for ByteSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ByteSource::Memory(Cow::Borrowed(bytes))
    }
}

impl<'a> From<&'a Vec<u8>> for ByteSource<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        ByteSource::Memory(Cow::Borrowed(bytes.as_slice()))
    }
}

impl From<Vec<u8>> for ByteSource<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Memory(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a str> for ByteSource<'a> {
    fn from(text: &'a str) -> Self {
        ByteSource::Memory(Cow::Borrowed(text.as_bytes()))
    }
}

impl From<String> for ByteSource<'static> {
    fn from(text: String) -> Self {
        ByteSource::Memory(Cow::Owned(text.into_bytes()))
    }
}

// ============================================================================
// Read side
// ============================================================================

/// Pull-based input callback. Returning zero signals end of input.
pub trait ReadCallback {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Read until `buf` is full or the reader is exhausted.
fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Adapter for seekable streams.
///
/// The recorded position is authoritative: every pull seeks back to it first,
/// so anything that moved the stream between two pulls is undone.
pub struct SeekableAdapter<S> {
    stream: S,
    position: u64,
    end: bool,
}

impl<S: Read + Seek> SeekableAdapter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            position: 0,
            end: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    /// Clear the end flag and rewind the cursor so the stream can be walked again
    pub fn reset(&mut self) {
        self.end = false;
        self.position = 0;
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Seek> ReadCallback for SeekableAdapter<S> {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.end {
            return Ok(0);
        }

        self.stream.seek(SeekFrom::Start(self.position))?;

        let want = buf.len().min(READ_CHUNK_SIZE);
        let n = fill(&mut self.stream, &mut buf[..want])?;
        if n < want {
            self.end = true;
        }

        self.position = self.stream.stream_position()?;
        Ok(n)
    }
}

/// Adapter for forward-only streams. Never repositions.
pub struct ForwardAdapter<R> {
    reader: R,
    end: bool,
}

impl<R: Read> ForwardAdapter<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, end: false }
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> ReadCallback for ForwardAdapter<R> {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.end {
            return Ok(0);
        }

        let want = buf.len().min(READ_CHUNK_SIZE);
        let n = fill(&mut self.reader, &mut buf[..want])?;
        if n < want {
            self.end = true;
        }
        Ok(n)
    }
}

/// Presents a [`ReadCallback`] as `io::Read`
pub struct CallbackReader<C> {
    callback: C,
    total: u64,
}

impl<C: ReadCallback> CallbackReader<C> {
    pub fn new(callback: C) -> Self {
        Self { callback, total: 0 }
    }

    /// Bytes pulled through the callback so far
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    pub fn into_callback(self) -> C {
        self.callback
    }
}

impl<C: ReadCallback> Read for CallbackReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.callback.pull(buf)?;
        self.total += n as u64;
        Ok(n)
    }
}

// ============================================================================
// Write side
// ============================================================================

/// Push-based output callback. Must report the exact number of bytes accepted.
pub trait WriteCallback {
    fn push(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Appends codec output to a caller-supplied sink
pub struct SinkAdapter<W> {
    sink: W,
    pushed: u64,
}

impl<W: Write> SinkAdapter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, pushed: 0 }
    }

    /// Total bytes pushed into the sink, including rewritten regions
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> WriteCallback for SinkAdapter<W> {
    fn push(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.sink.write_all(bytes)?;
        self.pushed += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl<W: Write> Write for SinkAdapter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<W: Write + Seek> Seek for SinkAdapter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.sink.seek(pos)
    }
}
