//! # logtail module
//!
//! Read a log from its end towards its start so a collector only touches the
//! records inside its trailing time window, however large the file has grown.

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use chrono::DateTime;
use chrono::Utc;

const CHUNK_SIZE: usize = 64 * 1024;

/// Iterator over lines from last to first. Blank lines are skipped
pub struct ReverseLines<R: Read + Seek> {
    reader: R,
    // Offset of the first byte held in `buf`
    pos: u64,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ReverseLines<File> {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        ReverseLines::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(reader: R) -> std::io::Result<Self> {
        Self::with_chunk_size(reader, CHUNK_SIZE)
    }

    pub fn with_chunk_size(mut reader: R, chunk_size: usize) -> std::io::Result<Self> {
        let pos = reader.seek(SeekFrom::End(0))?;
        Ok(ReverseLines {
            reader,
            pos,
            buf: Vec::new(),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Prepend the previous chunk of the file to `buf`
    fn read_chunk(&mut self) -> std::io::Result<()> {
        let read_size = self.pos.min(self.chunk_size as u64);
        self.pos -= read_size;
        self.reader.seek(SeekFrom::Start(self.pos))?;
        let mut chunk = vec![0u8; read_size as usize];
        self.reader.read_exact(&mut chunk)?;
        chunk.append(&mut self.buf);
        self.buf = chunk;
        Ok(())
    }

    fn to_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(newline) = self.buf.iter().rposition(|b| *b == b'\n') {
                let line = self.buf.split_off(newline + 1);
                self.buf.truncate(newline);
                if line.is_empty() || line == b"\r" {
                    continue;
                }
                return Some(Ok(Self::to_line(&line)));
            }
            if self.pos == 0 {
                if self.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buf);
                if line == b"\r" {
                    return None;
                }
                return Some(Ok(Self::to_line(&line)));
            }
            if let Err(err) = self.read_chunk() {
                // Don't spin on a reader that keeps failing
                self.pos = 0;
                self.buf.clear();
                return Some(Err(err));
            }
        }
    }
}

/// Oldest timestamp still inside a trailing window of `window_secs`
pub fn cutoff(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    i64::try_from(window_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Size of a file on disk, 0 if it can't be stat'd
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
