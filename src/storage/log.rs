//! Append-only, line-delimited record log.
//!
//! Every entry is one JSON object terminated by `\n`. Entries are never
//! rewritten; readers only consume newline-terminated lines so a concurrent
//! append that is still in flight is never observed as a partial record.

use crate::core::{Record, Result};
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, Take};

/// Default chunk size for memory-bounded scans.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct AppendLog {
    path: PathBuf,
    chunk_bytes: usize,
}

/// Result of a bounded read from the end of the log.
#[derive(Debug, Default)]
pub struct TailWindow {
    /// Complete lines inside the window, oldest first.
    pub lines: Vec<String>,
    /// Bytes actually read from disk.
    pub bytes_read: u64,
    /// Size of the log when the window was taken.
    pub file_len: u64,
}

impl AppendLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    /// Sets the chunk size used by backward and forward scans.
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Creates the parent directory and an empty log file if none exists.
    pub async fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    /// Size of the log in bytes; a missing file counts as empty.
    pub async fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Serializes `record` and appends it as one line.
    pub async fn append(&self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads at most `max_bytes` from the end of the log and returns the last
    /// `max_lines` complete lines inside that window.
    ///
    /// A line cut by the window start and an unterminated final line are
    /// both dropped.
    pub async fn read_tail(&self, max_bytes: u64, max_lines: usize) -> Result<TailWindow> {
        let file_len = self.len().await?;
        if file_len == 0 || max_bytes == 0 || max_lines == 0 {
            return Ok(TailWindow {
                file_len,
                ..TailWindow::default()
            });
        }

        let window = max_bytes.min(file_len);
        let start = file_len - window;
        // One extra byte tells us whether the window begins on a line boundary.
        let read_from = start.saturating_sub(1);
        let to_read = (file_len - read_from) as usize;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(read_from)).await?;
        let mut buf = vec![0u8; to_read];
        file.read_exact(&mut buf).await?;

        let mut data: &[u8] = &buf;
        if start > 0 {
            data = match data.iter().position(|b| *b == b'\n') {
                Some(idx) => &data[idx + 1..],
                None => &[],
            };
        }
        data = match data.iter().rposition(|b| *b == b'\n') {
            Some(idx) => &data[..idx],
            None => &[],
        };

        let mut lines: Vec<String> = if data.is_empty() {
            Vec::new()
        } else {
            data.split(|b| *b == b'\n')
                .map(|line| String::from_utf8_lossy(line).into_owned())
                .collect()
        };
        if lines.len() > max_lines {
            lines.drain(..lines.len() - max_lines);
        }

        Ok(TailWindow {
            lines,
            bytes_read: to_read as u64,
            file_len,
        })
    }

    /// Iterates complete lines from newest to oldest in fixed-size chunks.
    pub async fn reverse_lines(&self) -> Result<ReverseLines> {
        let file = match File::open(&self.path).await {
            Ok(file) => Some(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        let pos = match &file {
            Some(file) => file.metadata().await?.len(),
            None => 0,
        };

        Ok(ReverseLines {
            file,
            pos,
            chunk_bytes: self.chunk_bytes,
            carry: Vec::new(),
            pending: VecDeque::new(),
            terminated: false,
        })
    }

    /// Iterates complete lines from oldest to newest.
    ///
    /// The scan is bounded to the log size observed when it starts, so records
    /// appended during the scan are not visited.
    pub async fn forward_lines(&self) -> Result<ForwardLines> {
        let reader = match File::open(&self.path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Some(BufReader::with_capacity(self.chunk_bytes, file.take(len)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(ForwardLines {
            reader,
            buf: Vec::new(),
        })
    }

    /// Returns the newest complete non-blank line, if any.
    pub async fn last_line(&self) -> Result<Option<String>> {
        let mut lines = self.reverse_lines().await?;
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

/// Backward line reader over an [`AppendLog`].
pub struct ReverseLines {
    file: Option<File>,
    pos: u64,
    chunk_bytes: usize,
    // Leading fragment of a line whose start has not been read yet.
    carry: Vec<u8>,
    pending: VecDeque<String>,
    // Set once the newline ending the last complete line has been found.
    terminated: bool,
}

impl ReverseLines {
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    async fn fill(&mut self) -> Result<bool> {
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        // The chunk that reaches offset 0 flushes the carried head line.
        if self.pos == 0 {
            return Ok(false);
        }

        let n = (self.chunk_bytes as u64).min(self.pos);
        self.pos -= n;
        file.seek(SeekFrom::Start(self.pos)).await?;
        let mut data = vec![0u8; n as usize];
        file.read_exact(&mut data).await?;

        if !self.terminated {
            // Everything after the final newline is an append still in flight.
            match data.iter().rposition(|b| *b == b'\n') {
                Some(idx) => {
                    data.truncate(idx);
                    self.terminated = true;
                }
                None => return Ok(true),
            }
        } else {
            data.extend_from_slice(&self.carry);
        }

        let mut segments: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
        let head = segments.remove(0);
        for segment in segments.iter().rev() {
            self.pending
                .push_back(String::from_utf8_lossy(segment).into_owned());
        }
        if self.pos == 0 {
            self.pending
                .push_back(String::from_utf8_lossy(head).into_owned());
            self.carry.clear();
        } else {
            self.carry = head.to_vec();
        }
        Ok(true)
    }
}

/// Forward line reader over an [`AppendLog`].
pub struct ForwardLines {
    reader: Option<BufReader<Take<File>>>,
    buf: Vec<u8>,
}

impl ForwardLines {
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        self.buf.clear();
        let read = reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 || self.buf.last() != Some(&b'\n') {
            self.reader = None;
            return Ok(None);
        }
        self.buf.pop();
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}
