use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes are treated as corruption rather than allocated.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Append-only event log for one tenant.
///
/// Each record is `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// A torn or corrupt tail (crash mid-write) ends replay; everything before it
/// is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appended: u64,
}

fn write_record(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// The event and its size on disk. `Ok(None)` on a clean end of file or a
/// damaged tail.
fn read_record(input: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(input, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        tracing::warn!(len, "WAL record length out of range, stopping replay");
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_or_eof(input, &mut payload)? || !read_or_eof(input, &mut word)? {
        tracing::warn!("truncated WAL tail discarded");
        return Ok(None);
    }
    if crc32fast::hash(&payload) != u32::from_le_bytes(word) {
        tracing::warn!("WAL checksum mismatch, stopping replay");
        return Ok(None);
    }
    match bincode::deserialize(&payload) {
        Ok(event) => Ok(Some((event, 8 + len as u64))),
        Err(e) => {
            tracing::warn!(error = %e, "undecodable WAL record, stopping replay");
            Ok(None)
        }
    }
}

fn read_or_eof(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_append(path)?,
            path: path.to_path_buf(),
            appended: 0,
        })
    }

    /// Buffer one record. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appended += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a snapshot next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.writer = open_append(&self.path)?;
        self.appended = 0;
        Ok(())
    }

    /// Records appended since open or the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.appended
    }

    /// Every intact record, in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::replay_prefix(path)?.0)
    }

    /// Intact records plus the byte length they occupy.
    fn replay_prefix(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut input = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact = 0;
        while let Some((event, size)) = read_record(&mut input)? {
            events.push(event);
            intact += size;
        }
        Ok((events, intact))
    }

    /// Replay, then cut any damaged tail off the file so later appends
    /// follow the last intact record.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, intact) = Self::replay_prefix(path)?;
        let on_disk = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        if on_disk > intact {
            tracing::warn!(
                path = %path.display(),
                discarded = on_disk - intact,
                "truncating damaged WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}
