//! Append-only event log (`master.log`).
//!
//! One line per event in canonical form. The log is never edited: the only
//! write operation is [`EventLog::append`].
//!
//! Writers inside a process are serialised by a mutex around an `O_APPEND`
//! handle and every line goes out in a single `write_all`. A write that fails
//! part way is cut back to the previous length; if even that fails the writer
//! refuses further appends. Readers open their own handle and drop any
//! trailing bytes not yet terminated by `\n`, so they only ever observe whole
//! events.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result, ValidationError};
use crate::models::{Event, NewEvent};

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// `sync_data` after every append.
    pub fsync: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { fsync: true }
    }
}

struct Writer {
    file: File,
    count: usize,
    /// A failed write could not be rolled back; the file may end mid-line.
    torn: bool,
}

/// The file operations an append needs, so rollback can be exercised
/// without a failing disk.
trait AppendTarget: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
struct FailedWrite {
    source: io::Error,
    rolled_back: bool,
}

/// Write `line` completely or leave the target at its previous length.
fn append_whole_line<T: AppendTarget>(
    target: &mut T,
    line: &[u8],
    fsync: bool,
) -> std::result::Result<(), FailedWrite> {
    let size = target.size().map_err(|source| FailedWrite {
        source,
        rolled_back: true,
    })?;
    let written = target
        .write_all(line)
        .and_then(|()| if fsync { target.sync() } else { Ok(()) });
    written.map_err(|source| FailedWrite {
        source,
        rolled_back: target.truncate(size).is_ok(),
    })
}

/// Handle to a log file. Owns the single writer for that file.
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    options: StoreOptions,
}

impl EventLog {
    /// Open (or create) the log at `path`.
    ///
    /// Fails with [`Error::CorruptLog`] when the file ends in an unterminated
    /// line, since the next append would otherwise fuse onto it.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let scan = scan_lines(&bytes);
        if let Some(tail) = scan.tail {
            error!(path = %path.display(), "log ends in an unterminated line");
            return Err(Error::CorruptLog {
                line: scan.physical_lines + 1,
                content: String::from_utf8_lossy(tail).into_owned(),
                reason: ValidationError::Unterminated,
            });
        }

        let count = scan.lines.iter().filter(|l| !is_blank(l.bytes)).count();
        info!(path = %path.display(), events = count, "opened event log");

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                count,
                torn: false,
            }),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events appended so far.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append one confirmed event and return its zero-based index.
    pub fn append(&self, event: &NewEvent) -> Result<usize> {
        let line = format!("{event}\n");

        let mut writer = self.lock()?;
        if writer.torn {
            return Err(Error::io(
                &self.path,
                io::Error::other("log ends in a partial write; repair it and reopen"),
            ));
        }
        if let Err(failed) = append_whole_line(&mut writer.file, line.as_bytes(), self.options.fsync) {
            if failed.rolled_back {
                warn!(event = %event, error = %failed.source, "append failed, log unchanged");
            } else {
                writer.torn = true;
                error!(event = %event, error = %failed.source, "append failed and could not be rolled back");
            }
            return Err(Error::io(&self.path, failed.source));
        }

        let index = writer.count;
        writer.count += 1;
        debug!(index, event = %event, "appended event");
        Ok(index)
    }

    /// Validate a raw canonical line, then append it.
    pub fn append_line(&self, line: &str) -> Result<Event> {
        let event = NewEvent::parse_line(line.trim_end_matches(['\n', '\r'])).map_err(|reason| {
            warn!(line, %reason, "rejected event");
            reason
        })?;
        let index = self.append(&event)?;
        Ok(event.at(index))
    }

    /// Replay the whole log in order.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        read_events(&self.path)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Writer>> {
        self.writer
            .lock()
            .map_err(|_| Error::io(&self.path, io::Error::other("writer lock poisoned")))
    }
}

/// Replay a log file without taking the writer.
///
/// A missing file is an empty log. Blank lines are ignored. The first
/// malformed line aborts the replay with [`Error::CorruptLog`].
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(path, e)),
    };

    let scan = scan_lines(&bytes);
    if scan.tail.is_some() {
        debug!(path = %path.display(), "ignoring partially written trailing line");
    }

    let mut events = Vec::with_capacity(scan.lines.len());
    for raw in scan.lines {
        if is_blank(raw.bytes) {
            continue;
        }
        let corrupt = |reason: ValidationError| {
            error!(line = raw.number, %reason, "corrupt log line");
            Error::CorruptLog {
                line: raw.number,
                content: String::from_utf8_lossy(raw.bytes).into_owned(),
                reason,
            }
        };

        let text = std::str::from_utf8(raw.bytes).map_err(|_| corrupt(ValidationError::InvalidUtf8))?;
        let text = text.strip_suffix('\r').unwrap_or(text);
        let event = NewEvent::parse_line(text).map_err(corrupt)?;
        events.push(event.at(events.len()));
    }

    Ok(events)
}

struct RawLine<'a> {
    /// 1-based physical line number.
    number: usize,
    bytes: &'a [u8],
}

struct Scan<'a> {
    lines: Vec<RawLine<'a>>,
    physical_lines: usize,
    /// Bytes after the last `\n`, if any.
    tail: Option<&'a [u8]>,
}

fn scan_lines(bytes: &[u8]) -> Scan<'_> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (pos, byte) in bytes.iter().enumerate() {
        if *byte == b'\n' {
            lines.push(RawLine {
                number: lines.len() + 1,
                bytes: &bytes[start..pos],
            });
            start = pos + 1;
        }
    }
    let tail = (start < bytes.len()).then(|| &bytes[start..]);
    Scan {
        physical_lines: lines.len(),
        lines,
        tail,
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Category};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, EventLog) {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path().join("master.log"), StoreOptions::default()).unwrap();
        (dir, log)
    }

    fn start(category: Category, activity: &str) -> NewEvent {
        NewEvent::new(Action::Start, category, activity, None).unwrap()
    }

    #[test]
    fn test_append_returns_monotonic_index() {
        let (_dir, log) = open_temp();

        assert_eq!(log.append(&start(Category::Theory, "PANDAS")).unwrap(), 0);
        assert_eq!(log.append(&start(Category::Game, "VALORANT")).unwrap(), 1);
        assert_eq!(log.len().unwrap(), 2);

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "START THEORY PANDAS\nSTART GAME VALORANT\n");
    }

    #[test]
    fn test_read_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.log");
        fs::write(&path, "START THEORY PANDAS\nSTART GAME VALORANT\n\n").unwrap();

        let events = read_events(&path).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].canonical(), "START THEORY PANDAS");
        assert_eq!(events[1].canonical(), "START GAME VALORANT");
        assert_eq!(events[1].index, 1);
    }

    #[test]
    fn test_log_append_only() {
        // Critical invariant: log is append-only
        let (_dir, log) = open_temp();
        let event = start(Category::Theory, "PANDAS");

        log.append(&event).unwrap();
        let first = fs::read(log.path()).unwrap();
        log.append(&event).unwrap();
        let second = fs::read(log.path()).unwrap();

        assert!(second.starts_with(&first));
        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].canonical(), events[1].canonical());
        assert_eq!((events[0].index, events[1].index), (0, 1));
    }

    #[test]
    fn rejected_line_leaves_file_untouched() {
        let (_dir, log) = open_temp();
        log.append(&start(Category::Theory, "PANDAS")).unwrap();
        let before = fs::read(log.path()).unwrap();

        let err = log.append_line("START THEORY pandas").unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError::NotCanonical { .. })));
        assert_eq!(fs::read(log.path()).unwrap(), before);
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn corrupt_line_aborts_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.log");
        fs::write(&path, "START THEORY PANDAS\n\nSTART GAME valorant\nSTART TASK LAUNDRY\n").unwrap();

        match read_events(&path) {
            Err(Error::CorruptLog { line, content, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(content, "START GAME valorant");
            }
            other => panic!("expected corrupt log, got {other:?}"),
        }
    }

    #[test]
    fn partial_trailing_line_is_invisible_to_readers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.log");
        fs::write(&path, "START THEORY PANDAS\nSTART GA").unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn open_refuses_unterminated_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.log");
        fs::write(&path, "START THEORY PANDAS\nSTART GA").unwrap();

        let err = EventLog::open(&path, StoreOptions::default()).err().unwrap();
        assert!(matches!(
            err,
            Error::CorruptLog {
                line: 2,
                reason: ValidationError::Unterminated,
                ..
            }
        ));
    }

    #[test]
    fn reopen_continues_numbering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("master.log");
        {
            let log = EventLog::open(&path, StoreOptions { fsync: false }).unwrap();
            log.append(&start(Category::Theory, "PANDAS")).unwrap();
        }
        let log = EventLog::open(&path, StoreOptions { fsync: false }).unwrap();
        assert_eq!(log.append(&start(Category::Practice, "RUST")).unwrap(), 1);
    }

    /// Accepts `accept` bytes, then fails every write.
    struct FlakyFile {
        data: Vec<u8>,
        accept: usize,
        fail_truncate: bool,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accept == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.accept);
            self.data.extend_from_slice(&buf[..n]);
            self.accept -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for FlakyFile {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::other("read-only"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_write_is_rolled_back() {
        let mut file = FlakyFile {
            data: b"START THEORY PANDAS\n".to_vec(),
            accept: 8,
            fail_truncate: false,
        };

        let failed = append_whole_line(&mut file, b"START GAME VALORANT\n", true).unwrap_err();

        assert!(failed.rolled_back);
        assert_eq!(file.data, b"START THEORY PANDAS\n");
    }

    #[test]
    fn failed_rollback_is_reported() {
        let mut file = FlakyFile {
            data: Vec::new(),
            accept: 8,
            fail_truncate: true,
        };

        let failed = append_whole_line(&mut file, b"START GAME VALORANT\n", false).unwrap_err();

        assert!(!failed.rolled_back);
        assert_eq!(file.data, b"START GA");
    }

    #[test]
    fn whole_line_is_written_when_nothing_fails() {
        let mut file = FlakyFile {
            data: Vec::new(),
            accept: usize::MAX,
            fail_truncate: true,
        };
        append_whole_line(&mut file, b"START GAME VALORANT\n", true).unwrap();
        assert_eq!(file.data, b"START GAME VALORANT\n");
    }

    #[test]
    fn torn_writer_refuses_appends() {
        let (_dir, log) = open_temp();
        log.append(&start(Category::Theory, "PANDAS")).unwrap();
        let before = fs::read(log.path()).unwrap();
        log.writer.lock().unwrap().torn = true;

        let err = log.append(&start(Category::Game, "VALORANT")).unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(fs::read(log.path()).unwrap(), before);
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn open_on_a_directory_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = EventLog::open(dir.path(), StoreOptions::default()).err().unwrap();
        assert!(matches!(err, Error::Io { path, .. } if path == dir.path()));
    }

    #[test]
    fn open_below_a_regular_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let err = EventLog::open(blocker.join("master.log"), StoreOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn reading_a_directory_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_events(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io { path, .. } if path == dir.path()));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_events(dir.path().join("absent.log")).unwrap().is_empty());
    }
}
