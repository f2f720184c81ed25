use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shutdown::Shutdown;

/// One line of the access log, without its line terminator.
#[derive(Clone, Debug, PartialEq)]
pub struct RawLine {
    /// 1-based position of the line within this source.
    pub number: u64,
    pub text: String,
}

/// Lazy sequence of lines pulled from a log source.
pub type Lines = Box<dyn Iterator<Item = io::Result<RawLine>>>;

/// Where the access log is read from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Stdin,
    /// Read the file once, from the start, until end-of-file.
    File(PathBuf),
    /// Like `tail -f`: only lines appended after opening are seen.
    Follow(PathBuf),
}

impl Source {
    pub fn open(&self, poll_interval: Duration, shutdown: &Shutdown) -> io::Result<Lines> {
        match *self {
            Source::Stdin => Ok(Box::new(LineReader::new(io::stdin().lock(), shutdown.clone()))),
            Source::File(ref path) => {
                let file = File::open(path)?;
                Ok(Box::new(LineReader::new(BufReader::new(file), shutdown.clone())))
            }
            Source::Follow(ref path) => Ok(Box::new(FollowReader::open(
                path,
                poll_interval,
                shutdown.clone(),
            )?)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match *self {
            Source::Stdin => None,
            Source::File(ref path) | Source::Follow(ref path) => Some(path),
        }
    }
}

/// Longest line kept, in bytes, counting its terminator. Longer lines are
/// skipped whole.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Bytes of the line being read, capped at `MAX_LINE_LENGTH`.
#[derive(Default)]
struct LineBuf {
    bytes: Vec<u8>,
    overlong: bool,
    number: u64,
}

impl LineBuf {
    /// Reads up to and including the next newline. Returns `false` when the
    /// reader ran dry first; what was read so far stays buffered.
    fn fill<R: BufRead>(&mut self, reader: &mut R) -> io::Result<bool> {
        loop {
            let (used, complete) = {
                let available = match reader.fill_buf() {
                    Ok(available) => available,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                };
                if available.is_empty() {
                    return Ok(false);
                }

                let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (&available[..=i], true),
                    None => (available, false),
                };
                if !self.overlong {
                    if self.bytes.len() + chunk.len() > MAX_LINE_LENGTH {
                        self.overlong = true;
                        self.bytes.clear();
                    } else {
                        self.bytes.extend_from_slice(chunk);
                    }
                }
                (chunk.len(), complete)
            };

            reader.consume(used);
            if complete {
                return Ok(true);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty() && !self.overlong
    }

    /// Finishes the buffered line. Overlong lines keep their number but
    /// are dropped.
    fn take(&mut self) -> Option<RawLine> {
        self.number += 1;

        if self.overlong {
            self.overlong = false;
            tracing::debug!(line = self.number, limit = MAX_LINE_LENGTH, "dropping overlong line");
            return None;
        }

        let buf = &mut self.bytes;
        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }
        let text = String::from_utf8_lossy(buf).into_owned();
        buf.clear();

        Some(RawLine {
            number: self.number,
            text,
        })
    }
}

/// Reads a finite stream (a static file or standard input) line by line.
pub struct LineReader<R> {
    reader: R,
    line: LineBuf,
    shutdown: Shutdown,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R, shutdown: Shutdown) -> LineReader<R> {
        LineReader {
            reader,
            line: LineBuf::default(),
            shutdown,
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<io::Result<RawLine>> {
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }

            let complete = match self.line.fill(&mut self.reader) {
                Ok(complete) => complete,
                Err(err) => return Some(Err(err)),
            };
            if !complete && self.line.is_empty() {
                return None;
            }
            if let Some(line) = self.line.take() {
                return Some(Ok(line));
            }
        }
    }
}

/// Tails a growing file, polling for new data at a fixed interval.
///
/// Only complete lines are yielded: trailing bytes without a newline are
/// held back until the writer finishes the line. Rotation and truncation
/// are not detected; reading continues at the last offset.
pub struct FollowReader {
    reader: BufReader<File>,
    line: LineBuf,
    poll_interval: Duration,
    shutdown: Shutdown,
}

impl FollowReader {
    /// Opens `path` positioned at its current end.
    pub fn open<P: AsRef<Path>>(
        path: P,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) -> io::Result<FollowReader> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::End(0))?;

        Ok(FollowReader {
            reader: BufReader::new(file),
            line: LineBuf::default(),
            poll_interval,
            shutdown,
        })
    }
}

impl Iterator for FollowReader {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<io::Result<RawLine>> {
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }

            match self.line.fill(&mut self.reader) {
                Ok(true) => match self.line.take() {
                    Some(line) => return Some(Ok(line)),
                    None => continue,
                },
                Ok(false) => {}
                Err(err) => return Some(Err(err)),
            }

            if self.shutdown.wait_timeout(self.poll_interval) {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Cursor, Write};
    use std::thread;

    use tempfile::NamedTempFile;

    use super::*;

    const POLL: Duration = Duration::from_millis(5);

    fn texts<I: Iterator<Item = io::Result<RawLine>>>(lines: I) -> Vec<String> {
        lines.map(|line| line.unwrap().text).collect()
    }

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn line_reader_reads_to_end() {
        let reader = LineReader::new(Cursor::new("one\r\ntwo\nthree"), Shutdown::new());

        assert_eq!(texts(reader), vec!["one", "two", "three"]);
    }

    #[test]
    fn line_reader_numbers_lines() {
        let mut reader = LineReader::new(Cursor::new("a\nb\n"), Shutdown::new());

        assert_eq!(reader.next().unwrap().unwrap().number, 1);
        assert_eq!(reader.next().unwrap().unwrap().number, 2);
        assert!(reader.next().is_none());
    }

    #[test]
    fn line_reader_replaces_invalid_utf8() {
        let reader = LineReader::new(Cursor::new(&b"ok\xff\n"[..]), Shutdown::new());

        assert_eq!(texts(reader), vec!["ok\u{fffd}"]);
    }

    #[test]
    fn line_reader_drops_overlong_lines() {
        let input = format!("a\n{}\nb\n{}", "x".repeat(MAX_LINE_LENGTH), "y".repeat(MAX_LINE_LENGTH + 1));
        let lines: Vec<RawLine> = LineReader::new(Cursor::new(input), Shutdown::new())
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            lines,
            vec![
                RawLine {
                    number: 1,
                    text: "a".to_owned()
                },
                RawLine {
                    number: 3,
                    text: "b".to_owned()
                },
            ]
        );
    }

    #[test]
    fn line_reader_keeps_lines_at_the_limit() {
        let longest = "x".repeat(MAX_LINE_LENGTH - 1);
        let reader = LineReader::new(Cursor::new(format!("{}\n", longest)), Shutdown::new());

        assert_eq!(texts(reader), vec![longest]);
    }

    #[test]
    fn static_source_reads_from_start() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "first\nsecond\n").unwrap();

        let source = Source::File(file.path().to_owned());
        let lines = source.open(POLL, &Shutdown::new()).unwrap();

        assert_eq!(texts(lines), vec!["first", "second"]);
    }

    #[test]
    fn follow_skips_existing_content() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "old line\n").unwrap();

        let mut reader = FollowReader::open(file.path(), POLL, Shutdown::new()).unwrap();
        append(file.path(), "new line\n");

        let line = reader.next().unwrap().unwrap();
        assert_eq!(line.text, "new line");
        assert_eq!(line.number, 1);
    }

    #[test]
    fn follow_waits_for_complete_lines() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_owned();

        let mut reader = FollowReader::open(&path, POLL, Shutdown::new()).unwrap();
        append(&path, "par");

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            append(&path, "tial\nnext\n");
        });

        assert_eq!(reader.next().unwrap().unwrap().text, "partial");
        assert_eq!(reader.next().unwrap().unwrap().text, "next");
        writer.join().unwrap();
    }

    #[test]
    fn follow_drops_overlong_lines() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_owned();

        let mut reader = FollowReader::open(&path, POLL, Shutdown::new()).unwrap();
        append(&path, &"x".repeat(MAX_LINE_LENGTH + 10));
        append(&path, "\nok\n");

        let line = reader.next().unwrap().unwrap();
        assert_eq!(line.text, "ok");
        assert_eq!(line.number, 2);
    }

    #[test]
    fn follow_stops_on_shutdown() {
        let file = NamedTempFile::new().unwrap();
        let shutdown = Shutdown::new();
        let mut reader = FollowReader::open(file.path(), Duration::from_secs(60), shutdown.clone()).unwrap();

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            shutdown.trigger();
        });

        assert!(reader.next().is_none());
        trigger.join().unwrap();
    }
}
