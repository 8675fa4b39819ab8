//! The send side of a transfer session

use std::{
    fs,
    io::{ErrorKind, Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{error, info, warn};

use crate::{
    error::{Error, Result},
    reliable::write_all,
    session::{Session, SessionState, StopToken},
    wire::{encode_config, encode_frame, Sentinel},
};

/// How long a finished session waits for the client to hang up
const LINGER: Duration = Duration::from_secs(2);

/// What the producer sends after the config frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMode {
    /// Every eligible file in name order, paced by the interval
    Interval,
    /// The first file whose name carries this frequency token (`50` or `50hz`)
    Frequency(String),
    /// One externally chosen file
    Selected(Option<PathBuf>),
}

impl SendMode {
    /// Value of the `MODE` config key
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Frequency(_) => "frequency",
            Self::Selected(_) => "selected",
        }
    }
}

/// Where the files to send come from
pub trait BatchSource {
    /// Names eligible for sending, sorted
    fn eligible(&self) -> Result<Vec<String>>;
    /// Contents of `name`, [`Error::MissingResource`] if it isn't there
    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

/// `*.txt` regular files in a single folder
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BatchSource for DirectorySource {
    fn eligible(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %self.dir.display(), "Data folder does not exist");
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };
        let mut names = vec![];
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".txt") {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Vec<u8>> {
        load_file(&self.dir.join(name))
    }
}

fn load_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::MissingResource(path.display().to_string()),
        _ => Error::Io(e),
    })
}

/// Does `name` carry the frequency `token`? Matches `hz50` and `50hz`, case-insensitive.
pub fn matches_frequency(name: &str, token: &str) -> bool {
    let token = token.trim().to_lowercase();
    let digits = token.strip_suffix("hz").unwrap_or(&token).trim();
    if digits.is_empty() {
        return false;
    }
    let name = name.to_lowercase();
    // `50` must not match inside `150hz` or `hz500`
    let no_digit = |c: Option<char>| !c.map_or(false, |c| c.is_ascii_digit());
    let suffixed = format!("{digits}hz");
    let prefixed = format!("hz{digits}");
    name.match_indices(&suffixed)
        .any(|(i, _)| no_digit(name[..i].chars().next_back()))
        || name
            .match_indices(&prefixed)
            .any(|(i, m)| no_digit(name[i + m.len()..].chars().next()))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServeSummary {
    pub files_sent: usize,
    pub missing: usize,
    pub terminator: Option<Sentinel>,
}

struct Sender<'a, W: Write> {
    stream: &'a mut W,
    summary: ServeSummary,
}

impl<W: Write> Sender<'_, W> {
    fn send_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        write_all(&mut *self.stream, &encode_frame(name, Some(content)), "sending file")?;
        self.summary.files_sent += 1;
        info!(name, size = content.len(), "Sent file");
        Ok(())
    }

    /// Send `name` as loaded by `load`, or a `NO_FILE_FOUND:` control frame if it's gone.
    /// Returns whether the file was sent.
    fn send_or_report(&mut self, name: &str, load: impl FnOnce() -> Result<Vec<u8>>) -> Result<bool> {
        match load() {
            Ok(content) => {
                self.send_file(name, &content)?;
                Ok(true)
            }
            Err(Error::MissingResource(what)) => {
                warn!(name, %what, "File to send is missing");
                self.summary.missing += 1;
                self.send_control(Sentinel::NoFileFound(name.to_owned()))?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn send_control(&mut self, sentinel: Sentinel) -> Result<()> {
        write_all(&mut *self.stream, &sentinel.encode(), "sending control frame")?;
        info!(%sentinel, "Sent control frame");
        Ok(())
    }

    fn finish(&mut self, sentinel: Sentinel, session: &mut Session) -> Result<()> {
        self.send_control(sentinel.clone())?;
        session.advance(SessionState::Draining(sentinel.clone()));
        self.summary.terminator = Some(sentinel);
        Ok(())
    }
}

/// Run one producer session over `stream`.
///
/// Ends with a control frame unless the connection fails. A stop request is
/// honored between files and still ends with `END_OF_TRANSMISSION`.
pub fn serve_session<W: Write, S: BatchSource + ?Sized>(
    stream: &mut W,
    source: &S,
    mode: &SendMode,
    interval_ms: u64,
    stop: &StopToken,
) -> Result<ServeSummary> {
    let mut session = Session::new("producer");
    session.advance(SessionState::Config);
    let result = stream_files(stream, source, mode, interval_ms, stop, &mut session);
    session.close();
    result
}

fn stream_files<W: Write, S: BatchSource + ?Sized>(
    stream: &mut W,
    source: &S,
    mode: &SendMode,
    interval_ms: u64,
    stop: &StopToken,
    session: &mut Session,
) -> Result<ServeSummary> {
    // Same config text whatever the mode, MODE just names it
    write_all(stream, &encode_config(interval_ms, mode.wire_name()), "sending config")?;
    info!(interval_ms, mode = mode.wire_name(), "Sent config");
    session.advance(SessionState::Streaming);

    let mut sender = Sender {
        stream,
        summary: ServeSummary::default(),
    };

    match mode {
        SendMode::Interval => {
            let files = source.eligible()?;
            if files.is_empty() {
                sender.finish(Sentinel::NoFilesInFolder, session)?;
                return Ok(sender.summary);
            }
            for (i, name) in files.iter().enumerate() {
                if stop.is_stopped() {
                    info!("Stop requested, ending transmission early");
                    break;
                }
                sender.send_or_report(name, || source.load(name))?;
                if i + 1 < files.len() && interval_ms > 0 {
                    thread::sleep(Duration::from_millis(interval_ms));
                }
            }
        }
        SendMode::Frequency(token) => {
            let files = source.eligible()?;
            match files.iter().find(|name| matches_frequency(name, token)) {
                None => {
                    warn!(token = %token, "No file matches frequency");
                    sender.finish(Sentinel::NoFileFound(token.clone()), session)?;
                    return Ok(sender.summary);
                }
                Some(name) if !stop.is_stopped() => {
                    sender.send_or_report(name, || source.load(name))?;
                }
                Some(_) => info!("Stop requested before sending"),
            }
        }
        SendMode::Selected(None) => {
            sender.finish(Sentinel::NoFileSelected, session)?;
            return Ok(sender.summary);
        }
        SendMode::Selected(Some(path)) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            if stop.is_stopped() {
                info!("Stop requested before sending");
            } else if !sender.send_or_report(&name, || load_file(path))? {
                // The NO_FILE_FOUND frame already ended the stream
                session.advance(SessionState::Draining(Sentinel::NoFileFound(name.clone())));
                sender.summary.terminator = Some(Sentinel::NoFileFound(name));
                return Ok(sender.summary);
            }
        }
    }

    sender.finish(Sentinel::EndOfTransmission, session)?;
    Ok(sender.summary)
}

/// Accept connections one at a time and run a session on each until stopped
pub fn serve<S: BatchSource + ?Sized>(
    listener: &TcpListener,
    source: &S,
    mode: &SendMode,
    interval_ms: u64,
    stop: &StopToken,
) -> Result<()> {
    // Non-blocking accept so the stop token gets a look in
    listener.set_nonblocking(true)?;
    while !stop.is_stopped() {
        let (mut stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };
        stream.set_nonblocking(false)?;
        info!(%peer, "Client connected");
        match serve_session(&mut stream, source, mode, interval_ms, stop) {
            Ok(summary) => info!(
                %peer,
                files = summary.files_sent,
                missing = summary.missing,
                "Session complete"
            ),
            Err(e) => error!(%peer, error = %e, "Session aborted"),
        }
        close_connection(&mut stream, LINGER, stop);
    }
    Ok(())
}

/// Let the client see EOF, then read until it hangs up so closing our end doesn't
/// reset the connection under it. Gives up after `linger` of silence or on stop.
fn close_connection(stream: &mut TcpStream, linger: Duration, stop: &StopToken) {
    let _ = stream.shutdown(Shutdown::Write);
    if let Err(e) = stream.set_read_timeout(Some(linger)) {
        warn!(error = %e, "Couldn't set linger timeout, closing now");
        return;
    }
    let mut buf = [0u8; 256];
    while !stop.is_stopped() && matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_config, read_content, read_frame_header, FrameLimits};
    use std::io::Cursor;

    /// Decode everything a session wrote: config mode plus (name, content) per frame
    fn decode(bytes: Vec<u8>) -> (String, Vec<(String, Vec<u8>)>) {
        let mut cursor = Cursor::new(bytes);
        let config = read_config(&mut cursor).unwrap();
        let mut frames = vec![];
        while (cursor.position() as usize) < cursor.get_ref().len() {
            let header = read_frame_header(&mut cursor, &FrameLimits::default()).unwrap();
            let content = read_content(&mut cursor, &header).unwrap();
            frames.push((header.name, content));
        }
        (config.mode, frames)
    }

    fn data_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            fs::write(dir.path().join(name), body).unwrap();
        }
        fs::create_dir(dir.path().join("nested.txt")).unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        dir
    }

    fn names(frames: &[(String, Vec<u8>)]) -> Vec<&str> {
        frames.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_interval_mode_sends_all_sorted() {
        let dir = data_dir(&[("b_hz20.txt", "ADC:2\n"), ("a_hz10.txt", "ADC:1\n")]);
        let mut out = vec![];
        let summary = serve_session(
            &mut out,
            &DirectorySource::new(dir.path()),
            &SendMode::Interval,
            1,
            &StopToken::new(),
        )
        .unwrap();
        assert_eq!(summary.files_sent, 2);
        assert_eq!(summary.terminator, Some(Sentinel::EndOfTransmission));
        let (mode, frames) = decode(out);
        assert_eq!(mode, "interval");
        assert_eq!(names(&frames), ["a_hz10.txt", "b_hz20.txt", "END_OF_TRANSMISSION"]);
        assert_eq!(frames[0].1, b"ADC:1\n");
        assert!(frames[2].1.is_empty());
    }

    #[test]
    fn test_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = vec![];
        serve_session(
            &mut out,
            &DirectorySource::new(dir.path().join("absent")),
            &SendMode::Interval,
            0,
            &StopToken::new(),
        )
        .unwrap();
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["NO_FILES_IN_FOLDER"]);
    }

    /// Lists a file that then can't be loaded
    struct Flaky;

    impl BatchSource for Flaky {
        fn eligible(&self) -> Result<Vec<String>> {
            Ok(vec!["gone.txt".into(), "here.txt".into()])
        }

        fn load(&self, name: &str) -> Result<Vec<u8>> {
            match name {
                "here.txt" => Ok(b"ADC:5\n".to_vec()),
                _ => Err(Error::MissingResource(name.into())),
            }
        }
    }

    #[test]
    fn test_missing_file_continues() {
        let mut out = vec![];
        let summary = serve_session(&mut out, &Flaky, &SendMode::Interval, 0, &StopToken::new()).unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.files_sent, 1);
        let (_, frames) = decode(out);
        assert_eq!(
            names(&frames),
            ["NO_FILE_FOUND:gone.txt", "here.txt", "END_OF_TRANSMISSION"]
        );
    }

    #[test]
    fn test_frequency_mode() {
        let dir = data_dir(&[("load_hz10.txt", "ADC:1\n"), ("load_hz50.txt", "ADC:5\n")]);
        let source = DirectorySource::new(dir.path());

        let mut out = vec![];
        serve_session(&mut out, &source, &SendMode::Frequency("50".into()), 20, &StopToken::new()).unwrap();
        let (mode, frames) = decode(out);
        assert_eq!(mode, "frequency");
        assert_eq!(names(&frames), ["load_hz50.txt", "END_OF_TRANSMISSION"]);

        let mut out = vec![];
        let summary =
            serve_session(&mut out, &source, &SendMode::Frequency("60hz".into()), 20, &StopToken::new()).unwrap();
        assert_eq!(summary.terminator, Some(Sentinel::NoFileFound("60hz".into())));
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["NO_FILE_FOUND:60hz"]);
    }

    #[test]
    fn test_frequency_mode_skips_longer_numbers() {
        let dir = data_dir(&[("run_150hz.txt", "ADC:150\n"), ("run_50hz.txt", "ADC:50\n")]);
        let mut out = vec![];
        serve_session(
            &mut out,
            &DirectorySource::new(dir.path()),
            &SendMode::Frequency("50".into()),
            20,
            &StopToken::new(),
        )
        .unwrap();
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["run_50hz.txt", "END_OF_TRANSMISSION"]);
        assert_eq!(frames[0].1, b"ADC:50\n");
    }

    #[test]
    fn test_selected_mode() {
        let dir = data_dir(&[("pick.txt", "ADC:9\n")]);

        let mut out = vec![];
        let mode = SendMode::Selected(Some(dir.path().join("pick.txt")));
        serve_session(&mut out, &DirectorySource::new(dir.path()), &mode, 20, &StopToken::new()).unwrap();
        let (mode_name, frames) = decode(out);
        assert_eq!(mode_name, "selected");
        assert_eq!(names(&frames), ["pick.txt", "END_OF_TRANSMISSION"]);

        let mut out = vec![];
        let mode = SendMode::Selected(Some(dir.path().join("other.txt")));
        serve_session(&mut out, &DirectorySource::new(dir.path()), &mode, 20, &StopToken::new()).unwrap();
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["NO_FILE_FOUND:other.txt"]);

        let mut out = vec![];
        serve_session(
            &mut out,
            &DirectorySource::new(dir.path()),
            &SendMode::Selected(None),
            20,
            &StopToken::new(),
        )
        .unwrap();
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["NO_FILE_SELECTED"]);
    }

    #[test]
    fn test_stop_still_ends_transmission() {
        let dir = data_dir(&[("a.txt", "ADC:1\n"), ("b.txt", "ADC:2\n")]);
        let stop = StopToken::new();
        stop.stop();
        let mut out = vec![];
        let summary =
            serve_session(&mut out, &DirectorySource::new(dir.path()), &SendMode::Interval, 0, &stop).unwrap();
        assert_eq!(summary.files_sent, 0);
        let (_, frames) = decode(out);
        assert_eq!(names(&frames), ["END_OF_TRANSMISSION"]);
    }

    #[test]
    fn test_close_gives_up_on_silent_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let started = std::time::Instant::now();
        close_connection(&mut server, Duration::from_millis(50), &StopToken::new());
        assert!(started.elapsed() < Duration::from_secs(5));

        // The client still sees a clean EOF
        let mut buf = [0u8; 8];
        assert_eq!((&client).read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_frequency_matching() {
        assert!(matches_frequency("Load_HZ50.txt", "50"));
        assert!(matches_frequency("run_50hz.txt", "50Hz"));
        assert!(!matches_frequency("run_500hz.txt", "50"));
        assert!(!matches_frequency("run_150hz.txt", "50"));
        assert!(!matches_frequency("load_hz500.txt", "50"));
        assert!(matches_frequency("load_hz50_b.txt", "50"));
        assert!(matches_frequency("150hz_then_50hz.txt", "50"));
        assert!(!matches_frequency("hz10.txt", "50"));
        assert!(!matches_frequency("hz10.txt", "hz"));
    }
}
