//! Device-file backend.
//!
//! Talks to a draw server exported as a file tree, by default rooted at
//! `/dev`:
//!
//! ```text
//! <root>/winname          name of the window the client runs in
//! <root>/draw/new         opening it creates a connection; reads its number
//! <root>/draw/<n>/data    command stream
//! <root>/draw/<n>/ctl     info block of the attached image
//! <root>/mouse            textual mouse records
//! <root>/cons, consctl    keyboard, switched to raw mode with "rawon"
//! <root>/snarf            clipboard
//! <root>/label            window label
//! ```
//!
//! The root is a parameter so the backend can be exercised against a
//! fixture tree.
//!
//! # Closing
//!
//! The mouse and keyboard sources own their own descriptors so they can be
//! read without the session lock.  Before every read they `poll(2)` their
//! descriptor together with a wake pipe.  [`DevTransport::close`] writes to
//! that pipe, so a pending or later read returns [`TransportError::Closed`]
//! and the source drops its descriptor.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use draw_core::protocol::codec::{atoi, field};
use draw_core::protocol::commands::encode_attach;
use draw_core::protocol::read_mouse_record;
use draw_core::{MouseEvent, INFO_SIZE};
use tracing::{debug, info};

use crate::application::transport::{
    mouse_read_error, Backend, KeySource, MouseSource, Transport, TransportError,
};

/// Id the attach command asks the server to give the window's image.
const ATTACH_IMAGE_ID: u32 = 1;

struct Endpoints {
    // Held open: closing it ends the connection.
    _new: File,
    data: File,
    ctl: File,
    mouse: File,
    cons: File,
    _consctl: File,
}

/// A connection through a draw device tree.
pub struct DevTransport {
    root: PathBuf,
    window_name: Vec<u8>,
    endpoints: Option<Endpoints>,
    hangup: Arc<Hangup>,
}

/// Wakes input readers once the transport is closed.
struct Hangup {
    closed: AtomicBool,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
}

impl Hangup {
    fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        // SAFETY: `fds` has room for the two descriptors pipe(2) stores.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe(2) succeeded; both descriptors are open and unowned.
        let (wake_rx, wake_tx) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            closed: AtomicBool::new(false),
            wake_rx,
            wake_tx,
        })
    }

    fn hang_up(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Never drained: the pipe stays readable for every waiter.
        // SAFETY: writes one byte from a live buffer to an open descriptor.
        let n = unsafe { libc::write(self.wake_tx.as_raw_fd(), b"x".as_ptr().cast(), 1) };
        if n != 1 {
            debug!("waking device readers: {}", io::Error::last_os_error());
        }
    }

    /// Blocks until `file` has data or has hung up.  Returns `false` once the
    /// transport is closed.
    fn wait_readable(&self, file: &File) -> io::Result<bool> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(false);
            }
            let mut fds = [
                libc::pollfd {
                    fd: file.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wake_rx.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: `fds` is a live array of `fds.len()` pollfd entries.
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
            if fds[1].revents != 0 || self.closed.load(Ordering::Acquire) {
                return Ok(false);
            }
            return Ok(true);
        }
    }
}

/// Marks the I/O error a device reader returns after close.
#[derive(Debug)]
struct EndpointClosed;

impl std::fmt::Display for EndpointClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("device endpoint closed")
    }
}

impl std::error::Error for EndpointClosed {}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, EndpointClosed)
}

fn is_closed(e: &io::Error) -> bool {
    e.get_ref().is_some_and(|inner| inner.is::<EndpointClosed>())
}

/// An input descriptor that gives up once the transport is closed.
struct DeviceReader {
    file: Option<File>,
    hangup: Arc<Hangup>,
}

impl Read for DeviceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let ready = match self.file.as_ref() {
            Some(file) => self.hangup.wait_readable(file)?,
            None => false,
        };
        if !ready {
            // Release the descriptor as soon as the close is seen.
            self.file = None;
            return Err(closed_error());
        }
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(closed_error()),
        }
    }
}

fn connect_err(path: &Path) -> impl FnOnce(io::Error) -> TransportError + '_ {
    move |source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    }
}

fn open(path: &Path, read: bool, write: bool) -> Result<File, TransportError> {
    OpenOptions::new()
        .read(read)
        .write(write)
        .open(path)
        .map_err(connect_err(path))
}

/// Reads from offset 0 until `buf` is full or the file ends.  Control files
/// ignore the offset; regular files are re-read from the start.
fn read_block(file: &File, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match file.read_at(&mut buf[got..], got as u64) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

impl DevTransport {
    /// Opens every endpoint under `root`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connect`] naming the first endpoint that could not
    /// be opened.  Endpoints opened before it are closed again.
    pub fn establish(root: impl AsRef<Path>) -> Result<Self, TransportError> {
        let root = root.as_ref().to_path_buf();

        let winname_path = root.join("winname");
        let mut window_name = fs::read(&winname_path).map_err(connect_err(&winname_path))?;
        let end = window_name
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        window_name.truncate(end);

        let new_path = root.join("draw").join("new");
        let new = open(&new_path, true, false)?;
        let mut block = [0u8; INFO_SIZE];
        let got = read_block(&new, &mut block).map_err(connect_err(&new_path))?;
        if got < INFO_SIZE {
            return Err(TransportError::ShortRead {
                expected: INFO_SIZE,
                got,
            });
        }
        let dir_no = atoi(field(&block, 0));
        let conn_dir = root.join("draw").join(dir_no.to_string());

        let data = open(&conn_dir.join("data"), true, true)?;
        let ctl = open(&conn_dir.join("ctl"), true, true)?;
        let mouse = open(&root.join("mouse"), true, true)?;
        let cons = open(&root.join("cons"), true, false)?;
        let consctl_path = root.join("consctl");
        let mut consctl = open(&consctl_path, false, true)?;
        consctl
            .write_all(b"rawon")
            .map_err(connect_err(&consctl_path))?;
        let hangup = Hangup::new()?;

        info!(root = %root.display(), connection = dir_no, "opened draw device");
        Ok(Self {
            root,
            window_name,
            endpoints: Some(Endpoints {
                _new: new,
                data,
                ctl,
                mouse,
                cons,
                _consctl: consctl,
            }),
            hangup: Arc::new(hangup),
        })
    }

    fn endpoints(&mut self) -> Result<&mut Endpoints, TransportError> {
        self.endpoints.as_mut().ok_or(TransportError::Closed)
    }

    fn reader(&mut self, pick: fn(&Endpoints) -> &File) -> Result<DeviceReader, TransportError> {
        let file = pick(self.endpoints()?).try_clone()?;
        Ok(DeviceReader {
            file: Some(file),
            hangup: Arc::clone(&self.hangup),
        })
    }
}

impl Transport for DevTransport {
    fn backend(&self) -> Backend {
        Backend::DeviceFiles
    }

    fn negotiate(&mut self, _label: &str, _winsize: &str) -> Result<(), TransportError> {
        // The window already exists.
        self.endpoints()?;
        Ok(())
    }

    fn attach_window(&mut self) -> Result<(), TransportError> {
        let cmd = encode_attach(ATTACH_IMAGE_ID, &self.window_name);
        self.endpoints()?.data.write_all(&cmd)?;
        Ok(())
    }

    fn query(&mut self) -> Result<[u8; INFO_SIZE], TransportError> {
        let mut block = [0u8; INFO_SIZE];
        let got = read_block(&self.endpoints()?.ctl, &mut block)?;
        if got < INFO_SIZE {
            return Err(TransportError::ShortRead {
                expected: INFO_SIZE,
                got,
            });
        }
        Ok(block)
    }

    fn write_draw(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.endpoints()?.data.write_all(data)?;
        Ok(data.len())
    }

    fn read_draw(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.endpoints()?.data.read(buf)?)
    }

    fn read_snarf(&mut self) -> Result<Vec<u8>, TransportError> {
        self.endpoints()?;
        Ok(fs::read(self.root.join("snarf"))?)
    }

    fn write_snarf(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.endpoints()?;
        Ok(fs::write(self.root.join("snarf"), data)?)
    }

    fn set_label(&mut self, label: &str) -> Result<(), TransportError> {
        self.endpoints()?;
        Ok(fs::write(self.root.join("label"), label)?)
    }

    fn mouse(&mut self) -> Result<Box<dyn MouseSource>, TransportError> {
        let reader = self.reader(|e| &e.mouse)?;
        Ok(Box::new(DevMouse {
            reader: BufReader::new(reader),
            hangup: Arc::clone(&self.hangup),
        }))
    }

    fn keyboard(&mut self) -> Result<Box<dyn KeySource>, TransportError> {
        // Unbuffered: every byte read observes a close.
        let reader = self.reader(|e| &e.cons)?;
        Ok(Box::new(Utf8Keys { reader }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.hangup.hang_up();
        if self.endpoints.take().is_some() {
            debug!(root = %self.root.display(), "closed draw device");
        }
        Ok(())
    }
}

impl Drop for DevTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("closing draw device on drop: {e}");
        }
    }
}

/// Reads textual mouse records.
struct DevMouse<R> {
    reader: R,
    hangup: Arc<Hangup>,
}

impl<R: io::BufRead + Send> MouseSource for DevMouse<R> {
    fn read_mouse(&mut self) -> Result<MouseEvent, TransportError> {
        // Records still buffered from before the close are not delivered.
        if self.hangup.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        read_mouse_record(&mut self.reader).map_err(|e| {
            if is_closed(&e) {
                TransportError::Closed
            } else {
                mouse_read_error(e)
            }
        })
    }
}

/// Decodes UTF-8 characters from a raw console.  Invalid sequences become
/// U+FFFD.
pub(crate) struct Utf8Keys<R> {
    pub(crate) reader: R,
}

impl<R: Read> Utf8Keys<R> {
    fn next_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut b = [0u8; 1];
        loop {
            match self.reader.read(&mut b) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(b[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_closed(&e) => return Err(TransportError::Closed),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<R: Read + Send> KeySource for Utf8Keys<R> {
    fn read_key(&mut self) -> Result<char, TransportError> {
        let first = self.next_byte()?.ok_or(TransportError::Eof)?;
        let len = match first {
            0x00..=0x7F => return Ok(char::from(first)),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Ok(char::REPLACEMENT_CHARACTER),
        };
        let mut bytes = [first, 0, 0, 0];
        for slot in bytes.iter_mut().take(len).skip(1) {
            match self.next_byte()? {
                Some(b) => *slot = b,
                None => return Ok(char::REPLACEMENT_CHARACTER),
            }
        }
        Ok(std::str::from_utf8(&bytes[..len])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}
