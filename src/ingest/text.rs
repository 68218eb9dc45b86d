//! Line-oriented detector output source.
//!
//! Reads the console output of a detectnet-style process (or any reader) on
//! background threads and groups lines into frames:
//!
//! - a header line (`3 objects detected`) closes the pending frame and opens a
//!   new one; the new frame is released as soon as its announced count is
//!   reached (counting box lines too when boxes are expected)
//! - detection lines without a header open a frame of unknown size, released by
//!   the next header, a timeout notice, a quiet gap, the line cap, or end of output
//! - a frame still pending when the capture timeout expires is released as is
//! - the buffer-timeout notice becomes `Capture::Timeout`
//!
//! Box lines join the pending frame. Other lines are ignored.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::detect::{frame_header_count, is_box_line, is_buffer_timeout, is_detection_line};
use crate::frame::{Capture, Frame, FrameSource, SourceStats};

/// Configuration for a text source.
#[derive(Clone, Debug)]
pub struct TextConfig {
    /// Human-readable origin ("stdin", a camera id, a command line).
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Longest wait for a frame before reporting `Capture::Timeout`.
    pub capture_timeout: Duration,
    /// Every detection line is followed by a box line.
    pub expect_boxes: bool,
    /// Silence that ends a headerless frame.
    pub frame_gap: Duration,
    /// Detection lines after which a headerless frame is released.
    pub max_frame_lines: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            name: "stdin".to_string(),
            width: 640,
            height: 480,
            capture_timeout: Duration::from_millis(1000),
            expect_boxes: false,
            frame_gap: Duration::from_millis(100),
            max_frame_lines: 64,
        }
    }
}

struct PendingFrame {
    lines: Vec<String>,
    expected: Option<usize>,
    detections: usize,
    boxes: usize,
}

impl PendingFrame {
    fn new(expected: Option<usize>) -> Self {
        Self {
            lines: Vec::new(),
            expected,
            detections: 0,
            boxes: 0,
        }
    }

    fn is_complete(&self, config: &TextConfig) -> bool {
        let target = self.expected.unwrap_or(config.max_frame_lines.max(1));
        self.detections >= target && (!config.expect_boxes || self.boxes >= self.detections)
    }
}

enum Ready {
    Frame(Vec<String>),
    Timeout,
}

pub struct TextSource {
    config: TextConfig,
    lines: Receiver<String>,
    child: Option<Child>,
    pending: Option<PendingFrame>,
    ready: VecDeque<Ready>,
    disconnected: bool,
    frames_captured: u64,
    timeouts: u64,
}

impl TextSource {
    /// Read detector output from any byte stream.
    pub fn from_reader<R>(reader: R, config: TextConfig) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        spawn_reader("text-source", reader, tx);
        Self::with_channel(rx, None, config)
    }

    /// Launch a detector process and read its stdout and stderr.
    pub fn spawn(mut command: Command, config: TextConfig) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to launch detector '{}'", program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("detector '{}' has no stdout pipe", program))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("detector '{}' has no stderr pipe", program))?;

        let (tx, rx) = mpsc::channel();
        spawn_reader("detector-stdout", stdout, tx.clone());
        spawn_reader("detector-stderr", stderr, tx);
        log::info!("TextSource: launched {} (pid {})", program, child.id());
        Ok(Self::with_channel(rx, Some(child), config))
    }

    fn with_channel(lines: Receiver<String>, child: Option<Child>, config: TextConfig) -> Self {
        Self {
            config,
            lines,
            child,
            pending: None,
            ready: VecDeque::new(),
            disconnected: false,
            frames_captured: 0,
            timeouts: 0,
        }
    }

    fn push_line(&mut self, line: String) {
        if is_buffer_timeout(&line) {
            self.flush();
            self.ready.push_back(Ready::Timeout);
            return;
        }
        if let Some(expected) = frame_header_count(&line) {
            self.flush();
            self.pending = Some(PendingFrame::new(Some(expected)));
        } else if is_detection_line(&line) {
            let pending = self.pending.get_or_insert_with(|| PendingFrame::new(None));
            pending.detections += 1;
            pending.lines.push(line);
        } else if is_box_line(&line) {
            let Some(pending) = self.pending.as_mut() else {
                log::trace!("TextSource: box line outside a frame '{}'", line);
                return;
            };
            pending.boxes += 1;
            pending.lines.push(line);
        } else {
            log::trace!("TextSource: ignoring '{}'", line);
            return;
        }

        let complete = self
            .pending
            .as_ref()
            .is_some_and(|p| p.is_complete(&self.config));
        if complete {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Some(frame) = self.pending.take() {
            self.ready.push_back(Ready::Frame(frame.lines));
        }
    }

    fn take_ready(&mut self) -> Option<Capture> {
        match self.ready.pop_front()? {
            Ready::Frame(lines) => {
                self.frames_captured += 1;
                Some(Capture::Frame(Frame::text(
                    self.frames_captured,
                    self.config.width,
                    self.config.height,
                    lines,
                )))
            }
            Ready::Timeout => {
                self.timeouts += 1;
                Some(Capture::Timeout)
            }
        }
    }
}

fn spawn_reader<R>(name: &str, reader: R, tx: Sender<String>)
where
    R: Read + Send + 'static,
{
    let name = name.to_string();
    let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("{}: read failed: {}", name, e);
                    break;
                }
            }
        }
    });
    if let Err(e) = spawned {
        log::error!("failed to start reader thread: {}", e);
    }
}

impl FrameSource for TextSource {
    fn is_streaming(&self) -> bool {
        !(self.disconnected && self.pending.is_none() && self.ready.is_empty())
    }

    fn capture(&mut self) -> Result<Capture> {
        let deadline = Instant::now() + self.config.capture_timeout;
        loop {
            if let Some(capture) = self.take_ready() {
                return Ok(capture);
            }
            if self.disconnected {
                return Ok(Capture::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if self.pending.is_some() {
                    self.flush();
                    continue;
                }
                self.timeouts += 1;
                return Ok(Capture::Timeout);
            }
            let headerless = self.pending.as_ref().is_some_and(|p| p.expected.is_none());
            let wait = if headerless {
                remaining.min(self.config.frame_gap)
            } else {
                remaining
            };
            match self.lines.recv_timeout(wait) {
                Ok(line) => self.push_line(line),
                Err(RecvTimeoutError::Timeout) => {
                    // Partial frames are released at the gap or the deadline.
                    if headerless || Instant::now() >= deadline {
                        self.flush();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.disconnected = true;
                    self.flush();
                    if let Some(child) = self.child.as_mut() {
                        match child.wait() {
                            Ok(status) => log::info!("detector exited: {}", status),
                            Err(e) => log::warn!("failed to reap detector: {}", e),
                        }
                    }
                    self.child = None;
                }
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            timeouts: self.timeouts,
            source: self.config.name.clone(),
        }
    }
}

impl Drop for TextSource {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill() {
                log::debug!("detector already stopped: {}", e);
            }
            let _ = child.wait();
        }
    }
}
