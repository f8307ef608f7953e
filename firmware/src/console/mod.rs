//! Operator console on USB CDC0.
//!
//! Bytes arriving from the host are assembled into lines, parsed and executed
//! by the shared `rig-core` [`CommandExecutor`], and answered with short text
//! replies. Start and abort requests travel to the rig task over the request
//! queue; `status` is rebuilt from the status atomics.

use core::fmt::Write;
use core::str::{self, Utf8Error};

use embassy_sync::channel::{Channel, TrySendError};
use heapless::{String, Vec};
use rig_core::control::{RigControl, RigRequest, SubmitError};
use rig_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use rig_core::repl::status::{StatusFormatter, StatusSnapshot};
use rig_core::sampling::TestId;

use crate::rig::{FirmwareInstant, RequestSender, RigMutex};
use crate::status::StatusBoard;

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 256;

/// USB full-speed bulk packet size.
pub const FRAME_LEN: usize = 64;

pub const CONSOLE_QUEUE_DEPTH: usize = 8;

/// Width of a rendered reply line.
pub const REPLY_WIDTH: usize = 128;

/// Lines printed by `log` without a count.
pub const DEFAULT_LOG_LINES: usize = 20;

pub type ConsoleFrame = Vec<u8, FRAME_LEN>;
pub type ConsoleQueue = Channel<RigMutex, ConsoleFrame, CONSOLE_QUEUE_DEPTH>;
pub type ReplyLine = String<REPLY_WIDTH>;
pub type Reply = Vec<ReplyLine, 4>;

/// Result of feeding one byte to the [`LineAssembler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEvent {
    Pending,
    /// A complete line is available through [`LineAssembler::line`].
    Ready,
    /// The line exceeded [`MAX_LINE_LEN`] and was discarded.
    Overflow,
}

/// Collects console bytes into lines, honouring backspace.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    pub fn push(&mut self, byte: u8) -> LineEvent {
        match byte {
            b'\r' | b'\n' => {
                if self.overflowed {
                    self.clear();
                    LineEvent::Overflow
                } else if self.buffer.is_empty() {
                    LineEvent::Pending
                } else {
                    LineEvent::Ready
                }
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                LineEvent::Pending
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                LineEvent::Pending
            }
        }
    }

    pub fn line(&self) -> Result<&str, Utf8Error> {
        str::from_utf8(&self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

/// [`RigControl`] backed by the request queue and the status atomics.
pub struct ConsoleRig<'a> {
    sender: RequestSender<'a>,
    status: &'a StatusBoard,
    test_id: Option<TestId>,
}

impl<'a> ConsoleRig<'a> {
    pub fn new(sender: RequestSender<'a>, status: &'a StatusBoard) -> Self {
        Self {
            sender,
            status,
            test_id: None,
        }
    }
}

impl RigControl for ConsoleRig<'_> {
    type Instant = FirmwareInstant;

    fn test_active(&self) -> bool {
        self.status.test_active()
    }

    fn submit(&mut self, request: RigRequest<FirmwareInstant>) -> Result<(), SubmitError> {
        let started = match &request {
            RigRequest::Start { plan, .. } => Some(plan.test_id.clone()),
            RigRequest::Abort { .. } => None,
        };

        match self.sender.try_send(request) {
            Ok(()) => {
                if let Some(test_id) = started {
                    self.test_id = Some(test_id);
                    self.status.mark_start_pending();
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull),
        }
    }

    fn status(&mut self, _now: FirmwareInstant) -> Option<StatusSnapshot> {
        Some(self.status.snapshot(self.test_id.as_ref()))
    }
}

/// What the console task should send back for one command.
#[derive(Debug, PartialEq)]
pub enum Response {
    Lines(Reply),
    /// Replay the newest `count` lines of the log ring.
    Log { count: usize },
}

/// Executes one console line.
pub fn execute(
    executor: &mut CommandExecutor<ConsoleRig<'_>>,
    line: &str,
    now: FirmwareInstant,
) -> Response {
    render(executor.execute(line, now))
}

/// Turns a command result into reply lines.
pub fn render(result: Result<CommandOutcome<FirmwareInstant>, CommandError<'_>>) -> Response {
    let mut reply = Reply::new();
    match result {
        Ok(CommandOutcome::Started(ack)) => {
            let dwell_ms = u64::try_from(ack.dwell.as_millis()).unwrap_or(u64::MAX);
            push_line(
                &mut reply,
                format_args!(
                    "ok started id={} steps={} dwell={dwell_ms}ms",
                    ack.test_id, ack.steps
                ),
            );
        }
        Ok(CommandOutcome::AbortRequested { .. }) => {
            push_line(&mut reply, format_args!("ok abort requested"));
        }
        Ok(CommandOutcome::Status(snapshot)) => {
            let formatter = StatusFormatter::new(&snapshot);
            let mut line = ReplyLine::new();
            let _ = formatter.write_test_line(&mut line);
            let _ = reply.push(line);

            let mut line = ReplyLine::new();
            let _ = formatter.write_buffer_line(&mut line);
            let _ = reply.push(line);

            let mut line = ReplyLine::new();
            let _ = formatter.write_sensors_line(&mut line);
            let _ = reply.push(line);
        }
        Ok(CommandOutcome::Log { count }) => {
            return Response::Log {
                count: count.unwrap_or(DEFAULT_LOG_LINES),
            };
        }
        Ok(CommandOutcome::Help(text)) => push_line(&mut reply, format_args!("{text}")),
        Err(error) => push_line(&mut reply, format_args!("error: {error}")),
    }
    Response::Lines(reply)
}

fn push_line(reply: &mut Reply, args: core::fmt::Arguments<'_>) {
    let mut line = ReplyLine::new();
    // Overlong replies are cut at the line width.
    let _ = line.write_fmt(args);
    let _ = reply.push(line);
}

/// Splits `text` into USB-sized frames.
pub fn frames(text: &str) -> impl Iterator<Item = ConsoleFrame> + '_ {
    text.as_bytes()
        .chunks(FRAME_LEN)
        .filter_map(|chunk| ConsoleFrame::from_slice(chunk).ok())
}
