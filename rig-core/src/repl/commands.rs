//! High-level console command dispatcher.
//!
//! This module glues parsed commands to a [`RigControl`] implementation by
//! validating start requests and forwarding them as [`RigRequest`]s. It stays
//! `no_std` friendly so the firmware and emulator share the same implementation.

use core::fmt;
use core::time::Duration;

use crate::control::{RigControl, RigRequest, SubmitError, TriggerRejection, validate_plan};
use crate::repl::status::StatusSnapshot;
use crate::sampling::TestId;

use super::grammar::{self, Command, StartCommand};

/// Help text keyed by topic. The first entry is the overview shown by `help`.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "overview",
        "commands: start, abort, status, log, help <topic>",
    ),
    (
        "start",
        "start <test-id> dwell=<250ms|2s|ms> speeds=<v>[,<v>...]  run a throttle ramp (values clamped to 0..1)",
    ),
    ("abort", "abort  stop the running test, zero the throttle and flush samples"),
    ("status", "status  show test progress, buffer counters and sensor readings"),
    ("log", "log [count]  print the newest console log lines"),
    ("help", "help [topic]  show help for a command"),
];

/// Looks up the help text for `topic` (case-insensitive); `None` selects the overview.
#[must_use]
pub fn help_text(topic: Option<&str>) -> Option<&'static str> {
    let key = topic.unwrap_or("overview");
    HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, text)| *text)
}

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<Instant> {
    Started(StartAck<Instant>),
    AbortRequested { requested_at: Instant },
    Status(StatusSnapshot),
    /// The front-end prints the newest `count` lines of its log ring.
    Log { count: Option<usize> },
    Help(&'static str),
}

/// Summary returned after a start request was accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct StartAck<Instant> {
    pub requested_at: Instant,
    pub test_id: TestId,
    pub steps: usize,
    pub dwell: Duration,
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Rejected(TriggerRejection),
    Unavailable(&'static str),
    UnknownHelpTopic(&'a str),
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<TriggerRejection> for CommandError<'_> {
    fn from(rejection: TriggerRejection) -> Self {
        Self::Rejected(rejection)
    }
}

impl From<SubmitError> for CommandError<'_> {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::QueueFull => Self::Rejected(TriggerRejection::QueueFull),
            SubmitError::Rejected(rejection) => Self::Rejected(rejection),
        }
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => write!(f, "parse error: {error}"),
            CommandError::Rejected(rejection) => write!(f, "rejected: {rejection}"),
            CommandError::Unavailable(what) => write!(f, "{what} unavailable"),
            CommandError::UnknownHelpTopic(topic) => write!(f, "no help for `{topic}`"),
        }
    }
}

type CommandResult<'a, C> = Result<CommandOutcome<<C as RigControl>::Instant>, CommandError<'a>>;

/// Dispatches console commands into the rig.
pub struct CommandExecutor<C> {
    control: C,
}

impl<C> CommandExecutor<C> {
    pub const fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn into_inner(self) -> C {
        self.control
    }
}

impl<C> CommandExecutor<C>
where
    C: RigControl,
{
    /// Parses and executes a console command.
    pub fn execute<'a>(&mut self, line: &'a str, now: C::Instant) -> CommandResult<'a, C> {
        let command = grammar::parse(line)?;
        self.dispatch(command, now)
    }

    fn dispatch<'a>(&mut self, command: Command<'a>, now: C::Instant) -> CommandResult<'a, C> {
        match command {
            Command::Start(start) => self.handle_start(start, now).map(CommandOutcome::Started),
            Command::Abort => {
                if !self.control.test_active() {
                    return Err(TriggerRejection::NoActiveTest.into());
                }
                self.control
                    .submit(RigRequest::Abort { requested_at: now })?;
                Ok(CommandOutcome::AbortRequested { requested_at: now })
            }
            Command::Status => self
                .control
                .status(now)
                .map(CommandOutcome::Status)
                .ok_or(CommandError::Unavailable("status")),
            Command::Log(log) => Ok(CommandOutcome::Log { count: log.count }),
            Command::Help(help) => help_text(help.topic)
                .map(CommandOutcome::Help)
                .ok_or(CommandError::UnknownHelpTopic(help.topic.unwrap_or(""))),
        }
    }

    fn handle_start<'a>(
        &mut self,
        start: StartCommand<'a>,
        now: C::Instant,
    ) -> Result<StartAck<C::Instant>, CommandError<'a>> {
        if self.control.test_active() {
            return Err(TriggerRejection::TestActive.into());
        }

        let plan = validate_plan(start.test_id, &start.speeds, start.dwell)?;
        let ack = StartAck {
            requested_at: now,
            test_id: plan.test_id.clone(),
            steps: plan.ramp.len(),
            dwell: plan.ramp.dwell(),
        };

        self.control.submit(RigRequest::Start {
            plan,
            requested_at: now,
        })?;
        Ok(ack)
    }
}
