//! Command channel (§6 "Command channel for RPC and manual control", §5
//! "Concurrent writers"): the bounded, single-producer/single-consumer queue
//! that the RPC server and broker fill-confirmation callbacks push onto.
//! Commands never interrupt an iteration in progress — they are drained at
//! the start of the next one (`TradingLoop::drain_commands`, invoked before
//! step 1 of `run_iteration`).
//!
//! Wire framing for however commands arrive (HTTP, a message bus, ...) is out
//! of scope (spec.md §1 Non-goals: "RPC server framing"); this module is the
//! part of the contract the core itself owns: the command shapes, the queue
//! discipline, and the fixed rejection code set.

use std::collections::VecDeque;

use bc_schemas::{Side, Ticket};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One command accepted from the command channel (§6 table).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ManualOpen { symbol: String, side: Side, volume: f64, sl: Option<f64>, tp: Option<f64>, reason: Option<String> },
    ManualClose { ticket: Ticket, volume: Option<f64> },
    ManualModify { ticket: Ticket, sl: Option<f64>, tp: Option<f64> },
    Pause,
    Resume,
    Shutdown { mode: ShutdownMode },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Graceful,
    Drain,
    Immediate,
}

/// Fixed rejection code set (§6: "rejections use a fixed code set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejection {
    Unauthorized,
    RateLimited,
    Invalid,
    DeadlineExceeded,
    Busy,
}

impl CommandRejection {
    pub fn code(self) -> &'static str {
        match self {
            CommandRejection::Unauthorized => "unauthorized",
            CommandRejection::RateLimited => "rate_limited",
            CommandRejection::Invalid => "invalid",
            CommandRejection::DeadlineExceeded => "deadline_exceeded",
            CommandRejection::Busy => "busy",
        }
    }
}

impl std::fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A command paired with its submission deadline and a correlation id the
/// submitter can use to match up its result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub id: Uuid,
    pub command: Command,
    pub deadline: DateTime<Utc>,
}

/// Bounded, single-producer (command channel) / single-consumer (the loop)
/// FIFO. Overflow drops the oldest queued command rather than growing
/// unboundedly — the same discipline as `bc_confluence::PendingEntryQueue`,
/// generalized from signals to commands.
pub struct CommandQueue {
    capacity: usize,
    items: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue { capacity: capacity.max(1), items: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Enqueues a command with an explicit deadline. Commands already past
    /// their deadline are rejected immediately rather than queued, since
    /// they would only be dropped on the next drain anyway.
    pub fn submit(&mut self, command: Command, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Result<Uuid, CommandRejection> {
        if deadline <= now {
            return Err(CommandRejection::DeadlineExceeded);
        }
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        let id = Uuid::new_v4();
        self.items.push_back(QueuedCommand { id, command, deadline });
        Ok(id)
    }

    /// Drains every queued command, partitioning each into either a
    /// `(command, id)` ready to execute or an expired-deadline rejection the
    /// caller reports back to the submitter. Called once at the start of
    /// each iteration (§5: "serialized into a bounded command queue drained
    /// at the start of the next iteration").
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<(QueuedCommand, Result<(), CommandRejection>)> {
        let mut out = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if item.deadline <= now {
                out.push((item, Err(CommandRejection::DeadlineExceeded)));
            } else {
                out.push((item, Ok(())));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn submit_then_drain_returns_in_fifo_order() {
        let mut q = CommandQueue::new(10);
        let now = Utc::now();
        q.submit(Command::Pause, t(5), now).unwrap();
        q.submit(Command::Resume, t(5), now).unwrap();
        let drained = q.drain(now);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0.command, Command::Pause);
        assert_eq!(drained[1].0.command, Command::Resume);
        assert!(drained[0].1.is_ok());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = CommandQueue::new(1);
        let now = Utc::now();
        q.submit(Command::Pause, t(5), now).unwrap();
        q.submit(Command::Resume, t(5), now).unwrap();
        assert_eq!(q.len(), 1);
        let drained = q.drain(now);
        assert_eq!(drained[0].0.command, Command::Resume);
    }

    #[test]
    fn submitting_past_deadline_is_rejected_immediately() {
        let mut q = CommandQueue::new(10);
        let now = Utc::now();
        let err = q.submit(Command::Status, now - chrono::Duration::seconds(1), now).unwrap_err();
        assert_eq!(err, CommandRejection::DeadlineExceeded);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_flags_commands_that_expired_while_queued() {
        let mut q = CommandQueue::new(10);
        let submit_time = Utc::now();
        q.submit(Command::Status, submit_time + chrono::Duration::seconds(1), submit_time).unwrap();
        let drained = q.drain(submit_time + chrono::Duration::seconds(2));
        assert_eq!(drained[0].1, Err(CommandRejection::DeadlineExceeded));
    }
}
