//! Unit command plumbing
//!
//! Behaviors never touch an avatar directly; they emit `UnitCommand`s into a
//! `CommandSink`. The stock sink is a bounded crossbeam channel drained by the
//! unit at the start of its next step.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::zone::Direction;

/// Movement / firing intent for one unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitCommand {
    /// Start (or keep) moving in a direction, facing it
    Move(Direction),
    /// Turn in place
    Face(Direction),
    /// Fraction of max speed used by subsequent movement, 0..=1
    SpeedFactor(f32),
    /// Fire the equipped weapon along the current facing
    Fire,
    /// Stop moving
    Stop,
}

/// Receiver of unit commands
pub trait CommandSink: Send + Sync {
    fn send(&self, command: UnitCommand);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandQueueError {
    #[error("Command queue is full")]
    Full,
    #[error("Command queue disconnected")]
    Disconnected,
}

/// Bounded command channel
///
/// Any number of senders can push without blocking; the owning unit drains
/// every pending command once per step.
pub struct CommandQueue {
    sender: Sender<UnitCommand>,
    receiver: Receiver<UnitCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Cloneable sender handle
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Try to queue a command (non-blocking)
    #[inline]
    pub fn try_push(&self, command: UnitCommand) -> Result<(), CommandQueueError> {
        push(&self.sender, command)
    }

    /// Drain all pending commands, oldest first
    pub fn drain(&self) -> Vec<UnitCommand> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        // A behavior emits at most a handful of commands per tick
        Self::new(64)
    }
}

impl CommandSink for CommandQueue {
    fn send(&self, command: UnitCommand) {
        if let Err(e) = self.try_push(command) {
            tracing::debug!(?command, "Dropped unit command: {}", e);
        }
    }
}

/// Cloneable sending half of a `CommandQueue`
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<UnitCommand>,
}

impl CommandSender {
    #[inline]
    pub fn try_send(&self, command: UnitCommand) -> Result<(), CommandQueueError> {
        push(&self.sender, command)
    }
}

impl CommandSink for CommandSender {
    fn send(&self, command: UnitCommand) {
        if let Err(e) = self.try_send(command) {
            tracing::debug!(?command, "Dropped unit command: {}", e);
        }
    }
}

#[inline]
fn push(sender: &Sender<UnitCommand>, command: UnitCommand) -> Result<(), CommandQueueError> {
    sender.try_send(command).map_err(|e| match e {
        TrySendError::Full(_) => CommandQueueError::Full,
        TrySendError::Disconnected(_) => CommandQueueError::Disconnected,
    })
}
