//! Generation-stamped seeks.
//!
//! A host may start a seek, start another before the first completes, and
//! see the completions arrive in either order. Each request takes a ticket;
//! only the latest ticket may be applied.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeekTicket {
    pub generation: u64,
    /// Timeline measure index
    pub target: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SeekGate {
    generation: u64,
}

impl SeekGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a seek, superseding every earlier ticket.
    pub fn issue(&mut self, target: usize) -> SeekTicket {
        self.generation += 1;
        SeekTicket {
            generation: self.generation,
            target,
        }
    }

    pub fn is_current(&self, ticket: &SeekTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Make every outstanding ticket stale.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_ticket_is_current() {
        let mut gate = SeekGate::new();
        let first = gate.issue(3);
        let second = gate.issue(7);
        assert!(!gate.is_current(&first));
        assert!(gate.is_current(&second));
        assert_eq!(second.target, 7);
    }

    #[test]
    fn invalidate_stales_outstanding_tickets() {
        let mut gate = SeekGate::new();
        let ticket = gate.issue(1);
        gate.invalidate();
        assert!(!gate.is_current(&ticket));
        assert!(gate.generation() > ticket.generation);
    }
}
