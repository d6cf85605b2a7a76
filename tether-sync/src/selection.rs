//! Which member the user is looking at, and whether an async result for
//! an earlier selection is still wanted.
//!
//! A lookup takes a [`SelectionTicket`] when it starts and compares it with
//! the live [`Selection`] when it completes. Every `select`/`clear` bumps
//! the generation, so re-selecting the same member still invalidates older
//! tickets.

/// Snapshot of the selection at the moment a lookup started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    name: Option<String>,
    generation: u64,
}

impl SelectionTicket {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// The live selection.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    current: Option<String>,
    generation: u64,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, name: impl Into<String>) -> SelectionTicket {
        self.current = Some(name.into());
        self.generation += 1;
        self.ticket()
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.generation += 1;
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Snapshot the current selection.
    pub fn ticket(&self) -> SelectionTicket {
        SelectionTicket {
            name: self.current.clone(),
            generation: self.generation,
        }
    }

    /// True if nothing changed since `ticket` was taken.
    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        ticket.generation == self.generation && ticket.name == self.current
    }
}
