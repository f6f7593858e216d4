use crate::models::UpdateEvent;

/// Merges a newer pending edit into an older one.
pub trait Coalesce {
    fn coalesce(self, newer: Self) -> Self;
}

impl Coalesce for UpdateEvent {
    fn coalesce(self, newer: Self) -> Self {
        Self {
            title: newer.title.or(self.title),
            description: newer.description.or(self.description),
            start_utc: newer.start_utc.or(self.start_utc),
            end_utc: newer.end_utc.or(self.end_utc),
            color: newer.color.or(self.color),
            recurrence: newer.recurrence.or(self.recurrence),
            series_id: newer.series_id.or(self.series_id),
            original_start_utc: newer.original_start_utc.or(self.original_start_utc),
            is_cancelled: newer.is_cancelled.or(self.is_cancelled),
        }
    }
}

/// A request taken off the queue, stamped with its generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket<P> {
    pub generation: u64,
    pub payload: P,
}

/// Single-flight save queue with trailing-edge coalescing.
///
/// At most one request is in flight. Edits arriving meanwhile are merged
/// into one pending request that is sent once the in-flight one finishes.
/// Responses carry the generation they were issued with so a caller can tell
/// whether newer edits have superseded them.
#[derive(Debug, Clone)]
pub struct SaveQueue<P> {
    pending: Option<P>,
    in_flight: Option<u64>,
    generation: u64,
}

impl<P> Default for SaveQueue<P> {
    fn default() -> Self {
        Self {
            pending: None,
            in_flight: None,
            generation: 0,
        }
    }
}

impl<P: Coalesce> SaveQueue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, payload: P) {
        self.pending = Some(match self.pending.take() {
            Some(older) => older.coalesce(payload),
            None => payload,
        });
    }

    /// Takes the pending request if nothing is in flight.
    pub fn begin(&mut self) -> Option<SaveTicket<P>> {
        if self.in_flight.is_some() {
            return None;
        }
        let payload = self.pending.take()?;
        self.generation += 1;
        self.in_flight = Some(self.generation);
        Some(SaveTicket {
            generation: self.generation,
            payload,
        })
    }

    /// Marks the in-flight request done. Returns whether its response is still current.
    pub fn finish(&mut self, generation: u64) -> bool {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }
        self.is_current(generation)
    }

    /// Puts a failed request back in front of anything queued since.
    pub fn fail(&mut self, ticket: SaveTicket<P>) {
        if self.in_flight == Some(ticket.generation) {
            self.in_flight = None;
        }
        self.pending = Some(match self.pending.take() {
            Some(newer) => ticket.payload.coalesce(newer),
            None => ticket.payload,
        });
    }

    /// A response is current when it is the latest issued and nothing newer is queued.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.pending.is_none()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_none()
    }
}
