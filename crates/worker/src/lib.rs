//! Fan-out worker internals: intake of match-event batches from the queue.

pub mod queue;
