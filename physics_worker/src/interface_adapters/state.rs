use std::sync::atomic::{AtomicU64, Ordering};

pub struct AppState {
    // Bound on serialized messages queued for one socket writer.
    pub outbound_capacity: usize,
    // Source of connection ids for log correlation.
    next_conn_id: AtomicU64,
}

impl AppState {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            outbound_capacity,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}
