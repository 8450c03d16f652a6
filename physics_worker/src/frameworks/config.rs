use std::{env, time::Duration};

// Runtime/server constants (not simulation tuning).

pub fn http_port() -> u16 {
    env::var("PHYSICS_WORKER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3010)
}

pub fn step_timeout() -> Duration {
    let millis = env::var("STEP_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(5000);
    Duration::from_millis(millis)
}

pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
