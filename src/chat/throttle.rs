// Minimum interval between chat submissions.

/// Rejects a send that comes too soon after the previous accepted one.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    min_interval_ms: i64,
    last_send: Option<i64>,
}

impl SendThrottle {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms,
            last_send: None,
        }
    }

    /// Record `now` as a send and return `Ok`, or return the remaining wait in ms.
    pub fn check(&mut self, now: i64) -> Result<(), i64> {
        if let Some(last) = self.last_send {
            let elapsed = now - last;
            if elapsed < self.min_interval_ms {
                return Err(self.min_interval_ms - elapsed);
            }
        }
        self.last_send = Some(now);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.last_send = None;
    }
}

/// Whole seconds to show in a "wait N s" hint (rounded up, at least 1).
pub fn wait_hint_secs(wait_ms: i64) -> u64 {
    ((wait_ms.max(1) + 999) / 1000) as u64
}
