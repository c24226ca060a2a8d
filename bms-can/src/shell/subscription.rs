//! Pending "print the next N frames of id X" request

use std::fmt;

/// Subscription to a frame id; `(0, 0)` is inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogSubscription {
    pub msg_id: u32,
    pub remaining: u32,
}

/// Outcome of delivering one matching frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// More frames are expected
    Pending(u32),
    /// That was the last one; the subscription is now inactive
    Completed(u32),
}

impl LogSubscription {
    pub const INACTIVE: LogSubscription = LogSubscription {
        msg_id: 0,
        remaining: 0,
    };

    pub fn new(msg_id: u32, count: u32) -> Self {
        Self {
            msg_id,
            remaining: count,
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    pub fn matches(&self, frame_id: u32) -> bool {
        self.is_active() && self.msg_id == frame_id
    }

    pub fn clear(&mut self) {
        *self = Self::INACTIVE;
    }

    /// Count one delivered frame
    pub fn deliver(&mut self) -> Delivery {
        let msg_id = self.msg_id;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.clear();
            Delivery::Completed(msg_id)
        } else {
            Delivery::Pending(self.remaining)
        }
    }
}

impl fmt::Display for LogSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_active() {
            write!(
                f,
                "ID {} (0x{:X}), {} message(s) remaining",
                self.msg_id, self.msg_id, self.remaining
            )
        } else {
            write!(f, "inactive")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_counts_down() {
        let mut subscription = LogSubscription::new(769, 2);
        assert!(subscription.matches(769));
        assert!(!subscription.matches(770));

        assert_eq!(subscription.deliver(), Delivery::Pending(1));
        assert_eq!(subscription.deliver(), Delivery::Completed(769));
        assert_eq!(subscription, LogSubscription::INACTIVE);
        assert!(!subscription.matches(769));
    }
}
