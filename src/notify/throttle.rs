//! Debounce for repeated notifications.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};

/// Messages are keyed on this many leading characters.
pub const KEY_PREFIX_CHARS: usize = 50;

/// Suppresses a message whose leading text was already sent within the cooldown.
///
/// This bounds repeats of the same condition, not total message volume.
#[derive(Debug)]
pub struct NotificationThrottle {
    cooldown: Duration,
    last_sent: HashMap<u64, DateTime<Utc>>,
}

impl NotificationThrottle {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs as i64),
            last_sent: HashMap::new(),
        }
    }

    pub fn should_send(&mut self, message: &str) -> bool {
        self.should_send_at(message, Utc::now())
    }

    /// Decide whether to deliver `message` at `now`, recording it if so.
    pub fn should_send_at(&mut self, message: &str, now: DateTime<Utc>) -> bool {
        let key = content_key(message);

        if let Some(last) = self.last_sent.get(&key) {
            if now - *last < self.cooldown {
                return false;
            }
        }

        self.last_sent.insert(key, now);
        self.prune(now);
        true
    }

    /// Forget entries whose cooldown has long expired.
    fn prune(&mut self, now: DateTime<Utc>) {
        if self.last_sent.len() < 256 {
            return;
        }
        let cooldown = self.cooldown;
        self.last_sent.retain(|_, sent| now - *sent < cooldown);
    }
}

fn content_key(message: &str) -> u64 {
    let prefix: String = message.chars().take(KEY_PREFIX_CHARS).collect();
    let mut hasher = DefaultHasher::new();
    prefix.hash(&mut hasher);
    hasher.finish()
}
