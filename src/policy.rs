//! Content-security collaborator seam.
//!
//! The relay consumes access control, rate limiting, suspicious-pattern
//! flagging, and untrusted-content wrapping as a black box behind this
//! trait. `StaticPolicy` is the built-in wiring: a static allow-list, a
//! fixed-window per-key rate limiter, and boundary-marker wrapping.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

pub const EXTERNAL_CONTENT_BEGIN: &str = "<<<EXTERNAL_MESSAGE_BEGIN>>>";
pub const EXTERNAL_CONTENT_END: &str = "<<<EXTERNAL_MESSAGE_END>>>";

/// Untrusted inbound content plus the source metadata forwarded with it.
#[derive(Debug, Clone)]
pub struct ExternalContent<'a> {
    pub text: &'a str,
    pub source: &'a str,
    pub user: &'a str,
    pub channel: &'a str,
    pub thread_ts: Option<&'a str>,
    /// Opaque reply handle the agent can use with the local `/reply` API.
    pub thread_id: &'a str,
    /// Names of suspicious patterns detected in `text`, if any.
    pub suspicious: &'a [String],
}

pub trait ContentPolicy: Send + Sync {
    fn is_allowed(&self, user_id: &str) -> bool;
    fn check_rate(&self, key: &str) -> bool;
    fn detect_suspicious_patterns(&self, text: &str) -> Vec<String>;
    fn wrap_external_content(&self, content: &ExternalContent<'_>) -> String;
}

pub struct StaticPolicy {
    /// `None` allows every user.
    allowed_users: Option<HashSet<String>>,
    rate_window: Duration,
    rate_max: u32,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl StaticPolicy {
    pub fn new(allowed_users: Option<HashSet<String>>, rate_max_per_minute: u32) -> Self {
        Self {
            allowed_users,
            rate_window: Duration::from_secs(60),
            rate_max: rate_max_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl ContentPolicy for StaticPolicy {
    fn is_allowed(&self, user_id: &str) -> bool {
        match &self.allowed_users {
            Some(users) => users.contains(user_id),
            None => true,
        }
    }

    fn check_rate(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = entry_for(&mut windows, key, now, self.rate_window);
        if entry.1 >= self.rate_max {
            return false;
        }
        entry.1 += 1;
        true
    }

    fn detect_suspicious_patterns(&self, _text: &str) -> Vec<String> {
        // Heuristics live in the external policy module; the static wiring
        // flags nothing.
        Vec::new()
    }

    fn wrap_external_content(&self, content: &ExternalContent<'_>) -> String {
        let mut out = String::new();
        out.push_str(EXTERNAL_CONTENT_BEGIN);
        out.push('\n');
        out.push_str(&format!("source: {}\n", content.source));
        out.push_str(&format!("user: {}\n", content.user));
        out.push_str(&format!("channel: {}\n", content.channel));
        if let Some(thread_ts) = content.thread_ts {
            out.push_str(&format!("thread_ts: {thread_ts}\n"));
        }
        out.push_str(&format!("reply_thread_id: {}\n", content.thread_id));
        if !content.suspicious.is_empty() {
            out.push_str(&format!("flags: {}\n", content.suspicious.join(", ")));
        }
        out.push('\n');
        out.push_str(content.text);
        out.push('\n');
        out.push_str(EXTERNAL_CONTENT_END);
        out
    }
}

fn entry_for<'a>(
    windows: &'a mut HashMap<String, (Instant, u32)>,
    key: &str,
    now: Instant,
    window: Duration,
) -> &'a mut (Instant, u32) {
    let entry = windows
        .entry(key.to_string())
        .or_insert_with(|| (now, 0));
    if now.duration_since(entry.0) >= window {
        *entry = (now, 0);
    }
    entry
}
