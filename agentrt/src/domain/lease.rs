//! Active execution grants issued by the admission controller (C9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Reserved,
    Consumed,
    Released,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub tool_name: String,
    pub additional_requests: u32,
    pub additional_llm: u32,
    pub expires_at_ms: u64,
    pub state: LeaseState,
}

impl Lease {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, additional_requests: u32, additional_llm: u32, expires_at_ms: u64) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            additional_requests,
            additional_llm,
            expires_at_ms,
            state: LeaseState::Reserved,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_expired_compares_against_expires_at() {
        let l = Lease::new("l1", "read_file", 1, 1, 1_000);
        assert!(!l.is_expired(999));
        assert!(l.is_expired(1_001));
    }
}
