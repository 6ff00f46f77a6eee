//! Short-lived pairing codes.
//!
//! A channel asks for a code, a member shares it, and another channel redeems
//! it. Pending codes live in memory only; a restart drops them.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::{domain::ChannelId, errors::Error, Result};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Clone, Copy, Debug)]
pub struct PairingConfig {
    pub code_length: usize,
    pub ttl: Duration,
    pub max_attempts: usize,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl: Duration::from_secs(900),
            max_attempts: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    pub code: String,
    /// The channel's previous pending code, now invalid.
    pub replaced: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct PendingPairing {
    channel: ChannelId,
    expires_at: Instant,
}

/// In-memory `code -> channel` map with at most one code per channel.
pub struct PairingRegistry {
    cfg: PairingConfig,
    pending: HashMap<String, PendingPairing>,
    by_channel: HashMap<ChannelId, String>,
}

impl Default for PairingRegistry {
    fn default() -> Self {
        Self::new(PairingConfig::default())
    }
}

impl PairingRegistry {
    pub fn new(cfg: PairingConfig) -> Self {
        Self {
            cfg,
            pending: HashMap::new(),
            by_channel: HashMap::new(),
        }
    }

    pub fn issue_code(&mut self, channel: ChannelId) -> Result<IssuedCode> {
        self.issue_code_with(channel, Instant::now(), random_code)
    }

    /// Issue a code using `generate(len)` as the code source.
    ///
    /// Generation is retried until the candidate is not a pending key, at most
    /// `max_attempts` times. On failure the channel keeps its previous code.
    pub fn issue_code_with(
        &mut self,
        channel: ChannelId,
        now: Instant,
        mut generate: impl FnMut(usize) -> String,
    ) -> Result<IssuedCode> {
        self.purge_expired(now);

        let mut fresh = None;
        for _ in 0..self.cfg.max_attempts {
            let candidate = generate(self.cfg.code_length);
            if !self.pending.contains_key(&candidate) {
                fresh = Some(candidate);
                break;
            }
        }
        let Some(code) = fresh else {
            return Err(Error::CodeSpaceExhausted {
                attempts: self.cfg.max_attempts,
            });
        };

        let replaced = self.by_channel.remove(&channel);
        if let Some(old) = &replaced {
            self.pending.remove(old);
        }

        self.pending.insert(
            code.clone(),
            PendingPairing {
                channel,
                expires_at: now + self.cfg.ttl,
            },
        );
        self.by_channel.insert(channel, code.clone());

        Ok(IssuedCode { code, replaced })
    }

    /// Pure lookup; expired codes resolve as absent.
    pub fn resolve(&self, code: &str) -> Option<ChannelId> {
        self.resolve_at(code, Instant::now())
    }

    pub fn resolve_at(&self, code: &str, now: Instant) -> Option<ChannelId> {
        self.pending
            .get(code)
            .filter(|p| now < p.expires_at)
            .map(|p| p.channel)
    }

    /// Remove a code. Returns whether it was pending; absent codes are a no-op.
    pub fn consume(&mut self, code: &str) -> bool {
        let Some(entry) = self.pending.remove(code) else {
            return false;
        };
        if self.by_channel.get(&entry.channel).map(String::as_str) == Some(code) {
            self.by_channel.remove(&entry.channel);
        }
        true
    }

    pub fn pending_code(&self, channel: ChannelId) -> Option<&str> {
        self.by_channel.get(&channel).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.expires_at)
            .map(|(code, _)| code.clone())
            .collect();
        for code in expired {
            self.consume(&code);
        }
    }
}

/// Codes are shown upper-case; accept whatever case the user typed back.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

fn random_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
