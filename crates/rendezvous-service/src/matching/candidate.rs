//! Waiting candidates and the compatibility rule.

use common::signaling::{MatchFilters, UserProfile, WaitingRequest};
use common::types::{AccountId, ConnectionId};
use std::collections::{BTreeSet, HashSet, VecDeque};
use tokio::time::Instant;

/// A client currently seeking a random match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub connection_id: ConnectionId,
    pub account_id: Option<AccountId>,
    /// Normalized (trimmed, lowercased, deduplicated) interest tags.
    pub interests: BTreeSet<String>,
    pub filters: MatchFilters,
    pub device_id: String,
    pub profile: UserProfile,
}

impl Candidate {
    /// Build a candidate from a `waiting` frame.
    #[must_use]
    pub fn from_request(
        connection_id: ConnectionId,
        account_id: Option<AccountId>,
        request: WaitingRequest,
    ) -> Self {
        let interests = request
            .interests
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();

        Self {
            connection_id,
            account_id,
            interests,
            filters: request.filters,
            device_id: request.device_id.trim().to_string(),
            profile: request.user_profile,
        }
    }

    /// Whether this candidate's filters admit `other`'s profile.
    #[must_use]
    pub fn accepts(&self, other: &Candidate) -> bool {
        filter_allows(&self.filters.gender, other.profile.gender.as_deref())
            && filter_allows(&self.filters.countries, other.profile.country.as_deref())
    }

    fn shares_device_with(&self, other: &Candidate) -> bool {
        !self.device_id.is_empty() && self.device_id == other.device_id
    }

    /// Sorted intersection of both candidates' interests.
    #[must_use]
    pub fn common_interests(&self, other: &Candidate) -> Vec<String> {
        self.interests
            .intersection(&other.interests)
            .cloned()
            .collect()
    }
}

/// An empty filter places no constraint. A non-empty filter requires the
/// attribute to be present and listed (case-insensitive).
fn filter_allows(allowed: &[String], value: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    value.is_some_and(|value| {
        allowed
            .iter()
            .any(|entry| entry.trim().eq_ignore_ascii_case(value.trim()))
    })
}

/// Symmetric compatibility: both sides' filters admit the other, they are
/// different connections, and they are not on the same device.
#[must_use]
pub fn is_compatible(a: &Candidate, b: &Candidate) -> bool {
    a.connection_id != b.connection_id
        && !a.shares_device_with(b)
        && a.accepts(b)
        && b.accepts(a)
}

#[derive(Debug)]
struct WaitingEntry {
    candidate: Candidate,
    enqueued_at: Instant,
}

/// FIFO pool of waiting candidates. Owned by the coordinator actor.
#[derive(Debug, Default)]
pub struct WaitingPool {
    queue: VecDeque<WaitingEntry>,
    members: HashSet<ConnectionId>,
}

impl WaitingPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a candidate. Returns `false` if it was already waiting.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if !self.members.insert(candidate.connection_id.clone()) {
            return false;
        }
        self.queue.push_back(WaitingEntry {
            candidate,
            enqueued_at: Instant::now(),
        });
        true
    }

    /// Remove a candidate by connection. Idempotent.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Candidate> {
        if !self.members.remove(connection_id) {
            return None;
        }
        let position = self
            .queue
            .iter()
            .position(|entry| &entry.candidate.connection_id == connection_id)?;
        self.queue.remove(position).map(|entry| entry.candidate)
    }

    /// Connection ids in FIFO order, oldest first.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.queue
            .iter()
            .map(|entry| entry.candidate.connection_id.clone())
            .collect()
    }

    /// The longest-waiting candidate compatible with `candidate`.
    #[must_use]
    pub fn oldest_compatible(&self, candidate: &Candidate) -> Option<&Candidate> {
        self.queue
            .iter()
            .map(|entry| &entry.candidate)
            .find(|waiting| is_compatible(candidate, waiting))
    }

    /// How long a candidate has been waiting.
    #[must_use]
    pub fn waited(&self, connection_id: &ConnectionId) -> Option<std::time::Duration> {
        self.queue
            .iter()
            .find(|entry| &entry.candidate.connection_id == connection_id)
            .map(|entry| entry.enqueued_at.elapsed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn candidate(id: &str, gender: &str, country: &str) -> Candidate {
        Candidate::from_request(
            ConnectionId::from(id),
            None,
            WaitingRequest {
                interests: vec![],
                device_id: format!("device-{id}"),
                filters: MatchFilters::default(),
                user_profile: UserProfile {
                    gender: Some(gender.to_string()),
                    country: Some(country.to_string()),
                    avatar_url: None,
                },
            },
        )
    }

    #[test]
    fn test_empty_filters_match_anyone() {
        let a = candidate("a", "male", "DE");
        let b = candidate("b", "female", "FR");
        assert!(is_compatible(&a, &b));
        assert!(is_compatible(&b, &a));
    }

    #[test]
    fn test_filter_exclusion_is_symmetric() {
        let mut a = candidate("a", "male", "DE");
        let b = candidate("b", "male", "FR");
        a.filters.gender = vec!["female".to_string()];

        // A excludes B; B accepts A. Neither direction may match.
        assert!(!is_compatible(&a, &b));
        assert!(!is_compatible(&b, &a));
    }

    #[test]
    fn test_filters_compare_case_insensitively() {
        let mut a = candidate("a", "male", "DE");
        let b = candidate("b", "Female", "fr");
        a.filters.gender = vec!["female".to_string()];
        a.filters.countries = vec!["FR".to_string(), "IT".to_string()];
        assert!(is_compatible(&a, &b));
    }

    #[test]
    fn test_missing_attribute_fails_non_empty_filter() {
        let mut a = candidate("a", "male", "DE");
        let mut b = candidate("b", "female", "FR");
        b.profile.country = None;
        a.filters.countries = vec!["FR".to_string()];
        assert!(!is_compatible(&a, &b));
    }

    #[test]
    fn test_same_device_never_matches() {
        let a = candidate("a", "male", "DE");
        let mut b = candidate("b", "female", "FR");
        b.device_id = a.device_id.clone();
        assert!(!is_compatible(&a, &b));

        // Anonymous devices do not collide
        let mut c = candidate("c", "male", "DE");
        let mut d = candidate("d", "female", "FR");
        c.device_id.clear();
        d.device_id.clear();
        assert!(is_compatible(&c, &d));
    }

    #[test]
    fn test_common_interests_are_normalized_and_sorted() {
        let a = Candidate::from_request(
            ConnectionId::from("a"),
            None,
            WaitingRequest {
                interests: vec![" Music".into(), "chess".into(), "Travel".into()],
                ..WaitingRequest::default()
            },
        );
        let b = Candidate::from_request(
            ConnectionId::from("b"),
            None,
            WaitingRequest {
                interests: vec!["travel".into(), "music".into(), "music".into()],
                ..WaitingRequest::default()
            },
        );
        assert_eq!(a.common_interests(&b), vec!["music", "travel"]);
    }

    #[test]
    fn test_pool_is_fifo_and_idempotent() {
        let mut pool = WaitingPool::new();
        assert!(pool.push(candidate("a", "male", "DE")));
        assert!(pool.push(candidate("b", "male", "DE")));
        assert!(!pool.push(candidate("a", "male", "DE")));
        assert_eq!(
            pool.connection_ids(),
            vec![ConnectionId::from("a"), ConnectionId::from("b")]
        );

        let newcomer = candidate("c", "female", "FR");
        let picked = pool.oldest_compatible(&newcomer).unwrap();
        assert_eq!(picked.connection_id.as_str(), "a");

        assert!(pool.remove(&ConnectionId::from("a")).is_some());
        assert!(pool.remove(&ConnectionId::from("a")).is_none());
        assert_eq!(pool.len(), 1);

        let picked = pool.oldest_compatible(&newcomer).unwrap();
        assert_eq!(picked.connection_id.as_str(), "b");
    }

    #[test]
    fn test_waited_tracks_only_queued_candidates() {
        let mut pool = WaitingPool::new();
        pool.push(candidate("a", "male", "DE"));

        let waited = pool.waited(&ConnectionId::from("a")).unwrap();
        assert!(waited < std::time::Duration::from_secs(5));
        assert!(pool.waited(&ConnectionId::from("b")).is_none());

        pool.remove(&ConnectionId::from("a"));
        assert!(pool.waited(&ConnectionId::from("a")).is_none());
    }
}
