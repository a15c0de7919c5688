use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `previous_hash` of the first link in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One link of a tenant chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Zero-based position in the tenant's chain.
    pub sequence: u64,
    pub record_hash: String,
    pub previous_hash: String,
    pub link_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of recomputing a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub length: usize,
    /// Link hash of the last verified link.
    pub head: Option<String>,
    /// Index of the first link that failed.
    pub broken_at: Option<usize>,
    pub reason: Option<String>,
}

impl ChainVerification {
    fn ok(links: &[ChainLink]) -> Self {
        Self {
            valid: true,
            length: links.len(),
            head: links.last().map(|l| l.link_hash.clone()),
            broken_at: None,
            reason: None,
        }
    }

    fn broken(links: &[ChainLink], index: usize, reason: String) -> Self {
        Self {
            valid: false,
            length: links.len(),
            head: index.checked_sub(1).map(|i| links[i].link_hash.clone()),
            broken_at: Some(index),
            reason: Some(reason),
        }
    }
}

/// Compute the SHA-256 hex link hash.
///
/// The timestamp is encoded as Unix milliseconds in decimal.
pub fn compute_link_hash(record_hash: &str, previous_hash: &str, timestamp: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record_hash.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(timestamp.timestamp_millis().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recompute every link and report the first one that does not match.
///
/// Detects reordering and deletion (sequence / previous-link mismatch) and
/// mutation (recomputed hash mismatch).
pub fn verify_chain(links: &[ChainLink]) -> ChainVerification {
    let mut previous = GENESIS_HASH;
    for (index, link) in links.iter().enumerate() {
        if link.sequence != index as u64 {
            return ChainVerification::broken(
                links,
                index,
                format!("expected sequence {index}, found {}", link.sequence),
            );
        }
        if link.previous_hash != previous {
            return ChainVerification::broken(
                links,
                index,
                "previous link does not match preceding link hash".to_string(),
            );
        }
        let expected = compute_link_hash(&link.record_hash, previous, link.timestamp);
        if link.link_hash != expected {
            return ChainVerification::broken(
                links,
                index,
                "link hash does not match recomputed digest".to_string(),
            );
        }
        previous = &link.link_hash;
    }
    ChainVerification::ok(links)
}

/// Verify the chain and additionally check it was built from `record_hashes`,
/// in order. Catches records mutated or dropped after they were appended.
pub fn verify_record_hashes(links: &[ChainLink], record_hashes: &[String]) -> ChainVerification {
    let verification = verify_chain(links);
    if !verification.valid {
        return verification;
    }
    for (index, link) in links.iter().enumerate() {
        match record_hashes.get(index) {
            Some(hash) if *hash == link.record_hash => {}
            Some(_) => {
                return ChainVerification::broken(links, index, "record hash differs from chained hash".into())
            }
            None => return ChainVerification::broken(links, index, "record missing for chained link".into()),
        }
    }
    if record_hashes.len() > links.len() {
        return ChainVerification::broken(
            links,
            links.len(),
            format!("{} record(s) were never chained", record_hashes.len() - links.len()),
        );
    }
    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn build(hashes: &[&str]) -> Vec<ChainLink> {
        let mut links = Vec::new();
        let mut prev = GENESIS_HASH.to_string();
        for (i, h) in hashes.iter().enumerate() {
            let t = ts(1_700_000_000_000 + i as i64);
            let link_hash = compute_link_hash(h, &prev, t);
            links.push(ChainLink {
                sequence: i as u64,
                record_hash: h.to_string(),
                previous_hash: prev.clone(),
                link_hash: link_hash.clone(),
                timestamp: t,
            });
            prev = link_hash;
        }
        links
    }

    #[test]
    fn link_hash_is_deterministic_and_hex() {
        let a = compute_link_hash("abc", GENESIS_HASH, ts(1));
        let b = compute_link_hash("abc", GENESIS_HASH, ts(1));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn link_hash_depends_on_every_input() {
        let base = compute_link_hash("abc", GENESIS_HASH, ts(1));
        assert_ne!(base, compute_link_hash("abd", GENESIS_HASH, ts(1)));
        assert_ne!(base, compute_link_hash("abc", "ff", ts(1)));
        assert_ne!(base, compute_link_hash("abc", GENESIS_HASH, ts(2)));
    }

    #[test]
    fn empty_chain_is_valid() {
        let v = verify_chain(&[]);
        assert!(v.valid);
        assert_eq!(v.length, 0);
        assert!(v.head.is_none());
    }

    #[test]
    fn intact_chain_verifies() {
        let links = build(&["h1", "h2", "h3"]);
        let v = verify_chain(&links);
        assert!(v.valid);
        assert_eq!(v.head.as_deref(), Some(links[2].link_hash.as_str()));
    }

    #[test]
    fn mutated_record_hash_detected() {
        let mut links = build(&["h1", "h2", "h3"]);
        links[1].record_hash = "evil".into();
        let v = verify_chain(&links);
        assert!(!v.valid);
        assert_eq!(v.broken_at, Some(1));
    }

    #[test]
    fn deletion_detected() {
        let mut links = build(&["h1", "h2", "h3"]);
        links.remove(1);
        let v = verify_chain(&links);
        assert!(!v.valid);
        assert_eq!(v.broken_at, Some(1));
    }

    #[test]
    fn reorder_detected() {
        let mut links = build(&["h1", "h2", "h3"]);
        links.swap(1, 2);
        let v = verify_chain(&links);
        assert!(!v.valid);
        assert_eq!(v.broken_at, Some(1));
    }

    #[test]
    fn record_hashes_must_match_chain() {
        let links = build(&["h1", "h2"]);
        let ok = verify_record_hashes(&links, &["h1".into(), "h2".into()]);
        assert!(ok.valid);

        let mutated = verify_record_hashes(&links, &["h1".into(), "hX".into()]);
        assert_eq!(mutated.broken_at, Some(1));

        let lost = verify_record_hashes(&links, &["h1".into()]);
        assert_eq!(lost.broken_at, Some(1));

        let unchained = verify_record_hashes(&links, &["h1".into(), "h2".into(), "h3".into()]);
        assert!(!unchained.valid);
        assert_eq!(unchained.broken_at, Some(2));
    }
}
