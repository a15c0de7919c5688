//! [`HashChainLedger`]: one append-only chain per tenant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::chain::{compute_link_hash, verify_chain, ChainLink, ChainVerification, GENESIS_HASH};
use crate::error::LedgerError;

type TenantChain = Arc<Mutex<Vec<ChainLink>>>;

/// Per-tenant hash chains.
///
/// The outer map lock is only held to find or create a tenant's chain;
/// appends then serialize on that tenant's own mutex, so tenants never
/// contend with each other and one tenant's links are strictly ordered.
#[derive(Debug, Default)]
pub struct HashChainLedger {
    chains: RwLock<HashMap<String, TenantChain>>,
}

impl HashChainLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant_chain(&self, tenant_id: &str) -> Result<TenantChain, LedgerError> {
        {
            let chains = self
                .chains
                .read()
                .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?;
            if let Some(chain) = chains.get(tenant_id) {
                return Ok(Arc::clone(chain));
            }
        }
        let mut chains = self
            .chains
            .write()
            .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?;
        Ok(Arc::clone(chains.entry(tenant_id.to_string()).or_default()))
    }

    fn existing_chain(&self, tenant_id: &str) -> Result<Option<TenantChain>, LedgerError> {
        let chains = self
            .chains
            .read()
            .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?;
        Ok(chains.get(tenant_id).cloned())
    }

    /// Extend `tenant_id`'s chain by one link.
    ///
    /// Not idempotent: every call appends. Call exactly once per finalized record.
    pub fn append(
        &self,
        tenant_id: &str,
        record_hash: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ChainLink, LedgerError> {
        let chain = self.tenant_chain(tenant_id)?;
        let mut links = chain
            .lock()
            .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?;

        let previous_hash = links
            .last()
            .map(|l| l.link_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let link = ChainLink {
            sequence: links.len() as u64,
            record_hash: record_hash.to_string(),
            link_hash: compute_link_hash(record_hash, &previous_hash, timestamp),
            previous_hash,
            timestamp,
        };
        links.push(link.clone());

        debug!(tenant_id = %tenant_id, sequence = link.sequence, "chain link appended");
        Ok(link)
    }

    /// Ordered copy of the tenant's links (empty for unknown tenants).
    pub fn chain(&self, tenant_id: &str) -> Result<Vec<ChainLink>, LedgerError> {
        match self.existing_chain(tenant_id)? {
            Some(chain) => Ok(chain
                .lock()
                .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?
                .clone()),
            None => Ok(Vec::new()),
        }
    }

    /// Latest link hash for the tenant, or the genesis hash.
    pub fn head(&self, tenant_id: &str) -> Result<String, LedgerError> {
        Ok(self
            .chain(tenant_id)?
            .last()
            .map(|l| l.link_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    pub fn len(&self, tenant_id: &str) -> Result<usize, LedgerError> {
        match self.existing_chain(tenant_id)? {
            Some(chain) => Ok(chain
                .lock()
                .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?
                .len()),
            None => Ok(0),
        }
    }

    /// Tenants with at least one chain, sorted.
    pub fn tenants(&self) -> Result<Vec<String>, LedgerError> {
        let chains = self
            .chains
            .read()
            .map_err(|e| LedgerError::LockPoisoned(e.to_string()))?;
        let mut tenants: Vec<String> = chains.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }

    /// Recompute the tenant's chain; a broken chain is an error.
    pub fn verify(&self, tenant_id: &str) -> Result<ChainVerification, LedgerError> {
        let links = self.chain(tenant_id)?;
        let verification = verify_chain(&links);
        match verification.broken_at {
            Some(index) => Err(LedgerError::ChainBroken {
                tenant_id: tenant_id.to_string(),
                index,
                reason: verification.reason.unwrap_or_default(),
            }),
            None => Ok(verification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_link_builds_on_genesis() {
        let ledger = HashChainLedger::new();
        let link = ledger.append("t1", "r1", Utc::now()).unwrap();
        assert_eq!(link.sequence, 0);
        assert_eq!(link.previous_hash, GENESIS_HASH);
        assert_eq!(ledger.head("t1").unwrap(), link.link_hash);
    }

    #[test]
    fn tenants_are_isolated() {
        let ledger = HashChainLedger::new();
        let a1 = ledger.append("a", "r1", Utc::now()).unwrap();
        let b1 = ledger.append("b", "r1", Utc::now()).unwrap();
        let a2 = ledger.append("a", "r2", Utc::now()).unwrap();

        assert_eq!(b1.previous_hash, GENESIS_HASH);
        assert_eq!(a2.previous_hash, a1.link_hash);
        assert_eq!(ledger.len("a").unwrap(), 2);
        assert_eq!(ledger.len("b").unwrap(), 1);
        assert_eq!(ledger.tenants().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_tenant_has_empty_chain() {
        let ledger = HashChainLedger::new();
        assert!(ledger.chain("nobody").unwrap().is_empty());
        assert_eq!(ledger.head("nobody").unwrap(), GENESIS_HASH);
        assert!(ledger.verify("nobody").unwrap().valid);
    }

    #[test]
    fn same_hash_appended_twice_extends_chain() {
        let ledger = HashChainLedger::new();
        let now = Utc::now();
        let l1 = ledger.append("t", "same", now).unwrap();
        let l2 = ledger.append("t", "same", now).unwrap();
        assert_ne!(l1.link_hash, l2.link_hash);
        assert_eq!(ledger.len("t").unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_stay_linear() {
        let ledger = Arc::new(HashChainLedger::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.append("t1", &format!("rec-{i}"), Utc::now()).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let verification = ledger.verify("t1").unwrap();
        assert!(verification.valid);
        assert_eq!(verification.length, 64);
    }
}
