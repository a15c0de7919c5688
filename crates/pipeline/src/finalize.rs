//! Record finalisation: canonical encoding, checksums, classification and
//! sealing into the tenant hash chain.

use chrono::{DateTime, SecondsFormat, Utc};
use ledgerflow_core::{Classification, DataRecord, SourceSchema};
use ledgerflow_ledger::{HashChainLedger, LedgerError};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compact JSON with object keys sorted at every level.
///
/// Independent of how `serde_json::Map` orders keys, so hashes are stable
/// whatever features the map was built with.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of the canonical payload.
pub fn checksum(data: &Value) -> String {
    sha256_hex(&[&canonical_json(data)])
}

/// Hash handed to the ledger. Binds the payload checksum to its tenant,
/// source, job and ingestion time.
pub fn content_hash(
    tenant_id: &str,
    source_id: &str,
    job_id: &str,
    checksum: &str,
    ingested_at: DateTime<Utc>,
) -> String {
    let at = ingested_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    sha256_hex(&[tenant_id, "|", source_id, "|", job_id, "|", checksum, "|", &at])
}

/// Restricted when an encrypted field is present, Confidential when any PII
/// was detected, Internal otherwise.
pub fn classify(data: &Value, schema: &SourceSchema, pii_fields: &[String]) -> Classification {
    let encrypted_present = data.as_object().is_some_and(|map| {
        schema
            .fields
            .iter()
            .any(|f| f.encrypted && crate::fields::is_present(map, &f.name))
    });
    if encrypted_present {
        Classification::Restricted
    } else if !pii_fields.is_empty() {
        Classification::Confidential
    } else {
        Classification::Internal
    }
}

/// Append the record's hash to its tenant chain and stamp the link on it.
pub fn seal(mut record: DataRecord, ledger: &HashChainLedger) -> Result<DataRecord, LedgerError> {
    let link = ledger.append(&record.tenant_id, &record.hash, record.ingested_at)?;
    record.previous_hash = link.previous_hash;
    record.chain_hash = link.link_hash;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledgerflow_core::{FieldDef, FieldType, QualityMetrics, RecordMetadata};
    use ledgerflow_ledger::GENESIS_HASH;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": 1, "a": {"d": [2, {"z": 1, "y": 0}], "c": "é\"q"}});
        assert_eq!(canonical_json(&v), r#"{"a":{"c":"é\"q","d":[2,{"y":0,"z":1}]},"b":1}"#);
    }

    #[test]
    fn checksum_is_order_independent() {
        assert_eq!(checksum(&json!({"a": 1, "b": 2})), checksum(&json!({"b": 2, "a": 1})));
        assert_ne!(checksum(&json!({"a": 1})), checksum(&json!({"a": 2})));
    }

    #[test]
    fn content_hash_binds_context() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let base = content_hash("t1", "s1", "j1", "abc", at);
        assert_eq!(base.len(), 64);
        assert_ne!(base, content_hash("t2", "s1", "j1", "abc", at));
        assert_ne!(base, content_hash("t1", "s1", "j2", "abc", at));
        assert_ne!(base, content_hash("t1", "s1", "j1", "abc", at + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn classification_levels() {
        let schema = SourceSchema {
            fields: vec![FieldDef::new("card", FieldType::String).encrypted()],
            ..Default::default()
        };
        assert_eq!(classify(&json!({"card": "x"}), &schema, &[]), Classification::Restricted);
        assert_eq!(
            classify(&json!({"email": "x"}), &schema, &["email".into()]),
            Classification::Confidential
        );
        assert_eq!(classify(&json!({"n": 1}), &schema, &[]), Classification::Internal);
    }

    #[test]
    fn seal_links_records_in_order() {
        let ledger = HashChainLedger::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = |hash: &str| DataRecord {
            id: hash.into(),
            tenant_id: "t1".into(),
            source_id: "s1".into(),
            job_id: "j1".into(),
            data: json!({}),
            metadata: RecordMetadata {
                version: 1,
                checksum: String::new(),
                pii_fields: vec![],
                classification: Classification::Internal,
                retention_days: 365,
                legal_hold: false,
            },
            quality: QualityMetrics::perfect(),
            hash: hash.into(),
            previous_hash: String::new(),
            chain_hash: String::new(),
            ingested_at: at,
        };
        let first = seal(record("h1"), &ledger).unwrap();
        let second = seal(record("h2"), &ledger).unwrap();
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.chain_hash);
        assert_eq!(ledger.head("t1").unwrap(), second.chain_hash);
    }
}
