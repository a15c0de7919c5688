//! JSON-lines file connector and schema inference for the `ingest` command.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ledgerflow_core::{ConnectionConfig, DataSource, FieldDef, FieldType, IngestionJob, SourceSchema, SourceType};
use ledgerflow_engine::{ConnectorError, RecordStream, SourceConnector};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Streams one JSON object per line from the file named in the source's
/// [`ConnectionConfig::File`]. Blank lines are ignored.
#[derive(Debug, Default)]
pub struct JsonlFileConnector;

fn file_path(source: &DataSource) -> Result<PathBuf, ConnectorError> {
    match &source.connection {
        ConnectionConfig::File(file) if file.format == "jsonl" => Ok(PathBuf::from(&file.path)),
        ConnectionConfig::File(file) => Err(ConnectorError::Unavailable(format!(
            "unsupported file format '{}'",
            file.format
        ))),
        other => Err(ConnectorError::Unsupported(other.source_type())),
    }
}

#[async_trait]
impl SourceConnector for JsonlFileConnector {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    async fn test_connection(&self, source: &DataSource) -> Result<bool, ConnectorError> {
        let path = file_path(source)?;
        Ok(tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn open(&self, source: &DataSource, job: &IngestionJob) -> Result<RecordStream, ConnectorError> {
        let path = file_path(source)?;
        let file = File::open(&path)
            .await
            .map_err(|e| ConnectorError::Unavailable(format!("{}: {e}", path.display())))?;
        debug!(job_id = %job.id, path = %path.display(), "jsonl stream opened");

        let lines = BufReader::new(file).lines();
        let records = stream::unfold((lines, 0usize), |(mut lines, mut line_no)| async move {
            loop {
                line_no += 1;
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let item = serde_json::from_str::<Value>(&line)
                            .map_err(|e| ConnectorError::Read(format!("line {line_no}: {e}")));
                        return Some((item, (lines, line_no)));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        return Some((
                            Err(ConnectorError::Read(format!("line {line_no}: {e}"))),
                            (lines, line_no),
                        ))
                    }
                }
            }
        });
        Ok(records.boxed())
    }

    async fn record_count_hint(&self, source: &DataSource) -> Option<u64> {
        let path = file_path(source).ok()?;
        let content = tokio::fs::read_to_string(path).await.ok()?;
        Some(content.lines().filter(|l| !l.trim().is_empty()).count() as u64)
    }
}

fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
        Value::Number(_) => FieldType::Number,
        Value::String(_) => FieldType::String,
        Value::Array(_) => FieldType::Array,
        Value::Object(_) => FieldType::Object,
        Value::Null => FieldType::Any,
    }
}

/// Build a schema from the first non-blank line of `path`.
///
/// Field types come from that line's values; `key_fields` become the
/// primary key and are marked required.
pub async fn infer_schema(path: &Path, key_fields: &[String]) -> anyhow::Result<SourceSchema> {
    let content = tokio::fs::read_to_string(path).await?;
    let first = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} has no records", path.display()))?;
    let Value::Object(sample) = serde_json::from_str::<Value>(first)? else {
        anyhow::bail!("first record of {} is not a JSON object", path.display());
    };

    let fields = sample
        .iter()
        .map(|(name, value)| {
            let field = FieldDef::new(name.as_str(), infer_type(value));
            if key_fields.contains(name) {
                field.required()
            } else {
                field
            }
        })
        .collect();
    Ok(SourceSchema {
        fields,
        primary_key: key_fields.to_vec(),
        tenant_field: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerflow_core::{FileConnection, JobConfig, JobType, Priority};
    use std::io::Write;

    fn source_for(path: &Path) -> DataSource {
        DataSource::new(
            "file",
            "file",
            "t1",
            ConnectionConfig::File(FileConnection {
                path: path.display().to_string(),
                format: "jsonl".into(),
            }),
            SourceSchema::default(),
        )
    }

    fn job() -> IngestionJob {
        IngestionJob::new("file", "t1", JobType::Batch, Priority::Low, JobConfig::default(), Utc::now())
    }

    #[tokio::test]
    async fn streams_objects_and_reports_bad_lines() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"id": 1}}"#).unwrap();
        writeln!(tmp).unwrap();
        writeln!(tmp, "not json").unwrap();
        let source = source_for(tmp.path());

        assert!(JsonlFileConnector.test_connection(&source).await.unwrap());
        assert_eq!(JsonlFileConnector.record_count_hint(&source).await, Some(2));

        let items: Vec<_> = JsonlFileConnector.open(&source, &job()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap()["id"], 1);
        match &items[1] {
            Err(ConnectorError::Read(msg)) => assert!(msg.starts_with("line 3"), "{msg}"),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let source = source_for(Path::new("/nonexistent/ledgerflow.jsonl"));
        assert!(!JsonlFileConnector.test_connection(&source).await.unwrap());
        assert!(matches!(
            JsonlFileConnector.open(&source, &job()).await,
            Err(ConnectorError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn schema_is_inferred_from_first_record() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"id": 7, "price": 2.5, "email": "a@b.c", "tags": []}}"#).unwrap();
        let schema = infer_schema(tmp.path(), &["id".to_string()]).await.unwrap();

        assert_eq!(schema.field("id").unwrap().data_type, FieldType::Integer);
        assert!(schema.field("id").unwrap().required);
        assert_eq!(schema.field("price").unwrap().data_type, FieldType::Number);
        assert_eq!(schema.field("tags").unwrap().data_type, FieldType::Array);
        assert_eq!(schema.primary_key, vec!["id"]);
    }
}
