/**
 * RESULT STORE - Journal durable des mesures de débit
 *
 * RÔLE :
 * Persiste chaque ThroughputResult dans un tableau JSON lisible à la main
 * (experiment_results.json) et le relit pour l'API /results.
 *
 * FONCTIONNEMENT :
 * - append : verrou exclusif, relecture complète, ajout, réécriture complète
 * - query  : lecture complète + filtre optionnel par experiment_id
 * - fichier absent = journal vide
 * - fichier corrompu à l'écriture = journal vide (warning), jamais fatal
 * - entrées existantes recopiées telles quelles (anciens formats compris)
 *
 * LIMITES :
 * La réécriture complète coûte O(n) par mesure. Acceptable pour quelques
 * milliers d'entrées ; au-delà, passer à un journal JSON-lines en append
 * avec compaction périodique.
 */

use crate::models::ThroughputResult;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on result log: {0}")]
    Io(#[from] std::io::Error),
    #[error("result log is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    /// Distinct from the experiment lock: persisting never blocks status reads.
    write_lock: Mutex<()>,
}

impl ResultStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing entries are carried over as raw JSON, untouched, whatever
    /// their shape. Only a log that is not a JSON array is started afresh.
    pub async fn append(&self, result: &ThroughputResult) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut entries: Vec<Value> = match self.read_raw().await {
            Ok(None) => Vec::new(),
            Ok(Some(content)) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "result log is not a JSON array, starting a new one");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "result log unreadable, starting a new one");
                Vec::new()
            }
        };
        entries.push(serde_json::to_value(result)?);

        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, json).await?;
        debug!(
            experiment_id = %result.experiment_id,
            host = %result.hostname,
            total = entries.len(),
            "result persisted"
        );
        Ok(())
    }

    pub async fn query(&self, experiment_id: Option<&str>) -> Result<Vec<ThroughputResult>, StoreError> {
        let entries: Vec<ThroughputResult> = match self.read_raw().await? {
            Some(content) => serde_json::from_str(&content)?,
            None => Vec::new(),
        };
        Ok(match experiment_id {
            Some(id) => entries.into_iter().filter(|r| r.experiment_id == id).collect(),
            None => entries,
        })
    }

    /// `None` when the log does not exist yet or is blank.
    async fn read_raw(&self) -> Result<Option<String>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn result(id: &str, host: &str, mbps: f64) -> ThroughputResult {
        ThroughputResult {
            experiment_id: id.into(),
            hostname: host.into(),
            address: format!("10.1.1.{}", host.len()),
            protocol: Protocol::Udp,
            bitrate: "10M".into(),
            throughput: mbps,
            start_time: "2024-05-01T10:00:00Z".into(),
            end_time: "2024-05-01T10:01:00.123456789Z".into(),
            duration: 60,
        }
    }

    fn store_in(dir: &TempDir) -> ResultStore {
        ResultStore::new(dir.path().join("experiment_results.json"))
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.query(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_returns_exactly_what_was_appended() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a1 = result("exp_1", "h1", 93.812);
        let b1 = result("exp_2", "h1", 0.0);
        let a2 = result("exp_1", "h2", 4.987_654_321);

        for r in [&a1, &b1, &a2] {
            store.append(r).await.unwrap();
        }

        assert_eq!(store.query(Some("exp_1")).await.unwrap(), vec![a1.clone(), a2.clone()]);
        assert_eq!(store.query(Some("exp_2")).await.unwrap(), vec![b1.clone()]);
        assert_eq!(store.query(None).await.unwrap(), vec![a1, b1, a2]);
        assert!(store.query(Some("exp_3")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_log_is_replaced_on_append_but_reported_on_query() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "[{\"experiment_id\": ").unwrap();

        assert!(matches!(store.query(None).await, Err(StoreError::Corrupt(_))));

        let r = result("exp_1", "h1", 12.0);
        store.append(&r).await.unwrap();
        assert_eq!(store.query(None).await.unwrap(), vec![r]);
    }

    #[tokio::test]
    async fn legacy_entries_survive_append() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let legacy = serde_json::json!([{
            "experiment_id": "exp_1", "hostname": "h3", "ip": "10.2.1.10",
            "protocol": "udp", "bitrate": "20M", "throughput": 19.873,
            "start_time": "2024-05-01T10:00:00", "end_time": "2024-05-01T10:00:30",
            "duration": 30
        }]);
        std::fs::write(store.path(), legacy.to_string()).unwrap();

        store.append(&result("exp_2", "h1", 7.0)).await.unwrap();

        let raw: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0], legacy[0]);

        let old = store.query(Some("exp_1")).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].protocol, Protocol::Udp);
        assert_eq!(old[0].address, "10.2.1.10");
        assert_eq!(store.query(Some("exp_2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(&result("exp_1", &format!("h{i}"), i as f64)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = store.query(Some("exp_1")).await.unwrap();
        assert_eq!(stored.len(), 20);
    }

    #[tokio::test]
    async fn log_stays_human_readable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&result("exp_1", "h1", 1.5)).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("[\n"));
        assert!(text.contains("\"hostname\": \"h1\""));
    }
}
