//! The probe worker state machine.
//!
//! `VALIDATE → CONNECTIVITY → RESOLVE → PROBE → {SUCCESS | FAILURE}`, ending
//! in a [`LogEntry`], or abandoned without one when the task was deleted or
//! superseded. Persisting the entry is a separate step ([`NetworkTaskWorker::persist`]).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keepup_config::KeepUpConfig;
use keepup_storage::{StorageError, TaskStore};
use keepup_types::{AccessType, LogEntry, NetworkTask};

use crate::connect::TcpConnectProbe;
use crate::dns::{SystemResolver, host_of};
use crate::download::HttpDownloadProbe;
use crate::message::{self, DownloadReport, FileClause, Outcome};
use crate::ping::SystemPing;
use crate::system::{LocalFiles, SystemConnectivity};
use crate::types::{
    ConnectProbe, Connectivity, DnsResolver, DownloadProbe, DownloadRequest, FileOps, PingProbe,
    ProbeSettings,
};

/// Everything the worker talks to besides the store.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn DnsResolver>,
    pub ping: Arc<dyn PingProbe>,
    pub connect: Arc<dyn ConnectProbe>,
    pub download: Arc<dyn DownloadProbe>,
    pub connectivity: Arc<dyn Connectivity>,
    pub files: Arc<dyn FileOps>,
}

impl Collaborators {
    /// Host-backed collaborators configured from `config`.
    pub fn system(config: &KeepUpConfig) -> Self {
        Self {
            resolver: Arc::new(SystemResolver::new(config.dns_timeout())),
            ping: Arc::new(SystemPing::new(config.ping_timeout())),
            connect: Arc::new(TcpConnectProbe::new(config.connect_timeout())),
            download: Arc::new(HttpDownloadProbe::new(
                config.connect_timeout(),
                Duration::from_secs(config.download.read_timeout_secs),
            )),
            connectivity: Arc::new(SystemConnectivity),
            files: Arc::new(LocalFiles),
        }
    }
}

/// Input shared by all access-type workers.
pub struct ProbeContext<'a> {
    pub task: &'a NetworkTask,
    /// Host part of the task address.
    pub host: &'a str,
    /// Resolved addresses, never empty.
    pub addresses: &'a [IpAddr],
    pub cancel: &'a CancellationToken,
}

/// Protocol action for one access type.
#[async_trait]
pub trait ProbeWorker: Send + Sync {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Outcome;
}

pub struct NullWorker;

#[async_trait]
impl ProbeWorker for NullWorker {
    async fn probe(&self, _ctx: &ProbeContext<'_>) -> Outcome {
        Outcome::failure(message::TYPE_NOT_SPECIFIED)
    }
}

pub struct PingWorker {
    probe: Arc<dyn PingProbe>,
    count: u32,
    packet_size: u32,
}

#[async_trait]
impl ProbeWorker for PingWorker {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Outcome {
        let address = ctx.addresses[0].to_string();
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return Outcome::failure(format!("Ping to {} was stopped.", ctx.host)),
            result = self.probe.ping(&address, self.count, self.packet_size) => result,
        };
        message::ping_outcome(ctx.host, &result)
    }
}

pub struct ConnectWorker {
    probe: Arc<dyn ConnectProbe>,
    count: u32,
}

#[async_trait]
impl ProbeWorker for ConnectWorker {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Outcome {
        let port = ctx.task.port;
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Outcome::failure(format!("Connection to {}:{port} was stopped.", ctx.host));
            }
            outcome = self.probe.connect(ctx.addresses[0], port, self.count) => outcome,
        };
        message::connect_outcome(ctx.host, port, &outcome)
    }
}

pub struct DownloadWorker {
    probe: Arc<dyn DownloadProbe>,
    files: Arc<dyn FileOps>,
    store: Arc<dyn TaskStore>,
    settings: ProbeSettings,
}

impl DownloadWorker {
    /// Trip `invalidated` once the task is deleted or superseded.
    async fn watch_validity(
        store: Arc<dyn TaskStore>,
        task: NetworkTask,
        every: Duration,
        invalidated: CancellationToken,
    ) {
        loop {
            tokio::time::sleep(every).await;
            match is_current(store.as_ref(), &task).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = task.id, "Task became invalid during download");
                    invalidated.cancel();
                    return;
                }
                Err(e) => warn!(task_id = task.id, "Validity check failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl ProbeWorker for DownloadWorker {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Outcome {
        let invalidated = CancellationToken::new();
        let watcher = tokio::spawn(Self::watch_validity(
            self.store.clone(),
            ctx.task.clone(),
            self.settings.validity_check_interval,
            invalidated.clone(),
        ));

        let request = DownloadRequest {
            url: ctx.task.address.clone(),
            destination: self.files.resolve_download_destination(&self.settings),
            stop: ctx.cancel.clone(),
            invalidated: invalidated.clone(),
        };
        let result = self.probe.download(request).await;
        watcher.abort();

        let file = match &result.file {
            Some(path) if self.files.exists(path) => {
                if self.settings.keep_downloaded_files {
                    Some(FileClause::Kept(path.clone()))
                } else if self.files.delete(path) {
                    Some(FileClause::Deleted)
                } else {
                    Some(FileClause::DeletionFailed)
                }
            }
            _ => None,
        };

        message::download_outcome(&DownloadReport {
            url: &ctx.task.address,
            connected: result.connected,
            succeeded: result.succeeded,
            http_code: result.http_code,
            http_message: result.http_message.as_deref(),
            stopped: ctx.cancel.is_cancelled(),
            invalidated: invalidated.is_cancelled(),
            file,
            elapsed: result.elapsed,
            error: result.error.as_ref(),
        })
    }
}

/// Whether `task` still exists with the same generation id.
pub async fn is_current(store: &dyn TaskStore, task: &NetworkTask) -> Result<bool, StorageError> {
    Ok(store
        .read_task(task.id)
        .await?
        .is_some_and(|current| current.scheduler_id == task.scheduler_id))
}

/// Runs one probe attempt for a task snapshot.
pub struct NetworkTaskWorker {
    store: Arc<dyn TaskStore>,
    connectivity: Arc<dyn Connectivity>,
    resolver: Arc<dyn DnsResolver>,
    none: NullWorker,
    ping: PingWorker,
    connect: ConnectWorker,
    download: DownloadWorker,
}

impl NetworkTaskWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        collaborators: Collaborators,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            connectivity: collaborators.connectivity,
            resolver: collaborators.resolver,
            none: NullWorker,
            ping: PingWorker {
                probe: collaborators.ping,
                count: settings.ping_count,
                packet_size: settings.ping_packet_size,
            },
            connect: ConnectWorker {
                probe: collaborators.connect,
                count: settings.connect_count,
            },
            download: DownloadWorker {
                probe: collaborators.download,
                files: collaborators.files,
                store: store.clone(),
                settings,
            },
            store,
        }
    }

    fn worker_for(&self, access_type: AccessType) -> &dyn ProbeWorker {
        match access_type {
            AccessType::None => &self.none,
            AccessType::Ping => &self.ping,
            AccessType::Connect => &self.connect,
            AccessType::Download => &self.download,
        }
    }

    /// Probe once. `Ok(None)` means the execution was abandoned: the task is
    /// gone, superseded, or the probe was cancelled. Only a storage failure
    /// while validating is returned as an error.
    pub async fn execute(
        &self,
        task: &NetworkTask,
        cancel: &CancellationToken,
    ) -> Result<Option<LogEntry>, StorageError> {
        if !is_current(self.store.as_ref(), task).await? {
            debug!(
                task_id = task.id,
                scheduler_id = task.scheduler_id,
                "Task deleted or superseded, abandoning execution"
            );
            return Ok(None);
        }

        let outcome = match self.run_stages(task, cancel).await {
            Some(outcome) => outcome,
            None => {
                debug!(task_id = task.id, "Probe cancelled, no log entry written");
                return Ok(None);
            }
        };

        Ok(Some(LogEntry::new(
            task.id,
            chrono::Utc::now().timestamp_millis(),
            outcome.success,
            outcome.message,
        )))
    }

    async fn run_stages(&self, task: &NetworkTask, cancel: &CancellationToken) -> Option<Outcome> {
        if !self.connectivity.is_connected() {
            return Some(Outcome::failure(message::NO_NETWORK));
        }
        if task.wifi_only && !self.connectivity.is_wifi() {
            return Some(Outcome::failure(message::NO_WIFI));
        }

        let host = host_of(&task.address);
        let addresses = tokio::select! {
            _ = cancel.cancelled() => return None,
            resolved = self.resolver.resolve(&host) => resolved,
        };
        let addresses = match addresses {
            Ok(addresses) if !addresses.is_empty() => addresses,
            Ok(_) => {
                let error = crate::error::ProbeError::NoAddress(host.clone());
                return Some(message::dns_failure(&host, &error));
            }
            Err(e) => return Some(message::dns_failure(&host, &e)),
        };

        let ctx = ProbeContext {
            task,
            host: &host,
            addresses: &addresses,
            cancel,
        };
        let outcome = self.worker_for(task.access_type).probe(&ctx).await;

        // Only downloads report a stop; other probes drop their result.
        if cancel.is_cancelled() && task.access_type != AccessType::Download {
            return None;
        }
        Some(outcome)
    }

    /// Store the entry (evicting old ones) and update the failure counter.
    pub async fn persist(
        &self,
        task: &NetworkTask,
        entry: &LogEntry,
    ) -> Result<LogEntry, StorageError> {
        let stored = self.store.insert_and_trim_log(entry).await?;
        if entry.success {
            self.store.reset_failure_count(task.id).await?;
        } else {
            let failures = self.store.increment_failure_count(task.id).await?;
            if task.notify_on_failure {
                warn!(
                    task_id = task.id,
                    address = %task.address,
                    failures,
                    "Probe failed: {}",
                    entry.message
                );
            }
        }
        info!(
            task_id = task.id,
            success = entry.success,
            "Probe finished: {}",
            entry.message
        );
        Ok(stored)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::testing::*;
    use super::*;
    use keepup_storage::SqliteStore;

    async fn stored_task(store: &SqliteStore, access_type: AccessType) -> NetworkTask {
        let mut task = NetworkTask::new("example.com", 443, access_type);
        task.scheduler_id = 1;
        task.running = true;
        store.insert_task(&task).await.unwrap()
    }

    fn worker(store: Arc<SqliteStore>, collaborators: Collaborators) -> NetworkTaskWorker {
        NetworkTaskWorker::new(store, collaborators, ProbeSettings::default())
    }

    #[tokio::test]
    async fn test_no_network() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        let worker = worker(store, collaborators(false, false));

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert_eq!(entry.message, "No active network connection.");
    }

    #[tokio::test]
    async fn test_wifi_gate_precedes_dns_and_probe() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut task = NetworkTask::new("example.com", 80, AccessType::Connect);
        task.scheduler_id = 1;
        task.wifi_only = true;
        let task = store.insert_task(&task).await.unwrap();

        let resolver = Arc::new(FakeResolver {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let mut collab = collaborators(true, false);
        collab.resolver = resolver.clone();
        let worker = worker(store, collab);

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert_eq!(entry.message, "Skipped. No active wifi connection.");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dns_failure() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Ping).await;
        let mut collab = collaborators(true, true);
        collab.resolver = Arc::new(FakeResolver {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let worker = worker(store, collab);

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert!(entry.message.starts_with("DNS lookup for example.com failed. NoAddress:"));
    }

    #[tokio::test]
    async fn test_type_not_specified() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::None).await;
        let worker = worker(store, collaborators(true, true));

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert_eq!(entry.message, "Type not specified.");
    }

    #[tokio::test]
    async fn test_connect_success() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        let worker = worker(store, collaborators(true, true));

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.success);
        assert_eq!(entry.message, "Connected to example.com:443 successfully.");
    }

    #[tokio::test]
    async fn test_ping_success() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Ping).await;
        let worker = worker(store, collaborators(true, true));

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.success);
        assert_eq!(
            entry.message,
            "Ping to example.com was successful. 3 packets transmitted, 3 received, 0% packet loss."
        );
    }

    #[tokio::test]
    async fn test_download_deletes_file() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut task = NetworkTask::new("http://example.com/file.bin", 0, AccessType::Download);
        task.scheduler_id = 1;
        let task = store.insert_task(&task).await.unwrap();
        let files = Arc::new(FakeFiles::default());
        let mut collab = collaborators(true, true);
        collab.files = files.clone();
        let worker = worker(store, collab);

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.success);
        assert!(entry.message.ends_with(
            "was successful. The file was deleted after download. 999 msec download time."
        ));
        assert_eq!(files.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_reports_failed_deletion() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut task = NetworkTask::new("http://example.com/file.bin", 0, AccessType::Download);
        task.scheduler_id = 1;
        let task = store.insert_task(&task).await.unwrap();
        let files = Arc::new(FakeFiles {
            deletion_fails: AtomicBool::new(true),
            ..Default::default()
        });
        let mut collab = collaborators(true, true);
        collab.files = files;
        let worker = worker(store, collab);

        let entry = worker
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.success);
        assert!(entry.message.contains("Deleting the file after download failed."));
    }

    /// Transfers until one of the request tokens trips.
    struct StalledDownload;

    #[async_trait]
    impl DownloadProbe for StalledDownload {
        async fn download(&self, request: DownloadRequest) -> crate::types::DownloadResult {
            tokio::select! {
                _ = request.stop.cancelled() => {}
                _ = request.invalidated.cancelled() => {}
            }
            crate::types::DownloadResult {
                connected: true,
                http_code: Some(200),
                http_message: Some("OK".into()),
                elapsed: Some(Duration::from_millis(1500)),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_download_interrupted_when_generation_changes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut task = NetworkTask::new("http://example.com/big.iso", 0, AccessType::Download);
        task.scheduler_id = 1;
        let task = store.insert_task(&task).await.unwrap();
        let mut collab = collaborators(true, true);
        collab.download = Arc::new(StalledDownload);
        let settings = ProbeSettings {
            validity_check_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let worker = Arc::new(NetworkTaskWorker::new(store.clone(), collab, settings));

        let running = {
            let worker = worker.clone();
            let task = task.clone();
            tokio::spawn(async move { worker.execute(&task, &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.update_scheduler_id(task.id, 2).await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert_eq!(
            entry.message,
            "Download from http://example.com/big.iso was interrupted. The task is no longer valid. 1 sec download time."
        );
    }

    #[tokio::test]
    async fn test_download_stopped_on_cancel() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut task = NetworkTask::new("http://example.com/big.iso", 0, AccessType::Download);
        task.scheduler_id = 1;
        let task = store.insert_task(&task).await.unwrap();
        let mut collab = collaborators(true, true);
        collab.download = Arc::new(StalledDownload);
        let worker = Arc::new(worker(store, collab));

        let cancel = CancellationToken::new();
        let running = {
            let (worker, task, cancel) = (worker.clone(), task.clone(), cancel.clone());
            tokio::spawn(async move { worker.execute(&task, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let entry = running.await.unwrap().unwrap().unwrap();
        assert!(entry.message.starts_with("Download from http://example.com/big.iso was stopped."));
    }

    #[tokio::test]
    async fn test_superseded_task_is_abandoned() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        store.update_scheduler_id(task.id, 2).await.unwrap();
        let worker = worker(store.clone(), collaborators(true, true));

        let entry = worker.execute(&task, &CancellationToken::new()).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_deleted_task_is_abandoned() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        store.delete_task(task.id).await.unwrap();
        let worker = worker(store, collaborators(true, true));

        assert!(worker.execute(&task, &CancellationToken::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_probe_writes_nothing() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        let worker = worker(store, collaborators(true, true));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(worker.execute(&task, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_updates_failure_counter() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = stored_task(&store, AccessType::Connect).await;
        let worker = worker(store.clone(), collaborators(true, true));

        worker
            .persist(&task, &LogEntry::new(task.id, 1, false, "down"))
            .await
            .unwrap();
        worker
            .persist(&task, &LogEntry::new(task.id, 2, false, "down"))
            .await
            .unwrap();
        assert_eq!(store.read_task(task.id).await.unwrap().unwrap().failure_count, 2);

        worker
            .persist(&task, &LogEntry::new(task.id, 3, true, "up"))
            .await
            .unwrap();
        assert_eq!(store.read_task(task.id).await.unwrap().unwrap().failure_count, 0);
        assert_eq!(store.read_logs(task.id).await.unwrap().len(), 3);
    }
}
