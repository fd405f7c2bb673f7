//! Publishing task resources and tracking what each task published last.
//!
//! The cache maps a task id to the most recent [`ResourceBundle`] published
//! for it. Entries are replaced whole and only after a successful publish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{ClientError, ResourceError};
use crate::resource::bundle::{ResourceBundle, ResourceStorage, WireResourceRef};
use crate::resource::client::{ClientOptions, ContentClient, HyperdriveClient, PeerAddress};
use crate::resource::retry::RetryPolicy;

/// Creates a content-store client for one publish call.
pub type ClientFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ContentClient>, ClientError> + Send + Sync>;

/// Result of a publish request that did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Files were published and the task's cache entry replaced.
    Added(ResourceBundle),
    /// Nothing to publish; the client was not called.
    EmptyFileSet,
    /// A source file does not exist; the client was not called.
    MissingFile(PathBuf),
}

impl AddOutcome {
    /// The published bundle, if any.
    pub fn bundle(&self) -> Option<&ResourceBundle> {
        match self {
            AddOutcome::Added(bundle) => Some(bundle),
            _ => None,
        }
    }
}

/// Publishes task resources to the content store and caches the result.
pub struct ResourceManager {
    storage: ResourceStorage,
    daemon_addresses: Vec<PeerAddress>,
    retry: RetryPolicy,
    client_factory: ClientFactory,
    cache: RwLock<HashMap<String, ResourceBundle>>,
}

impl ResourceManager {
    /// Creates a manager storing resources under `config.resource_root`.
    ///
    /// Each publish call without an explicit client gets a fresh
    /// [`HyperdriveClient`] for the configured daemon.
    pub fn new(config: &CoreConfig, daemon_addresses: Vec<PeerAddress>) -> Self {
        let client_config = config.clone();
        let client_factory: ClientFactory = Arc::new(move || {
            HyperdriveClient::from_config(&client_config)
                .map(|client| Arc::new(client) as Arc<dyn ContentClient>)
        });

        Self {
            storage: ResourceStorage::new(&config.resource_root),
            daemon_addresses,
            retry: RetryPolicy::from_config(config),
            client_factory,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the factory used when no client is passed in.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn storage(&self) -> &ResourceStorage {
        &self.storage
    }

    /// Addresses of the local content-store daemon as announced to peers.
    pub fn daemon_addresses(&self) -> &[PeerAddress] {
        &self.daemon_addresses
    }

    /// Builds client options for `node_id`.
    ///
    /// Announced peers are the daemon addresses followed by any new
    /// `known_peers`; `extra` is passed through as is.
    pub fn build_client_options(
        &self,
        node_id: &str,
        known_peers: &[PeerAddress],
        extra: Map<String, Value>,
    ) -> ClientOptions {
        let mut peers = self.daemon_addresses.clone();
        for peer in known_peers {
            if !peers.contains(peer) {
                peers.push(peer.clone());
            }
        }
        HyperdriveClient::build_options(node_id, &peers, extra)
    }

    /// Encodes bundles into their wire form.
    ///
    /// Absent bundles and bundles with an empty hash are dropped.
    pub fn to_wire(bundles: &[Option<ResourceBundle>]) -> Vec<WireResourceRef> {
        bundles
            .iter()
            .flatten()
            .filter(|bundle| !bundle.hash().is_empty())
            .map(WireResourceRef::from)
            .collect()
    }

    /// Decodes wire references into `(hash, relative paths)` pairs.
    ///
    /// Entries with an empty hash or no paths are dropped.
    pub fn from_wire(refs: &[WireResourceRef]) -> Vec<(String, Vec<PathBuf>)> {
        refs.iter()
            .filter(|wire| !wire.is_empty())
            .map(|wire| (wire.hash().to_string(), wire.paths()))
            .collect()
    }

    /// Publishes a single file under its base name.
    pub async fn add_file(
        &self,
        path: &Path,
        task_id: &str,
        client: Option<Arc<dyn ContentClient>>,
        options: Option<&ClientOptions>,
    ) -> Result<AddOutcome, ResourceError> {
        self.add_files(&[path.to_path_buf()], task_id, client, options)
            .await
    }

    /// Publishes `files` for `task_id` and caches the resulting bundle.
    ///
    /// Relative names are taken from the task's storage namespace. An empty
    /// input or a missing file is reported without calling the client and
    /// leaves the cache untouched; so does a failed publish.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError` when the client fails permanently or keeps
    /// failing past the retry bound.
    #[instrument(level = "info", skip(self, files, client, options), fields(files = files.len()))]
    pub async fn add_files(
        &self,
        files: &[PathBuf],
        task_id: &str,
        client: Option<Arc<dyn ContentClient>>,
        options: Option<&ClientOptions>,
    ) -> Result<AddOutcome, ResourceError> {
        if files.is_empty() {
            warn!("No files to publish");
            return Ok(AddOutcome::EmptyFileSet);
        }

        for path in files {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                error!(path = %path.display(), "Resource file does not exist");
                return Ok(AddOutcome::MissingFile(path.clone()));
            }
        }

        let file_map: Vec<(PathBuf, String)> = files
            .iter()
            .map(|path| (path.clone(), self.storage.relative_path(path, task_id)))
            .collect();

        let correlation_id = Uuid::new_v4().to_string();
        let client = match client {
            Some(client) => client,
            None => (self.client_factory)().map_err(|source| ResourceError::Permanent {
                command: "connect".to_string(),
                correlation_id: correlation_id.clone(),
                source,
            })?,
        };

        let retried = self
            .retry
            .run("add", &correlation_id, |_| {
                client.add(&file_map, task_id, options, &correlation_id)
            })
            .await?;

        let bundle = ResourceBundle::new(
            file_map.into_iter().map(|(_, name)| name).collect(),
            retried.response,
            task_id,
            self.storage.task_dir(task_id),
        );
        info!(
            hash = bundle.hash(),
            attempts = retried.attempts,
            "Resources published"
        );

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string(), bundle.clone());

        Ok(AddOutcome::Added(bundle))
    }

    /// The bundle most recently published for `task_id`.
    pub fn get_resources(&self, task_id: &str) -> Option<ResourceBundle> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    /// Forgets the bundle cached for `task_id`.
    pub fn remove_task(&self, task_id: &str) -> Option<ResourceBundle> {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        if removed.is_some() {
            debug!(task_id, "Removed cached resources");
        }
        removed
    }

    /// Ids of all tasks with a cached bundle, sorted.
    pub fn cached_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls and answers with a fixed hash.
    struct RecordingClient {
        hash: String,
        calls: Mutex<Vec<Vec<(PathBuf, String)>>>,
    }

    impl RecordingClient {
        fn new(hash: &str) -> Arc<Self> {
            Arc::new(Self {
                hash: hash.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ContentClient for RecordingClient {
        async fn add(
            &self,
            files: &[(PathBuf, String)],
            _id: &str,
            _options: Option<&ClientOptions>,
            _correlation_id: &str,
        ) -> Result<String, ClientError> {
            self.calls.lock().unwrap().push(files.to_vec());
            Ok(self.hash.clone())
        }
    }

    fn manager(root: &Path) -> ResourceManager {
        let config = CoreConfig::default().with_resource_root(root);
        ResourceManager::new(&config, vec![PeerAddress::new("127.0.0.1", 3282)])
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_empty_file_set_skips_client() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let client = RecordingClient::new("h1");

        let outcome = manager
            .add_files(&[], "t1", Some(client.clone()), None)
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::EmptyFileSet);
        assert_eq!(client.calls(), 0);
        assert!(manager.get_resources("t1").is_none());
    }

    #[tokio::test]
    async fn test_missing_file_skips_client() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let client = RecordingClient::new("h1");
        let missing = dir.path().join("absent.bin");

        let outcome = manager
            .add_files(&[missing.clone()], "t1", Some(client.clone()), None)
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::MissingFile(missing));
        assert_eq!(client.calls(), 0);
        assert!(manager.cached_task_ids().is_empty());
    }

    #[tokio::test]
    async fn test_add_file_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let path = outside.path().join("in.txt");
        std::fs::write(&path, "data").unwrap();

        let manager = manager(dir.path());
        let client = RecordingClient::new("h1");

        let outcome = manager
            .add_file(&path, "t1", Some(client.clone()), None)
            .await
            .unwrap();

        let bundle = outcome.bundle().unwrap();
        assert_eq!(bundle.files(), ["in.txt".to_string()]);
        assert_eq!(bundle.path(), dir.path().join("t1"));
        assert_eq!(
            client.calls.lock().unwrap()[0],
            vec![(path, "in.txt".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cache_entry_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("t1");
        std::fs::create_dir_all(&task_dir).unwrap();
        let a = task_dir.join("a.txt");
        let b = task_dir.join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let manager = manager(dir.path());
        manager
            .add_files(&[a], "t1", Some(RecordingClient::new("h1")), None)
            .await
            .unwrap();
        manager
            .add_files(&[b], "t1", Some(RecordingClient::new("h2")), None)
            .await
            .unwrap();

        let cached = manager.get_resources("t1").unwrap();
        assert_eq!(cached.hash(), "h2");
        assert_eq!(cached.files(), ["b.txt".to_string()]);
        assert_eq!(manager.cached_task_ids(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "data").unwrap();

        let manager = manager(dir.path());
        manager
            .add_file(&path, "t1", Some(RecordingClient::new("h1")), None)
            .await
            .unwrap();

        assert!(manager.remove_task("t1").is_some());
        assert!(manager.remove_task("t1").is_none());
        assert!(manager.get_resources("t1").is_none());
    }

    #[tokio::test]
    async fn test_default_factory_used_without_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "data").unwrap();

        let client = RecordingClient::new("h9");
        let factory_client = Arc::clone(&client);
        let manager = manager(dir.path()).with_client_factory(Arc::new(move || {
            Ok(Arc::clone(&factory_client) as Arc<dyn ContentClient>)
        }));

        let outcome = manager.add_file(&path, "t1", None, None).await.unwrap();
        assert_eq!(outcome.bundle().unwrap().hash(), "h9");
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_to_wire_filters_absent_and_unhashed() {
        let bundles = vec![
            Some(ResourceBundle::new(vec!["in.txt".into()], "h1", "t1", "/r/t1")),
            None,
            Some(ResourceBundle::new(vec!["x".into()], "", "t2", "/r/t2")),
        ];

        let wire = ResourceManager::to_wire(&bundles);
        assert_eq!(
            wire,
            vec![WireResourceRef("h1".into(), vec![vec!["in.txt".into()]])]
        );
    }

    #[test]
    fn test_from_wire_filters_incomplete() {
        let refs = vec![
            WireResourceRef("h1".into(), vec![vec!["a".into(), "b".into(), "c.txt".into()]]),
            WireResourceRef("".into(), vec![vec!["x".into()]]),
            WireResourceRef("h3".into(), vec![]),
        ];

        let decoded = ResourceManager::from_wire(&refs);
        assert_eq!(
            decoded,
            vec![(
                "h1".to_string(),
                vec![PathBuf::from("a").join("b").join("c.txt")]
            )]
        );
    }

    #[test]
    fn test_build_client_options() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut extra = Map::new();
        extra.insert("timeout".to_string(), serde_json::json!(30));
        let known = [
            PeerAddress::new("127.0.0.1", 3282),
            PeerAddress::new("10.0.0.7", 3282),
        ];

        let options = manager.build_client_options("node-1", &known, extra);

        assert_eq!(options.client_id, "hyperg");
        assert_eq!(options.options["timeout"], 30);
        assert_eq!(
            options.peers(),
            vec![
                PeerAddress::new("127.0.0.1", 3282),
                PeerAddress::new("10.0.0.7", 3282),
            ]
        );
    }
}
