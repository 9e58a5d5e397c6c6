#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use botfleet_core::domain::chat::{ChatId, MessageRef};
use botfleet_core::domain::content::{
    ArtifactHandle, ContentId, DeliveredArtifact, OutboundArtifact, RetrievalTarget,
};
use botfleet_core::domain::tenant::{StartMode, TenantConfig, TenantCredentials, TenantId};
use botfleet_core::errors::{FetchError, SessionError, StoreError};
use botfleet_core::ports::{
    ChunkStream, ConnectionSession, DeliveryCache, DesiredStateStore, InboundHandler,
    ObjectFetcher, ProgressObserver, SessionArtifacts, SessionDirectory, SessionFactory,
    TargetResolver,
};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val != *right_val {
                    return Err(format!(
                        "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                        left_val,
                        right_val
                    ));
                }
            }
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val != *right_val {
                    return Err(format!($($arg)*));
                }
            }
        }
    };
}

pub(crate) use require;
pub(crate) use require_eq;

pub fn tenant(id: &str) -> TenantConfig {
    let token = format!("{id}:token");
    let credentials =
        TenantCredentials::new(token, Some("42".to_owned()), Some("hash".to_owned()));
    TenantConfig::new(id, credentials)
}

#[derive(Default)]
pub struct FakeStore {
    tenants: Mutex<Vec<TenantConfig>>,
    pub cleared: Mutex<Vec<TenantId>>,
    pub deleted: Mutex<Vec<TenantId>>,
    pub upserted: Mutex<Vec<TenantId>>,
}

impl FakeStore {
    pub fn with(tenants: Vec<TenantConfig>) -> Arc<Self> {
        let store = Self::default();
        *store.tenants.lock() = tenants;
        Arc::new(store)
    }

    pub fn replace(&self, tenants: Vec<TenantConfig>) {
        *self.tenants.lock() = tenants;
    }

    pub fn reload_required(&self, tenant_id: &str) -> bool {
        self.tenants
            .lock()
            .iter()
            .any(|config| config.tenant_id.as_str() == tenant_id && config.reload_required)
    }
}

#[async_trait]
impl DesiredStateStore for FakeStore {
    async fn list_active_tenants(&self) -> Result<Vec<TenantConfig>, StoreError> {
        Ok(self.tenants.lock().iter().filter(|config| !config.deleted).cloned().collect())
    }

    async fn clear_reload_flag(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        let mut tenants = self.tenants.lock();
        let config = tenants
            .iter_mut()
            .find(|config| &config.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::TenantNotFound(tenant_id.clone()))?;
        config.reload_required = false;
        self.cleared.lock().push(tenant_id.clone());
        Ok(())
    }

    async fn mark_deleted(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        let mut tenants = self.tenants.lock();
        if let Some(config) = tenants.iter_mut().find(|config| &config.tenant_id == tenant_id) {
            config.deleted = true;
        }
        self.deleted.lock().push(tenant_id.clone());
        Ok(())
    }

    async fn upsert_tenant(&self, config: TenantConfig) -> Result<(), StoreError> {
        let mut tenants = self.tenants.lock();
        self.upserted.lock().push(config.tenant_id.clone());
        match tenants.iter_mut().find(|existing| existing.tenant_id == config.tenant_id) {
            Some(existing) => *existing = config,
            None => tenants.push(config),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeArtifacts {
    present: Mutex<HashSet<TenantId>>,
    pub purged: Mutex<Vec<TenantId>>,
}

impl FakeArtifacts {
    pub fn with(ids: &[&str]) -> Arc<Self> {
        let artifacts = Self::default();
        artifacts.present.lock().extend(ids.iter().map(|id| TenantId::from(*id)));
        Arc::new(artifacts)
    }

    pub fn add(&self, tenant_id: &TenantId) {
        self.present.lock().insert(tenant_id.clone());
    }

    pub fn was_purged(&self, id: &str) -> bool {
        self.purged.lock().iter().any(|tenant_id| tenant_id.as_str() == id)
    }
}

#[async_trait]
impl SessionArtifacts for FakeArtifacts {
    async fn list(&self) -> Result<Vec<TenantId>, StoreError> {
        let mut ids: Vec<_> = self.present.lock().iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, tenant_id: &TenantId) -> Result<bool, StoreError> {
        Ok(self.present.lock().contains(tenant_id))
    }

    async fn purge(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        self.present.lock().remove(tenant_id);
        self.purged.lock().push(tenant_id.clone());
        Ok(())
    }
}

pub struct FakeSession {
    tenant_id: TenantId,
    pub generation: usize,
    pub connected: AtomicBool,
    pub stops: AtomicUsize,
    pub fail_start: Option<SessionError>,
    pub fail_cached_delivery: AtomicBool,
    /// Once set, edits fail as if the user deleted the message.
    pub lose_messages: AtomicBool,
    pub upload_delay: Mutex<Duration>,
    pub start_delay: Duration,
    pub sent: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<MessageRef>>,
    pub delivered: Mutex<Vec<OutboundArtifact>>,
    next_message: AtomicUsize,
}

impl FakeSession {
    pub fn new(tenant_id: &str) -> Arc<Self> {
        Arc::new(Self::build(TenantId::from(tenant_id), 1, None, Duration::ZERO))
    }

    fn build(
        tenant_id: TenantId,
        generation: usize,
        fail_start: Option<SessionError>,
        start_delay: Duration,
    ) -> Self {
        Self {
            tenant_id,
            generation,
            connected: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
            fail_start,
            fail_cached_delivery: AtomicBool::new(false),
            lose_messages: AtomicBool::new(false),
            upload_delay: Mutex::new(Duration::ZERO),
            start_delay,
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            next_message: AtomicUsize::new(1),
        }
    }

    pub fn sent_containing(&self, needle: &str) -> usize {
        self.sent.lock().iter().filter(|text| text.contains(needle)).count()
    }
}

#[async_trait]
impl ConnectionSession for FakeSession {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    async fn start(&self) -> Result<(), SessionError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some(error) = &self.fail_start {
            return Err(error.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, chat_id: &ChatId, text: &str) -> Result<MessageRef, SessionError> {
        self.sent.lock().push(text.to_owned());
        let id = self.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRef { chat_id: chat_id.clone(), message_id: id.to_string() })
    }

    async fn edit(&self, _message: &MessageRef, _text: &str) -> Result<(), SessionError> {
        if self.lose_messages.load(Ordering::SeqCst) {
            return Err(SessionError::MessageNotFound);
        }
        Ok(())
    }

    async fn delete(&self, messages: &[MessageRef]) -> Result<(), SessionError> {
        self.deleted.lock().extend_from_slice(messages);
        Ok(())
    }

    async fn deliver(
        &self,
        chat_id: &ChatId,
        artifact: OutboundArtifact,
        progress: &mut (dyn ProgressObserver + Send),
    ) -> Result<DeliveredArtifact, SessionError> {
        let handle = match &artifact {
            OutboundArtifact::Cached(handle) => {
                if self.fail_cached_delivery.load(Ordering::SeqCst) {
                    return Err(SessionError::Transport("file reference expired".to_owned()));
                }
                handle.clone()
            }
            OutboundArtifact::Fresh { filename, data } => {
                let delay = *self.upload_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let total = data.len() as u64;
                progress.on_progress(total, Some(total)).await?;
                ArtifactHandle(format!("handle-{filename}"))
            }
        };
        self.delivered.lock().push(artifact);
        let id = self.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveredArtifact {
            handle,
            message: MessageRef { chat_id: chat_id.clone(), message_id: id.to_string() },
        })
    }

    fn subscribe(&self, _handler: Arc<dyn InboundHandler>) {}

    fn clear_subscriptions(&self) {}
}

#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<HashMap<TenantId, Vec<Arc<FakeSession>>>>,
    pub order: Mutex<Vec<(TenantId, StartMode)>>,
    pub credential_failures: Mutex<HashSet<TenantId>>,
    pub transient_failures: Mutex<HashMap<TenantId, usize>>,
    pub start_delay: Duration,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(start_delay: Duration) -> Arc<Self> {
        Arc::new(Self { start_delay, ..Self::default() })
    }

    pub fn creations(&self, id: &str) -> usize {
        self.created.lock().get(&TenantId::from(id)).map(Vec::len).unwrap_or_default()
    }

    pub fn latest(&self, id: &str) -> Option<Arc<FakeSession>> {
        self.created.lock().get(&TenantId::from(id)).and_then(|sessions| sessions.last().cloned())
    }
}

impl SessionFactory for FakeFactory {
    fn create(
        &self,
        config: &TenantConfig,
        mode: StartMode,
    ) -> Result<Arc<dyn ConnectionSession>, SessionError> {
        let tenant_id = config.tenant_id.clone();
        self.order.lock().push((tenant_id.clone(), mode));
        let fail_start = if self.credential_failures.lock().contains(&tenant_id) {
            Some(SessionError::CredentialsInvalid("token expired".to_owned()))
        } else {
            let mut transient = self.transient_failures.lock();
            match transient.get_mut(&tenant_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(SessionError::Transport("connection reset".to_owned()))
                }
                _ => None,
            }
        };

        let mut created = self.created.lock();
        let sessions = created.entry(tenant_id.clone()).or_default();
        let generation = sessions.len() + 1;
        let session =
            Arc::new(FakeSession::build(tenant_id, generation, fail_start, self.start_delay));
        sessions.push(Arc::clone(&session));
        Ok(session)
    }
}

/// One scripted response per `fetch_chunks` call.
pub enum FetchScript {
    Chunks(Vec<&'static [u8]>),
    Fail(FetchError),
    /// Chunks that each arrive after the given pause.
    Slow(Vec<&'static [u8]>, Duration),
    Hang,
}

#[derive(Default)]
pub struct FakeFetcher {
    script: Mutex<VecDeque<FetchScript>>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn scripted(script: Vec<FetchScript>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectFetcher for FakeFetcher {
    async fn fetch_chunks(&self, _content_id: &ContentId) -> Result<ChunkStream, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front().unwrap_or(FetchScript::Hang);
        match next {
            FetchScript::Chunks(chunks) => Ok(stream::iter(
                chunks.into_iter().map(|chunk| Ok(Bytes::from_static(chunk))).collect::<Vec<_>>(),
            )
            .boxed()),
            FetchScript::Fail(error) => Err(error),
            FetchScript::Slow(chunks, pause) => Ok(stream::iter(chunks)
                .then(move |chunk| async move {
                    tokio::time::sleep(pause).await;
                    Ok::<_, FetchError>(Bytes::from_static(chunk))
                })
                .boxed()),
            FetchScript::Hang => Ok(stream::pending().boxed()),
        }
    }
}

#[derive(Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<(TenantId, ContentId), ArtifactHandle>>,
    pub puts: AtomicUsize,
}

impl FakeCache {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn seed(&self, tenant_id: &TenantId, content_id: &ContentId, handle: &str) {
        self.entries
            .lock()
            .insert((tenant_id.clone(), content_id.clone()), ArtifactHandle(handle.to_owned()));
    }
}

#[async_trait]
impl DeliveryCache for FakeCache {
    async fn get(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
    ) -> Result<Option<ArtifactHandle>, StoreError> {
        Ok(self.entries.lock().get(&(recipient.clone(), content_id.clone())).cloned())
    }

    async fn put(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
        handle: &ArtifactHandle,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert((recipient.clone(), content_id.clone()), handle.clone());
        Ok(())
    }

    async fn invalidate(&self, content_id: &ContentId) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(_, cached), _| cached != content_id);
        Ok((before - entries.len()) as u64)
    }
}

/// Directory holding exactly one session.
pub struct SingleSession(pub Arc<FakeSession>);

impl SessionDirectory for SingleSession {
    fn session(&self, tenant_id: &TenantId) -> Option<Arc<dyn ConnectionSession>> {
        let session: Arc<dyn ConnectionSession> = Arc::clone(&self.0) as _;
        (self.0.tenant_id() == tenant_id).then_some(session)
    }
}

/// Resolver that treats every content id as a deliverable target.
pub struct EchoResolver;

#[async_trait]
impl TargetResolver for EchoResolver {
    async fn resolve(&self, content_id: &ContentId) -> Result<Option<RetrievalTarget>, StoreError> {
        Ok(Some(RetrievalTarget::new(content_id.0.clone())))
    }
}
