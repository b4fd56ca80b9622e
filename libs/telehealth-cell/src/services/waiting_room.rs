use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::TelehealthError;
use crate::models::{
    Admission, EntryStatus, Priority, SessionCommand, SessionEvent, SessionStatus, TelehealthSession,
    WaitingRoomEntry,
};
use crate::services::state_machine::SessionStateMachine;

/// Extra minutes of estimated wait per patient ahead in the queue
pub const MINUTES_PER_PATIENT_AHEAD: i64 = 5;

const SOURCE: &str = "waiting-room";

/// Orders entries by priority, then arrival, then id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    joined_at: DateTime<Utc>,
    entry_id: u64,
}

impl QueueKey {
    fn of(entry: &WaitingRoomEntry) -> Self {
        Self {
            rank: entry.priority.rank(),
            joined_at: entry.joined_at,
            entry_id: entry.id,
        }
    }
}

#[derive(Default)]
struct ProviderQueue {
    ordered: BTreeMap<QueueKey, WaitingRoomEntry>,
    keys: HashMap<u64, QueueKey>,
    by_session: HashMap<String, u64>,
}

impl ProviderQueue {
    fn insert(&mut self, entry: WaitingRoomEntry) {
        let key = QueueKey::of(&entry);
        self.keys.insert(entry.id, key);
        self.by_session.insert(entry.session_id.clone(), entry.id);
        self.ordered.insert(key, entry);
    }

    fn get(&self, entry_id: u64) -> Option<&WaitingRoomEntry> {
        self.keys.get(&entry_id).and_then(|key| self.ordered.get(key))
    }

    fn remove(&mut self, entry_id: u64) -> Option<WaitingRoomEntry> {
        let key = self.keys.remove(&entry_id)?;
        let entry = self.ordered.remove(&key)?;
        self.by_session.remove(&entry.session_id);
        Some(entry)
    }

    fn head(&self) -> Option<&WaitingRoomEntry> {
        self.ordered.values().next()
    }

    fn refresh_estimates(&mut self) -> usize {
        for (ahead, entry) in self.ordered.values_mut().enumerate() {
            entry.estimated_wait_minutes =
                entry.priority.base_wait_minutes() + MINUTES_PER_PATIENT_AHEAD * ahead as i64;
        }
        self.ordered.len()
    }
}

/// Priority-ordered holding area, one serialized queue per provider.
///
/// Lock order is provider queue first, then the session lock inside the
/// state machine. Nothing that holds a session lock touches a queue.
pub struct WaitingRoomQueue {
    state_machine: Arc<SessionStateMachine>,
    providers: RwLock<HashMap<Uuid, Arc<Mutex<ProviderQueue>>>>,
    entry_providers: RwLock<HashMap<u64, Uuid>>,
    next_entry_id: AtomicU64,
}

impl WaitingRoomQueue {
    pub fn new(state_machine: Arc<SessionStateMachine>) -> Self {
        Self {
            state_machine,
            providers: RwLock::new(HashMap::new()),
            entry_providers: RwLock::new(HashMap::new()),
            next_entry_id: AtomicU64::new(1),
        }
    }

    pub fn state_machine(&self) -> &Arc<SessionStateMachine> {
        &self.state_machine
    }

    async fn provider_queue(&self, provider_id: Uuid) -> Arc<Mutex<ProviderQueue>> {
        if let Some(queue) = self.providers.read().await.get(&provider_id) {
            return queue.clone();
        }

        self.providers
            .write()
            .await
            .entry(provider_id)
            .or_default()
            .clone()
    }

    async fn existing_queue(&self, provider_id: Uuid) -> Option<Arc<Mutex<ProviderQueue>>> {
        self.providers.read().await.get(&provider_id).cloned()
    }

    /// Patient check-in: moves the session to waiting and queues it while the
    /// provider's queue is held, so a concurrent start cannot slip between
    /// the transition and the insert.
    #[instrument(skip(self))]
    pub async fn check_in(
        &self,
        session_id: &str,
        priority: Priority,
        joined_at: DateTime<Utc>,
    ) -> Result<WaitingRoomEntry, TelehealthError> {
        let provider_id = self.state_machine.current(session_id).await?.provider_id;

        let queue = self.provider_queue(provider_id).await;
        let mut queue = queue.lock().await;

        let outcome = self
            .state_machine
            .apply_event(SessionEvent::new(session_id, SessionCommand::CheckIn, SOURCE).at(joined_at))
            .await?;

        self.insert_locked(&mut queue, outcome.session(), priority, joined_at).await
    }

    /// Queues a session that is already waiting. Its status is re-read under
    /// the queue lock; re-adding a queued session returns its current entry.
    #[instrument(skip(self, session), fields(session_id = %session.id, provider_id = %session.provider_id))]
    pub async fn add(
        &self,
        session: &TelehealthSession,
        priority: Priority,
        joined_at: DateTime<Utc>,
    ) -> Result<WaitingRoomEntry, TelehealthError> {
        let queue = self.provider_queue(session.provider_id).await;
        let mut queue = queue.lock().await;

        let current = self.state_machine.current(&session.id).await?;
        self.insert_locked(&mut queue, &current, priority, joined_at).await
    }

    async fn insert_locked(
        &self,
        queue: &mut ProviderQueue,
        session: &TelehealthSession,
        priority: Priority,
        joined_at: DateTime<Utc>,
    ) -> Result<WaitingRoomEntry, TelehealthError> {
        if !matches!(session.status, SessionStatus::Scheduled | SessionStatus::Waiting) {
            return Err(TelehealthError::StateConflict {
                session_id: session.id.clone(),
                message: format!("cannot queue a session that is {}", session.status),
            });
        }

        if let Some(existing) = queue.by_session.get(&session.id).and_then(|id| queue.get(*id)) {
            debug!("Session already queued as entry {}", existing.id);
            return Ok(existing.clone());
        }

        let entry_id = self.next_entry_id.fetch_add(1, Ordering::SeqCst);
        let mut entry = WaitingRoomEntry {
            id: entry_id,
            session_id: session.id.clone(),
            patient_id: session.patient_id,
            provider_id: session.provider_id,
            priority,
            joined_at,
            estimated_wait_minutes: 0,
            entry_status: EntryStatus::Waiting,
        };

        let key = QueueKey::of(&entry);
        let ahead = queue.ordered.range(..key).count() as i64;
        entry.estimated_wait_minutes = priority.base_wait_minutes() + MINUTES_PER_PATIENT_AHEAD * ahead;

        queue.insert(entry.clone());
        queue.refresh_estimates();
        self.entry_providers.write().await.insert(entry_id, session.provider_id);

        info!("Queued entry {} with estimated wait {}m", entry_id, entry.estimated_wait_minutes);
        Ok(entry)
    }

    /// Next patient to be seen, without removing them
    pub async fn peek_next(&self, provider_id: Uuid) -> Option<WaitingRoomEntry> {
        let queue = self.existing_queue(provider_id).await?;
        let queue = queue.lock().await;
        queue.head().cloned()
    }

    /// Entries in service order
    pub async fn list(&self, provider_id: Uuid) -> Vec<WaitingRoomEntry> {
        match self.existing_queue(provider_id).await {
            Some(queue) => queue.lock().await.ordered.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn entry_for_session(&self, provider_id: Uuid, session_id: &str) -> Option<WaitingRoomEntry> {
        let queue = self.existing_queue(provider_id).await?;
        let queue = queue.lock().await;
        queue.by_session.get(session_id).and_then(|id| queue.get(*id)).cloned()
    }

    #[instrument(skip(self))]
    pub async fn admit(&self, entry_id: u64, admitted_by: &str) -> Result<Admission, TelehealthError> {
        let provider_id = self
            .entry_providers
            .read()
            .await
            .get(&entry_id)
            .copied()
            .ok_or_else(|| TelehealthError::NotFound(format!("Waiting room entry {} not found", entry_id)))?;

        let queue = self.provider_queue(provider_id).await;
        let mut queue = queue.lock().await;

        self.admit_locked(&mut queue, entry_id, admitted_by).await
    }

    /// Admits whoever is at the head of the provider's queue
    #[instrument(skip(self))]
    pub async fn admit_next(&self, provider_id: Uuid, admitted_by: &str) -> Result<Admission, TelehealthError> {
        let queue = self
            .existing_queue(provider_id)
            .await
            .ok_or_else(|| TelehealthError::NotFound(format!("No waiting room for provider {}", provider_id)))?;
        let mut queue = queue.lock().await;

        let entry_id = queue
            .head()
            .map(|entry| entry.id)
            .ok_or_else(|| TelehealthError::NotFound(format!("Waiting room for provider {} is empty", provider_id)))?;

        self.admit_locked(&mut queue, entry_id, admitted_by).await
    }

    async fn admit_locked(
        &self,
        queue: &mut ProviderQueue,
        entry_id: u64,
        admitted_by: &str,
    ) -> Result<Admission, TelehealthError> {
        let entry = queue
            .get(entry_id)
            .cloned()
            .ok_or_else(|| TelehealthError::NotFound(format!("Waiting room entry {} not found", entry_id)))?;

        let event = SessionEvent::new(
            entry.session_id.clone(),
            SessionCommand::Admit { admitted_by: admitted_by.to_string() },
            SOURCE,
        );

        let outcome = match self.state_machine.apply_event(event).await {
            Ok(outcome) => outcome,
            Err(TelehealthError::ComplianceBlocked { reason, .. }) => {
                warn!("Entry {} stays queued: {}", entry_id, reason);
                return Err(TelehealthError::NotAdmittable { entry_id, reason });
            }
            Err(e) => return Err(e),
        };

        // Already in progress through the conferencing webhook counts as admitted
        let mut admitted = self.detach(queue, entry_id).await.unwrap_or(entry);
        admitted.entry_status = EntryStatus::Admitted;

        info!("Admitted entry {} ({})", entry_id, outcome.as_str());
        Ok(Admission { entry: admitted, outcome })
    }

    async fn detach(&self, queue: &mut ProviderQueue, entry_id: u64) -> Option<WaitingRoomEntry> {
        let removed = queue.remove(entry_id);
        if removed.is_some() {
            self.entry_providers.write().await.remove(&entry_id);
            queue.refresh_estimates();
        }
        removed
    }

    /// Drops the session's entry, if any, once the session left the queue by
    /// another path (cancellation, webhook start).
    pub async fn remove_for_session(&self, provider_id: Uuid, session_id: &str) -> Option<WaitingRoomEntry> {
        let queue = self.existing_queue(provider_id).await?;
        let mut queue = queue.lock().await;

        let entry_id = *queue.by_session.get(session_id)?;
        let mut entry = self.detach(&mut queue, entry_id).await?;
        entry.entry_status = EntryStatus::Left;

        debug!("Removed entry {} for session {}", entry_id, session_id);
        Some(entry)
    }

    /// Display-only refresh of every provider's estimates. Empty queues are
    /// dropped afterwards.
    pub async fn recompute_wait_times(&self) -> usize {
        let queues: Vec<Arc<Mutex<ProviderQueue>>> = self.providers.read().await.values().cloned().collect();

        let refreshed = join_all(queues.iter().map(|queue| async move { queue.lock().await.refresh_estimates() }))
            .await
            .into_iter()
            .sum();

        drop(queues);
        self.prune_empty_queues().await;
        refreshed
    }

    /// Number of providers with a live queue
    pub async fn provider_count(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Removes provider queues that are empty and not held by any caller.
    /// Holding the map's write lock means no new handle can be taken meanwhile.
    async fn prune_empty_queues(&self) -> usize {
        let mut providers = self.providers.write().await;
        let before = providers.len();

        providers.retain(|_, queue| {
            if Arc::strong_count(queue) > 1 {
                return true;
            }
            match queue.try_lock() {
                Ok(queue) => !queue.ordered.is_empty(),
                Err(_) => true,
            }
        });

        let pruned = before - providers.len();
        if pruned > 0 {
            debug!("Pruned {} empty provider queues", pruned);
        }
        pruned
    }

    /// Moves sessions whose entries idled past `threshold` to no_show.
    /// Entries whose session has already moved on are dropped as stale.
    #[instrument(skip(self))]
    pub async fn sweep_abandoned(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<WaitingRoomEntry> {
        let queues: Vec<Arc<Mutex<ProviderQueue>>> = self.providers.read().await.values().cloned().collect();
        let mut swept = Vec::new();

        for queue in queues {
            let mut queue = queue.lock().await;
            let idle: Vec<(u64, String)> = queue
                .ordered
                .values()
                .filter(|entry| now - entry.joined_at > threshold)
                .map(|entry| (entry.id, entry.session_id.clone()))
                .collect();

            for (entry_id, session_id) in idle {
                let event = SessionEvent::new(session_id.clone(), SessionCommand::MarkNoShow, SOURCE).at(now);

                match self.state_machine.apply_event(event).await {
                    Ok(_) | Err(TelehealthError::StateConflict { .. }) | Err(TelehealthError::NotFound(_)) => {
                        if let Some(mut entry) = self.detach(&mut queue, entry_id).await {
                            entry.entry_status = EntryStatus::Left;
                            swept.push(entry);
                        }
                    }
                    Err(e) => warn!("Could not sweep entry {} for session {}: {}", entry_id, session_id, e),
                }
            }
        }

        if !swept.is_empty() {
            info!("Swept {} abandoned waiting room entries", swept.len());
        }
        swept
    }
}
