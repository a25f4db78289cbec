use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::store::{StoreError, SubscriptionStore};
use super::subscription::{
    DeliveryTarget, Pool, Recipient, SharedChannel, Subscription, SubscriptionKey, TagSet,
};

pub(crate) struct SubscribeRequest {
    pub(crate) tags: TagSet,
    pub(crate) requester: Recipient,
    pub(crate) pools: Vec<Pool>,
    pub(crate) target: DeliveryTarget,
    /// newest post at the time of subscribing
    pub(crate) watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SubscribeOutcome {
    AlreadySubscribed { label: String },
    Joined { label: String },
    Created { label: String },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct UnsubscribeOutcome {
    /// subscriptions the requester was removed from
    pub(crate) left: usize,
    /// subscriptions deleted because nobody was left
    pub(crate) deleted: usize,
}

/// A subscription and the file its record lives in
#[derive(Debug)]
struct Stored {
    sub: Subscription,
    path: PathBuf,
}

/// All active subscriptions, keyed by tag set and private owner. Every change
/// goes through here so the in-memory state and the files on disk stay in
/// step.
///
/// Records are written while holding the map entry, a subscription removed
/// from the map can't be written back by a poll that fetched it earlier.
#[derive(Debug)]
pub(crate) struct SubscriptionRegistry {
    subs: DashMap<SubscriptionKey, Stored>,
    store: SubscriptionStore,
    /// held across snapshot and write, the last index written is the newest
    index_lock: Mutex<()>,
}

impl SubscriptionRegistry {
    pub(crate) fn load(store: SubscriptionStore) -> Result<Self, StoreError> {
        let subs = DashMap::new();
        for (path, sub) in store.load_all()? {
            match subs.entry(sub.key()) {
                Entry::Occupied(_) => {
                    warn!(
                        path = %path.display(),
                        tags = %sub.tags(),
                        "duplicate subscription record, not polling it"
                    );
                    store.keep_orphan(path);
                }
                Entry::Vacant(entry) => {
                    entry.insert(Stored { sub, path });
                }
            }
        }

        info!(count = subs.len(), "loaded subscriptions");
        Ok(Self {
            subs,
            store,
            index_lock: Mutex::new(()),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    pub(crate) fn private_count(&self) -> usize {
        self.subs
            .iter()
            .filter(|s| s.sub.target().is_private())
            .count()
    }

    /// Snapshot of the current keys, subscriptions added afterwards aren't in it
    pub(crate) fn keys(&self) -> Vec<SubscriptionKey> {
        self.subs.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.subs.get(key).map(|s| s.sub.clone())
    }

    pub(crate) fn subscribe(&self, req: SubscribeRequest) -> Result<SubscribeOutcome, StoreError> {
        let user_id = req.requester.id;

        let existing = self
            .subs
            .iter()
            .find(|s| s.sub.matches_tags(&req.tags) && s.sub.has_recipient(user_id))
            .map(|s| s.sub.label());
        if let Some(label) = existing {
            return Ok(SubscribeOutcome::AlreadySubscribed { label });
        }

        // anyone can join a shared subscription, even from their DMs
        let shared_key = SubscriptionKey::shared(req.tags.clone());
        if let Some(outcome) = self.join(&shared_key, &req.requester)? {
            return Ok(outcome);
        }

        let sub = Subscription::new(req.tags, req.requester, req.pools, req.target, req.watermark);
        let key = sub.key();

        let label = match self.subs.entry(key.clone()) {
            // lost a race against another subscribe for the same key
            Entry::Occupied(mut entry) => {
                let Stored { sub: existing, path } = entry.get_mut();
                let label = existing.label();
                let Some(requester) = sub.recipients().first().cloned() else {
                    return Ok(SubscribeOutcome::AlreadySubscribed { label });
                };
                if !existing.add_recipient(requester) {
                    return Ok(SubscribeOutcome::AlreadySubscribed { label });
                }
                self.store.save(path, existing)?;
                return Ok(SubscribeOutcome::Joined { label });
            }
            Entry::Vacant(entry) => {
                let path = self.store.record_path(&key);
                self.store.save(&path, &sub)?;
                let label = sub.label();
                entry.insert(Stored { sub, path });
                label
            }
        };

        self.persist_index()?;
        info!(user_id, key = %key, "created subscription");
        Ok(SubscribeOutcome::Created { label })
    }

    fn join(
        &self,
        key: &SubscriptionKey,
        requester: &Recipient,
    ) -> Result<Option<SubscribeOutcome>, StoreError> {
        let Some(mut entry) = self.subs.get_mut(key) else {
            return Ok(None);
        };
        let Stored { sub, path } = &mut *entry;

        let label = sub.label();
        if !sub.add_recipient(requester.clone()) {
            return Ok(Some(SubscribeOutcome::AlreadySubscribed { label }));
        }

        self.store.save(path, sub)?;
        debug!(user_id = requester.id, label, "joined subscription");
        Ok(Some(SubscribeOutcome::Joined { label }))
    }

    /// Removes the user from every subscription with these tags, deleting
    /// subscriptions that end up without recipients.
    pub(crate) fn unsubscribe(
        &self,
        tags: &TagSet,
        user_id: u64,
    ) -> Result<UnsubscribeOutcome, StoreError> {
        let keys: Vec<SubscriptionKey> = self
            .subs
            .iter()
            .filter(|s| s.sub.matches_tags(tags) && s.sub.has_recipient(user_id))
            .map(|s| s.key().clone())
            .collect();

        let mut outcome = UnsubscribeOutcome { left: 0, deleted: 0 };
        for key in keys {
            let emptied = match self.subs.get_mut(&key) {
                Some(mut entry) => {
                    let Stored { sub, path } = &mut *entry;
                    if !sub.remove_recipient(user_id) {
                        continue;
                    }
                    outcome.left += 1;

                    if sub.recipients().is_empty() {
                        true
                    } else {
                        self.store.save(path, sub)?;
                        false
                    }
                }
                None => continue,
            };

            if emptied {
                if let Some((_, stored)) =
                    self.subs.remove_if(&key, |_, s| s.sub.recipients().is_empty())
                {
                    self.store.remove(&stored.path)?;
                    outcome.deleted += 1;
                    info!(user_id, key = %key, "deleted subscription");
                }
            }
        }

        if outcome.deleted > 0 {
            self.persist_index()?;
        }

        Ok(outcome)
    }

    /// Labels of the user's subscriptions, private ones only when asked from
    /// a DM.
    pub(crate) fn list(&self, user_id: u64, include_private: bool) -> Vec<String> {
        let mut labels: Vec<String> = self
            .subs
            .iter()
            .filter(|s| s.sub.has_recipient(user_id))
            .filter(|s| include_private || !s.sub.target().is_private())
            .map(|s| match s.sub.target() {
                DeliveryTarget::Private => format!("`{}` [private]", s.sub.label()),
                DeliveryTarget::Shared(_) => format!("`{}`", s.sub.label()),
            })
            .collect();

        labels.sort();
        labels
    }

    /// Moves the watermark of `key` forward and persists it. Returns false if
    /// the subscription is gone.
    pub(crate) fn advance_watermark(
        &self,
        key: &SubscriptionKey,
        newest: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.subs.get_mut(key) else {
            return Ok(false);
        };
        let Stored { sub, path } = &mut *entry;

        if sub.advance_watermark(newest) {
            self.store.save(path, sub)?;
        }
        Ok(true)
    }

    pub(crate) fn persist_index(&self) -> Result<(), StoreError> {
        let _guard = self
            .index_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let paths: Vec<PathBuf> = self.subs.iter().map(|s| s.path.clone()).collect();
        self.store.persist_index(paths)
    }

    /// Writes every record and the index. Blocks on file io, async callers
    /// should run it on a blocking thread.
    pub(crate) fn checkpoint(&self) -> Result<(), StoreError> {
        for key in self.keys() {
            if let Some(entry) = self.subs.get(&key) {
                self.store.save(&entry.path, &entry.sub)?;
            }
        }
        self.persist_index()
    }

    pub(crate) fn shared_channel(&self) -> Result<Option<SharedChannel>, StoreError> {
        self.store.load_shared_channel()
    }

    pub(crate) fn set_shared_channel(&self, channel: SharedChannel) -> Result<(), StoreError> {
        self.store.save_shared_channel(channel)
    }
}
