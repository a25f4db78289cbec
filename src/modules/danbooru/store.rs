//! File backed subscription storage, one json record per subscription plus an
//! index file listing the record paths.
//!
//! Records keep the layout the bot has always written (users keyed by
//! position, string ids, `old_timestamp`), older files load unchanged.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::subscription::{
    DeliveryTarget, Pool, Recipient, SharedChannel, Subscription, SubscriptionKey, TagSet,
};

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-.]").expect("invalid file name regex"));

/// Hex chars of the key hash in record file names
const NAME_HASH_LEN: usize = 12;
/// Readable part of record file names
const NAME_MAX_CHARS: usize = 96;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid json in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Discord id, written as a string but numbers are accepted too
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum StoredId {
    Number(u64),
    Text(String),
}

impl StoredId {
    fn get(&self) -> Option<u64> {
        match self {
            StoredId::Number(id) => Some(*id),
            StoredId::Text(id) => id.trim().parse().ok(),
        }
    }
}

impl From<u64> for StoredId {
    fn from(id: u64) -> Self {
        StoredId::Text(id.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredUser {
    id: StoredId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mention: Option<String>,
}

/// Users keyed by their position (`{"0": {...}}`), or a plain list
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum StoredUsers {
    Indexed(BTreeMap<String, StoredUser>),
    List(Vec<StoredUser>),
}

impl Default for StoredUsers {
    fn default() -> Self {
        StoredUsers::List(Vec::new())
    }
}

impl StoredUsers {
    fn into_vec(self) -> Vec<StoredUser> {
        match self {
            StoredUsers::List(users) => users,
            StoredUsers::Indexed(users) => {
                let mut users: Vec<(String, StoredUser)> = users.into_iter().collect();
                // "10" sorts before "2" as a string
                users.sort_by_key(|(position, _)| position.parse::<u64>().unwrap_or(u64::MAX));
                users.into_iter().map(|(_, user)| user).collect()
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct StoredPool {
    tag: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct SubscriptionRecord {
    #[serde(default)]
    users: StoredUsers,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server: Option<StoredId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<StoredId>,
    /// newest delivered post, `"None"` before the first delivery
    #[serde(default, alias = "watermark")]
    old_timestamp: Option<String>,
    #[serde(default)]
    pools: Vec<StoredPool>,
}

impl From<&Subscription> for SubscriptionRecord {
    fn from(sub: &Subscription) -> Self {
        let (server, channel) = match sub.target() {
            DeliveryTarget::Private => (None, None),
            DeliveryTarget::Shared(shared) => {
                (shared.guild_id.map(StoredId::from), Some(shared.channel_id.into()))
            }
        };

        let users = sub
            .recipients()
            .iter()
            .enumerate()
            .map(|(position, r)| {
                let user = StoredUser {
                    id: r.id.into(),
                    name: Some(r.name.clone()),
                    mention: Some(r.mention()),
                };
                (position.to_string(), user)
            })
            .collect();

        Self {
            users: StoredUsers::Indexed(users),
            tags: sub.tags().tags().to_vec(),
            is_private: sub.target().is_private(),
            server,
            channel,
            old_timestamp: Some(
                sub.watermark()
                    .map_or_else(|| "None".to_owned(), |w| w.to_rfc3339()),
            ),
            pools: sub
                .pools()
                .iter()
                .map(|p| StoredPool {
                    tag: p.tag.clone(),
                    id: Some(p.id.clone()),
                    name: Some(p.name.clone()),
                })
                .collect(),
        }
    }
}

/// Parses a stored watermark, RFC3339 or the `2018-03-01 12:34:56.123000+00:00`
/// form older records use. A missing offset means UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|t| t.and_utc())
        })
        .ok()
}

impl SubscriptionRecord {
    /// Turns the record back into a subscription, filling in what's missing
    /// instead of failing. `None` only if there are no tags or no recipients.
    fn into_subscription(self, shared_channel: Option<SharedChannel>) -> Option<Subscription> {
        let tags = TagSet::from_tags(self.tags)?;

        let recipients: Vec<Recipient> = self
            .users
            .into_vec()
            .into_iter()
            .filter_map(|user| {
                let Some(id) = user.id.get() else {
                    warn!(tags = %tags, id = ?user.id, "dropping recipient with invalid id");
                    return None;
                };
                let name = user
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| id.to_string());
                Some(Recipient::new(id, name))
            })
            .collect();

        let target = if self.is_private {
            DeliveryTarget::Private
        } else {
            match (shared_channel, self.channel.as_ref().and_then(StoredId::get)) {
                (Some(shared), _) => DeliveryTarget::Shared(shared),
                (None, Some(channel_id)) => DeliveryTarget::Shared(SharedChannel {
                    guild_id: self.server.as_ref().and_then(StoredId::get),
                    channel_id,
                }),
                (None, None) => {
                    warn!(tags = %tags, "shared subscription without channel, delivering privately");
                    DeliveryTarget::Private
                }
            }
        };

        let watermark = match self.old_timestamp.as_deref().map(str::trim) {
            None | Some("") | Some("None") => None,
            Some(text) => {
                let parsed = parse_timestamp(text);
                if parsed.is_none() {
                    warn!(tags = %tags, timestamp = text, "unreadable watermark, starting over");
                }
                parsed
            }
        };

        let pools = self
            .pools
            .into_iter()
            .map(|p| {
                let id = p
                    .id
                    .or_else(|| p.tag.strip_prefix("pool:").map(str::to_owned))
                    .unwrap_or_default();
                Pool {
                    name: p.name.unwrap_or_else(|| id.clone()),
                    tag: p.tag,
                    id,
                }
            })
            .collect();

        Subscription::restore(tags, recipients, pools, target, watermark)
    }
}

/// `sub_channel.json`, older files use `server`/`channel` with string ids
#[derive(Serialize, Deserialize, Debug)]
struct ChannelRecord {
    #[serde(default, alias = "guild_id")]
    server: Option<StoredId>,
    #[serde(alias = "channel_id")]
    channel: StoredId,
}

#[derive(Debug)]
pub(crate) struct SubscriptionStore {
    data_dir: PathBuf,
    /// index entries whose record couldn't be loaded, kept so they survive
    /// index rewrites
    orphans: Mutex<Vec<PathBuf>>,
}

impl SubscriptionStore {
    pub(crate) fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            data_dir: data_dir.into(),
            orphans: Mutex::new(Vec::new()),
        };

        let subs_dir = store.subs_dir();
        std::fs::create_dir_all(&subs_dir).map_err(io_err(&subs_dir))?;

        Ok(store)
    }

    fn subs_dir(&self) -> PathBuf {
        self.data_dir.join("subs")
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join("subs.db")
    }

    fn shared_channel_path(&self) -> PathBuf {
        self.data_dir.join("sub_channel.json")
    }

    /// Path for the record of a new subscription
    pub(crate) fn record_path(&self, key: &SubscriptionKey) -> PathBuf {
        self.subs_dir().join(record_file_name(key))
    }

    pub(crate) fn orphans(&self) -> Vec<PathBuf> {
        self.orphans
            .lock()
            .expect("orphan list mutex got poisoned")
            .clone()
    }

    /// Keeps `path` in the index without polling it
    pub(crate) fn keep_orphan(&self, path: PathBuf) {
        self.orphans
            .lock()
            .expect("orphan list mutex got poisoned")
            .push(path);
    }

    /// Loads every subscription listed in the index together with the path
    /// it was loaded from. Only failing to read the index itself is an
    /// error, broken records get logged and kept as orphans.
    pub(crate) fn load_all(&self) -> Result<Vec<(PathBuf, Subscription)>, StoreError> {
        let index_path = self.index_path();
        let index = match std::fs::read_to_string(&index_path) {
            Ok(index) => index,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_err(&index_path)(err)),
        };

        let shared_channel = self.load_shared_channel().unwrap_or_else(|err| {
            error!("couldn't load shared subscription channel: {}", err);
            None
        });

        let mut subs = Vec::new();
        let mut orphans = Vec::new();

        for line in index.lines() {
            let line = line.trim().trim_matches('\'');
            if line.is_empty() {
                continue;
            }

            let path = PathBuf::from(line);
            match self.load_record(&path, shared_channel) {
                Ok(Some(sub)) => {
                    debug!(path = %path.display(), tags = %sub.tags(), "loaded subscription");
                    subs.push((path, sub));
                }
                Ok(None) => {
                    warn!(path = %path.display(), "subscription record has no tags or recipients");
                    orphans.push(path);
                }
                Err(err) => {
                    error!(path = %path.display(), "couldn't load subscription: {}", err);
                    orphans.push(path);
                }
            }
        }

        *self.orphans.lock().expect("orphan list mutex got poisoned") = orphans;
        Ok(subs)
    }

    fn load_record(
        &self,
        path: &Path,
        shared_channel: Option<SharedChannel>,
    ) -> Result<Option<Subscription>, StoreError> {
        let content = std::fs::read_to_string(path).map_err(io_err(path))?;
        let record: SubscriptionRecord =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.to_owned(),
                source,
            })?;

        Ok(record.into_subscription(shared_channel))
    }

    pub(crate) fn save(&self, path: &Path, sub: &Subscription) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&SubscriptionRecord::from(sub)).map_err(
            |source| StoreError::Json {
                path: path.to_owned(),
                source,
            },
        )?;

        write_atomic(path, json.as_bytes())
    }

    /// Deletes a record, one that's already gone isn't an error
    pub(crate) fn remove(&self, path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(path)(err)),
        }
    }

    /// Rewrites the index from the given record paths, orphans are kept
    pub(crate) fn persist_index(
        &self,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Result<(), StoreError> {
        let mut lines: Vec<String> = paths
            .into_iter()
            .map(|p| p.display().to_string())
            .collect();
        lines.extend(self.orphans().iter().map(|p| p.display().to_string()));

        write_atomic(&self.index_path(), lines.join("\n").as_bytes())
    }

    pub(crate) fn load_shared_channel(&self) -> Result<Option<SharedChannel>, StoreError> {
        let path = self.shared_channel_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path)(err)),
        };

        let record: ChannelRecord =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;

        let Some(channel_id) = record.channel.get() else {
            warn!(path = %path.display(), "shared subscription channel has an invalid id");
            return Ok(None);
        };

        Ok(Some(SharedChannel {
            guild_id: record.server.as_ref().and_then(StoredId::get),
            channel_id,
        }))
    }

    pub(crate) fn save_shared_channel(&self, channel: SharedChannel) -> Result<(), StoreError> {
        let path = self.shared_channel_path();
        let record = ChannelRecord {
            server: channel.guild_id.map(StoredId::from),
            channel: channel.channel_id.into(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        write_atomic(&path, json.as_bytes())
    }
}

/// Readable sanitised tags followed by a hash of the exact key, distinct
/// keys never share a file.
fn record_file_name(key: &SubscriptionKey) -> String {
    let query = key.tags.query();
    let readable: String = UNSAFE_NAME_CHARS
        .replace_all(&query, "_")
        .chars()
        .take(NAME_MAX_CHARS)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    if let Some(owner) = key.owner {
        // tags never contain whitespace
        hasher.update(b"\n");
        hasher.update(owner.to_string().as_bytes());
    }
    let hash = format!("{:x}", hasher.finalize());
    let hash = &hash[..NAME_HASH_LEN];

    match key.owner {
        Some(owner) => format!("{}.{}.{}.json", readable, owner, hash),
        None => format!("{}.{}.json", readable, hash),
    }
}

/// Writes to a uniquely named temp file next to `path` and renames it over
/// `path`, concurrent writers never share a temp file.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(content).map_err(io_err(tmp.path()))?;
    tmp.persist(path).map_err(|err| io_err(path)(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_sub(query: &str, user: u64) -> Subscription {
        Subscription::new(
            TagSet::parse(query).unwrap(),
            Recipient::new(user, format!("user{}", user)),
            vec![],
            DeliveryTarget::Shared(SharedChannel {
                guild_id: Some(10),
                channel_id: 20,
            }),
            DateTime::from_timestamp(1_700_000_000, 0),
        )
    }

    fn private_sub(query: &str, user: u64) -> Subscription {
        Subscription::new(
            TagSet::parse(query).unwrap(),
            Recipient::new(user, format!("user{}", user)),
            vec![],
            DeliveryTarget::Private,
            None,
        )
    }

    fn save_indexed(store: &SubscriptionStore, subs: &[Subscription]) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = subs.iter().map(|s| store.record_path(&s.key())).collect();
        for (path, sub) in paths.iter().zip(subs) {
            store.save(path, sub).unwrap();
        }
        store.persist_index(paths.clone()).unwrap();
        paths
    }

    fn write_index(dir: &tempfile::TempDir, paths: &[&Path]) {
        let lines: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        std::fs::write(dir.path().join("subs.db"), lines.join("\n")).unwrap();
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let subs = vec![shared_sub("touhou 1girl", 1), private_sub("touhou 1girl", 2)];
        let paths = save_indexed(&store, &subs);

        let loaded = SubscriptionStore::open(dir.path()).unwrap().load_all().unwrap();
        assert_eq!(loaded, paths.into_iter().zip(subs).collect::<Vec<_>>());
    }

    #[test]
    fn file_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let keys = [
            shared_sub("blue eyes", 1).key(),
            shared_sub("blue_eyes", 1).key(),
            shared_sub("a b1", 1).key(),
            private_sub("a b", 1).key(),
            private_sub("a b", 11).key(),
            private_sub("a b1", 1).key(),
        ];
        let mut paths: Vec<PathBuf> = keys.iter().map(|k| store.record_path(k)).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), keys.len());

        let name = record_file_name(&shared_sub("fate/grand_order rating:s", 1).key());
        assert!(name.starts_with("fate_grand_order_rating_s."));
        assert!(name.ends_with(".json"));
        assert!(!name.contains('/'));
        assert!(record_file_name(&private_sub("a", 42).key()).starts_with("a.42."));
    }

    #[test]
    fn missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        assert!(store.load_all().unwrap().is_empty());
        assert!(dir.path().join("subs").is_dir());
    }

    #[test]
    fn broken_records_are_kept_as_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let good = shared_sub("good", 1);
        let good_path = store.record_path(&good.key());
        store.save(&good_path, &good).unwrap();
        let broken = dir.path().join("subs").join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        let missing = dir.path().join("subs").join("missing.json");
        write_index(&dir, &[&good_path, &broken, &missing]);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![(good_path.clone(), good)]);
        assert_eq!(store.orphans(), vec![broken.clone(), missing.clone()]);

        store.persist_index([good_path]).unwrap();
        let index = std::fs::read_to_string(dir.path().join("subs.db")).unwrap();
        assert_eq!(index.lines().count(), 3);
        assert!(index.contains("broken.json"));
    }

    #[test]
    fn lenient_record_gets_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let path = dir.path().join("subs").join("old.json");
        std::fs::write(
            &path,
            r#"{"users": [{"id": 5}], "tags": ["b", "a"], "is_private": false}"#,
        )
        .unwrap();
        write_index(&dir, &[&path]);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let (loaded_path, sub) = &loaded[0];
        assert_eq!(loaded_path, &path);
        assert_eq!(sub.recipients(), &[Recipient::new(5, "5")]);
        assert_eq!(sub.tags().query(), "a b");
        // no channel anywhere, falls back to private delivery
        assert_eq!(sub.target(), DeliveryTarget::Private);
        assert_eq!(sub.watermark(), None);
    }

    #[test]
    fn loads_records_written_by_the_old_bot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let shared = dir.path().join("subs").join("1girl_touhou.json");
        std::fs::write(
            &shared,
            r#"{
  "users": {
    "0": {"id": "134310073014026242", "name": "owner", "mention": "<@134310073014026242>"},
    "10": {"id": "300", "name": "", "mention": "<@300>"},
    "1": {"id": "200", "name": "second", "mention": "<@200>"}
  },
  "tags": ["touhou", "1girl", "pool:77"],
  "is_private": false,
  "server": "111",
  "channel": "222",
  "old_timestamp": "2018-03-01 12:34:56.123000-05:00",
  "new_timestamp": "<class 'datetime.datetime'>",
  "already_posted": [],
  "pools": [{"tag": "pool:77", "name": "Some_Pool", "id": "77"}]
}"#,
        )
        .unwrap();

        let private = dir.path().join("subs").join("touhou134310073014026242.json");
        std::fs::write(
            &private,
            r#"{
  "users": {"0": {"id": "134310073014026242", "name": "owner", "mention": "<@134310073014026242>"}},
  "tags": ["touhou"],
  "is_private": true,
  "old_timestamp": "None",
  "new_timestamp": "<class 'datetime.datetime'>",
  "already_posted": [],
  "pools": [{"tag": "pool:1", "name": null, "id": "1"}]
}"#,
        )
        .unwrap();
        write_index(&dir, &[&shared, &private]);

        let loaded = store.load_all().unwrap();
        assert!(store.orphans().is_empty());
        assert_eq!(loaded.len(), 2);

        let (path, sub) = &loaded[0];
        assert_eq!(path, &shared);
        assert_eq!(
            sub.recipients(),
            &[
                Recipient::new(134310073014026242, "owner"),
                Recipient::new(200, "second"),
                Recipient::new(300, "300"),
            ]
        );
        assert_eq!(sub.tags().query(), "1girl pool:77 touhou");
        assert_eq!(
            sub.target(),
            DeliveryTarget::Shared(SharedChannel {
                guild_id: Some(111),
                channel_id: 222,
            })
        );
        assert_eq!(
            sub.watermark(),
            Some("2018-03-01T17:34:56.123Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert_eq!(sub.label(), "1girl Some_Pool(pool:77) touhou");

        let (path, sub) = &loaded[1];
        assert_eq!(path, &private);
        assert_eq!(sub.target(), DeliveryTarget::Private);
        assert_eq!(sub.watermark(), None);
        assert_eq!(sub.pools()[0].name, "1");
    }

    #[test]
    fn old_timestamp_forms() {
        let expected = DateTime::from_timestamp(1_519_907_696, 0);
        assert_eq!(parse_timestamp("2018-03-01 12:34:56+00:00"), expected);
        assert_eq!(parse_timestamp("2018-03-01 12:34:56"), expected);
        assert_eq!(parse_timestamp("2018-03-01T12:34:56Z"), expected);
        assert_eq!(parse_timestamp("2018-03-01T14:34:56+02:00"), expected);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn shared_channel_overrides_stored_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();
        save_indexed(&store, &[shared_sub("a", 1)]);

        let configured = SharedChannel {
            guild_id: Some(99),
            channel_id: 98,
        };
        store.save_shared_channel(configured).unwrap();
        assert_eq!(store.load_shared_channel().unwrap(), Some(configured));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].1.target(), DeliveryTarget::Shared(configured));
    }

    #[test]
    fn old_shared_channel_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("sub_channel.json"),
            r#"{"server": "111", "channel": "222"}"#,
        )
        .unwrap();

        assert_eq!(
            store.load_shared_channel().unwrap(),
            Some(SharedChannel {
                guild_id: Some(111),
                channel_id: 222,
            })
        );
    }

    #[test]
    fn remove_deletes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let sub = private_sub("a", 1);
        let path = store.record_path(&sub.key());
        store.save(&path, &sub).unwrap();
        assert!(path.exists());

        store.remove(&path).unwrap();
        assert!(!path.exists());
        store.remove(&path).unwrap();
    }

    #[test]
    fn record_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();

        let sub = shared_sub("a", 1);
        let path = store.record_path(&sub.key());
        store.save(&path, &sub).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["users"]["0"]["id"], "1");
        assert_eq!(json["users"]["0"]["name"], "user1");
        assert_eq!(json["users"]["0"]["mention"], "<@1>");
        assert_eq!(json["tags"][0], "a");
        assert_eq!(json["is_private"], false);
        assert_eq!(json["server"], "10");
        assert_eq!(json["channel"], "20");
        assert_eq!(json["old_timestamp"], "2023-11-14T22:13:20+00:00");

        let private = private_sub("a", 1);
        let path = store.record_path(&private.key());
        store.save(&path, &private).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["old_timestamp"], "None");
        assert!(json.get("channel").is_none());
    }

    #[test]
    fn concurrent_index_writes_dont_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(dir.path()).unwrap();
        let small = vec![dir.path().join("subs").join("one.json")];
        let large: Vec<PathBuf> = (0..200)
            .map(|i| dir.path().join("subs").join(format!("{}.json", i)))
            .collect();

        std::thread::scope(|s| {
            let writers = [&small, &large].map(|paths| {
                let store = &store;
                s.spawn(move || {
                    (0..300)
                        .filter(|_| store.persist_index(paths.clone()).is_err())
                        .count()
                })
            });
            for writer in writers {
                assert_eq!(writer.join().unwrap(), 0);
            }
        });

        let index = std::fs::read_to_string(dir.path().join("subs.db")).unwrap();
        assert!([1, 200].contains(&index.lines().count()));
        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }
}
