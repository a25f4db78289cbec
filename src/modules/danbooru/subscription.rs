use std::fmt;

use chrono::{DateTime, Utc};

use crate::util::mention;

/// Tag query of a subscription, always kept sorted so that two queries
/// compare equal regardless of the order they were typed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TagSet(Vec<String>);

impl TagSet {
    /// Splits a user supplied query on whitespace, `None` if there are no tags at all
    pub(crate) fn parse(query: &str) -> Option<Self> {
        Self::from_tags(query.split_whitespace().map(str::to_owned).collect())
    }

    pub(crate) fn from_tags(mut tags: Vec<String>) -> Option<Self> {
        tags.retain(|t| !t.is_empty());
        if tags.is_empty() {
            return None;
        }

        tags.sort();
        Some(Self(tags))
    }

    pub(crate) fn tags(&self) -> &[String] {
        &self.0
    }

    /// space separated query as sent to the api
    pub(crate) fn query(&self) -> String {
        self.0.join(" ")
    }

    pub(crate) fn pool_tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|t| t.strip_prefix("pool:").map(|id| (t.as_str(), id)))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recipient {
    pub(crate) id: u64,
    pub(crate) name: String,
}

impl Recipient {
    pub(crate) fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub(crate) fn mention(&self) -> String {
        mention(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pool {
    pub(crate) tag: String,
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SharedChannel {
    pub(crate) guild_id: Option<u64>,
    pub(crate) channel_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryTarget {
    /// every recipient gets the posts in their DMs
    Private,
    /// posted once into the channel, recipients get mentioned
    Shared(SharedChannel),
}

impl DeliveryTarget {
    pub(crate) fn is_private(&self) -> bool {
        matches!(self, DeliveryTarget::Private)
    }
}

/// Identity of a subscription: the tag set, plus the owner for private ones.
/// Two subscriptions are the same one exactly when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey {
    pub(crate) tags: TagSet,
    pub(crate) owner: Option<u64>,
}

impl SubscriptionKey {
    pub(crate) fn shared(tags: TagSet) -> Self {
        Self { tags, owner: None }
    }

    pub(crate) fn private(tags: TagSet, owner: u64) -> Self {
        Self {
            tags,
            owner: Some(owner),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => write!(f, "{} [private {}]", self.tags, owner),
            None => write!(f, "{}", self.tags),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Subscription {
    tags: TagSet,
    recipients: Vec<Recipient>,
    pools: Vec<Pool>,
    target: DeliveryTarget,
    watermark: Option<DateTime<Utc>>,
}

impl Subscription {
    pub(crate) fn new(
        tags: TagSet,
        recipient: Recipient,
        pools: Vec<Pool>,
        target: DeliveryTarget,
        watermark: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            tags,
            recipients: vec![recipient],
            pools,
            target,
            watermark,
        }
    }

    /// Rebuilds a subscription from a stored record, `None` when the record
    /// has no recipients left.
    pub(crate) fn restore(
        tags: TagSet,
        recipients: Vec<Recipient>,
        pools: Vec<Pool>,
        target: DeliveryTarget,
        watermark: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let mut sub = Self {
            tags,
            recipients: Vec::with_capacity(recipients.len()),
            pools,
            target,
            watermark,
        };

        for recipient in recipients {
            sub.add_recipient(recipient);
        }

        (!sub.recipients.is_empty()).then_some(sub)
    }

    pub(crate) fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub(crate) fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub(crate) fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub(crate) fn target(&self) -> DeliveryTarget {
        self.target
    }

    pub(crate) fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub(crate) fn matches_tags(&self, candidate: &TagSet) -> bool {
        self.tags == *candidate
    }

    pub(crate) fn has_recipient(&self, id: u64) -> bool {
        self.recipients.iter().any(|r| r.id == id)
    }

    /// Returns false if the recipient was already subscribed
    pub(crate) fn add_recipient(&mut self, recipient: Recipient) -> bool {
        if self.has_recipient(recipient.id) {
            return false;
        }

        self.recipients.push(recipient);
        true
    }

    /// Returns false if the recipient wasn't subscribed. Leaving the
    /// subscription without recipients is allowed, the registry deletes
    /// those.
    pub(crate) fn remove_recipient(&mut self, id: u64) -> bool {
        let before = self.recipients.len();
        self.recipients.retain(|r| r.id != id);
        self.recipients.len() != before
    }

    /// Moves the watermark forward, never backwards. Returns whether it moved.
    pub(crate) fn advance_watermark(&mut self, newest: DateTime<Utc>) -> bool {
        match self.watermark {
            Some(current) if current >= newest => false,
            _ => {
                self.watermark = Some(newest);
                true
            }
        }
    }

    /// Tag query with pool tags replaced by `name(pool:id)`
    pub(crate) fn label(&self) -> String {
        self.tags
            .tags()
            .iter()
            .map(|tag| match self.pools.iter().find(|p| &p.tag == tag) {
                Some(pool) => format!("{}({})", pool.name, pool.tag),
                None => tag.to_owned(),
            })
            .collect::<Vec<String>>()
            .join(" ")
    }

    pub(crate) fn mentions(&self) -> String {
        self.recipients
            .iter()
            .map(Recipient::mention)
            .collect::<Vec<String>>()
            .join(",")
    }

    /// Key the subscription is registered under, private subscriptions
    /// belong to their first recipient.
    pub(crate) fn key(&self) -> SubscriptionKey {
        match (self.target, self.recipients.first()) {
            (DeliveryTarget::Private, Some(owner)) => {
                SubscriptionKey::private(self.tags.clone(), owner.id)
            }
            _ => SubscriptionKey::shared(self.tags.clone()),
        }
    }
}
