use crate::{
    Address, AttachmentRecord, DisappearingToken, GiftBadge, LinkPreview, PollCreate, QuotedReply,
    RecipientState, Result, SentMessageParams, StickerInfo, StoryRef,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const THREAD_PREFIX: &str = "v1/threads/";
const OUTGOING_PREFIX: &str = "v1/interactions/outgoing/";
const UNDECRYPTABLE_PREFIX: &str = "v1/interactions/undecryptable/";
const INFO_PREFIX: &str = "v1/interactions/info/";

pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: String) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Caller-supplied unit of work. Writes are buffered and become visible to
/// the underlying adapter only on commit; reads inside the transaction see
/// the buffered state.
pub struct WriteTransaction {
    adapter: Arc<dyn StorageAdapter>,
    // None marks a pending delete.
    pending: HashMap<String, Option<String>>,
}

impl WriteTransaction {
    fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            pending: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.pending.get(key) {
            Some(Some(value)) => Ok(Some(value.clone())),
            Some(None) => Ok(None),
            None => self.adapter.get(key),
        }
    }

    fn put(&mut self, key: &str, value: String) {
        self.pending.insert(key.to_string(), Some(value));
    }

    fn del(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self.adapter.list(prefix)?;
        for (key, value) in &self.pending {
            if !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(_) if !keys.contains(key) => keys.push(key.clone()),
                None => keys.retain(|k| k != key),
                _ => {}
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn commit(self) -> Result<()> {
        for (key, value) in self.pending {
            match value {
                Some(value) => self.adapter.put(&key, value)?,
                None => self.adapter.del(&key)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreadKind {
    Contact { address: Address },
    GroupV1,
    GroupV2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub id: String,
    pub kind: ThreadKind,
    pub disappearing_token: DisappearingToken,
}

impl ThreadRecord {
    pub fn contact(id: impl Into<String>, address: Address) -> Self {
        Self {
            id: id.into(),
            kind: ThreadKind::Contact { address },
            disappearing_token: DisappearingToken::disabled(),
        }
    }

    pub fn group_v1(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ThreadKind::GroupV1,
            disappearing_token: DisappearingToken::disabled(),
        }
    }

    pub fn group_v2(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ThreadKind::GroupV2,
            disappearing_token: DisappearingToken::disabled(),
        }
    }

    pub fn is_group_v2(&self) -> bool {
        matches!(self.kind, ThreadKind::GroupV2)
    }

    pub fn contact_address(&self) -> Option<&Address> {
        match &self.kind {
            ThreadKind::Contact { address } => Some(address),
            _ => None,
        }
    }
}

/// An outgoing message authored by the local account. The wire format has no
/// stable message id, so `(timestamp, thread_id)` is the cross-device
/// correlation key; reconciliation finds and reuses records at those
/// coordinates rather than inserting duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub unique_id: String,
    pub timestamp: u64,
    pub thread_id: String,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentRecord>,
    pub quote: Option<QuotedReply>,
    /// Durable copy of the quoted message's thumbnail, assigned its own
    /// unique id when this record is first created.
    pub quote_attachment: Option<AttachmentRecord>,
    pub link_preview: Option<LinkPreview>,
    pub link_preview_image: Option<AttachmentRecord>,
    pub sticker: Option<StickerInfo>,
    pub sticker_data: Option<AttachmentRecord>,
    pub poll: Option<PollCreate>,
    pub gift_badge: Option<GiftBadge>,
    pub is_view_once: bool,
    pub view_once_completed: bool,
    pub expires_in_seconds: Option<u32>,
    pub expiration_started_at: Option<u64>,
    pub story_ref: Option<StoryRef>,
    /// True when this record only mirrors a remote copy and was never a
    /// genuine send by this account; recipient updates skip such records.
    pub from_remote_copy_only: bool,
    /// Left over from a prior unsuccessful send attempt on this device.
    pub was_failed_send: bool,
    pub recipient_states: HashMap<Address, RecipientState>,
}

impl OutgoingMessage {
    pub fn from_params(timestamp: u64, thread_id: &str, params: &SentMessageParams) -> Self {
        Self {
            unique_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            thread_id: thread_id.to_string(),
            body: params.body.clone(),
            attachments: Vec::new(),
            quote: params.quote.clone(),
            quote_attachment: None,
            link_preview: params.link_preview.clone(),
            link_preview_image: None,
            sticker: params.sticker.clone(),
            sticker_data: None,
            poll: params.poll.clone(),
            gift_badge: params.gift_badge.clone(),
            is_view_once: params.is_view_once,
            view_once_completed: false,
            expires_in_seconds: params.expiration_duration_seconds,
            expiration_started_at: None,
            story_ref: params.story_ref.clone(),
            from_remote_copy_only: false,
            was_failed_send: false,
            recipient_states: HashMap::new(),
        }
    }

    /// Overlay recipient states from a linked device. Addresses present in
    /// the incoming map are overwritten; absent addresses are left untouched.
    pub fn merge_recipient_states(&mut self, incoming: &HashMap<Address, RecipientState>) {
        for (address, state) in incoming {
            self.recipient_states
                .insert(address.clone(), state.clone());
        }
    }
}

/// Stand-in for a message that arrived earlier but could not be decrypted.
/// A sync transcript at the same `(timestamp, thread)` replaces it: the
/// sender plausibly resent what we failed to read the first time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndecryptablePlaceholder {
    pub unique_id: String,
    pub timestamp: u64,
    pub thread_id: String,
    pub sender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InfoKind {
    SessionEnded,
    UnknownProtocolVersion { required: u32 },
}

/// Synthetic system record rendered in the conversation but never sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoMessage {
    pub unique_id: String,
    pub timestamp: u64,
    pub thread_id: String,
    pub kind: InfoKind,
}

impl InfoMessage {
    pub fn new(timestamp: u64, thread_id: &str, kind: InfoKind) -> Self {
        Self {
            unique_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            thread_id: thread_id.to_string(),
            kind,
        }
    }
}

/// Typed persistence layer for threads and interactions, keyed by versioned
/// prefixes over a plain string/JSON storage adapter. All access goes through
/// a caller-supplied `WriteTransaction`.
#[derive(Clone)]
pub struct InteractionStore {
    adapter: Arc<dyn StorageAdapter>,
}

impl InteractionStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    pub fn begin_write(&self) -> WriteTransaction {
        WriteTransaction::new(self.adapter.clone())
    }

    fn thread_key(thread_id: &str) -> String {
        format!("{THREAD_PREFIX}{thread_id}")
    }

    fn outgoing_key(timestamp: u64, thread_id: &str, unique_id: &str) -> String {
        format!("{OUTGOING_PREFIX}{timestamp}/{thread_id}/{unique_id}")
    }

    fn undecryptable_key(timestamp: u64, thread_id: &str) -> String {
        format!("{UNDECRYPTABLE_PREFIX}{timestamp}/{thread_id}")
    }

    fn info_key(thread_id: &str, unique_id: &str) -> String {
        format!("{INFO_PREFIX}{thread_id}/{unique_id}")
    }

    pub fn thread(&self, tx: &WriteTransaction, thread_id: &str) -> Result<Option<ThreadRecord>> {
        match tx.get(&Self::thread_key(thread_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_thread(&self, tx: &mut WriteTransaction, thread: &ThreadRecord) -> Result<()> {
        tx.put(&Self::thread_key(&thread.id), serde_json::to_string(thread)?);
        Ok(())
    }

    /// A locally authored outgoing message at `(timestamp, thread)`, if any.
    /// Several can legitimately exist (two sends in the same millisecond);
    /// the first in unique-id order is returned.
    pub fn outgoing_message(
        &self,
        tx: &WriteTransaction,
        timestamp: u64,
        thread_id: &str,
    ) -> Result<Option<OutgoingMessage>> {
        let prefix = format!("{OUTGOING_PREFIX}{timestamp}/{thread_id}/");
        let Some(key) = tx.list(&prefix)?.into_iter().next() else {
            return Ok(None);
        };
        match tx.get(&key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All locally authored outgoing messages sharing a timestamp, across
    /// threads. Timestamps are not unique, so this can return more than one;
    /// results are ordered by unique id for deterministic iteration.
    pub fn outgoing_messages_with_timestamp(
        &self,
        tx: &WriteTransaction,
        timestamp: u64,
    ) -> Result<Vec<OutgoingMessage>> {
        let prefix = format!("{OUTGOING_PREFIX}{timestamp}/");
        let mut out = Vec::new();
        for key in tx.list(&prefix)? {
            let Some(raw) = tx.get(&key)? else {
                continue;
            };
            out.push(serde_json::from_str::<OutgoingMessage>(&raw)?);
        }
        out.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Ok(out)
    }

    pub fn put_outgoing(&self, tx: &mut WriteTransaction, message: &OutgoingMessage) -> Result<()> {
        tx.put(
            &Self::outgoing_key(message.timestamp, &message.thread_id, &message.unique_id),
            serde_json::to_string(message)?,
        );
        Ok(())
    }

    pub fn undecryptable_placeholder(
        &self,
        tx: &WriteTransaction,
        timestamp: u64,
        thread_id: &str,
    ) -> Result<Option<UndecryptablePlaceholder>> {
        match tx.get(&Self::undecryptable_key(timestamp, thread_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_undecryptable_placeholder(
        &self,
        tx: &mut WriteTransaction,
        placeholder: &UndecryptablePlaceholder,
    ) -> Result<()> {
        tx.put(
            &Self::undecryptable_key(placeholder.timestamp, &placeholder.thread_id),
            serde_json::to_string(placeholder)?,
        );
        Ok(())
    }

    pub fn remove_undecryptable_placeholder(
        &self,
        tx: &mut WriteTransaction,
        timestamp: u64,
        thread_id: &str,
    ) {
        tx.del(&Self::undecryptable_key(timestamp, thread_id));
    }

    pub fn insert_info_message(
        &self,
        tx: &mut WriteTransaction,
        info: &InfoMessage,
    ) -> Result<()> {
        tx.put(
            &Self::info_key(&info.thread_id, &info.unique_id),
            serde_json::to_string(info)?,
        );
        Ok(())
    }

    pub fn info_messages(
        &self,
        tx: &WriteTransaction,
        thread_id: &str,
    ) -> Result<Vec<InfoMessage>> {
        let prefix = format!("{INFO_PREFIX}{thread_id}/");
        let mut out = Vec::new();
        for key in tx.list(&prefix)? {
            let Some(raw) = tx.get(&key)? else {
                continue;
            };
            out.push(serde_json::from_str::<InfoMessage>(&raw)?);
        }
        out.sort_by_key(|info| info.timestamp);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InteractionStore {
        InteractionStore::new(Arc::new(InMemoryStorage::new()))
    }

    fn outgoing(timestamp: u64, thread_id: &str) -> OutgoingMessage {
        OutgoingMessage::from_params(timestamp, thread_id, &SentMessageParams::default())
    }

    #[test]
    fn uncommitted_writes_are_invisible_outside_the_transaction() {
        let adapter = Arc::new(InMemoryStorage::new());
        let store = InteractionStore::new(adapter.clone());

        let mut tx = store.begin_write();
        store.put_outgoing(&mut tx, &outgoing(100, "thread-a")).unwrap();

        // Visible through the transaction, not through a fresh one.
        assert!(store.outgoing_message(&tx, 100, "thread-a").unwrap().is_some());
        let other = store.begin_write();
        assert!(store.outgoing_message(&other, 100, "thread-a").unwrap().is_none());

        tx.commit().unwrap();
        let after = store.begin_write();
        assert!(store.outgoing_message(&after, 100, "thread-a").unwrap().is_some());
    }

    #[test]
    fn pending_delete_hides_committed_record() {
        let store = store();

        let mut tx = store.begin_write();
        store
            .put_undecryptable_placeholder(
                &mut tx,
                &UndecryptablePlaceholder {
                    unique_id: "ph-1".to_string(),
                    timestamp: 100,
                    thread_id: "thread-a".to_string(),
                    sender: Address::new("alice"),
                },
            )
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin_write();
        store.remove_undecryptable_placeholder(&mut tx, 100, "thread-a");
        assert!(store
            .undecryptable_placeholder(&tx, 100, "thread-a")
            .unwrap()
            .is_none());
        tx.commit().unwrap();

        let tx = store.begin_write();
        assert!(store
            .undecryptable_placeholder(&tx, 100, "thread-a")
            .unwrap()
            .is_none());
    }

    #[test]
    fn timestamp_lookup_spans_threads_and_is_sorted() {
        let store = store();

        let mut tx = store.begin_write();
        let mut first = outgoing(500, "thread-a");
        first.unique_id = "b-second".to_string();
        let mut second = outgoing(500, "thread-b");
        second.unique_id = "a-first".to_string();
        store.put_outgoing(&mut tx, &first).unwrap();
        store.put_outgoing(&mut tx, &second).unwrap();
        store.put_outgoing(&mut tx, &outgoing(501, "thread-a")).unwrap();
        tx.commit().unwrap();

        let tx = store.begin_write();
        let found = store.outgoing_messages_with_timestamp(&tx, 500).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].unique_id, "a-first");
        assert_eq!(found[1].unique_id, "b-second");
    }

    #[test]
    fn merge_recipient_states_is_address_scoped() {
        let mut message = outgoing(100, "thread-a");
        let alice = Address::new("alice");
        let bob = Address::new("bob");
        message
            .recipient_states
            .insert(alice.clone(), RecipientState::with_status(crate::DeliveryStatus::Delivered));
        message
            .recipient_states
            .insert(bob.clone(), RecipientState::with_status(crate::DeliveryStatus::Sent));

        let mut incoming = HashMap::new();
        incoming.insert(alice.clone(), RecipientState::with_status(crate::DeliveryStatus::Read));
        message.merge_recipient_states(&incoming);

        assert_eq!(
            message.recipient_states[&alice].status,
            crate::DeliveryStatus::Read
        );
        assert_eq!(
            message.recipient_states[&bob].status,
            crate::DeliveryStatus::Sent
        );
    }
}
