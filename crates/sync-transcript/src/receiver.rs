use crate::{
    ArchivedPaymentInfo, AttachmentDownloadQueue, AttachmentPointer, AttachmentRecord,
    DisappearingMessageScheduler, DisappearingTokenSync, EarlyMessageReapplier, Error,
    InteractionStore, LocalIdentity,
    NoopCollaborator, OutgoingMessage, PaymentNotification, PaymentsProcessor, Result,
    SentMessageParams, SessionArchiver, ThreadRecord, Transcript, TranscriptKind,
    TranscriptTarget, ViewOnceCompletion, WriteTransaction, CURRENT_PROTOCOL_VERSION,
    MAX_STORE_TIMESTAMP,
};
use crate::store::{InfoKind, InfoMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciles sync transcripts from linked devices into the local message
/// store, so every device converges on the same conversation state without
/// re-sending ciphertext.
///
/// All work happens inside the caller-supplied `WriteTransaction`; nothing
/// here blocks, suspends, or opens its own transaction. Side effects beyond
/// the store go through constructor-injected collaborators and are
/// best-effort: their failures are logged, never surfaced as transcript
/// failures.
pub struct SentTranscriptReceiver {
    store: InteractionStore,
    attachments: Arc<dyn AttachmentDownloadQueue>,
    expiration: Arc<dyn DisappearingMessageScheduler>,
    early_messages: Arc<dyn EarlyMessageReapplier>,
    token_sync: Arc<dyn DisappearingTokenSync>,
    view_once: Arc<dyn ViewOnceCompletion>,
    payments: Arc<dyn PaymentsProcessor>,
    sessions: Arc<dyn SessionArchiver>,
}

impl SentTranscriptReceiver {
    /// Receiver with no-op collaborators; store mutations still apply.
    pub fn new(store: InteractionStore) -> Self {
        let noop = Arc::new(NoopCollaborator);
        Self {
            store,
            attachments: noop.clone(),
            expiration: noop.clone(),
            early_messages: noop.clone(),
            token_sync: noop.clone(),
            view_once: noop.clone(),
            payments: noop.clone(),
            sessions: noop,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_collaborators(
        store: InteractionStore,
        attachments: Arc<dyn AttachmentDownloadQueue>,
        expiration: Arc<dyn DisappearingMessageScheduler>,
        early_messages: Arc<dyn EarlyMessageReapplier>,
        token_sync: Arc<dyn DisappearingTokenSync>,
        view_once: Arc<dyn ViewOnceCompletion>,
        payments: Arc<dyn PaymentsProcessor>,
        sessions: Arc<dyn SessionArchiver>,
    ) -> Self {
        Self {
            store,
            attachments,
            expiration,
            early_messages,
            token_sync,
            view_once,
            payments,
            sessions,
        }
    }

    /// Reconcile one transcript. Returns the affected outgoing message for
    /// content-bearing transcripts, `None` for the side-channel kinds, or a
    /// classified failure. Callers are expected to log and drop failed
    /// transcripts; redelivery is a transport-layer concern.
    pub fn process(
        &self,
        transcript: &Transcript,
        identity: &LocalIdentity,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        match &transcript.kind {
            TranscriptKind::Message(params) => {
                self.process_message(transcript, params, identity, tx)
            }
            TranscriptKind::RecipientUpdate => self.process_recipient_update(transcript, tx),
            TranscriptKind::ExpirationTimerUpdate => {
                self.process_expiration_timer_update(transcript, identity, tx)
            }
            TranscriptKind::EndSession => self.process_end_session(transcript, tx),
            TranscriptKind::PaymentNotification {
                server_timestamp,
                notification,
            } => self.process_payment_notification(transcript, *server_timestamp, notification, tx),
            TranscriptKind::ArchivedPayment(info) => {
                self.process_archived_payment(transcript, info, tx)
            }
        }
    }

    fn process_message(
        &self,
        transcript: &Transcript,
        params: &SentMessageParams,
        identity: &LocalIdentity,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        validate_timestamp(transcript.timestamp)?;
        if let Some(started_at) = params.expiration_started_at {
            if started_at > MAX_STORE_TIMESTAMP {
                return Err(Error::InvalidTimestamp(started_at));
            }
        }

        let thread = self.resolve_thread(transcript, tx)?;
        self.check_protocol_version(transcript, &thread, tx)?;

        // Group threads get their disappearing timer from group-update
        // messages, not from here.
        if let Some(token) = transcript.target.disappearing_token() {
            if let Err(e) =
                self.token_sync
                    .update_token(&thread, token, &identity.address, identity, tx)
            {
                warn!(thread_id = %thread.id, "disappearing token sync failed: {e}");
            }
        }

        if !params.has_renderable_content() && !params.is_view_once {
            if thread.is_group_v2() {
                // Benign group-metadata echo, not an error condition.
                info!(
                    timestamp = transcript.timestamp,
                    thread_id = %thread.id,
                    "ignoring empty message transcript for v2 group"
                );
                return Ok(None);
            }
            return Err(Error::EmptyMessageTranscript);
        }

        let existing = self
            .store
            .outgoing_message(tx, transcript.timestamp, &thread.id)?;

        let mut message = match existing {
            Some(message) => {
                debug!(
                    timestamp = transcript.timestamp,
                    thread_id = %thread.id,
                    "reusing existing outgoing message for transcript"
                );
                message
            }
            None => {
                if self
                    .store
                    .undecryptable_placeholder(tx, transcript.timestamp, &thread.id)?
                    .is_some()
                {
                    // The sender plausibly resent what we could not decrypt
                    // the first time; swap the placeholder for the real thing.
                    info!(
                        timestamp = transcript.timestamp,
                        thread_id = %thread.id,
                        "replacing undecryptable placeholder with reconciled message"
                    );
                    self.store
                        .remove_undecryptable_placeholder(tx, transcript.timestamp, &thread.id);
                }

                let mut message =
                    OutgoingMessage::from_params(transcript.timestamp, &thread.id, params);
                finalize_attachments(&mut message, params);

                // Terminal side effect only on first creation: linked devices
                // never fetch view-once media.
                if params.is_view_once {
                    if let Err(e) = self.view_once.mark_complete(&message, false, tx) {
                        warn!(message_id = %message.unique_id, "view-once completion failed: {e}");
                    }
                    message.view_once_completed = true;
                } else if let Err(e) = self.attachments.enqueue_downloads(&message, tx) {
                    warn!(message_id = %message.unique_id, "attachment download enqueue failed: {e}");
                }

                message
            }
        };

        if message.is_view_once && !message.view_once_completed {
            // Redelivered transcript for a view-once message that predates
            // the completion flag; completion is idempotent.
            if let Err(e) = self.view_once.mark_complete(&message, false, tx) {
                warn!(message_id = %message.unique_id, "view-once completion failed: {e}");
            }
            message.view_once_completed = true;
        }

        message.merge_recipient_states(&transcript.recipient_states);
        self.apply_expiration(&mut message, params, transcript.timestamp, tx);
        self.store.put_outgoing(tx, &message)?;

        if let Err(e) = self.early_messages.apply_pending(&message, identity, tx) {
            warn!(message_id = %message.unique_id, "early message replay failed: {e}");
        }

        Ok(Some(message))
    }

    /// Honor the earliest known expiration start so multi-device expiration
    /// stays consistent even when transcripts arrive out of order.
    fn apply_expiration(
        &self,
        message: &mut OutgoingMessage,
        params: &SentMessageParams,
        transcript_timestamp: u64,
        tx: &mut WriteTransaction,
    ) {
        let Some(duration) = message.expires_in_seconds else {
            return;
        };
        if duration == 0 {
            return;
        }

        let incoming_start = params
            .expiration_started_at
            .unwrap_or(transcript_timestamp);
        let started_at = match message.expiration_started_at {
            Some(current) => current.min(incoming_start),
            None => incoming_start,
        };
        message.expiration_started_at = Some(started_at);

        if let Err(e) = self.expiration.start_expiration(message, started_at, tx) {
            warn!(message_id = %message.unique_id, "expiration scheduling failed: {e}");
        }
    }

    fn process_recipient_update(
        &self,
        transcript: &Transcript,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        let TranscriptTarget::Group { thread_id } = &transcript.target else {
            return Err(Error::TargetKindMismatch);
        };
        if transcript.recipient_states.is_empty() {
            return Err(Error::EmptyRecipientStates);
        }
        validate_timestamp(transcript.timestamp)?;

        // Timestamps are not unique, so several candidates may match. State
        // is applied to every genuine local send in the target thread; the
        // last one iterated is reported as "the" message.
        let candidates = self
            .store
            .outgoing_messages_with_timestamp(tx, transcript.timestamp)?;

        let mut found = None;
        for mut message in candidates {
            if message.from_remote_copy_only {
                continue;
            }
            if message.thread_id != *thread_id {
                continue;
            }
            message.merge_recipient_states(&transcript.recipient_states);
            self.store.put_outgoing(tx, &message)?;
            found = Some(message);
        }

        if found.is_none() {
            // Not an error: the message may have since been deleted here.
            info!(
                timestamp = transcript.timestamp,
                thread_id = %thread_id,
                "no matching message for recipient update transcript"
            );
        }

        Ok(found)
    }

    fn process_expiration_timer_update(
        &self,
        transcript: &Transcript,
        identity: &LocalIdentity,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        validate_timestamp(transcript.timestamp)?;
        let thread = self.resolve_thread(transcript, tx)?;
        self.check_protocol_version(transcript, &thread, tx)?;

        match transcript.target.disappearing_token() {
            Some(token) => {
                if let Err(e) =
                    self.token_sync
                        .update_token(&thread, token, &identity.address, identity, tx)
                {
                    warn!(thread_id = %thread.id, "disappearing token sync failed: {e}");
                }
            }
            None => {
                // Group timer changes travel in group-update messages.
                debug!(thread_id = %thread.id, "ignoring expiration timer update for group target");
            }
        }

        Ok(None)
    }

    fn process_end_session(
        &self,
        transcript: &Transcript,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        // Only the store-width check here; a zero timestamp still archives.
        if transcript.timestamp > MAX_STORE_TIMESTAMP {
            return Err(Error::InvalidTimestamp(transcript.timestamp));
        }
        let TranscriptTarget::Contact { .. } = &transcript.target else {
            return Err(Error::TargetKindMismatch);
        };
        let thread = self.resolve_thread(transcript, tx)?;
        let Some(address) = thread.contact_address() else {
            return Err(Error::TargetKindMismatch);
        };

        if let Err(e) = self.sessions.archive_all_sessions(address, tx) {
            warn!(%address, "session archival failed: {e}");
        }

        let info = InfoMessage::new(transcript.timestamp, &thread.id, InfoKind::SessionEnded);
        self.store.insert_info_message(tx, &info)?;

        // This event is never itself rendered as the outgoing message.
        Ok(None)
    }

    fn process_payment_notification(
        &self,
        transcript: &Transcript,
        server_timestamp: u64,
        notification: &PaymentNotification,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        validate_timestamp(transcript.timestamp)?;
        let thread = self.resolve_thread(transcript, tx)?;
        self.check_protocol_version(transcript, &thread, tx)?;

        if let Err(e) = self
            .payments
            .process_notification(&thread, notification, server_timestamp, tx)
        {
            warn!(thread_id = %thread.id, "payment notification processing failed: {e}");
        }

        Ok(None)
    }

    fn process_archived_payment(
        &self,
        transcript: &Transcript,
        payment: &ArchivedPaymentInfo,
        tx: &mut WriteTransaction,
    ) -> Result<Option<OutgoingMessage>> {
        validate_timestamp(transcript.timestamp)?;
        let thread = self.resolve_thread(transcript, tx)?;
        self.check_protocol_version(transcript, &thread, tx)?;

        if let Err(e) = self.payments.process_archived_payment(&thread, payment, tx) {
            warn!(thread_id = %thread.id, "archived payment processing failed: {e}");
        }

        Ok(None)
    }

    fn resolve_thread(
        &self,
        transcript: &Transcript,
        tx: &WriteTransaction,
    ) -> Result<ThreadRecord> {
        let thread_id = transcript.target.thread_id();
        self.store
            .thread(tx, thread_id)?
            .ok_or_else(|| Error::ThreadNotFound(thread_id.to_string()))
    }

    /// Reject transcripts that need wire-protocol features newer than this
    /// device understands, leaving a visible marker so the user sees that an
    /// upgrade is required instead of silently losing data.
    fn check_protocol_version(
        &self,
        transcript: &Transcript,
        thread: &ThreadRecord,
        tx: &mut WriteTransaction,
    ) -> Result<()> {
        let Some(required) = transcript.required_protocol_version else {
            return Ok(());
        };
        if required <= CURRENT_PROTOCOL_VERSION {
            return Ok(());
        }

        warn!(
            required,
            supported = CURRENT_PROTOCOL_VERSION,
            thread_id = %thread.id,
            "transcript requires unsupported protocol version"
        );
        let info = InfoMessage::new(
            transcript.timestamp,
            &thread.id,
            InfoKind::UnknownProtocolVersion { required },
        );
        self.store.insert_info_message(tx, &info)?;

        Err(Error::ProtocolVersionUnsupported {
            required,
            supported: CURRENT_PROTOCOL_VERSION,
        })
    }
}

fn validate_timestamp(timestamp: u64) -> Result<()> {
    if timestamp < 1 || timestamp > MAX_STORE_TIMESTAMP {
        return Err(Error::InvalidTimestamp(timestamp));
    }
    Ok(())
}

/// Assign durable unique ids to every pointer the transcript carries — the
/// body attachments plus the quote thumbnail, link-preview image, and sticker
/// data. Runs only when the record is first created; a redelivered transcript
/// reuses the record and the ids it already owns.
fn finalize_attachments(message: &mut OutgoingMessage, params: &SentMessageParams) {
    message.attachments = params.attachments.iter().map(finalize_pointer).collect();
    message.quote_attachment = params
        .quote
        .as_ref()
        .and_then(|quote| quote.attachment.as_ref())
        .map(finalize_pointer);
    message.link_preview_image = params
        .link_preview
        .as_ref()
        .and_then(|preview| preview.image.as_ref())
        .map(finalize_pointer);
    message.sticker_data = params
        .sticker
        .as_ref()
        .and_then(|sticker| sticker.data.as_ref())
        .map(finalize_pointer);
}

fn finalize_pointer(pointer: &AttachmentPointer) -> AttachmentRecord {
    AttachmentRecord {
        unique_id: uuid::Uuid::new_v4().to_string(),
        pointer: pointer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Address, DeliveryStatus, DisappearingToken, InMemoryStorage, RecipientState,
        TranscriptTarget,
    };
    use std::collections::HashMap;

    fn identity() -> LocalIdentity {
        LocalIdentity {
            address: Address::new("local-account"),
        }
    }

    fn setup() -> (InteractionStore, SentTranscriptReceiver) {
        let store = InteractionStore::new(Arc::new(InMemoryStorage::new()));
        let receiver = SentTranscriptReceiver::new(store.clone());
        (store, receiver)
    }

    fn contact_target(thread_id: &str) -> TranscriptTarget {
        TranscriptTarget::Contact {
            thread_id: thread_id.to_string(),
            token: DisappearingToken::disabled(),
        }
    }

    fn message_transcript(timestamp: u64, target: TranscriptTarget) -> Transcript {
        Transcript {
            timestamp,
            target,
            kind: TranscriptKind::Message(SentMessageParams {
                body: Some("hello".to_string()),
                ..Default::default()
            }),
            recipient_states: HashMap::new(),
            required_protocol_version: None,
        }
    }

    #[test]
    fn zero_timestamp_is_rejected_for_messages() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store
            .put_thread(&mut tx, &ThreadRecord::contact("t1", Address::new("alice")))
            .unwrap();

        let result = receiver.process(&message_transcript(0, contact_target("t1")), &identity(), &mut tx);
        assert!(matches!(result, Err(Error::InvalidTimestamp(0))));
    }

    #[test]
    fn timestamp_beyond_store_width_is_rejected() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store
            .put_thread(&mut tx, &ThreadRecord::contact("t1", Address::new("alice")))
            .unwrap();

        let too_big = MAX_STORE_TIMESTAMP + 1;
        let result =
            receiver.process(&message_transcript(too_big, contact_target("t1")), &identity(), &mut tx);
        assert!(matches!(result, Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn end_session_allows_zero_timestamp() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store
            .put_thread(&mut tx, &ThreadRecord::contact("t1", Address::new("alice")))
            .unwrap();

        let transcript = Transcript {
            timestamp: 0,
            target: contact_target("t1"),
            kind: TranscriptKind::EndSession,
            recipient_states: HashMap::new(),
            required_protocol_version: None,
        };
        let result = receiver.process(&transcript, &identity(), &mut tx).unwrap();
        assert!(result.is_none());
        assert_eq!(store.info_messages(&tx, "t1").unwrap().len(), 1);
    }

    #[test]
    fn recipient_update_on_contact_target_is_rejected() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store
            .put_thread(&mut tx, &ThreadRecord::contact("t1", Address::new("alice")))
            .unwrap();

        let mut states = HashMap::new();
        states.insert(
            Address::new("alice"),
            RecipientState::with_status(DeliveryStatus::Read),
        );
        let transcript = Transcript {
            timestamp: 100,
            target: contact_target("t1"),
            kind: TranscriptKind::RecipientUpdate,
            recipient_states: states,
            required_protocol_version: None,
        };
        let result = receiver.process(&transcript, &identity(), &mut tx);
        assert!(matches!(result, Err(Error::TargetKindMismatch)));
    }

    #[test]
    fn recipient_update_with_empty_states_is_rejected() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store.put_thread(&mut tx, &ThreadRecord::group_v2("g1")).unwrap();

        let transcript = Transcript {
            timestamp: 100,
            target: TranscriptTarget::Group {
                thread_id: "g1".to_string(),
            },
            kind: TranscriptKind::RecipientUpdate,
            recipient_states: HashMap::new(),
            required_protocol_version: None,
        };
        let result = receiver.process(&transcript, &identity(), &mut tx);
        assert!(matches!(result, Err(Error::EmptyRecipientStates)));
    }

    #[test]
    fn unknown_thread_is_rejected() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();

        let result =
            receiver.process(&message_transcript(100, contact_target("missing")), &identity(), &mut tx);
        assert!(matches!(result, Err(Error::ThreadNotFound(_))));
    }

    #[test]
    fn expiration_start_beyond_store_width_is_rejected() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store
            .put_thread(&mut tx, &ThreadRecord::contact("t1", Address::new("alice")))
            .unwrap();

        let transcript = Transcript {
            timestamp: 100,
            target: contact_target("t1"),
            kind: TranscriptKind::Message(SentMessageParams {
                body: Some("hello".to_string()),
                expiration_started_at: Some(MAX_STORE_TIMESTAMP + 1),
                expiration_duration_seconds: Some(60),
                ..Default::default()
            }),
            recipient_states: HashMap::new(),
            required_protocol_version: None,
        };
        let result = receiver.process(&transcript, &identity(), &mut tx);
        assert!(matches!(result, Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn timer_update_for_group_target_is_a_no_op() {
        let (store, receiver) = setup();
        let mut tx = store.begin_write();
        store.put_thread(&mut tx, &ThreadRecord::group_v2("g1")).unwrap();

        let transcript = Transcript {
            timestamp: 100,
            target: TranscriptTarget::Group {
                thread_id: "g1".to_string(),
            },
            kind: TranscriptKind::ExpirationTimerUpdate,
            recipient_states: HashMap::new(),
            required_protocol_version: None,
        };
        let result = receiver.process(&transcript, &identity(), &mut tx).unwrap();
        assert!(result.is_none());
    }
}
