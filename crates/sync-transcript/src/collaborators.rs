use crate::{
    Address, ArchivedPaymentInfo, DisappearingToken, LocalIdentity, OutgoingMessage,
    PaymentNotification, Result, ThreadRecord, WriteTransaction,
};
use tracing::debug;

/// Enqueues attachment byte transfer for later; nothing is downloaded during
/// reconciliation.
pub trait AttachmentDownloadQueue: Send + Sync {
    fn enqueue_downloads(&self, message: &OutgoingMessage, tx: &mut WriteTransaction)
        -> Result<()>;
}

/// Schedules disappearing-message expiry bookkeeping.
pub trait DisappearingMessageScheduler: Send + Sync {
    fn start_expiration(
        &self,
        message: &OutgoingMessage,
        started_at: u64,
        tx: &mut WriteTransaction,
    ) -> Result<()>;
}

/// Re-applies data (receipts and the like) that referenced this message
/// before the message itself existed locally.
pub trait EarlyMessageReapplier: Send + Sync {
    fn apply_pending(
        &self,
        message: &OutgoingMessage,
        identity: &LocalIdentity,
        tx: &mut WriteTransaction,
    ) -> Result<()>;
}

/// Pushes a transcript's disappearing-message token into a one-to-one
/// thread's configuration. Group threads get their timer from group-update
/// messages, never through this seam.
pub trait DisappearingTokenSync: Send + Sync {
    fn update_token(
        &self,
        thread: &ThreadRecord,
        token: &DisappearingToken,
        change_author: &Address,
        identity: &LocalIdentity,
        tx: &mut WriteTransaction,
    ) -> Result<()>;
}

/// Marks a view-once message complete. Linked devices never fetch view-once
/// media, so completion happens without a download.
pub trait ViewOnceCompletion: Send + Sync {
    fn mark_complete(
        &self,
        message: &OutgoingMessage,
        send_sync_messages: bool,
        tx: &mut WriteTransaction,
    ) -> Result<()>;
}

/// Owns payment-ledger reconciliation; its failure modes are not transcript
/// failures.
pub trait PaymentsProcessor: Send + Sync {
    fn process_notification(
        &self,
        thread: &ThreadRecord,
        notification: &PaymentNotification,
        server_timestamp: u64,
        tx: &mut WriteTransaction,
    ) -> Result<()>;

    fn process_archived_payment(
        &self,
        thread: &ThreadRecord,
        info: &ArchivedPaymentInfo,
        tx: &mut WriteTransaction,
    ) -> Result<()>;
}

/// Archives cryptographic sessions. Archiving an already-archived session is
/// a no-op.
pub trait SessionArchiver: Send + Sync {
    fn archive_all_sessions(&self, address: &Address, tx: &mut WriteTransaction) -> Result<()>;
}

/// Implements every collaborator trait by doing nothing. Useful for wiring a
/// receiver in contexts where a given side effect does not apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollaborator;

impl AttachmentDownloadQueue for NoopCollaborator {
    fn enqueue_downloads(
        &self,
        message: &OutgoingMessage,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        debug!(message_id = %message.unique_id, "skipping attachment download enqueue");
        Ok(())
    }
}

impl DisappearingMessageScheduler for NoopCollaborator {
    fn start_expiration(
        &self,
        _message: &OutgoingMessage,
        _started_at: u64,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }
}

impl EarlyMessageReapplier for NoopCollaborator {
    fn apply_pending(
        &self,
        _message: &OutgoingMessage,
        _identity: &LocalIdentity,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }
}

impl DisappearingTokenSync for NoopCollaborator {
    fn update_token(
        &self,
        _thread: &ThreadRecord,
        _token: &DisappearingToken,
        _change_author: &Address,
        _identity: &LocalIdentity,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }
}

impl ViewOnceCompletion for NoopCollaborator {
    fn mark_complete(
        &self,
        _message: &OutgoingMessage,
        _send_sync_messages: bool,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }
}

impl PaymentsProcessor for NoopCollaborator {
    fn process_notification(
        &self,
        _thread: &ThreadRecord,
        _notification: &PaymentNotification,
        _server_timestamp: u64,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }

    fn process_archived_payment(
        &self,
        _thread: &ThreadRecord,
        _info: &ArchivedPaymentInfo,
        _tx: &mut WriteTransaction,
    ) -> Result<()> {
        Ok(())
    }
}

impl SessionArchiver for NoopCollaborator {
    fn archive_all_sessions(&self, address: &Address, _tx: &mut WriteTransaction) -> Result<()> {
        debug!(%address, "skipping session archival");
        Ok(())
    }
}
