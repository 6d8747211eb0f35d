pub mod collaborators;
pub mod error;
pub mod file_storage;
pub mod receiver;
pub mod store;
pub mod types;

pub use collaborators::{
    AttachmentDownloadQueue, DisappearingMessageScheduler, DisappearingTokenSync,
    EarlyMessageReapplier, NoopCollaborator, PaymentsProcessor, SessionArchiver,
    ViewOnceCompletion,
};
pub use error::{Error, Result};
pub use file_storage::FileStorage;
pub use receiver::SentTranscriptReceiver;
pub use store::{
    InMemoryStorage, InfoKind, InfoMessage, InteractionStore, OutgoingMessage, StorageAdapter,
    ThreadKind, ThreadRecord, UndecryptablePlaceholder, WriteTransaction,
};
pub use types::{
    Address, ArchivedPaymentInfo, AttachmentPointer, AttachmentRecord, DeliveryStatus,
    DisappearingToken, GiftBadge, LinkPreview, LocalIdentity, PaymentNotification, PollCreate,
    QuotedReply, RecipientState, SentMessageParams, StickerInfo, StoryRef, Transcript,
    TranscriptKind, TranscriptTarget, CURRENT_PROTOCOL_VERSION, MAX_STORE_TIMESTAMP,
};
