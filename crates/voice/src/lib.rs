pub mod connection;
pub mod discovery;
pub mod realtime;
pub mod streaming_hook;
pub mod transcript;
pub mod voice_approval;
pub mod voice_display;

pub use connection::VoiceConnection;
pub use discovery::{Discovery, DiscoveredSession, ProjectSummary};
pub use realtime::VoiceConfig;
pub use streaming_hook::{BoundedEventQueue, StreamingHook, QUEUE_CAPACITY};
pub use transcript::{
    ConversationStatus, DisconnectEvent, EntryKind, IndexRecord, TranscriptEntry, TranscriptStore, VoiceConversation,
};
