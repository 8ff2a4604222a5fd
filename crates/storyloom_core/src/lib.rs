pub mod domain;
pub mod ports;

pub use domain::{
    ChapterResult, GenerateStoryArgs, JournalEntry, OfflineRequest, PromptResponse, RequestStatus,
    RequestType, StoryArc, StoryMetadata,
};
pub use ports::{
    ChapterGenerationService, JournalEntryStore, MetadataExtractionService, PortError, PortResult,
    StoryArcStore,
};
