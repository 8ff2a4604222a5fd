pub mod arc_store;
pub mod chapter_llm;
pub mod entry_store;
pub mod local_metadata;
pub mod remote_metadata;

pub use arc_store::FileArcStore;
pub use chapter_llm::OpenAiChapterAdapter;
pub use entry_store::FileEntryStore;
pub use local_metadata::LocalMetadataAdapter;
pub use remote_metadata::OpenAiMetadataAdapter;
