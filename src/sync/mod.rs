pub mod binding;
pub mod engine;

pub use binding::BindingTable;
pub use engine::{DrawEvent, EngineSettings, Notice, NoticeLevel, SelectedTerritory, SyncEngine};
