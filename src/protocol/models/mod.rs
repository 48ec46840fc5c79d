pub mod audio;
pub mod common;
pub mod items;
pub mod response;
pub mod session;
pub mod tools;

pub use audio::{
    AudioConfig, AudioFormat, InputAudioConfig, InputAudioTranscription, OutputAudioConfig,
    PCM_24KHZ_RATE, TurnDetection,
};
pub use common::{
    ArbitraryJson, DEFAULT_MODEL, Eagerness, ItemStatus, JsonSchema, Modality, OutputModalities,
    RangeError, Role, Temperature, TopP, Voice,
};
pub use items::{ContentPart, Item};
pub use response::{Response, ResponseStatus, ResponseStatusDetails};
pub use session::{Session, SessionKind, SessionUpdate, SessionUpdateConfig};
pub use tools::Tool;
