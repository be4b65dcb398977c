pub mod config;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod frame;
pub mod identity;
pub mod media;
pub mod pipeline;
pub mod selector;
pub mod store;
pub mod synthesizer;

pub use config::{ConfigLoader, ImgvidConfig};
pub use error::{ErrorKind, ImgvidError, Result};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use fetcher::{FrameFetcher, HttpImageSource, ImageSource, StaticImageSource};
pub use frame::{Frame, FrameKey};
pub use identity::SourceIdentity;
pub use media::MediaType;
pub use pipeline::{Pipeline, PipelineOutcome, PipelineStage, RequestContext, RequestParams};
pub use selector::{FramePattern, FrameSelector};
pub use store::{FrameStore, StoredFrame};
pub use synthesizer::{BufferSink, ChannelSink, SinkEvent, StreamSynthesizer, VideoSink};
