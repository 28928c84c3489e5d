pub mod cursor;
pub mod inbound_reconciler;
pub mod media;
pub mod provider_adapter;
pub mod send_pipeline;
pub mod webhook;

pub use inbound_reconciler::{InboundReconciler, ReconcileSummary};
pub use media::{
    AudioTranscoder, FfmpegTranscoder, HttpObjectStorage, MediaError, MediaProcessor, MediaStorage,
};
pub use provider_adapter::{
    DispatchOutcome, HttpRelayTransport, ProviderAdapter, RelayError, RelayTransport, SendContext,
};
pub use send_pipeline::{SendOutcome, SendPipeline, DUPLICATE_STATUS};
pub use webhook::{InboundEvent, InboundMessage, StatusUpdate};
