use crate::config::Config;
use crate::realtime::WorkspaceChannels;
use crate::services::{
    AudioTranscoder, InboundReconciler, MediaProcessor, MediaStorage, RelayTransport, SendPipeline,
};
use crate::store::{Directory, MessageStore};
use std::sync::Arc;

/// Outbound collaborators, swapped for fakes in tests
#[derive(Clone)]
pub struct Integrations {
    pub relay: Arc<dyn RelayTransport>,
    /// `None` rejects base64 media uploads
    pub media_storage: Option<Arc<dyn MediaStorage>>,
    pub transcoder: Arc<dyn AudioTranscoder>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn Directory>,
    pub pipeline: Arc<SendPipeline>,
    pub reconciler: Arc<InboundReconciler>,
    pub media: Arc<MediaProcessor>,
    /// Live change fan-out, one entry per watched workspace
    pub channels: WorkspaceChannels,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn Directory>,
        integrations: Integrations,
        channels: WorkspaceChannels,
    ) -> Self {
        let pipeline = SendPipeline::new(store.clone(), directory.clone(), integrations.relay);
        let reconciler = InboundReconciler::new(store.clone(), directory.clone());
        let media = MediaProcessor::new(
            store.clone(),
            integrations.media_storage,
            integrations.transcoder,
        );

        Self {
            config,
            store,
            directory,
            pipeline: Arc::new(pipeline),
            reconciler: Arc::new(reconciler),
            media: Arc::new(media),
            channels,
        }
    }
}
