use std::sync::Arc;

use crate::capability::LocalCapabilities;
use crate::config::SfuConfig;
use crate::engine::MediaEngine;

/// What every channel operation needs besides the channel state itself
#[derive(Clone)]
pub(crate) struct MediaContext {
    pub engine: Arc<dyn MediaEngine>,
    pub config: Arc<SfuConfig>,
    pub local: Arc<LocalCapabilities>,
}
