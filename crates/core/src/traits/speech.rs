//! Speech processing traits

use async_trait::async_trait;

use crate::{AsrError, Transcript};

/// Speech-to-Text interface
///
/// Called with one analysis window at a time; failures are reported per
/// window and never affect the call.
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe a window of mono f32 samples
    ///
    /// # Arguments
    /// * `call_id` - Call the window belongs to, for correlation
    /// * `window` - Samples in [-1, 1]
    /// * `sample_rate` - Rate of `window`
    /// * `language` - Language hint, `None` for auto-detection
    async fn transcribe(
        &self,
        call_id: &str,
        window: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcript, AsrError>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
