//! Adapters from the HTTP clients in `slide_chatgpt` to the pipeline's
//! collaborator traits.

use crate::config::{Config, ConfigError};
use crate::error::{PlanningError, SynthesisError};
use crate::planning::{PlanningModel, PlanningPrompt};
use crate::synthesis::ImageModel;
use async_trait::async_trait;
use slide_chatgpt::{ChatMessage, ClientError, OpenAiImageClient, OpenAiModelClient};
use slide_common::{AspectRatio, ImageBytes};

/// Wraps `OpenAiModelClient` as the planning collaborator.
pub struct OpenAiPlanningAdapter {
    inner: OpenAiModelClient,
}

impl OpenAiPlanningAdapter {
    pub fn new(inner: OpenAiModelClient) -> Self {
        Self { inner }
    }
}

fn planning_error(err: ClientError) -> PlanningError {
    match err {
        ClientError::Decode(reason) => PlanningError::malformed(reason),
        other => PlanningError::unavailable(other.to_string()),
    }
}

#[async_trait]
impl PlanningModel for OpenAiPlanningAdapter {
    async fn complete(&self, prompt: &PlanningPrompt) -> Result<String, PlanningError> {
        let messages = [
            ChatMessage::system(prompt.system.clone()),
            ChatMessage::user(prompt.user.clone()),
        ];
        let completion = self.inner.chat(&messages).await.map_err(planning_error)?;
        Ok(completion.content)
    }
}

/// Wraps `OpenAiImageClient` as the image collaborator.
pub struct OpenAiImageAdapter {
    inner: OpenAiImageClient,
}

impl OpenAiImageAdapter {
    pub fn new(inner: OpenAiImageClient) -> Self {
        Self { inner }
    }
}

fn synthesis_error(err: ClientError) -> SynthesisError {
    match err {
        ClientError::Timeout => SynthesisError::transient("image request timed out"),
        other if other.is_transient() => SynthesisError::transient(other.to_string()),
        other => SynthesisError::rejected(other.to_string()),
    }
}

#[async_trait]
impl ImageModel for OpenAiImageAdapter {
    async fn render(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<ImageBytes, SynthesisError> {
        self.inner
            .generate(prompt, aspect_ratio.image_size())
            .await
            .map_err(synthesis_error)
    }
}

/// Builds both live collaborators from provider settings.
pub fn adapters_from_config(
    config: &Config,
) -> Result<(OpenAiPlanningAdapter, OpenAiImageAdapter), ConfigError> {
    let (api_key, provider) = config.require_provider()?;
    let planner = OpenAiModelClient::new(
        api_key.to_string(),
        provider.base_url.clone(),
        provider.llm_endpoint.clone(),
    )
    .with_temperature(provider.temperature)
    .with_timeout(config.pipeline.planning_timeout());
    let images = OpenAiImageClient::new(
        api_key.to_string(),
        provider.base_url.clone(),
        provider.image_endpoint.clone(),
    )
    .with_timeout(config.pipeline.image_call_timeout());

    tracing::info!(
        base_url = %provider.base_url,
        llm = %provider.llm_endpoint,
        image = %provider.image_endpoint,
        "using live model endpoints"
    );
    Ok((
        OpenAiPlanningAdapter::new(planner),
        OpenAiImageAdapter::new(images),
    ))
}
