pub mod client;

pub use client::{
    ChatCompletion, ChatMessage, ClientError, OpenAiImageClient, OpenAiModelClient,
    DEFAULT_BASE_URL,
};
