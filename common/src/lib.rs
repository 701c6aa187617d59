//! Data shapes shared by the planning, synthesis and assembly stages.

pub mod types;

pub use types::{
    AspectRatio, GenerationRequest, ImageBytes, ImageFormat, Language, ParseEnumError,
    RenderedSlide, SlideSpec, Style,
};
