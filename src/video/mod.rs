//! Frame production
//!
//! Renders scenes off-screen, corrects the read-back origin and converts
//! RGBA to I420 for the outbound track.

pub mod convert;
pub mod format;
pub mod frame;
pub mod producer;
pub mod renderer;
pub mod scene;

pub use convert::{PixelConverter, Yuv420pBuffer};
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use producer::{FramePolicy, FrameProducer, FrameSink, FrameTimer};
pub use renderer::{Renderer, SceneFactory, SharedRenderer};
pub use scene::{TestScene, TestSceneFactory};
