//! Backend module
//!
//! This module contains the loop glue shared by windowing backends:
//! - Null backend with no display connection
//! - Key repeat driven by a loop timer

pub mod key_repeat;
pub mod null;

pub use key_repeat::KeyRepeater;
pub use null::NullBackend;
