//! Testing utilities for apkflow workflows.
//!
//! This module provides:
//! - Scripted device and toolchain adapters with call recording
//! - Scripted disambiguation and operator prompts
//! - Throwaway workspace fixtures

mod fakes;
mod fixtures;

pub use fakes::{
    FakeDeviceBridge, FakeToolchain, RecordedCall, ScriptedDisambiguator, ScriptedPrompt,
};
pub use fixtures::{
    code_paths, single_package, split_package, target, TestWorkspace, TEST_DEVICE,
};
