//! External tools: discovery, bounded execution and the [`Toolchain`] seam.

pub mod framework;
mod locate;
mod process;
mod toolchain;

pub use framework::{detect_frameworks, Framework, FrameworkMatch};
pub use locate::{
    android_sdk_root, latest_build_tools, resolve_tool, EnvSource, ProcessEnv, Tool, ToolPaths,
    ToolResolution, APKEDITOR_JAR_NAME,
};
pub use process::{ToolCommand, ToolOutput};
pub use toolchain::{DecompileEngine, ProcessToolchain, Toolchain, REFLUTTER_OUTPUT};
