//! External tool discovery.
//!
//! Resolution order for every tool: environment override, config file,
//! `PATH`, Android SDK, then a typed absence with an install hint. The
//! environment is injected so resolution is a pure function of its inputs.

use super::ToolCommand;
use crate::config::ApkflowConfig;
use crate::errors::ToolNotFoundError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the APKEditor jar looked up inside directories.
pub const APKEDITOR_JAR_NAME: &str = "APKEditor.jar";

/// Oldest build-tools release accepted for zipalign/apksigner.
const MIN_BUILD_TOOLS: [u32; 3] = [30, 0, 0];

/// Source of environment variables.
pub trait EnvSource {
    /// Returns a non-empty variable.
    fn var(&self, key: &str) -> Option<String>;

    /// Finds an executable on this environment's `PATH`.
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let path = self.var("PATH")?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(name, Some(path), cwd).ok()
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// External tools apkflow drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Android Debug Bridge.
    Adb,
    /// APKEditor split merger.
    ApkEditor,
    /// reFlutter patcher.
    Reflutter,
    /// Archive aligner from build-tools.
    Zipalign,
    /// APK signer from build-tools.
    Apksigner,
    /// JDK keystore tool.
    Keytool,
    /// Java decompiler.
    Jadx,
    /// Resource decoder / smali disassembler.
    Apktool,
    /// Java runtime for jar-based tools.
    Java,
}

impl Tool {
    /// Every tool, in display order.
    pub const ALL: [Self; 9] = [
        Self::Adb,
        Self::ApkEditor,
        Self::Reflutter,
        Self::Zipalign,
        Self::Apksigner,
        Self::Keytool,
        Self::Jadx,
        Self::Apktool,
        Self::Java,
    ];

    /// Executable name on `PATH`, also the key in the config `tools` table.
    #[must_use]
    pub fn binary(self) -> &'static str {
        match self {
            Self::Adb => "adb",
            Self::ApkEditor => "APKEditor",
            Self::Reflutter => "reflutter",
            Self::Zipalign => "zipalign",
            Self::Apksigner => "apksigner",
            Self::Keytool => "keytool",
            Self::Jadx => "jadx",
            Self::Apktool => "apktool",
            Self::Java => "java",
        }
    }

    /// Environment variable that overrides discovery.
    #[must_use]
    pub fn env_var(self) -> String {
        match self {
            Self::ApkEditor => "APKEDITOR_JAR".to_string(),
            other => format!("APKFLOW_{}", other.binary().to_uppercase()),
        }
    }

    /// Where to get the tool.
    #[must_use]
    pub fn install_hint(self) -> &'static str {
        match self {
            Self::Adb => "https://developer.android.com/tools/releases/platform-tools",
            Self::ApkEditor => {
                "https://github.com/REAndroid/APKEditor (set APKEDITOR_JAR, apkeditor_path in ~/.apkflow/config.json, or put a wrapper on PATH)"
            }
            Self::Reflutter => "pip install reflutter",
            Self::Zipalign | Self::Apksigner => "Part of Android SDK build-tools (set ANDROID_HOME)",
            Self::Keytool | Self::Java => "Part of a Java JDK (install one and put it on PATH)",
            Self::Jadx => "https://github.com/skylot/jadx",
            Self::Apktool => "https://apktool.ibotpeaches.com/",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// How a tool will be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ToolResolution {
    /// Run directly.
    Executable(PathBuf),
    /// Run with `java -jar`.
    Jar(PathBuf),
    /// Not available.
    Absent,
}

impl ToolResolution {
    /// Returns true unless absent.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

fn resolve_jar(raw: &Path) -> Option<PathBuf> {
    if raw.is_file() {
        return Some(raw.to_path_buf());
    }
    let candidate = raw.join(APKEDITOR_JAR_NAME);
    candidate.is_file().then_some(candidate)
}

fn resolve_explicit(tool: Tool, raw: &Path) -> Option<ToolResolution> {
    match tool {
        Tool::ApkEditor => resolve_jar(raw).map(ToolResolution::Jar),
        _ => raw.is_file().then(|| ToolResolution::Executable(raw.to_path_buf())),
    }
}

/// Android SDK root from the environment or config.
pub fn android_sdk_root(env: &dyn EnvSource, config: &ApkflowConfig) -> Option<PathBuf> {
    ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
        .iter()
        .filter_map(|key| env.var(key).map(PathBuf::from))
        .chain(config.android_home.clone())
        .find(|path| path.is_dir())
}

/// The newest `build-tools/<version>` directory at or above 30.0.0.
#[must_use]
pub fn latest_build_tools(sdk_root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(sdk_root.join("build-tools")).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let version: Vec<u32> = name
                .split('.')
                .map(str::parse)
                .collect::<Result<_, _>>()
                .ok()?;
            (version.as_slice() >= MIN_BUILD_TOOLS.as_slice()).then(|| (version, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

fn sdk_candidate(tool: Tool, sdk_root: &Path) -> Option<PathBuf> {
    let dir = match tool {
        Tool::Zipalign | Tool::Apksigner => latest_build_tools(sdk_root)?,
        Tool::Adb => sdk_root.join("platform-tools"),
        _ => return None,
    };
    let suffixes: &[&str] = if cfg!(windows) { &[".exe", ".bat"] } else { &[""] };
    suffixes
        .iter()
        .map(|suffix| dir.join(format!("{}{suffix}", tool.binary())))
        .find(|path| path.is_file())
}

/// Resolves one tool.
pub fn resolve_tool(tool: Tool, env: &dyn EnvSource, config: &ApkflowConfig) -> ToolResolution {
    if let Some(found) = env
        .var(&tool.env_var())
        .and_then(|raw| resolve_explicit(tool, Path::new(&raw)))
    {
        return found;
    }

    let configured = match tool {
        Tool::ApkEditor => config
            .apkeditor_path
            .clone()
            .or_else(|| config.tools.get(tool.binary()).cloned()),
        _ => config.tools.get(tool.binary()).cloned(),
    };
    if let Some(found) = configured.and_then(|raw| resolve_explicit(tool, &raw)) {
        return found;
    }

    if let Some(path) = env.find_executable(tool.binary()) {
        return ToolResolution::Executable(path);
    }

    if let Some(path) =
        android_sdk_root(env, config).and_then(|root| sdk_candidate(tool, &root))
    {
        return ToolResolution::Executable(path);
    }

    ToolResolution::Absent
}

/// Resolved locations of every tool, injected into the adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolPaths {
    resolved: BTreeMap<Tool, ToolResolution>,
}

impl ToolPaths {
    /// Resolves every tool.
    pub fn resolve(env: &dyn EnvSource, config: &ApkflowConfig) -> Self {
        Self {
            resolved: Tool::ALL
                .iter()
                .map(|tool| (*tool, resolve_tool(*tool, env, config)))
                .collect(),
        }
    }

    /// Builds from explicit resolutions; unlisted tools are absent.
    #[must_use]
    pub fn from_resolutions(resolved: impl IntoIterator<Item = (Tool, ToolResolution)>) -> Self {
        Self {
            resolved: resolved.into_iter().collect(),
        }
    }

    /// The resolution of one tool.
    #[must_use]
    pub fn get(&self, tool: Tool) -> &ToolResolution {
        self.resolved.get(&tool).unwrap_or(&ToolResolution::Absent)
    }

    /// A command prefix for the tool.
    pub fn command(&self, tool: Tool) -> Result<ToolCommand, ToolNotFoundError> {
        let missing = || ToolNotFoundError::new(tool.binary(), Some(tool.install_hint()));
        match self.get(tool) {
            ToolResolution::Executable(path) => Ok(ToolCommand::new(path).label(tool.binary())),
            ToolResolution::Jar(jar) => {
                let java = match self.get(Tool::Java) {
                    ToolResolution::Executable(java) => java.clone(),
                    _ => return Err(ToolNotFoundError::new("java", Some(Tool::Java.install_hint()))),
                };
                Ok(ToolCommand::new(java)
                    .arg("-jar")
                    .arg(jar)
                    .label(tool.binary()))
            }
            ToolResolution::Absent => Err(missing()),
        }
    }

    /// Tools that could not be found.
    #[must_use]
    pub fn missing(&self) -> Vec<Tool> {
        Tool::ALL
            .iter()
            .copied()
            .filter(|tool| !self.get(*tool).is_available())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &Path)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.display().to_string()))
            .collect()
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_apkeditor_env_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("editor").join(APKEDITOR_JAR_NAME);
        touch(&jar);
        let config_jar = dir.path().join("other.jar");
        touch(&config_jar);

        let config = ApkflowConfig {
            apkeditor_path: Some(config_jar),
            ..ApkflowConfig::default()
        };
        let env = env(&[("APKEDITOR_JAR", &dir.path().join("editor"))]);

        assert_eq!(
            resolve_tool(Tool::ApkEditor, &env, &config),
            ToolResolution::Jar(jar)
        );
    }

    #[test]
    fn test_apkeditor_falls_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("APKEditor-1.4.jar");
        touch(&jar);
        let config = ApkflowConfig {
            apkeditor_path: Some(jar.clone()),
            ..ApkflowConfig::default()
        };
        let env = env(&[("APKEDITOR_JAR", &dir.path().join("missing"))]);

        assert_eq!(
            resolve_tool(Tool::ApkEditor, &env, &config),
            ToolResolution::Jar(jar)
        );
    }

    #[test]
    fn test_build_tools_lookup_picks_latest() {
        let sdk = tempfile::tempdir().unwrap();
        for version in ["29.0.3", "33.0.1", "34.0.0", "35.0.0-rc1"] {
            touch(&sdk.path().join("build-tools").join(version).join("zipalign"));
        }
        let env = env(&[("ANDROID_HOME", sdk.path())]);

        assert_eq!(
            resolve_tool(Tool::Zipalign, &env, &ApkflowConfig::default()),
            ToolResolution::Executable(sdk.path().join("build-tools/34.0.0/zipalign"))
        );
    }

    #[test]
    fn test_old_build_tools_ignored() {
        let sdk = tempfile::tempdir().unwrap();
        touch(&sdk.path().join("build-tools/28.0.3/apksigner"));
        assert_eq!(latest_build_tools(sdk.path()), None);
    }

    #[test]
    fn test_absent_tool_command_has_hint() {
        let env: BTreeMap<String, String> = BTreeMap::new();
        let paths = ToolPaths::resolve(&env, &ApkflowConfig::default());

        assert_eq!(paths.get(Tool::Jadx), &ToolResolution::Absent);
        let err = paths.command(Tool::Jadx).unwrap_err();
        assert_eq!(err.tool, "jadx");
        assert!(err.hint.is_some());
        assert!(paths.missing().contains(&Tool::Jadx));
    }

    #[test]
    fn test_jar_requires_java() {
        let paths = ToolPaths::from_resolutions([(
            Tool::ApkEditor,
            ToolResolution::Jar(PathBuf::from("/opt/APKEditor.jar")),
        )]);
        assert_eq!(paths.command(Tool::ApkEditor).unwrap_err().tool, "java");
    }

    #[test]
    fn test_config_tool_override() {
        let dir = tempfile::tempdir().unwrap();
        let jadx = dir.path().join("jadx");
        touch(&jadx);
        let mut config = ApkflowConfig::default();
        config.tools.insert("jadx".to_string(), jadx.clone());

        let env: BTreeMap<String, String> = BTreeMap::new();
        assert_eq!(
            resolve_tool(Tool::Jadx, &env, &config),
            ToolResolution::Executable(jadx)
        );
    }
}
