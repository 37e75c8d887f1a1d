//! In-memory adapters with scripted behaviour and call recording.

use crate::device::{DeviceBridge, Device, Package, UninstallOutcome};
use crate::errors::{
    AdapterError, ApkflowError, SelectionError, StageTimeoutError, StageToolFailureError,
};
use crate::resolver::{CandidatePrompt, Disambiguator, OperatorPrompt};
use crate::tools::{DecompileEngine, Toolchain, REFLUTTER_OUTPUT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Adapter methods that change state on the device or on disk.
const MUTATING: [&str; 8] = [
    "pull",
    "install",
    "uninstall",
    "launch",
    "merge_splits",
    "patch",
    "sign",
    "decompile",
];

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Method name.
    pub method: &'static str,
    /// Arguments rendered as strings.
    pub args: Vec<String>,
}

impl RecordedCall {
    /// Returns true if the call changed device or disk state.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        MUTATING.contains(&self.method)
    }
}

#[derive(Debug, Default)]
struct CallLog {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<&'static str, VecDeque<AdapterError>>>,
}

impl CallLog {
    fn record(&self, method: &'static str, args: &[&str]) -> Result<(), AdapterError> {
        self.calls.lock().push(RecordedCall {
            method,
            args: args.iter().map(ToString::to_string).collect(),
        });
        match self.failures.lock().get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail_next(&self, method: &'static str, error: AdapterError) {
        self.failures.lock().entry(method).or_default().push_back(error);
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    fn mutating(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_mutating()).count()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }
}

fn tool_failure(tool: &str, message: impl Into<String>) -> AdapterError {
    StageToolFailureError::new(tool, message).with_exit_code(Some(1)).into()
}

fn write_file(tool: &str, path: &Path, contents: &[u8]) -> Result<(), AdapterError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| tool_failure(tool, e.to_string()))?;
    }
    std::fs::write(path, contents).map_err(|e| tool_failure(tool, e.to_string()))
}

#[derive(Debug, Default)]
struct DeviceState {
    devices: Vec<Device>,
    packages: BTreeMap<String, Package>,
    listed_only: BTreeSet<String>,
    failing_pulls: BTreeSet<String>,
    removed: BTreeSet<String>,
    installed_apks: Vec<PathBuf>,
    dump: String,
}

/// A scripted [`DeviceBridge`].
///
/// Packages added with [`with_package`](Self::with_package) are installed on
/// every device. Failures can be queued per method with
/// [`fail_next`](Self::fail_next); each queued error is returned once.
#[derive(Debug, Default)]
pub struct FakeDeviceBridge {
    state: Mutex<DeviceState>,
    log: CallLog,
}

impl FakeDeviceBridge {
    /// Creates a bridge with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device.
    #[must_use]
    pub fn with_device(self, device: Device) -> Self {
        self.state.lock().devices.push(device);
        self
    }

    /// Adds an installed package.
    #[must_use]
    pub fn with_package(self, package: Package) -> Self {
        self.state.lock().packages.insert(package.name.clone(), package);
        self
    }

    /// Lists a package name that has no details, as if it vanished mid-resolution.
    #[must_use]
    pub fn with_listed_only(self, name: impl Into<String>) -> Self {
        self.state.lock().listed_only.insert(name.into());
        self
    }

    /// Makes every pull of a file with this name fail.
    #[must_use]
    pub fn with_failing_pull(self, file_name: impl Into<String>) -> Self {
        self.state.lock().failing_pulls.insert(file_name.into());
        self
    }

    /// Sets the dump content returned by `read_dump`.
    #[must_use]
    pub fn with_dump(self, content: impl Into<String>) -> Self {
        self.set_dump(content);
        self
    }

    /// Replaces the dump content.
    pub fn set_dump(&self, content: impl Into<String>) {
        self.state.lock().dump = content.into();
    }

    /// Lets pulls of `file_name` succeed again.
    pub fn heal_pull(&self, file_name: &str) {
        self.state.lock().failing_pulls.remove(file_name);
    }

    /// Queues one failure for the next call of `method`.
    pub fn fail_next(&self, method: &'static str, error: AdapterError) {
        self.log.fail_next(method, error);
    }

    /// Queues `times` tool failures for `method`.
    pub fn fail_times(&self, method: &'static str, times: usize) {
        for _ in 0..times {
            self.fail_next(method, tool_failure(method, "scripted failure"));
        }
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.calls()
    }

    /// Number of calls of `method`.
    #[must_use]
    pub fn calls_named(&self, method: &str) -> usize {
        self.log.count(method)
    }

    /// Number of calls that changed device or disk state.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.log.mutating()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.log.clear();
    }

    /// APKs installed so far.
    #[must_use]
    pub fn installed_apks(&self) -> Vec<PathBuf> {
        self.state.lock().installed_apks.clone()
    }

    /// Returns true if `package` is still installed.
    #[must_use]
    pub fn is_installed(&self, package: &str) -> bool {
        let state = self.state.lock();
        state.packages.contains_key(package) && !state.removed.contains(package)
    }
}

#[async_trait]
impl DeviceBridge for FakeDeviceBridge {
    async fn list_devices(&self) -> Result<Vec<Device>, AdapterError> {
        self.log.record("list_devices", &[])?;
        Ok(self.state.lock().devices.clone())
    }

    async fn list_packages(
        &self,
        device: &str,
        _include_system: bool,
    ) -> Result<Vec<String>, AdapterError> {
        self.log.record("list_packages", &[device])?;
        let state = self.state.lock();
        let names: BTreeSet<String> = state
            .packages
            .keys()
            .chain(state.listed_only.iter())
            .cloned()
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn package_label(
        &self,
        device: &str,
        package: &str,
    ) -> Result<Option<String>, AdapterError> {
        self.log.record("package_label", &[device, package])?;
        Ok(self
            .state
            .lock()
            .packages
            .get(package)
            .and_then(|p| p.label.clone()))
    }

    async fn package_info(
        &self,
        device: &str,
        package: &str,
    ) -> Result<Option<Package>, AdapterError> {
        self.log.record("package_info", &[device, package])?;
        Ok(self.state.lock().packages.get(package).cloned())
    }

    async fn code_paths(&self, device: &str, package: &str) -> Result<Vec<String>, AdapterError> {
        self.log.record("code_paths", &[device, package])?;
        Ok(self
            .state
            .lock()
            .packages
            .get(package)
            .map(|p| p.code_paths.clone())
            .unwrap_or_default())
    }

    async fn pull(&self, device: &str, remote: &str, local: &Path) -> Result<(), AdapterError> {
        let local_str = local.display().to_string();
        self.log.record("pull", &[device, remote, &local_str])?;
        let file_name = remote.rsplit('/').next().unwrap_or(remote);
        if self.state.lock().failing_pulls.contains(file_name) {
            return Err(tool_failure("adb pull", format!("failed to pull {remote}")));
        }
        write_file("adb pull", local, remote.as_bytes())
    }

    async fn install(&self, device: &str, apk: &Path) -> Result<(), AdapterError> {
        let apk_str = apk.display().to_string();
        self.log.record("install", &[device, &apk_str])?;
        self.state.lock().installed_apks.push(apk.to_path_buf());
        Ok(())
    }

    async fn uninstall(
        &self,
        device: &str,
        package: &str,
    ) -> Result<UninstallOutcome, AdapterError> {
        self.log.record("uninstall", &[device, package])?;
        let mut state = self.state.lock();
        if state.packages.contains_key(package) && state.removed.insert(package.to_string()) {
            Ok(UninstallOutcome::Removed)
        } else {
            Ok(UninstallOutcome::NotInstalled)
        }
    }

    async fn launch(&self, device: &str, package: &str) -> Result<(), AdapterError> {
        self.log.record("launch", &[device, package])
    }

    async fn read_dump(&self, device: &str, package: &str) -> Result<String, AdapterError> {
        self.log.record("read_dump", &[device, package])?;
        Ok(self.state.lock().dump.clone())
    }
}

/// A [`Toolchain`] that writes placeholder outputs.
///
/// Archive entries default to a Flutter APK layout.
#[derive(Debug)]
pub struct FakeToolchain {
    entries: Mutex<Vec<String>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    log: CallLog,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self {
            entries: Mutex::new(vec![
                "AndroidManifest.xml".to_string(),
                "classes.dex".to_string(),
                "lib/arm64-v8a/libflutter.so".to_string(),
                "lib/arm64-v8a/libapp.so".to_string(),
            ]),
            delays: Mutex::new(HashMap::new()),
            log: CallLog::default(),
        }
    }
}

impl FakeToolchain {
    /// Creates a toolchain that reports a Flutter APK.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the archive entries reported for every APK.
    #[must_use]
    pub fn with_entries<I, S>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.entries.lock() = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Makes every call of `method` sleep first.
    #[must_use]
    pub fn with_delay(self, method: &'static str, delay: Duration) -> Self {
        self.delays.lock().insert(method, delay);
        self
    }

    /// Queues one failure for the next call of `method`.
    pub fn fail_next(&self, method: &'static str, error: AdapterError) {
        self.log.fail_next(method, error);
    }

    /// Queues `times` tool failures for `method`.
    pub fn fail_times(&self, method: &'static str, times: usize) {
        for _ in 0..times {
            self.fail_next(method, tool_failure(method, "scripted failure"));
        }
    }

    /// Queues one timeout for `method`.
    pub fn time_out_next(&self, method: &'static str) {
        self.fail_next(
            method,
            StageTimeoutError::new(method, Duration::from_secs(1)).into(),
        );
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.calls()
    }

    /// Number of calls of `method`.
    #[must_use]
    pub fn calls_named(&self, method: &str) -> usize {
        self.log.count(method)
    }

    /// Number of calls that wrote outputs.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.log.mutating()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.log.clear();
    }

    async fn enter(&self, method: &'static str, args: &[&str]) -> Result<(), AdapterError> {
        let delay = self.delays.lock().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(method, args)
    }
}

fn show(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn merge_splits(&self, parts_dir: &Path, output: &Path) -> Result<(), AdapterError> {
        self.enter("merge_splits", &[&show(parts_dir), &show(output)]).await?;
        write_file("APKEditor", output, b"merged")
    }

    async fn archive_entries(&self, apk: &Path) -> Result<Vec<String>, AdapterError> {
        self.enter("archive_entries", &[&show(apk)]).await?;
        Ok(self.entries.lock().clone())
    }

    async fn patch(&self, apk: &Path, work_dir: &Path) -> Result<PathBuf, AdapterError> {
        self.enter("patch", &[&show(apk), &show(work_dir)]).await?;
        let patched = work_dir.join(REFLUTTER_OUTPUT);
        write_file("reflutter", &patched, b"patched")?;
        Ok(patched)
    }

    async fn sign(&self, input: &Path, output: &Path) -> Result<(), AdapterError> {
        self.enter("sign", &[&show(input), &show(output)]).await?;
        write_file("apksigner", output, b"signed")
    }

    async fn decompile(
        &self,
        engine: DecompileEngine,
        apk: &Path,
        output_dir: &Path,
    ) -> Result<(), AdapterError> {
        let engine_name = engine.to_string();
        self.enter("decompile", &[&engine_name, &show(apk), &show(output_dir)])
            .await?;
        write_file(&engine_name, &output_dir.join("sources.txt"), b"decompiled")
    }
}

/// A [`Disambiguator`] that answers from a fixed list of 1-based indices.
///
/// When the answers run out it behaves like a non-interactive run.
#[derive(Debug, Default)]
pub struct ScriptedDisambiguator {
    answers: Mutex<VecDeque<usize>>,
    prompts: Mutex<Vec<CandidatePrompt>>,
}

impl ScriptedDisambiguator {
    /// Creates a disambiguator with queued answers.
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<CandidatePrompt> {
        self.prompts.lock().clone()
    }
}

impl Disambiguator for ScriptedDisambiguator {
    fn choose(&self, prompt: &CandidatePrompt) -> Result<usize, ApkflowError> {
        self.prompts.lock().push(prompt.clone());
        match self.answers.lock().pop_front() {
            Some(index) => Ok(prompt.select(index)?),
            None => Err(prompt.clone().into_ambiguity().into()),
        }
    }
}

/// An interactive [`OperatorPrompt`] with queued answers; confirms once they run out.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Result<(), SelectionError>>>,
    messages: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Creates a prompt that confirms everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an answer.
    #[must_use]
    pub fn with_answer(self, answer: Result<(), SelectionError>) -> Self {
        self.answers.lock().push_back(answer);
        self
    }

    /// Messages shown so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, message: &str) -> Result<(), SelectionError> {
        self.messages.lock().push(message.to_string());
        self.answers.lock().pop_front().unwrap_or(Ok(()))
    }
}
