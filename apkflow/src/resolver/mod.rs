//! Target resolution: from a user query to exactly one device/package pair.
//!
//! Devices and packages are enumerated fresh on every call. Ambiguity is handed
//! to an injected [`Disambiguator`]; nothing here reads a global interactive flag.

mod disambiguate;
mod matching;

pub use disambiguate::{
    Candidate, CandidateKind, CandidatePrompt, Disambiguator, InteractiveTerminal, OperatorPrompt,
    Unattended,
};
pub use matching::{classify, exact_match, listing_matches, name_matches, MatchOutcome, PackageListing};

use crate::device::{ConnectionState, Device, DeviceBridge, Package};
use crate::errors::{AdapterError, ApkflowError, DeviceNotConnectedError, NotFoundError, SelectionError};
use crate::workspace::WorkspaceKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Options for one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Restrict to this device id.
    pub device_hint: Option<String>,
    /// Include system packages in the search.
    pub include_system: bool,
    /// Also match against app labels.
    pub match_labels: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            device_hint: None,
            include_system: false,
            match_labels: true,
        }
    }
}

impl ResolveOptions {
    /// Sets the device hint.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device_hint = Some(device.into());
        self
    }

    /// Includes system packages.
    #[must_use]
    pub fn with_system_packages(mut self, include: bool) -> Self {
        self.include_system = include;
        self
    }

    /// Enables or disables label matching.
    #[must_use]
    pub fn with_label_matching(mut self, enabled: bool) -> Self {
        self.match_labels = enabled;
        self
    }
}

/// A concrete device and package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// The selected device.
    pub device: Device,
    /// The package snapshot taken at resolution time.
    pub package: Package,
}

impl ResolvedTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(device: Device, package: Package) -> Self {
        Self { device, package }
    }

    /// The workspace this target's runs are recorded in.
    #[must_use]
    pub fn workspace_key(&self) -> WorkspaceKey {
        WorkspaceKey::new(&self.package.name)
    }
}

/// Matching packages for a query, before any selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateList {
    /// Device the packages were listed on.
    pub device: Device,
    /// The query.
    pub query: String,
    /// True if the single candidate is an exact package-name match.
    pub exact: bool,
    /// Matches, indexed from 1.
    pub candidates: Vec<Candidate>,
}

impl CandidateList {
    /// Returns true if no choice is needed.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.candidates.len() == 1
    }

    fn prompt(&self) -> CandidatePrompt {
        CandidatePrompt {
            query: self.query.clone(),
            kind: CandidateKind::Package,
            candidates: self.candidates.clone(),
        }
    }
}

/// Resolves queries against a device bridge.
pub struct TargetResolver<'a> {
    bridge: &'a dyn DeviceBridge,
    disambiguator: &'a dyn Disambiguator,
}

impl<'a> TargetResolver<'a> {
    /// Creates a resolver.
    #[must_use]
    pub fn new(bridge: &'a dyn DeviceBridge, disambiguator: &'a dyn Disambiguator) -> Self {
        Self {
            bridge,
            disambiguator,
        }
    }

    /// Selects the device to operate on.
    pub async fn select_device(&self, hint: Option<&str>) -> Result<Device, ApkflowError> {
        let devices = self.bridge.list_devices().await?;

        if let Some(hint) = hint {
            return match devices.into_iter().find(|d| d.id == hint) {
                Some(device) if device.is_online() => Ok(device),
                Some(device) => Err(DeviceNotConnectedError::new(format!(
                    "Device {hint} is {}",
                    device.state
                ))
                .with_device(hint)
                .into()),
                None => Err(DeviceNotConnectedError::new(format!("Device {hint} is not connected"))
                    .with_device(hint)
                    .into()),
            };
        }

        let (mut online, other): (Vec<Device>, Vec<Device>) =
            devices.into_iter().partition(Device::is_online);

        match online.len() {
            0 if other.is_empty() => {
                Err(DeviceNotConnectedError::new("No devices connected").into())
            }
            0 => {
                let states: Vec<String> = other
                    .iter()
                    .map(|d| format!("{} ({})", d.id, d.state))
                    .collect();
                let hint = if other.iter().any(|d| d.state == ConnectionState::Unauthorized) {
                    "; accept the debugging prompt on the device"
                } else {
                    ""
                };
                Err(DeviceNotConnectedError::new(format!(
                    "No online devices: {}{hint}",
                    states.join(", ")
                ))
                .into())
            }
            1 => Ok(online.remove(0)),
            _ => {
                let prompt = CandidatePrompt::new(
                    "",
                    CandidateKind::Device,
                    online.iter().map(|d| (d.id.clone(), d.model.clone())),
                );
                let position = self.disambiguator.choose(&prompt)?;
                if position >= online.len() {
                    return Err(out_of_range(position, online.len()));
                }
                Ok(online.swap_remove(position))
            }
        }
    }

    /// Lists the packages matching `query` without choosing between them.
    ///
    /// Zero matches is a [`NotFoundError`], never an empty list.
    pub async fn candidates(
        &self,
        query: &str,
        options: &ResolveOptions,
    ) -> Result<CandidateList, ApkflowError> {
        let device = self.select_device(options.device_hint.as_deref()).await?;
        let names = self
            .bridge
            .list_packages(&device.id, options.include_system)
            .await?;
        debug!(device = %device.id, packages = names.len(), query, "Matching packages");

        if let Some(exact) = exact_match(query, &names) {
            let label = self.label_of(&device.id, exact).await?;
            return Ok(CandidateList {
                query: query.to_string(),
                exact: true,
                candidates: vec![Candidate {
                    index: 1,
                    id: exact.clone(),
                    label,
                }],
                device,
            });
        }

        let mut listings = Vec::with_capacity(names.len());
        for name in names {
            let mut listing = PackageListing::named(name);
            if options.match_labels && !name_matches(query, &listing.name) {
                listing.label = self.label_of(&device.id, &listing.name).await?;
            }
            listings.push(listing);
        }

        let matched = match classify(query, &listings) {
            MatchOutcome::NoMatch => return Err(NotFoundError::new(query).into()),
            MatchOutcome::Exact(one) | MatchOutcome::Unique(one) => vec![one],
            MatchOutcome::Ambiguous(many) => many,
        };

        Ok(CandidateList {
            query: query.to_string(),
            exact: false,
            candidates: CandidatePrompt::new(
                query,
                CandidateKind::Package,
                matched.into_iter().map(|l| (l.name, l.label)),
            )
            .candidates,
            device,
        })
    }

    /// Resolves `query` to one target, consulting the disambiguator if needed.
    pub async fn resolve(
        &self,
        query: &str,
        options: &ResolveOptions,
    ) -> Result<ResolvedTarget, ApkflowError> {
        let list = self.candidates(query, options).await?;
        let position = if list.is_unique() {
            0
        } else {
            self.disambiguator.choose(&list.prompt())?
        };
        let chosen = list
            .candidates
            .get(position)
            .ok_or_else(|| out_of_range(position, list.candidates.len()))?;

        let Some(mut package) = self.bridge.package_info(&list.device.id, &chosen.id).await? else {
            return Err(NotFoundError::new(&chosen.id).into());
        };
        if package.label.is_none() {
            package.label.clone_from(&chosen.label);
        }
        debug!(device = %list.device.id, package = %package.name, split = package.is_split(), "Resolved target");
        Ok(ResolvedTarget::new(list.device, package))
    }

    /// Reads a label; a failed lookup leaves the package unlabelled.
    async fn label_of(&self, device: &str, package: &str) -> Result<Option<String>, ApkflowError> {
        match self.bridge.package_label(device, package).await {
            Ok(label) => Ok(label),
            Err(e @ AdapterError::ToolNotFound(_)) => Err(e.into()),
            Err(e) => {
                warn!(device, package, error = %e, "Label lookup failed, matching by name only");
                Ok(None)
            }
        }
    }
}

fn out_of_range(position: usize, count: usize) -> ApkflowError {
    SelectionError::OutOfRange {
        index: position + 1,
        count,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{StageToolFailureError, ToolNotFoundError};
    use crate::testing::{FakeDeviceBridge, ScriptedDisambiguator};
    use pretty_assertions::assert_eq;

    struct Fixed(usize);

    impl Disambiguator for Fixed {
        fn choose(&self, _prompt: &CandidatePrompt) -> Result<usize, ApkflowError> {
            Ok(self.0)
        }
    }

    fn bridge() -> FakeDeviceBridge {
        FakeDeviceBridge::new()
            .with_device(Device::online("emulator-5554").with_model("sdk_gphone64"))
            .with_package(Package::new("com.example.app", vec!["/data/app/x/base.apk".to_string()]))
            .with_package(Package::new("com.example.app.debug", vec!["/data/app/y/base.apk".to_string()]))
            .with_package(Package::new("com.example.appwidget", vec!["/data/app/z/base.apk".to_string()]))
            .with_package(
                Package::new("org.thunderdog.challegram", vec!["/data/app/t/base.apk".to_string()])
                    .with_label("Telegram X"),
            )
    }

    #[tokio::test]
    async fn test_exact_match_short_circuits() {
        let bridge = bridge();
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let target = resolver
            .resolve("com.example.app", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(target.package.name, "com.example.app");
        assert_eq!(target.device.id, "emulator-5554");
        assert_eq!(bridge.calls_named("package_label"), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_non_interactive_returns_candidates() {
        let bridge = bridge();
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let err = resolver
            .resolve("example", &ResolveOptions::default())
            .await
            .unwrap_err();
        match err {
            ApkflowError::Ambiguity(err) => {
                let ids: Vec<&str> = err.candidates.iter().map(|c| c.id.as_str()).collect();
                assert_eq!(
                    ids,
                    vec!["com.example.app", "com.example.app.debug", "com.example.appwidget"]
                );
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_selection_by_index() {
        let bridge = bridge();
        let third = Unattended::with_selection(3);
        let resolver = TargetResolver::new(&bridge, &third);
        let target = resolver
            .resolve("example", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(target.package.name, "com.example.appwidget");

        let ninth = Unattended::with_selection(9);
        let resolver = TargetResolver::new(&bridge, &ninth);
        assert!(matches!(
            resolver.resolve("example", &ResolveOptions::default()).await,
            Err(ApkflowError::Selection(SelectionError::OutOfRange { index: 9, count: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_label_match_and_toggle() {
        let bridge = bridge();
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let target = resolver
            .resolve("telegram", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(target.package.name, "org.thunderdog.challegram");

        let err = resolver
            .resolve("telegram", &ResolveOptions::default().with_label_matching(false))
            .await
            .unwrap_err();
        assert!(matches!(err, ApkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_matches_is_not_found() {
        let bridge = bridge();
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);
        let err = resolver
            .candidates("spotify", &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApkflowError::NotFound(e) if e.query == "spotify"));
    }

    #[tokio::test]
    async fn test_device_hint_must_be_connected() {
        let bridge = bridge().with_device(
            Device::online("R58M").with_state(ConnectionState::Unauthorized),
        );
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let err = resolver.select_device(Some("R58M")).await.unwrap_err();
        assert!(matches!(err, ApkflowError::DeviceNotConnected(e) if e.message.contains("unauthorized")));

        let err = resolver.select_device(Some("missing")).await.unwrap_err();
        assert!(matches!(err, ApkflowError::DeviceNotConnected(e) if e.device.as_deref() == Some("missing")));

        let device = resolver.select_device(Some("emulator-5554")).await.unwrap();
        assert_eq!(device.id, "emulator-5554");
    }

    #[tokio::test]
    async fn test_device_selection_without_hint() {
        let unattended = Unattended::new();
        let none = FakeDeviceBridge::new();
        let resolver = TargetResolver::new(&none, &unattended);
        assert!(matches!(
            resolver.select_device(None).await,
            Err(ApkflowError::DeviceNotConnected(_))
        ));

        let offline = FakeDeviceBridge::new()
            .with_device(Device::online("a").with_state(ConnectionState::Offline));
        let resolver = TargetResolver::new(&offline, &unattended);
        match resolver.select_device(None).await {
            Err(ApkflowError::DeviceNotConnected(e)) => assert!(e.message.contains("a (offline)")),
            other => panic!("expected not connected, got {other:?}"),
        }

        let two = FakeDeviceBridge::new()
            .with_device(Device::online("a"))
            .with_device(Device::online("b"));
        let resolver = TargetResolver::new(&two, &unattended);
        assert!(matches!(
            resolver.select_device(None).await,
            Err(ApkflowError::Ambiguity(e)) if e.kind == CandidateKind::Device
        ));

        let picker = ScriptedDisambiguator::new([2]);
        let resolver = TargetResolver::new(&two, &picker);
        assert_eq!(resolver.select_device(None).await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_vanished_package_is_not_found() {
        let bridge = bridge().with_listed_only("com.example.ghost");
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);
        let err = resolver
            .resolve("com.example.ghost", &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_label_lookup_is_skipped() {
        let bridge = bridge();
        bridge.fail_next(
            "package_label",
            StageToolFailureError::new("adb", "dumpsys timed out").into(),
        );
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let target = resolver
            .resolve("telegram", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(target.package.name, "org.thunderdog.challegram");
        assert_eq!(bridge.calls_named("package_label"), 4);
    }

    #[tokio::test]
    async fn test_missing_adb_during_label_lookup_is_reported() {
        let bridge = bridge();
        bridge.fail_next("package_label", ToolNotFoundError::new("adb", None).into());
        let unattended = Unattended::new();
        let resolver = TargetResolver::new(&bridge, &unattended);

        let err = resolver
            .resolve("telegram", &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApkflowError::Adapter(AdapterError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_choice_is_rejected() {
        let bridge = bridge();
        let resolver = TargetResolver::new(&bridge, &Fixed(7));
        assert!(matches!(
            resolver.resolve("example", &ResolveOptions::default()).await,
            Err(ApkflowError::Selection(SelectionError::OutOfRange { index: 8, count: 3 }))
        ));

        let two = FakeDeviceBridge::new()
            .with_device(Device::online("a"))
            .with_device(Device::online("b"));
        let resolver = TargetResolver::new(&two, &Fixed(2));
        assert!(matches!(
            resolver.select_device(None).await,
            Err(ApkflowError::Selection(SelectionError::OutOfRange { index: 3, count: 2 }))
        ));
    }
}
