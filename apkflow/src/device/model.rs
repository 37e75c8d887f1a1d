//! Device and package data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Connected and authorized.
    Online,
    /// Known but not responding.
    Offline,
    /// Waiting for the user to accept the host key.
    Unauthorized,
    /// The host lacks permission to talk to the device.
    NoPermissions,
    /// Anything else.
    Unknown,
}

impl ConnectionState {
    /// Parses the state column of `adb devices`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => Self::Online,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "no permissions" | "no" => Self::NoPermissions,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NoPermissions => write!(f, "no permissions"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A connected (or known) device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Serial / transport id used to address the device.
    pub id: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Model name, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Product name, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Transport id, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
}

impl Device {
    /// Creates an online device with no extra properties.
    #[must_use]
    pub fn online(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ConnectionState::Online,
            model: None,
            product: None,
            transport_id: None,
        }
    }

    /// Sets the state.
    #[must_use]
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns true if the device accepts commands.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state == ConnectionState::Online
    }

    /// Human-readable name: model if known, else id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }
}

/// An installed package with its on-device code paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name, e.g. `com.example.app`.
    pub name: String,
    /// Application label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `versionName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    /// `versionCode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<String>,
    /// Remote APK paths; base first.
    pub code_paths: Vec<String>,
}

impl Package {
    /// Creates a package with the given code paths.
    #[must_use]
    pub fn new(name: impl Into<String>, code_paths: Vec<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            version_name: None,
            version_code: None,
            code_paths,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns true if the package ships more than one APK.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.code_paths.len() > 1
    }

    /// The base APK path.
    #[must_use]
    pub fn base_path(&self) -> Option<&str> {
        self.code_paths.first().map(String::as_str)
    }
}
