//! Cross-platform framework detection from APK entry names.

use crate::errors::AdapterError;
use crate::errors::StageToolFailureError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Frameworks recognised by their packaged files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    /// Flutter engine.
    Flutter,
    /// React Native.
    ReactNative,
    /// Xamarin / .NET for Android.
    Xamarin,
    /// Apache Cordova.
    Cordova,
    /// Unity.
    Unity,
}

impl Framework {
    /// Entry names proving the framework; a trailing `/` matches a directory prefix.
    #[must_use]
    pub fn signatures(self) -> &'static [&'static str] {
        match self {
            Self::Flutter => &[
                "lib/arm64-v8a/libflutter.so",
                "lib/armeabi-v7a/libflutter.so",
                "lib/x86_64/libflutter.so",
                "assets/flutter_assets/",
            ],
            Self::ReactNative => &[
                "lib/arm64-v8a/libreactnativejni.so",
                "lib/armeabi-v7a/libreactnativejni.so",
                "lib/x86/libreactnativejni.so",
                "lib/x86_64/libreactnativejni.so",
                "assets/index.android.bundle",
            ],
            Self::Xamarin => &[
                "assemblies/Xamarin.Android.dll",
                "assemblies/Mono.Android.dll",
                "lib/arm64-v8a/libmonosgen-2.0.so",
                "lib/armeabi-v7a/libmonosgen-2.0.so",
            ],
            Self::Cordova => &["assets/www/cordova.js", "assets/www/cordova_plugins.js"],
            Self::Unity => &[
                "lib/arm64-v8a/libunity.so",
                "lib/armeabi-v7a/libunity.so",
                "assets/bin/Data/",
            ],
        }
    }

    const ALL: [Self; 5] = [
        Self::Cordova,
        Self::Flutter,
        Self::ReactNative,
        Self::Unity,
        Self::Xamarin,
    ];
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flutter => write!(f, "Flutter"),
            Self::ReactNative => write!(f, "React Native"),
            Self::Xamarin => write!(f, "Xamarin"),
            Self::Cordova => write!(f, "Cordova"),
            Self::Unity => write!(f, "Unity"),
        }
    }
}

/// A detected framework and the entries that gave it away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkMatch {
    /// The framework.
    pub framework: Framework,
    /// Matching signatures, sorted.
    pub evidence: Vec<String>,
}

/// Detects frameworks from archive entry names, sorted by name.
#[must_use]
pub fn detect_frameworks<S: AsRef<str>>(entries: &[S]) -> Vec<FrameworkMatch> {
    let names: HashSet<&str> = entries.iter().map(AsRef::as_ref).collect();

    Framework::ALL
        .iter()
        .filter_map(|framework| {
            let mut evidence: Vec<String> = framework
                .signatures()
                .iter()
                .filter(|sig| {
                    if sig.ends_with('/') {
                        names.iter().any(|name| name.starts_with(*sig))
                    } else {
                        names.contains(*sig)
                    }
                })
                .map(|sig| (*sig).to_string())
                .collect();
            evidence.sort();
            (!evidence.is_empty()).then_some(FrameworkMatch {
                framework: *framework,
                evidence,
            })
        })
        .collect()
}

/// Lists the entry names of an APK (a zip archive).
pub fn archive_entries(apk: &Path) -> Result<Vec<String>, AdapterError> {
    let unreadable = |e: &dyn fmt::Display| {
        StageToolFailureError::new("archive reader", format!("{}: {e}", apk.display()))
    };
    let file = std::fs::File::open(apk).map_err(|e| unreadable(&e))?;
    let archive = zip::ZipArchive::new(file).map_err(|e| unreadable(&e))?;
    Ok(archive.file_names().map(str::to_string).collect())
}
