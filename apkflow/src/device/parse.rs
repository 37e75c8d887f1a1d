//! Parsers for `adb` and `pm`/`dumpsys` output.

use super::{ConnectionState, Device};
use regex::Regex;
use std::sync::LazyLock;

/// Parses `adb devices -l`.
#[must_use]
pub fn parse_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Option<Device> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;
    let mut state_raw = parts.next()?.to_string();
    let mut rest: Vec<&str> = parts.collect();

    // "no permissions (...)" spans several columns
    if state_raw == "no" && rest.first() == Some(&"permissions") {
        state_raw = "no permissions".to_string();
        rest.remove(0);
    }

    let mut device = Device::online(id).with_state(ConnectionState::parse(&state_raw));
    for prop in rest {
        if let Some((key, value)) = prop.split_once(':') {
            match key {
                "model" => device.model = Some(value.to_string()),
                "product" => device.product = Some(value.to_string()),
                "transport_id" => device.transport_id = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Some(device)
}

/// Parses `pm list packages` into sorted package names.
#[must_use]
pub fn parse_package_list(output: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Parses `pm path` into code paths, base APK first.
///
/// Files named `split_*` are splits; the first other path is the base.
#[must_use]
pub fn parse_code_paths(output: &str) -> Vec<String> {
    let mut base = None;
    let mut splits = Vec::new();
    for path in output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
    {
        let is_split = path
            .rsplit('/')
            .next()
            .is_some_and(|name| name.starts_with("split_"));
        if is_split || base.is_some() {
            splits.push(path.to_string());
        } else {
            base = Some(path.to_string());
        }
    }
    base.into_iter().chain(splits).collect()
}

/// Extracts `(versionName, versionCode)` from `dumpsys package`.
#[must_use]
pub fn parse_versions(output: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut code = None;
    for line in output.lines().map(str::trim) {
        if name.is_none() {
            if let Some(v) = line.strip_prefix("versionName=") {
                name = Some(v.to_string());
            }
        }
        if code.is_none() {
            if let Some(v) = line.strip_prefix("versionCode=") {
                code = v.split_whitespace().next().map(str::to_string);
            }
        }
        if name.is_some() && code.is_some() {
            break;
        }
    }
    (name, code)
}

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)label[=:]"?([^"}\n]+)"?"#).expect("label pattern is valid")
});

/// Extracts the application label from `dumpsys package`.
#[must_use]
pub fn parse_label(output: &str, package: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| !line.to_lowercase().contains("applicationinfo"))
        .find_map(|line| {
            let label = LABEL_PATTERN.captures(line)?.get(1)?.as_str().trim();
            (!label.is_empty() && label != package).then(|| label.to_string())
        })
}
