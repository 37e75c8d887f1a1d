//! Structured output from a raw Dart dump.
//!
//! The dump is either JSON already, or reflutter's text listing of
//! `Library:'<uri>' Class: <Name> ...` blocks. Anything else is left raw.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static CLASS_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Library:\s*'([^']+)'\s*Class:\s*([A-Za-z0-9_$<>]+)").expect("class header pattern is valid")
});

static FUNCTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Function\s+'([^']+)'").expect("function pattern is valid")
});

/// One class found in a text dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpClass {
    /// Class name.
    pub name: String,
    /// Function names declared in the class body.
    pub functions: Vec<String>,
}

/// Structured form of a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ParsedDump {
    /// The dump was JSON.
    Json {
        /// The parsed document.
        document: Value,
    },
    /// Classes grouped by library URI.
    Classes {
        /// Library URI to classes.
        libraries: BTreeMap<String, Vec<DumpClass>>,
    },
}

impl ParsedDump {
    /// Number of classes, or top-level JSON entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Json { document } => match document {
                Value::Object(map) => map.len(),
                Value::Array(items) => items.len(),
                _ => 1,
            },
            Self::Classes { libraries } => libraries.values().map(Vec::len).sum(),
        }
    }

    /// Returns true if nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses a raw dump. Returns `None` if it has no recognisable structure.
#[must_use]
pub fn parse_dump(raw: &str) -> Option<ParsedDump> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(document) = serde_json::from_str::<Value>(trimmed) {
        if document.is_object() || document.is_array() {
            return Some(ParsedDump::Json { document });
        }
    }

    let mut libraries: BTreeMap<String, Vec<DumpClass>> = BTreeMap::new();
    let mut current: Option<(String, DumpClass)> = None;
    for line in raw.lines() {
        if let Some(caps) = CLASS_HEADER.captures(line) {
            if let Some((library, class)) = current.take() {
                libraries.entry(library).or_default().push(class);
            }
            current = Some((
                caps[1].to_string(),
                DumpClass {
                    name: caps[2].to_string(),
                    functions: Vec::new(),
                },
            ));
        } else if let (Some((_, class)), Some(caps)) = (current.as_mut(), FUNCTION_LINE.captures(line)) {
            class.functions.push(caps[1].to_string());
        }
    }
    if let Some((library, class)) = current {
        libraries.entry(library).or_default().push(class);
    }

    (!libraries.is_empty()).then_some(ParsedDump::Classes { libraries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_dump() {
        let parsed = parse_dump(r#"{"classes": [1, 2]}"#).unwrap();
        assert!(matches!(parsed, ParsedDump::Json { .. }));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_text_dump() {
        let raw = "\
Library:'package:app/main.dart' Class: MyApp extends StatelessWidget {
  Function 'build': (BuildContext) => Widget
  Function 'createState': () => State
}
Library:'package:app/api.dart' Class: ApiClient extends Object {
  Function 'login': (String, String) => Future
}
Library:'package:app/main.dart' Class: _HomeState extends State {
}
";
        match parse_dump(raw).unwrap() {
            ParsedDump::Classes { libraries } => {
                assert_eq!(libraries.len(), 2);
                let main = &libraries["package:app/main.dart"];
                assert_eq!(main[0].name, "MyApp");
                assert_eq!(main[0].functions, vec!["build", "createState"]);
                assert_eq!(main[1].name, "_HomeState");
                assert_eq!(libraries["package:app/api.dart"][0].functions, vec!["login"]);
            }
            other => panic!("expected classes, got {other:?}"),
        }
    }

    #[test]
    fn test_unstructured_dump() {
        assert!(parse_dump("").is_none());
        assert!(parse_dump("garbage \u{0} bytes").is_none());
        assert!(parse_dump("42").is_none());
    }
}
