//! Module manifest parsing
//!
//! Parses `META-INF/MANIFEST.MF` main sections: `Name: value` lines, where a
//! line starting with a single space continues the previous value. Header
//! lookup is case-insensitive.

use crate::module::traits::ModuleError;

/// Path of the manifest entry inside a module
pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

/// Symbolic name header
pub const SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
/// Activator header, last-resort internal class name
pub const ACTIVATOR: &str = "Bundle-Activator";

/// Main section of a module manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    headers: Vec<(String, String)>,
}

impl Manifest {
    /// Parse manifest text
    pub fn parse(text: &str) -> Result<Self, ModuleError> {
        let mut headers: Vec<(String, String)> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                // End of the main section
                break;
            }
            if let Some(rest) = line.strip_prefix(' ') {
                match headers.last_mut() {
                    Some((_, value)) => value.push_str(rest),
                    None => {
                        return Err(ModuleError::InvalidManifest(format!(
                            "line {}: continuation without a header",
                            index + 1
                        )))
                    }
                }
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ModuleError::InvalidManifest(format!("line {}: missing ':' separator", index + 1))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ModuleError::InvalidManifest(format!(
                    "line {}: empty header name",
                    index + 1
                )));
            }
            headers.push((name.to_string(), value.trim_start().to_string()));
        }

        Ok(Self { headers })
    }

    /// Build a manifest from header pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Header value, case-insensitive on the name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First present header among `names`, in order
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Symbolic name without directives such as `;singleton:=true`
    pub fn symbolic_name(&self) -> Option<&str> {
        self.get(SYMBOLIC_NAME)
            .map(|v| v.split(';').next().unwrap_or(v).trim())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_continuations() {
        let text = "Manifest-Version: 1.0\r\n\
                    Bundle-SymbolicName: org.example.webapp;singleton:=true\r\n\
                    Jetty-WarFolderPath: we\r\n b\r\n\
                    \r\n\
                    Name: ignored\r\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.get("jetty-warfolderpath"), Some("web"));
        assert_eq!(manifest.symbolic_name(), Some("org.example.webapp"));
        assert!(!manifest.contains("Name"));
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = Manifest::parse("Manifest-Version 1.0\n").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidManifest(_)));
    }

    #[test]
    fn first_of_respects_order() {
        let manifest = Manifest::from_pairs([("B", "2"), ("A", "1")]);
        assert_eq!(manifest.first_of(&["A", "B"]), Some("1"));
        assert_eq!(manifest.first_of(&["C"]), None);
    }
}
