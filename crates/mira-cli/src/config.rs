use std::path::PathBuf;

pub const FRONTAL_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
pub const PROFILE_CASCADE_FILE: &str = "haarcascade_profileface.xml";

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of the enrollment tree, one subdirectory per person (default: ./dataset).
    pub data_dir: PathBuf,
    /// Trained model artifact.
    pub model_path: PathBuf,
    /// Label-map artifact.
    pub labels_path: PathBuf,
    /// Frontal-pose Haar cascade XML.
    pub frontal_cascade: PathBuf,
    /// Profile-pose Haar cascade XML, used as the enrollment fallback.
    pub profile_cascade: PathBuf,
}

impl Config {
    /// Load configuration from `MIRA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let home = var("MIRA_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("mira")
        });
        let cascade_dir = var("MIRA_CASCADE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("cascades"));

        Self {
            data_dir: var("MIRA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dataset")),
            model_path: var("MIRA_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(mira_core::model::MODEL_FILE_NAME)),
            labels_path: var("MIRA_LABELS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(mira_core::model::LABELS_FILE_NAME)),
            frontal_cascade: var("MIRA_FRONTAL_CASCADE")
                .map(PathBuf::from)
                .unwrap_or_else(|| cascade_dir.join(FRONTAL_CASCADE_FILE)),
            profile_cascade: var("MIRA_PROFILE_CASCADE")
                .map(PathBuf::from)
                .unwrap_or_else(|| cascade_dir.join(PROFILE_CASCADE_FILE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_xdg() {
        let config = Config::from_lookup(lookup(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(config.data_dir, PathBuf::from("dataset"));
        assert_eq!(config.model_path, PathBuf::from("/data/mira/model.bin"));
        assert_eq!(config.labels_path, PathBuf::from("/data/mira/labels.json"));
        assert_eq!(
            config.frontal_cascade,
            PathBuf::from("/data/mira/cascades/haarcascade_frontalface_default.xml")
        );
    }

    #[test]
    fn test_home_fallback() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/ana")]));
        assert_eq!(
            config.model_path,
            PathBuf::from("/home/ana/.local/share/mira/model.bin")
        );
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("MIRA_HOME", "/srv/mira"),
            ("MIRA_DATA_DIR", "/photos"),
            ("MIRA_LABELS_PATH", "/tmp/l.json"),
            ("MIRA_CASCADE_DIR", "/usr/share/opencv4/haarcascades"),
            ("MIRA_PROFILE_CASCADE", "/opt/profile.xml"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/photos"));
        assert_eq!(config.model_path, PathBuf::from("/srv/mira/model.bin"));
        assert_eq!(config.labels_path, PathBuf::from("/tmp/l.json"));
        assert_eq!(
            config.frontal_cascade,
            PathBuf::from("/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml")
        );
        assert_eq!(config.profile_cascade, PathBuf::from("/opt/profile.xml"));
    }
}
