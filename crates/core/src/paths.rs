use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("WABRIDGE_HOME") {
            if !home.trim().is_empty() {
                return Self::with_base(PathBuf::from(home));
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".wabridge"))
            .unwrap_or_else(|| PathBuf::from(".wabridge"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn token_data_file(&self) -> PathBuf {
        self.data_dir().join("tokenData.json")
    }

    pub fn contacts_name_file(&self) -> PathBuf {
        self.data_dir().join("contactsName.json")
    }

    pub fn contacts_data_file(&self) -> PathBuf {
        self.data_dir().join("contactsData.json")
    }

    pub fn groups_name_file(&self) -> PathBuf {
        self.data_dir().join("groupsName.json")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.base.join("profiles")
    }

    pub fn profile_dir(&self, token: &str) -> PathBuf {
        let safe = token.replace([':', '/', '\\', '.'], "_");
        self.profiles_dir().join(safe)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.profiles_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_locations() {
        let paths = Paths::with_base(PathBuf::from("/srv/wabridge"));
        assert_eq!(
            paths.token_data_file(),
            PathBuf::from("/srv/wabridge/data/tokenData.json")
        );
        assert_eq!(
            paths.groups_name_file(),
            PathBuf::from("/srv/wabridge/data/groupsName.json")
        );
    }

    #[test]
    fn test_profile_dir_is_sanitized() {
        let paths = Paths::with_base(PathBuf::from("/srv/wabridge"));
        assert_eq!(
            paths.profile_dir("../evil"),
            PathBuf::from("/srv/wabridge/profiles/___evil")
        );
    }
}
