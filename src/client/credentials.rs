use super::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Overrides the credentials file location.
pub const CREDENTIALS_FILE_ENV: &str = "ESH_CREDENTIALS_FILE";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub server: String,
    pub token: String,
    pub token_id: String,
    pub token_name: String,
    pub expires_at: i64,
}

// Never print the token
impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("server", &self.server)
            .field("token_id", &self.token_id)
            .field("token_name", &self.token_name)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    profiles: BTreeMap<String, StoredCredential>,
}

/// Profile-keyed credentials on local disk, readable only by the owner.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$ESH_CREDENTIALS_FILE`, else `<config dir>/esh/credentials.json`.
    pub fn default_location() -> Result<Self, ClientError> {
        if let Some(path) = std::env::var_os(CREDENTIALS_FILE_ENV) {
            return Ok(Self::new(path));
        }
        let dir = dirs::config_dir().ok_or_else(|| {
            ClientError::Credentials("could not determine the user config directory".to_string())
        })?;
        Ok(Self::new(dir.join("esh").join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<CredentialsFile, ClientError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CredentialsFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file via a sibling temp file so readers never see a partial write.
    async fn write(&self, file: &CredentialsFile) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(file)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut handle = options.open(&tmp_path).await?;
        handle.write_all(content.as_bytes()).await?;
        handle.sync_all().await?;
        drop(handle);

        // The temp file may predate this run with looser permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, profile: &str) -> Result<Option<StoredCredential>, ClientError> {
        Ok(self.read().await?.profiles.remove(profile))
    }

    pub async fn save(&self, profile: &str, credential: StoredCredential) -> Result<(), ClientError> {
        let mut file = self.read().await?;
        file.profiles.insert(profile.to_string(), credential);
        self.write(&file).await?;
        tracing::debug!(profile, path = %self.path.display(), "Saved credential");
        Ok(())
    }

    /// Returns whether a credential was present.
    pub async fn remove(&self, profile: &str) -> Result<bool, ClientError> {
        let mut file = self.read().await?;
        if file.profiles.remove(profile).is_none() {
            return Ok(false);
        }
        self.write(&file).await?;
        Ok(true)
    }
}
