use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Credentials file structure
///
/// Format:
/// ```toml
/// [postgres.profile_name]
/// password = "your_postgres_password_here"
///
/// [storage.profile_name]
/// password = "service_role_key"
///
/// [transcription.profile_name]
/// password = "bearer_token"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub postgres: HashMap<String, CredentialProfile>,
    #[serde(default)]
    pub storage: HashMap<String, CredentialProfile>,
    #[serde(default)]
    pub transcription: HashMap<String, CredentialProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialProfile {
    pub password: String,
}

/// Credential type for looking up secrets
#[derive(Debug, Clone, Copy)]
pub enum CredentialType {
    Postgres,
    Storage,
    Transcription,
}

impl CredentialType {
    fn section_name(&self) -> &'static str {
        match self {
            CredentialType::Postgres => "postgres",
            CredentialType::Storage => "storage",
            CredentialType::Transcription => "transcription",
        }
    }
}

/// Default credentials file path: ~/.config/voice_session_recorder/credentials.toml
pub fn get_credentials_path() -> Result<PathBuf, String> {
    let home = std::env::var("HOME").map_err(|_| "HOME environment variable not set".to_string())?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("voice_session_recorder")
        .join("credentials.toml"))
}

/// Load credentials from the default location
/// Returns None if the file doesn't exist
pub fn load_credentials() -> Result<Option<Credentials>, Box<dyn std::error::Error + Send + Sync>> {
    let creds_path = get_credentials_path()?;

    if !creds_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&creds_path)?;
    let credentials: Credentials = toml::from_str(&content)?;

    Ok(Some(credentials))
}

/// Get the secret for a specific profile and credential type
pub fn get_password(
    credentials: &Option<Credentials>,
    cred_type: CredentialType,
    profile: &str,
) -> Result<String, String> {
    match credentials {
        Some(creds) => {
            let profiles = match cred_type {
                CredentialType::Postgres => &creds.postgres,
                CredentialType::Storage => &creds.storage,
                CredentialType::Transcription => &creds.transcription,
            };
            profiles
                .get(profile)
                .map(|p| p.password.clone())
                .ok_or_else(|| {
                    format!(
                        "Credential profile '[{}.{}]' not found in credentials file",
                        cred_type.section_name(),
                        profile
                    )
                })
        }
        None => Err(format!(
            "Credentials file not found. Expected at: {}",
            get_credentials_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|e| e)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_password_by_section() {
        let creds: Credentials = toml::from_str(
            r#"
[postgres.main]
password = "pg-secret"

[storage.supabase]
password = "service-key"
"#,
        )
        .unwrap();
        let creds = Some(creds);

        assert_eq!(
            get_password(&creds, CredentialType::Postgres, "main").unwrap(),
            "pg-secret"
        );
        assert_eq!(
            get_password(&creds, CredentialType::Storage, "supabase").unwrap(),
            "service-key"
        );
        let err = get_password(&creds, CredentialType::Transcription, "main").unwrap_err();
        assert!(err.contains("[transcription.main]"), "{}", err);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = get_password(&None, CredentialType::Postgres, "main").unwrap_err();
        assert!(err.starts_with("Credentials file not found"), "{}", err);
    }
}
