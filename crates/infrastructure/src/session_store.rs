use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use milagro_application::SessionStore;
use milagro_core::{AppError, AppResult};
use milagro_domain::StoredSession;

/// Session store that forgets the session when the process exits.
#[derive(Default)]
pub struct InMemorySessionStore {
    session: RwLock<Option<StoredSession>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> AppResult<Option<StoredSession>> {
        Ok(self.session.read().await.clone())
    }

    async fn save(&self, session: &StoredSession) -> AppResult<()> {
        *self.session.write().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        *self.session.write().await = None;
        Ok(())
    }
}

#[cfg(unix)]
const SESSION_FILE_MODE: u32 = 0o600;

/// Session store persisting a single JSON document on disk.
///
/// A corrupt document is treated as signed out.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the file readable by the owner only before any token is written.
    async fn restrict_permissions(&self) -> AppResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .mode(SESSION_FILE_MODE)
                .open(&self.path)
                .await
                .map_err(|error| self.io_error("create", &error))?;
            tokio::fs::set_permissions(
                &self.path,
                std::fs::Permissions::from_mode(SESSION_FILE_MODE),
            )
            .await
            .map_err(|error| self.io_error("restrict", &error))?;
        }
        Ok(())
    }

    fn io_error(&self, operation: &str, error: &std::io::Error) -> AppError {
        AppError::Internal(format!(
            "failed to {operation} session file '{}': {error}",
            self.path.display()
        ))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> AppResult<Option<StoredSession>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error("read", &error)),
        };

        match serde_json::from_slice::<StoredSession>(&contents) {
            Ok(session) => Ok(Some(session)),
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &StoredSession) -> AppResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to create session directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }

        let contents = serde_json::to_vec_pretty(session)
            .map_err(|error| AppError::Internal(format!("failed to encode session: {error}")))?;
        self.restrict_permissions().await?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|error| self.io_error("write", &error))
    }

    async fn clear(&self) -> AppResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.io_error("remove", &error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use milagro_application::SessionStore;
    use milagro_domain::{AdminId, EmailAddress, SessionOrigin, StoredSession};
    use uuid::Uuid;

    use super::{FileSessionStore, InMemorySessionStore};

    fn stored_session() -> StoredSession {
        StoredSession {
            origin: SessionOrigin::Provider,
            access_token: "access".to_owned(),
            refresh_token: Some("refresh".to_owned()),
            expires_at: Utc
                .with_ymd_and_hms(2030, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            user_id: AdminId::new("7d1e").unwrap_or_else(|_| unreachable!()),
            email: EmailAddress::new("owner@tiles.example").unwrap_or_else(|_| unreachable!()),
        }
    }

    fn scratch_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("milagro-session-{}", Uuid::new_v4().simple()))
            .join("nested")
            .join("session.json")
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let path = scratch_path();
        let store = FileSessionStore::new(path.clone());
        assert_eq!(store.load().await, Ok(None));

        assert!(store.save(&stored_session()).await.is_ok());
        let reopened = FileSessionStore::new(path.clone());
        assert_eq!(reopened.load().await, Ok(Some(stored_session())));

        assert!(reopened.clear().await.is_ok());
        assert!(reopened.clear().await.is_ok());
        assert_eq!(store.load().await, Ok(None));
    }

    #[tokio::test]
    async fn corrupt_session_files_read_as_signed_out() {
        let path = scratch_path();
        let store = FileSessionStore::new(path.clone());
        assert!(store.save(&stored_session()).await.is_ok());
        assert!(tokio::fs::write(&path, b"{ not json").await.is_ok());

        assert_eq!(store.load().await, Ok(None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let path = scratch_path();
        if let Some(parent) = path.parent() {
            assert!(tokio::fs::create_dir_all(parent).await.is_ok());
        }
        assert!(tokio::fs::write(&path, b"{}").await.is_ok());
        assert!(
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
                .await
                .is_ok()
        );

        let store = FileSessionStore::new(path.clone());
        assert!(store.save(&stored_session()).await.is_ok());

        let mode = tokio::fs::metadata(&path)
            .await
            .map(|metadata| metadata.permissions().mode() & 0o777);
        assert!(matches!(mode, Ok(0o600)));
        assert_eq!(store.load().await, Ok(Some(stored_session())));
    }

    #[tokio::test]
    async fn in_memory_store_replaces_and_clears() {
        let store = InMemorySessionStore::new();
        assert!(store.save(&stored_session()).await.is_ok());
        assert_eq!(store.load().await, Ok(Some(stored_session())));

        assert!(store.clear().await.is_ok());
        assert_eq!(store.load().await, Ok(None));
    }
}
