//! Ambient context attached to every record: the session identifier, the
//! page path the host is currently on, and the user agent.
use crate::error::{Result, TelemetryError};
use crate::types::{Metadata, RecordContext};
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Random per-session correlation token. Not a credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Starts a new session: generates a fresh id and records it at `path`
    /// as the current session. An id left there by an earlier run is
    /// replaced, never reused.
    pub fn begin(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let session = Self::generate();
        std::fs::write(path, &session.0).map_err(|source| TelemetryError::Session {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(session)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

pub struct AmbientContext {
    session_id: SessionId,
    user_agent: Option<String>,
    page_path: RwLock<Option<String>>,
}

impl AmbientContext {
    pub fn new(session_id: SessionId, user_agent: Option<String>) -> Self {
        Self {
            session_id,
            user_agent,
            page_path: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Records the path the host is currently showing. `None` clears it.
    pub fn set_page_path(&self, path: Option<String>) {
        *self
            .page_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn page_path(&self) -> Option<String> {
        self.page_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds a record context: ambient fields first, caller fields on top.
    pub fn resolve(&self, metadata: Option<Metadata>) -> RecordContext {
        let mut context = RecordContext {
            session_id: self.session_id.0.clone(),
            page_path: self.page_path(),
            user_agent: self.user_agent.clone(),
            component: None,
            extra: Default::default(),
        };

        if let Some(metadata) = metadata {
            if let Some(session_id) = metadata.session_id {
                context.session_id = session_id;
            }
            if metadata.page_path.is_some() {
                context.page_path = metadata.page_path;
            }
            if metadata.user_agent.is_some() {
                context.user_agent = metadata.user_agent;
            }
            context.component = metadata.component;
            context.extra.extend(metadata.extra);
        }

        context
    }
}
