use super::{paths, DocumentStore, IdentityProvider};
use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Bearer token for REST backends. In-memory backends leave it empty.
    pub id_token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            display_name: None,
            id_token: None,
        }
    }
}

/// Holds the current session and whether its profile has been set up.
///
/// Passed explicitly to whatever needs it; observers call [`subscribe`] and
/// stop observing by dropping the receiver.
///
/// [`subscribe`]: SessionContext::subscribe
pub struct SessionContext {
    session: watch::Sender<Option<Session>>,
    profile_complete: watch::Sender<bool>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        let (profile_complete, _) = watch::channel(false);
        Self {
            session,
            profile_complete,
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.user_id.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    pub fn profile_complete(&self) -> bool {
        *self.profile_complete.borrow()
    }

    pub fn set_profile_complete(&self, complete: bool) {
        self.profile_complete.send_replace(complete);
    }

    /// Replaces the session without going through an identity provider.
    pub fn set_session(&self, session: Option<Session>) {
        self.session.send_replace(session);
    }

    pub async fn sign_in(
        &self,
        identity: &dyn IdentityProvider,
        email: &str,
        password: &str,
    ) -> Result<Session> {
        let session = identity.sign_in_with_email(email, password).await?;
        info!("Signed in as {}", session.user_id);
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_up(
        &self,
        identity: &dyn IdentityProvider,
        email: &str,
        password: &str,
    ) -> Result<Session> {
        let session = identity.sign_up_with_email(email, password).await?;
        info!("Created account {}", session.user_id);
        self.session.send_replace(Some(session.clone()));
        self.set_profile_complete(false);
        Ok(session)
    }

    pub async fn sign_out(&self, identity: &dyn IdentityProvider) -> Result<()> {
        if let Some(session) = self.current() {
            identity.sign_out(&session).await?;
            info!("Signed out {}", session.user_id);
        }
        self.session.send_replace(None);
        self.set_profile_complete(false);
        Ok(())
    }

    /// Re-reads whether the signed-in user has a profile record.
    pub async fn refresh_profile_status(&self, store: &dyn DocumentStore) -> Result<bool> {
        let complete = match self.user_id() {
            Some(user_id) => store.read(&paths::profile(&user_id)).await?.is_some(),
            None => false,
        };
        self.set_profile_complete(complete);
        Ok(complete)
    }
}
