use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::{Credential, PresenceStatus},
    session::{Session, SessionRegistry},
};

/// Applies one fixed status to every account it is pointed at.
#[derive(Clone)]
pub struct PresenceController {
    registry: Arc<SessionRegistry>,
    status: PresenceStatus,
}

impl PresenceController {
    pub fn new(registry: Arc<SessionRegistry>, status: PresenceStatus) -> Self {
        Self { registry, status }
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    /// Ensure a session per account and set the status once each is
    /// authenticated. Returns the number of sessions touched.
    pub async fn start(&self, accounts: &[Credential]) -> usize {
        for credential in accounts {
            let session = self.registry.create(credential).await;
            if session.is_authenticated().await {
                self.apply(&session).await;
                continue;
            }

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = session.authenticate().await {
                    warn!(account = %session.credential(), "presence login failed: {e}");
                    return;
                }
                this.apply(&session).await;
            });
        }
        accounts.len()
    }

    /// Re-apply the status to a session. Failures are logged only.
    pub async fn apply(&self, session: &Session) {
        let res = session.set_status(self.status).await;
        let account = session.label().await;
        match res {
            Ok(()) => debug!(
                account = %account,
                status = self.status.as_str(),
                "presence applied"
            ),
            Err(e) => warn!(account = %account, "presence update failed: {e}"),
        }
    }

    /// Re-apply to every authenticated session in the registry.
    pub async fn refresh(&self) -> usize {
        let mut applied = 0;
        for session in self.registry.list().await {
            if session.is_authenticated().await {
                self.apply(&session).await;
                applied += 1;
            }
        }
        applied
    }
}
