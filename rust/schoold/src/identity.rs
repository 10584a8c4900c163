use crate::error::{StoreError, StoreResult};
use crate::model::{Role, User};
use crate::observer::{ListenerId, Listeners};
use tracing::debug;

/// Holds whoever is currently using the console.
///
/// `login` does not authenticate anything: it sets the current identity to
/// the record it is given. Every login/logout is broadcast to subscribers.
#[derive(Debug, Default)]
pub struct IdentityStore {
    user: Option<User>,
    listeners: Listeners<dyn FnMut(Option<&User>)>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn login(&mut self, user: User) {
        debug!(user_id = %user.id, role = %user.role, "login");
        self.user = Some(user);
        self.broadcast();
    }

    pub fn logout(&mut self) {
        if let Some(u) = self.user.take() {
            debug!(user_id = %u.id, "logout");
        }
        self.broadcast();
    }

    fn broadcast(&mut self) {
        for f in self.listeners.iter_mut() {
            f(self.user.as_ref());
        }
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.user
            .as_ref()
            .map(|u| roles.contains(&u.role))
            .unwrap_or(false)
    }

    pub fn require_role(&self, roles: &[Role]) -> StoreResult<&User> {
        let user = self.user.as_ref().ok_or(StoreError::Unauthenticated)?;
        if roles.contains(&user.role) {
            Ok(user)
        } else {
            Err(StoreError::Forbidden { role: user.role })
        }
    }

    pub fn subscribe(&mut self, f: impl FnMut(Option<&User>) + 'static) -> ListenerId {
        self.listeners.subscribe(Box::new(f))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
