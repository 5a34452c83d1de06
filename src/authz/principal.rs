use uuid::Uuid;

use crate::models::user::{Profile, Role};

/// The identity facts a decision needs: who the user is, whether they are a
/// superuser, and their profile if one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_superuser: bool,
    pub profile: Option<Profile>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_superuser: false,
            profile: None,
        }
    }

    pub fn with_superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        let user_id = self.user_id;
        let profile = self.profile.get_or_insert_with(|| Profile::default_for(user_id));
        profile.role = Some(role);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        let user_id = self.user_id;
        let profile = self.profile.get_or_insert_with(|| Profile::default_for(user_id));
        profile.active = active;
        self
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().and_then(|p| p.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn is_editor(&self) -> bool {
        self.role() == Some(Role::Editor)
    }

    pub fn is_reader(&self) -> bool {
        self.role() == Some(Role::Reader)
    }

    /// A user without a profile is not considered inactive.
    pub fn is_active(&self) -> bool {
        self.profile.as_ref().map_or(true, |p| p.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_profile_has_no_role_and_is_active() {
        let principal = Principal::new(Uuid::new_v4());
        assert_eq!(principal.role(), None);
        assert!(!principal.is_reader());
        assert!(principal.is_active());
    }

    #[test]
    fn builders_fill_in_a_profile() {
        let principal = Principal::new(Uuid::new_v4())
            .with_role(Role::Editor)
            .with_active(false);
        assert!(principal.is_editor());
        assert!(!principal.is_admin());
        assert!(!principal.is_active());
    }
}
