use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::Storage;
use crate::db::models::{Organization, User, UserRole, new_id};
use crate::error::CallControlError;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProfile {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Creates a new organization owned by this user.
    #[serde(default)]
    pub organization_name: Option<String>,
    /// Joins an existing organization.
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
}

pub async fn create_profile(
    storage: &Storage,
    req: CreateProfile,
) -> Result<(User, Option<Organization>), CallControlError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(CallControlError::validation("a valid email is required"));
    }
    if storage.find_user_by_email(&email).await?.is_some() {
        return Err(CallControlError::Conflict(format!(
            "a profile for {email} already exists"
        )));
    }

    let new_org_name = req
        .organization_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let (organization, role) = match (new_org_name, req.organization_id.as_deref()) {
        (Some(_), Some(_)) => {
            return Err(CallControlError::validation(
                "pass either organization_name or organization_id, not both",
            ));
        }
        (Some(name), None) => (Some(storage.create_organization(name).await?), UserRole::Admin),
        (None, Some(org_id)) => {
            let org = storage
                .get_organization(org_id)
                .await?
                .ok_or(CallControlError::NotFound("organization"))?;
            let role = req.role.unwrap_or(UserRole::Operator);
            if role == UserRole::Superadmin {
                return Err(CallControlError::Forbidden(
                    "superadmin cannot be requested at sign-up".to_string(),
                ));
            }
            (Some(org), role)
        }
        (None, None) => (None, UserRole::Viewer),
    };

    let user = User {
        id: new_id(),
        organization_id: organization.as_ref().map(|o| o.id.clone()),
        email,
        full_name: req.full_name.filter(|n| !n.trim().is_empty()),
        role,
        is_active: true,
        created_at: Utc::now(),
    };
    storage.insert_user(&user).await?;
    storage
        .record_audit(
            user.organization_id.as_deref(),
            Some(&user.id),
            "create",
            "user",
            Some(&user.id),
            Some(json!({ "role": user.role, "new_organization": new_org_name.is_some() })),
        )
        .await?;
    info!(user_id = %user.id, role = %user.role, "user profile created");

    // Only the freshly created organization is returned.
    let created = if new_org_name.is_some() { organization } else { None };
    Ok((user, created))
}

async fn load_active(storage: &Storage, id: &str) -> Result<User, CallControlError> {
    match storage.get_user(id).await? {
        Some(u) if u.is_active => Ok(u),
        _ => Err(CallControlError::NotFound("user")),
    }
}

/// Admins manage users of their own organization who rank below them.
/// Superadmins may manage anyone.
pub fn ensure_can_manage(actor: &User, target: &User) -> Result<(), CallControlError> {
    if !actor.role.can_manage_users() {
        return Err(CallControlError::Forbidden(
            "only admins can manage users".to_string(),
        ));
    }
    if actor.id == target.id {
        return Err(CallControlError::Forbidden(
            "you cannot modify your own account".to_string(),
        ));
    }
    if actor.role == UserRole::Superadmin {
        return Ok(());
    }
    if actor.organization_id.is_none() || actor.organization_id != target.organization_id {
        return Err(CallControlError::Forbidden(
            "user belongs to another organization".to_string(),
        ));
    }
    if target.role >= actor.role {
        return Err(CallControlError::Forbidden(format!(
            "{} cannot manage {}",
            actor.role, target.role
        )));
    }
    Ok(())
}

pub async fn change_role(
    storage: &Storage,
    actor_id: &str,
    target_id: &str,
    new_role: UserRole,
) -> Result<User, CallControlError> {
    let actor = load_active(storage, actor_id).await?;
    let mut target = storage
        .get_user(target_id)
        .await?
        .ok_or(CallControlError::NotFound("user"))?;
    ensure_can_manage(&actor, &target)?;
    if actor.role != UserRole::Superadmin && new_role >= actor.role {
        return Err(CallControlError::Forbidden(format!(
            "{} cannot grant {new_role}",
            actor.role
        )));
    }

    let previous = target.role;
    storage.set_user_role(target_id, new_role).await?;
    target.role = new_role;
    storage
        .record_audit(
            target.organization_id.as_deref(),
            Some(&actor.id),
            "change_role",
            "user",
            Some(target_id),
            Some(json!({ "from": previous, "to": new_role })),
        )
        .await?;
    info!(actor_id, target_id, from = %previous, to = %new_role, "user role changed");
    Ok(target)
}

/// Soft delete: the profile is kept, telegram links are switched off.
pub async fn deactivate(
    storage: &Storage,
    actor_id: &str,
    target_id: &str,
) -> Result<User, CallControlError> {
    let actor = load_active(storage, actor_id).await?;
    let mut target = storage
        .get_user(target_id)
        .await?
        .ok_or(CallControlError::NotFound("user"))?;
    ensure_can_manage(&actor, &target)?;

    storage.set_user_active(target_id, false).await?;
    let unlinked = storage.deactivate_links_for_user(target_id).await?;
    target.is_active = false;
    storage
        .record_audit(
            target.organization_id.as_deref(),
            Some(&actor.id),
            "deactivate",
            "user",
            Some(target_id),
            Some(json!({ "telegram_links_disabled": unlinked })),
        )
        .await?;
    info!(actor_id, target_id, "user deactivated");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, org: Option<&str>, role: UserRole) -> User {
        User {
            id: id.to_string(),
            organization_id: org.map(str::to_string),
            email: format!("{id}@example.com"),
            full_name: None,
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_manages_lower_ranks_in_own_org() {
        let admin = user("a", Some("o1"), UserRole::Admin);
        assert!(ensure_can_manage(&admin, &user("b", Some("o1"), UserRole::Operator)).is_ok());
        assert!(ensure_can_manage(&admin, &user("c", Some("o1"), UserRole::Admin)).is_err());
        assert!(ensure_can_manage(&admin, &user("d", Some("o2"), UserRole::Viewer)).is_err());
        assert!(ensure_can_manage(&admin, &admin).is_err());
    }

    #[test]
    fn managers_cannot_manage_users() {
        let manager = user("m", Some("o1"), UserRole::Manager);
        let err = ensure_can_manage(&manager, &user("v", Some("o1"), UserRole::Viewer)).unwrap_err();
        assert!(matches!(err, CallControlError::Forbidden(_)));
    }

    #[test]
    fn superadmin_crosses_organizations() {
        let root = user("r", None, UserRole::Superadmin);
        assert!(ensure_can_manage(&root, &user("x", Some("o9"), UserRole::Admin)).is_ok());
    }
}
