//! Startup admin-role promotion from the `admin_users` config list.
//!
//! Resolves each configured email to an upstream user id and promotes it to
//! `admin`. Additive only — an email removed from the list does not demote
//! anyone; the portal has no "demote" operation. This only drives the
//! upstream role-update `PATCH`; it does not implement an admin UI itself.

use crate::upstream::UpstreamClient;

/// Promote every email in `admin_users` to the `admin` role. Upstream failures
/// are logged at WARN and otherwise ignored — a misconfigured or unreachable
/// upstream at boot must not prevent the portal from starting.
pub async fn promote_admins(upstream: &UpstreamClient, admin_users: &[String]) {
    if admin_users.is_empty() || !upstream.is_configured() {
        return;
    }

    let users = match upstream.list_users().await {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list upstream users for admin promotion");
            return;
        }
    };

    for email in admin_users {
        let Some(user) = users.iter().find(|u| &u.email == email) else {
            tracing::warn!(email = %email, "admin_users entry does not match any upstream user");
            continue;
        };
        match upstream.set_user_role(&user.id, "admin").await {
            Ok(()) => tracing::info!(email = %email, user_id = %user.id, "promoted user to admin"),
            Err(e) => tracing::warn!(error = %e, email = %email, "failed to promote user to admin"),
        }
    }
}
