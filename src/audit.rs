/// Audit trail for account and session events
///
/// Signups, logins, logouts, account deletion and friendship changes are
/// recorded as structured `tracing` events. Failures are logged at warn.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Signup,
    Login,
    Logout,
    UpdateProfile,
    DeleteAccount,
    FriendRequest,
    FriendAccept,
    FriendRefuse,
    FriendRemove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Signup => "SIGNUP",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::UpdateProfile => "UPDATE_PROFILE",
            AuditAction::DeleteAccount => "DELETE_ACCOUNT",
            AuditAction::FriendRequest => "FRIEND_REQUEST",
            AuditAction::FriendAccept => "FRIEND_ACCEPT",
            AuditAction::FriendRefuse => "FRIEND_REFUSE",
            AuditAction::FriendRemove => "FRIEND_REMOVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub log_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub status: AuditStatus,
    /// Acting user, when known
    pub user_id: Option<Uuid>,
    /// User or resource the action targeted, when different from the actor
    pub target_id: Option<Uuid>,
    pub message: String,
}

impl AuditLog {
    pub fn success(action: AuditAction, message: impl Into<String>) -> Self {
        Self::new(action, AuditStatus::Success, message.into())
    }

    pub fn failure(action: AuditAction, message: impl Into<String>) -> Self {
        Self::new(action, AuditStatus::Failure, message.into())
    }

    fn new(action: AuditAction, status: AuditStatus, message: String) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            status,
            user_id: None,
            target_id: None,
            message,
        }
    }

    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_target_id(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn record(&self) {
        match self.status {
            AuditStatus::Failure => tracing::warn!(
                log_id = %self.log_id,
                action = self.action.as_str(),
                user_id = ?self.user_id,
                target_id = ?self.target_id,
                status = "FAILURE",
                message = %self.message,
                "Audit log entry"
            ),
            AuditStatus::Success => tracing::info!(
                log_id = %self.log_id,
                action = self.action.as_str(),
                user_id = ?self.user_id,
                target_id = ?self.target_id,
                status = "SUCCESS",
                message = %self.message,
                "Audit log entry"
            ),
        }
    }
}
