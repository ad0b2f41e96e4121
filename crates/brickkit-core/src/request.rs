//! Access requests and their review lifecycle.
//!
//! A request asks for privileges on a securable, optionally for a bounded
//! duration. Approval with a duration mints a [`TimeBoundGrant`]; the
//! reconciler later revokes the grant and transitions the request to
//! expired.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::grant::{Grant, TimeBoundGrant};
use crate::principal::Principal;
use crate::privilege::Privilege;
use crate::securable::SecurableType;

/// Review state of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    /// Submitted, awaiting review.
    Pending,
    /// Approved by a reviewer.
    Approved,
    /// Denied by a reviewer.
    Denied,
    /// Approval lapsed after its bounded duration.
    Expired,
}

/// A request for privileges on a securable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Stable request identifier.
    pub id: Uuid,
    /// Who is asking.
    pub requester: Principal,
    /// The securable the request targets.
    pub securable_type: SecurableType,
    /// Fully qualified name of the securable.
    pub securable_name: String,
    /// The privileges being requested.
    pub requested_privileges: BTreeSet<Privilege>,
    /// Why access is needed.
    pub justification: String,
    /// Requested validity window; `None` means indefinite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_duration_hours: Option<u32>,
    /// Review state.
    pub status: AccessRequestStatus,
    /// When the request was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Reviewer identity, set on approve/deny.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<Principal>,
    /// When the review decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewer's reason, set on deny.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Expiry of an approved, time-bounded request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// Submits a new request in pending state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a requested privilege is not
    /// valid for the securable type.
    pub fn submit(
        requester: Principal,
        securable_type: SecurableType,
        securable_name: impl Into<String>,
        requested_privileges: impl IntoIterator<Item = Privilege>,
        justification: impl Into<String>,
        requested_duration_hours: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let securable_name = securable_name.into();
        let requested_privileges: BTreeSet<Privilege> =
            requested_privileges.into_iter().collect();
        for privilege in &requested_privileges {
            if !privilege.is_valid_for(securable_type) {
                return Err(Error::validation(
                    "privilege_valid_for_type",
                    &securable_name,
                    format!("requested privilege {privilege} is not valid on {securable_type}"),
                ));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            requester,
            securable_type,
            securable_name,
            requested_privileges,
            justification: justification.into(),
            requested_duration_hours,
            status: AccessRequestStatus::Pending,
            submitted_at: now,
            reviewer: None,
            reviewed_at: None,
            decision_reason: None,
            expires_at: None,
        })
    }

    /// Approves the request, minting a grant.
    ///
    /// A requested duration yields a [`TimeBoundGrant`] wrapped around the
    /// grant; an unbounded request yields a plain grant only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] unless the request is pending.
    pub fn approve(
        &mut self,
        reviewer: Principal,
        now: DateTime<Utc>,
    ) -> Result<(Grant, Option<TimeBoundGrant>)> {
        self.ensure_pending("approve")?;
        self.status = AccessRequestStatus::Approved;
        self.reviewer = Some(reviewer);
        self.reviewed_at = Some(now);

        let grant = Grant::new(
            self.requester.clone(),
            self.requested_privileges.iter().copied(),
        );
        let time_bound = self.requested_duration_hours.map(|hours| {
            let expires_at = now + Duration::hours(i64::from(hours));
            self.expires_at = Some(expires_at);
            TimeBoundGrant {
                grant: grant.clone(),
                granted_at: now,
                expires_at,
                request_id: Some(self.id),
            }
        });
        Ok((grant, time_bound))
    }

    /// Denies the request with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] unless the request is pending.
    pub fn deny(
        &mut self,
        reviewer: Principal,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_pending("deny")?;
        self.status = AccessRequestStatus::Denied;
        self.reviewer = Some(reviewer);
        self.reviewed_at = Some(now);
        self.decision_reason = Some(reason.into());
        Ok(())
    }

    /// Transitions an approved, time-bounded request to expired when its
    /// window has lapsed. Returns true when the transition happened.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == AccessRequestStatus::Approved
            && self.expires_at.is_some_and(|at| now >= at)
        {
            self.status = AccessRequestStatus::Expired;
            return true;
        }
        false
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        if self.status == AccessRequestStatus::Pending {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "cannot {action} access request {} in state {:?}",
                self.id, self.status
            )))
        }
    }
}

/// Marks every due request in `requests` expired, returning the ids that
/// transitioned. The caller revokes the matching grants.
pub fn revoke_expired(requests: &mut [AccessRequest], now: DateTime<Utc>) -> Vec<Uuid> {
    let mut expired = Vec::new();
    for request in requests.iter_mut() {
        if request.expire_if_due(now) {
            expired.push(request.id);
        }
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_request(duration: Option<u32>) -> AccessRequest {
        AccessRequest::submit(
            Principal::user("bob@example.com"),
            SecurableType::Table,
            "prod.customers.orders",
            [Privilege::Select],
            "quarterly audit",
            duration,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn approve_with_duration_mints_time_bound_grant() {
        let mut request = pending_request(Some(24));
        let now = Utc::now();
        let (grant, time_bound) = request
            .approve(Principal::group("data_owners"), now)
            .unwrap();
        assert_eq!(request.status, AccessRequestStatus::Approved);
        assert!(grant.privileges.contains(&Privilege::Select));
        let time_bound = time_bound.unwrap();
        assert_eq!(time_bound.expires_at, now + Duration::hours(24));
        assert_eq!(time_bound.request_id, Some(request.id));
    }

    #[test]
    fn deny_requires_pending() {
        let mut request = pending_request(None);
        request
            .deny(Principal::group("data_owners"), "no case", Utc::now())
            .unwrap();
        assert_eq!(request.status, AccessRequestStatus::Denied);
        assert!(request
            .deny(Principal::group("data_owners"), "again", Utc::now())
            .is_err());
    }

    #[test]
    fn expiry_transitions_only_due_approvals() {
        let mut request = pending_request(Some(1));
        let now = Utc::now();
        request.approve(Principal::group("data_owners"), now).unwrap();
        assert!(!request.expire_if_due(now));
        assert!(request.expire_if_due(now + Duration::hours(2)));
        assert_eq!(request.status, AccessRequestStatus::Expired);
    }

    #[test]
    fn submit_rejects_invalid_privilege() {
        let result = AccessRequest::submit(
            Principal::user("bob@example.com"),
            SecurableType::Volume,
            "prod.raw.landing",
            [Privilege::Select],
            "oops",
            None,
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
