use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duels_protocol::model::{MatchDetails, UserId};
use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub inviter_id: UserId,
    pub invitee_id: UserId,
    pub match_details: MatchDetails,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
}

impl Invite {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Direct invitations, at most one outstanding per inviter.
///
/// Accept, decline and cancel all resolve to `Ok(None)` when the invite is
/// already gone; callers treat that as a benign race.
#[async_trait]
pub trait Invitations: Send + Sync {
    async fn create_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
        match_details: MatchDetails,
    ) -> Result<bool, StoreError>;

    async fn pending_invites(&self, invitee_id: UserId) -> Result<Vec<Invite>, StoreError>;

    async fn invite_details(&self, inviter_id: UserId) -> Result<Option<Invite>, StoreError>;

    async fn accept_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> Result<Option<Invite>, StoreError>;

    async fn decline_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> Result<Option<Invite>, StoreError>;

    async fn cancel_invite(&self, inviter_id: UserId) -> Result<Option<Invite>, StoreError>;

    async fn prune_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct InviteTables {
    outgoing: HashMap<UserId, Invite>,
    incoming: HashMap<UserId, BTreeSet<UserId>>,
}

impl InviteTables {
    fn insert(&mut self, invite: Invite) {
        self.incoming
            .entry(invite.invitee_id)
            .or_default()
            .insert(invite.inviter_id);
        self.outgoing.insert(invite.inviter_id, invite);
    }

    fn remove(&mut self, inviter_id: UserId) -> Option<Invite> {
        let invite = self.outgoing.remove(&inviter_id)?;
        if let Some(inviters) = self.incoming.get_mut(&invite.invitee_id) {
            inviters.remove(&inviter_id);
            if inviters.is_empty() {
                self.incoming.remove(&invite.invitee_id);
            }
        }
        Some(invite)
    }

    /// Removes the invite only if it is live and addressed to `invitee_id`.
    fn resolve(
        &mut self,
        inviter_id: UserId,
        invitee_id: Option<UserId>,
        now: Instant,
    ) -> Option<Invite> {
        let invite = self.outgoing.get(&inviter_id)?;
        if !invite.is_live(now) {
            self.remove(inviter_id);
            return None;
        }
        if invitee_id.is_some_and(|invitee_id| invite.invitee_id != invitee_id) {
            return None;
        }
        self.remove(inviter_id)
    }

    fn prune(&mut self, now: Instant) -> usize {
        let expired: Vec<UserId> = self
            .outgoing
            .values()
            .filter(|invite| !invite.is_live(now))
            .map(|invite| invite.inviter_id)
            .collect();
        for inviter_id in &expired {
            self.remove(*inviter_id);
        }
        expired.len()
    }
}

#[derive(Debug)]
pub struct InviteStore {
    ttl: Duration,
    tables: Mutex<InviteTables>,
}

impl InviteStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tables: Mutex::new(InviteTables::default()),
        }
    }

    pub async fn create_invite_at(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
        match_details: MatchDetails,
        now: Instant,
    ) -> bool {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.outgoing.get(&inviter_id) {
            if existing.is_live(now) {
                return false;
            }
            tables.remove(inviter_id);
        }

        tables.insert(Invite {
            inviter_id,
            invitee_id,
            match_details,
            created_at: Utc::now(),
            expires_at: now + self.ttl,
        });
        true
    }

    pub async fn pending_invites_at(&self, invitee_id: UserId, now: Instant) -> Vec<Invite> {
        let tables = self.tables.lock().await;
        let Some(inviters) = tables.incoming.get(&invitee_id) else {
            return Vec::new();
        };

        let mut invites: Vec<Invite> = inviters
            .iter()
            .filter_map(|inviter_id| tables.outgoing.get(inviter_id))
            .filter(|invite| invite.is_live(now))
            .cloned()
            .collect();
        invites.sort_by_key(|invite| invite.created_at);
        invites
    }

    pub async fn resolve_at(
        &self,
        inviter_id: UserId,
        invitee_id: Option<UserId>,
        now: Instant,
    ) -> Option<Invite> {
        self.tables.lock().await.resolve(inviter_id, invitee_id, now)
    }

    pub async fn prune_expired_at(&self, now: Instant) -> usize {
        self.tables.lock().await.prune(now)
    }

    #[cfg(test)]
    async fn index_sizes(&self) -> (usize, usize) {
        let tables = self.tables.lock().await;
        (tables.outgoing.len(), tables.incoming.len())
    }
}

#[async_trait]
impl Invitations for InviteStore {
    async fn create_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
        match_details: MatchDetails,
    ) -> Result<bool, StoreError> {
        Ok(self
            .create_invite_at(inviter_id, invitee_id, match_details, Instant::now())
            .await)
    }

    async fn pending_invites(&self, invitee_id: UserId) -> Result<Vec<Invite>, StoreError> {
        Ok(self.pending_invites_at(invitee_id, Instant::now()).await)
    }

    async fn invite_details(&self, inviter_id: UserId) -> Result<Option<Invite>, StoreError> {
        let now = Instant::now();
        Ok(self
            .tables
            .lock()
            .await
            .outgoing
            .get(&inviter_id)
            .filter(|invite| invite.is_live(now))
            .cloned())
    }

    async fn accept_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> Result<Option<Invite>, StoreError> {
        Ok(self
            .resolve_at(inviter_id, Some(invitee_id), Instant::now())
            .await)
    }

    async fn decline_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> Result<Option<Invite>, StoreError> {
        Ok(self
            .resolve_at(inviter_id, Some(invitee_id), Instant::now())
            .await)
    }

    async fn cancel_invite(&self, inviter_id: UserId) -> Result<Option<Invite>, StoreError> {
        Ok(self.resolve_at(inviter_id, None, Instant::now()).await)
    }

    async fn prune_expired(&self) -> Result<usize, StoreError> {
        Ok(self.prune_expired_at(Instant::now()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(180);

    fn details() -> MatchDetails {
        MatchDetails {
            is_rated: true,
            difficulties: vec![],
            tags: vec![1],
        }
    }

    #[tokio::test]
    async fn second_invite_from_same_inviter_is_refused() {
        let store = InviteStore::new(TTL);
        let now = Instant::now();

        assert!(store.create_invite_at(1, 2, details(), now).await);
        assert!(!store.create_invite_at(1, 3, details(), now).await);
        assert!(store.pending_invites_at(3, now).await.is_empty());
    }

    #[tokio::test]
    async fn resolved_invite_cannot_be_accepted_again() {
        let store = InviteStore::new(TTL);
        let now = Instant::now();
        store.create_invite_at(1, 2, details(), now).await;

        let accepted = store.resolve_at(1, Some(2), now).await.expect("live invite");
        assert_eq!(accepted.invitee_id, 2);
        assert!(store.resolve_at(1, Some(2), now).await.is_none());
        assert_eq!(store.index_sizes().await, (0, 0));
    }

    #[tokio::test]
    async fn decline_then_accept_reports_not_found() {
        let store = InviteStore::new(TTL);
        store
            .create_invite(1, 2, details())
            .await
            .expect("create should pass");

        assert!(store.decline_invite(1, 2).await.expect("decline").is_some());
        assert_eq!(store.accept_invite(1, 2).await, Ok(None));
    }

    #[tokio::test]
    async fn only_the_addressed_invitee_can_resolve() {
        let store = InviteStore::new(TTL);
        let now = Instant::now();
        store.create_invite_at(1, 2, details(), now).await;

        assert!(store.resolve_at(1, Some(3), now).await.is_none());
        assert_eq!(store.pending_invites_at(2, now).await.len(), 1);
    }

    #[tokio::test]
    async fn expired_invite_is_invisible_and_replaceable() {
        let store = InviteStore::new(TTL);
        let now = Instant::now();
        store.create_invite_at(1, 2, details(), now).await;

        let later = now + TTL;
        assert!(store.pending_invites_at(2, later).await.is_empty());
        assert!(store.resolve_at(1, Some(2), later).await.is_none());
        assert!(store.create_invite_at(1, 3, details(), later).await);
        assert_eq!(store.pending_invites_at(3, later).await.len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_invite_and_both_indexes() {
        let store = InviteStore::new(TTL);
        let now = Instant::now();
        store.create_invite_at(1, 9, details(), now).await;
        store
            .create_invite_at(2, 9, details(), now + Duration::from_secs(100))
            .await;

        assert_eq!(store.prune_expired_at(now + TTL).await, 1);
        assert_eq!(store.index_sizes().await, (1, 1));

        let pending = store.pending_invites_at(9, now + TTL).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].inviter_id, 2);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store = InviteStore::new(TTL);
        store.create_invite(1, 2, details()).await.expect("create");

        assert!(store.cancel_invite(1).await.expect("cancel").is_some());
        assert_eq!(store.cancel_invite(1).await, Ok(None));
        assert_eq!(store.invite_details(1).await, Ok(None));
    }
}
