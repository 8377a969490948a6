//! The lifecycle of pending requests and the reads over relationship state.
//!
//! Every relationship-changing action runs through here: the store commit
//! always happens before any cache mutation for the same logical event, and
//! every terminal state transition is guarded by a compare-and-swap on the
//! request's status so racing transitions (accept vs. expiry) can not both
//! win.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, warn};
use rorm::fields::types::ForeignModelByField;
use rorm::{and, insert, query, update, FieldAccess, Model};
use uuid::Uuid;

use crate::cache::entries::{
    self, AccountEntry, FriendLinkEntry, FriendRequestEntry, GroupEntry, GroupJoinRequestEntry,
    GroupMemberEntry,
};
use crate::cache::keys;
use crate::chan::WsMessage;
use crate::models::{
    Account, FriendLink, FriendLinkInsert, FriendRequest, FriendRequestInsert, Group, GroupInsert,
    GroupJoinRequest, GroupJoinRequestInsert, GroupMember, GroupMemberInsert, GroupRole,
    RequestStatus,
};
use crate::service::{MessageDispatcher, ServiceError, Stores};

/// The consolidated api every handler goes through for pending requests and
/// relationship reads.
#[derive(Clone)]
pub struct RequestLifecycle {
    stores: Stores,
    dispatcher: MessageDispatcher,
    retention: chrono::Duration,
}

impl RequestLifecycle {
    /// Construct the lifecycle service.
    ///
    /// `retention_days` is the window after which the sweeper deletes
    /// pending requests.
    pub fn new(stores: Stores, dispatcher: MessageDispatcher, retention_days: u32) -> Self {
        Self {
            stores,
            dispatcher,
            retention: chrono::Duration::days(retention_days as i64),
        }
    }

    /// The point in time before which a pending request counts as expired
    fn retention_cutoff(&self) -> chrono::NaiveDateTime {
        (Utc::now() - self.retention).naive_utc()
    }

    // --- friend requests ---------------------------------------------------

    /// Create a new friend request from `from` aimed at `to`.
    ///
    /// Fails with [ServiceError::AlreadyExists] if the two users are already
    /// friends or a pending request for the same ordered pair is
    /// outstanding. The cached pending list is consulted first, but only a
    /// positive cache answer is trusted; the store always gets the last
    /// word on absence.
    pub async fn create_friend_request(
        &self,
        from: Uuid,
        to: Uuid,
        message: String,
    ) -> Result<FriendRequestEntry, ServiceError> {
        let cache = &self.stores.cache;

        // Fast path: the target's cached pending list already shows one
        if let Some(items) = cache.list(&keys::friend_request(to)).await {
            if entries::decode_all::<FriendRequestEntry>(items)
                .iter()
                .any(|request| request.from == from)
            {
                return Err(ServiceError::AlreadyExists);
            }
        }

        let mut tx = self.stores.db.start_transaction().await?;

        query!(&mut tx, (Account::F.uuid,))
            .condition(Account::F.uuid.equals(to.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        if query!(&mut tx, (FriendLink::F.uuid,))
            .condition(and!(
                FriendLink::F.user.equals(from.as_ref()),
                FriendLink::F.friend.equals(to.as_ref())
            ))
            .optional()
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists);
        }

        if query!(&mut tx, (FriendRequest::F.uuid,))
            .condition(and!(
                FriendRequest::F.from.equals(from.as_ref()),
                FriendRequest::F.to.equals(to.as_ref()),
                FriendRequest::F.status.equals(RequestStatus::Pending)
            ))
            .optional()
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists);
        }

        let requester = query!(&mut tx, Account)
            .condition(Account::F.uuid.equals(from.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        let uuid = Uuid::new_v4();
        insert!(&mut tx, FriendRequestInsert)
            .single(&FriendRequestInsert {
                uuid,
                from: ForeignModelByField::Key(from),
                to: ForeignModelByField::Key(to),
                message: message.clone(),
                status: RequestStatus::Pending,
            })
            .await?;

        let request = query!(&mut tx, FriendRequest)
            .condition(FriendRequest::F.uuid.equals(uuid.as_ref()))
            .one()
            .await?;

        tx.commit().await?;

        let entry = friend_request_entry(request);
        if let Some(payload) = entries::encode(&entry) {
            cache
                .append_to_list(&keys::friend_request(to), &payload, cache.relation_ttl())
                .await;
        }

        self.dispatcher.notify(
            to,
            WsMessage::IncomingFriendRequest {
                request_uuid: uuid,
                from: account_entry(requester),
                message,
            },
        );

        Ok(entry)
    }

    /// Accept a friend request.
    ///
    /// Marking the request and inserting both link directions is one store
    /// transaction; the cache is only repaired after the commit.
    pub async fn accept_friend_request(
        &self,
        executing: Uuid,
        request_uuid: Uuid,
    ) -> Result<(), ServiceError> {
        let mut tx = self.stores.db.start_transaction().await?;

        let request = query!(&mut tx, FriendRequest)
            .condition(FriendRequest::F.uuid.equals(request_uuid.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        if *request.to.key() != executing {
            return Err(ServiceError::MissingPrivileges);
        }
        if !request.status.can_transition(RequestStatus::Accepted) {
            return Err(ServiceError::Conflict);
        }

        // Conditional on the status still being pending: the expiry sweeper
        // or a concurrent answer may have won the race since the read above
        let updated = update!(&mut tx, FriendRequest)
            .condition(and!(
                FriendRequest::F.uuid.equals(request_uuid.as_ref()),
                FriendRequest::F.status.equals(RequestStatus::Pending)
            ))
            .set(FriendRequest::F.status, RequestStatus::Accepted)
            .exec()
            .await?;
        if updated == 0 {
            return Err(ServiceError::Conflict);
        }

        let from = *request.from.key();
        let to = *request.to.key();

        // Keyed off the store, never off cached lists: a duplicate cache
        // entry must not produce a second link pair
        if query!(&mut tx, (FriendLink::F.uuid,))
            .condition(and!(
                FriendLink::F.user.equals(from.as_ref()),
                FriendLink::F.friend.equals(to.as_ref())
            ))
            .optional()
            .await?
            .is_none()
        {
            insert!(&mut tx, FriendLinkInsert)
                .bulk(&[
                    FriendLinkInsert {
                        uuid: Uuid::new_v4(),
                        user: ForeignModelByField::Key(from),
                        friend: ForeignModelByField::Key(to),
                    },
                    FriendLinkInsert {
                        uuid: Uuid::new_v4(),
                        user: ForeignModelByField::Key(to),
                        friend: ForeignModelByField::Key(from),
                    },
                ])
                .await?;
        }

        tx.commit().await?;

        let cache = &self.stores.cache;
        cache
            .remove_from_list(&keys::friend_request(to), |payload| {
                entries::decode::<FriendRequestEntry>(payload)
                    .map_or(false, |entry| entry.uuid == request_uuid)
            })
            .await;

        // Both sides of the symmetric change, in the same logical operation
        let created_at = Utc::now();
        for (owner, friend) in [(from, to), (to, from)] {
            let entry = FriendLinkEntry { friend, created_at };
            if let Some(payload) = entries::encode(&entry) {
                cache
                    .append_to_list(&keys::friendship(owner), &payload, cache.relation_ttl())
                    .await;
            }
        }

        self.dispatcher.notify(
            from,
            WsMessage::FriendRequestAnswered {
                request_uuid,
                by: to,
                accepted: true,
            },
        );

        Ok(())
    }

    /// Reject a friend request.
    ///
    /// No links are created; the request disappears from the target's
    /// cached pending list.
    pub async fn reject_friend_request(
        &self,
        executing: Uuid,
        request_uuid: Uuid,
    ) -> Result<(), ServiceError> {
        let mut tx = self.stores.db.start_transaction().await?;

        let request = query!(&mut tx, FriendRequest)
            .condition(FriendRequest::F.uuid.equals(request_uuid.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        if *request.to.key() != executing {
            return Err(ServiceError::MissingPrivileges);
        }
        if !request.status.can_transition(RequestStatus::Rejected) {
            return Err(ServiceError::Conflict);
        }

        let updated = update!(&mut tx, FriendRequest)
            .condition(and!(
                FriendRequest::F.uuid.equals(request_uuid.as_ref()),
                FriendRequest::F.status.equals(RequestStatus::Pending)
            ))
            .set(FriendRequest::F.status, RequestStatus::Rejected)
            .exec()
            .await?;
        if updated == 0 {
            return Err(ServiceError::Conflict);
        }

        let from = *request.from.key();
        let to = *request.to.key();

        tx.commit().await?;

        self.stores
            .cache
            .remove_from_list(&keys::friend_request(to), |payload| {
                entries::decode::<FriendRequestEntry>(payload)
                    .map_or(false, |entry| entry.uuid == request_uuid)
            })
            .await;

        self.dispatcher.notify(
            from,
            WsMessage::FriendRequestAnswered {
                request_uuid,
                by: to,
                accepted: false,
            },
        );

        Ok(())
    }

    /// Retrieve the pending friend requests aimed at `user`
    pub async fn pending_friend_requests(
        &self,
        user: Uuid,
    ) -> Result<Vec<FriendRequestEntry>, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::friend_request(user);

        let loaded = cache
            .list_or_load(&key, cache.relation_ttl(), || async {
                self.load_friend_request_payloads(user).await.ok()
            })
            .await;

        match loaded {
            Some(items) => Ok(entries::decode_all(items)),
            // The coalesced load failed, surface what the store says
            None => Ok(entries::decode_all(
                self.load_friend_request_payloads(user).await?,
            )),
        }
    }

    async fn load_friend_request_payloads(&self, user: Uuid) -> Result<Vec<String>, ServiceError> {
        let requests = query!(&self.stores.db, FriendRequest)
            .condition(and!(
                FriendRequest::F.to.equals(user.as_ref()),
                FriendRequest::F.status.equals(RequestStatus::Pending)
            ))
            .all()
            .await?;

        Ok(requests
            .into_iter()
            .filter_map(|request| entries::encode(&friend_request_entry(request)))
            .collect())
    }

    /// Retrieve the friends of `user`
    pub async fn friends_of(&self, user: Uuid) -> Result<Vec<FriendLinkEntry>, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::friendship(user);

        let loaded = cache
            .list_or_load(&key, cache.relation_ttl(), || async {
                self.load_friendship_payloads(user).await.ok()
            })
            .await;

        match loaded {
            Some(items) => Ok(entries::decode_all(items)),
            None => Ok(entries::decode_all(
                self.load_friendship_payloads(user).await?,
            )),
        }
    }

    async fn load_friendship_payloads(&self, user: Uuid) -> Result<Vec<String>, ServiceError> {
        let links = query!(&self.stores.db, FriendLink)
            .condition(FriendLink::F.user.equals(user.as_ref()))
            .all()
            .await?;

        Ok(links
            .into_iter()
            .filter_map(|link| {
                entries::encode(&FriendLinkEntry {
                    friend: *link.friend.key(),
                    created_at: DateTime::from_utc(link.created_at, Utc),
                })
            })
            .collect())
    }

    // --- groups ------------------------------------------------------------

    /// Create a group owned by `owner` with optional initial members.
    ///
    /// The owner's membership row is created in the same transaction as the
    /// group itself; a group without an owner never exists.
    pub async fn create_group(
        &self,
        owner: Uuid,
        name: String,
        initial_members: Vec<Uuid>,
    ) -> Result<GroupEntry, ServiceError> {
        let mut tx = self.stores.db.start_transaction().await?;

        for member in initial_members.iter().unique() {
            query!(&mut tx, (Account::F.uuid,))
                .condition(Account::F.uuid.equals(member.as_ref()))
                .optional()
                .await?
                .ok_or(ServiceError::NotFound)?;
        }

        let uuid = Uuid::new_v4();
        insert!(&mut tx, GroupInsert)
            .single(&GroupInsert {
                uuid,
                name,
                owner: ForeignModelByField::Key(owner),
            })
            .await?;

        let mut memberships = vec![GroupMemberInsert {
            uuid: Uuid::new_v4(),
            group: ForeignModelByField::Key(uuid),
            member: ForeignModelByField::Key(owner),
            role: GroupRole::Owner,
        }];
        for member in initial_members.iter().unique() {
            if *member == owner {
                continue;
            }
            memberships.push(GroupMemberInsert {
                uuid: Uuid::new_v4(),
                group: ForeignModelByField::Key(uuid),
                member: ForeignModelByField::Key(*member),
                role: GroupRole::Member,
            });
        }
        insert!(&mut tx, GroupMemberInsert).bulk(&memberships).await?;

        let group = query!(&mut tx, Group)
            .condition(Group::F.uuid.equals(uuid.as_ref()))
            .one()
            .await?;
        let members = query!(&mut tx, GroupMember)
            .condition(GroupMember::F.group.equals(uuid.as_ref()))
            .all()
            .await?;

        tx.commit().await?;

        let cache = &self.stores.cache;
        let entry = group_entry(group);
        if let Some(payload) = entries::encode(&entry) {
            cache
                .put_value(&keys::group(uuid), &payload, cache.relation_ttl())
                .await;
        }
        self.rebuild_member_caches(uuid, &members).await;
        for member in &members {
            cache.invalidate(&keys::group_list(*member.member.key())).await;
        }
        for member in &members {
            let account = *member.member.key();
            if account != owner {
                self.dispatcher
                    .notify(account, WsMessage::AddedToGroup { group: entry.clone() });
            }
        }

        Ok(entry)
    }

    /// Retrieve a group's metadata, cache first
    pub async fn group_by_uuid(&self, group: Uuid) -> Result<GroupEntry, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::group(group);

        let loaded = cache
            .value_or_load(&key, cache.relation_ttl(), || async {
                let model = query!(&self.stores.db, Group)
                    .condition(Group::F.uuid.equals(group.as_ref()))
                    .optional()
                    .await
                    .ok()
                    .flatten()?;
                entries::encode(&group_entry(model))
            })
            .await;

        if let Some(entry) = loaded.as_deref().and_then(entries::decode) {
            return Ok(entry);
        }

        let model = query!(&self.stores.db, Group)
            .condition(Group::F.uuid.equals(group.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;
        Ok(group_entry(model))
    }

    /// Retrieve the groups `user` is a member of
    pub async fn groups_of(&self, user: Uuid) -> Result<Vec<GroupEntry>, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::group_list(user);

        let loaded = cache
            .list_or_load(&key, cache.relation_ttl(), || async {
                self.load_group_list_payloads(user).await.ok()
            })
            .await;

        match loaded {
            Some(items) => Ok(entries::decode_all(items)),
            None => Ok(entries::decode_all(
                self.load_group_list_payloads(user).await?,
            )),
        }
    }

    async fn load_group_list_payloads(&self, user: Uuid) -> Result<Vec<String>, ServiceError> {
        let memberships = query!(&self.stores.db, GroupMember)
            .condition(GroupMember::F.member.equals(user.as_ref()))
            .all()
            .await?;

        let mut payloads = Vec::new();
        for membership in memberships {
            let group = *membership.group.key();
            if let Some(model) = query!(&self.stores.db, Group)
                .condition(Group::F.uuid.equals(group.as_ref()))
                .optional()
                .await?
            {
                payloads.extend(entries::encode(&group_entry(model)));
            }
        }

        Ok(payloads)
    }

    /// Retrieve the members of a group
    pub async fn members_of(&self, group: Uuid) -> Result<Vec<GroupMemberEntry>, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::group_member(group);

        let loaded = cache
            .list_or_load(&key, cache.relation_ttl(), || async {
                self.load_member_payloads(group).await.ok()
            })
            .await;

        match loaded {
            Some(items) => Ok(entries::decode_all(items)),
            None => Ok(entries::decode_all(self.load_member_payloads(group).await?)),
        }
    }

    async fn load_member_payloads(&self, group: Uuid) -> Result<Vec<String>, ServiceError> {
        let members = query!(&self.stores.db, GroupMember)
            .condition(GroupMember::F.group.equals(group.as_ref()))
            .all()
            .await?;

        Ok(members
            .into_iter()
            .filter_map(|member| entries::encode(&member_entry(member)))
            .collect())
    }

    /// O(1) membership test via the derived set, store on a cold set.
    ///
    /// The set is rebuilt from the store whenever it is found absent.
    pub async fn is_group_member(&self, group: Uuid, user: Uuid) -> Result<bool, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::group_member_set(group);

        if let Some(is_member) = cache.set_contains(&key, &user.to_string()).await {
            return Ok(is_member);
        }

        let members = query!(&self.stores.db, GroupMember)
            .condition(GroupMember::F.group.equals(group.as_ref()))
            .all()
            .await?;

        let is_member = members.iter().any(|member| *member.member.key() == user);
        let ids = members
            .iter()
            .map(|member| member.member.key().to_string())
            .collect::<Vec<_>>();
        if !ids.is_empty() {
            cache.replace_set(&key, &ids, cache.derived_ttl()).await;
        }

        Ok(is_member)
    }

    /// Create a request of `applicant` to join `group`.
    ///
    /// Group existence and membership are checked concurrently; each check
    /// returns its own typed result and both are joined before deciding.
    pub async fn create_group_join_request(
        &self,
        applicant: Uuid,
        group: Uuid,
        message: String,
    ) -> Result<GroupJoinRequestEntry, ServiceError> {
        let (group_entry, is_member) = tokio::join!(
            self.group_by_uuid(group),
            self.is_group_member(group, applicant)
        );
        let group_entry = group_entry?;
        if is_member? {
            return Err(ServiceError::AlreadyExists);
        }

        let cache = &self.stores.cache;

        // Fast path: the owner's cached application list already shows one
        if let Some(items) = cache
            .list(&keys::group_application_list(group_entry.owner))
            .await
        {
            if entries::decode_all::<GroupJoinRequestEntry>(items)
                .iter()
                .any(|request| request.applicant == applicant && request.group == group)
            {
                return Err(ServiceError::AlreadyExists);
            }
        }

        let mut tx = self.stores.db.start_transaction().await?;

        if query!(&mut tx, (GroupJoinRequest::F.uuid,))
            .condition(and!(
                GroupJoinRequest::F.applicant.equals(applicant.as_ref()),
                GroupJoinRequest::F.group.equals(group.as_ref()),
                GroupJoinRequest::F.status.equals(RequestStatus::Pending)
            ))
            .optional()
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists);
        }

        let applicant_account = query!(&mut tx, Account)
            .condition(Account::F.uuid.equals(applicant.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        let uuid = Uuid::new_v4();
        insert!(&mut tx, GroupJoinRequestInsert)
            .single(&GroupJoinRequestInsert {
                uuid,
                applicant: ForeignModelByField::Key(applicant),
                group: ForeignModelByField::Key(group),
                message: message.clone(),
                status: RequestStatus::Pending,
            })
            .await?;

        let request = query!(&mut tx, GroupJoinRequest)
            .condition(GroupJoinRequest::F.uuid.equals(uuid.as_ref()))
            .one()
            .await?;

        tx.commit().await?;

        let entry = join_request_entry(request);
        let payload = entries::encode(&entry);
        let applicant_entry = account_entry(applicant_account);
        for manager in self.group_managers(group).await? {
            if let Some(payload) = &payload {
                cache
                    .append_to_list(
                        &keys::group_application_list(manager),
                        payload,
                        cache.relation_ttl(),
                    )
                    .await;
            }
            self.dispatcher.notify(
                manager,
                WsMessage::IncomingGroupJoinRequest {
                    request_uuid: uuid,
                    group,
                    applicant: applicant_entry.clone(),
                    message: message.clone(),
                },
            );
        }

        Ok(entry)
    }

    /// Accept a group join request.
    ///
    /// Only the group's owner or an admin may do this. The status swap and
    /// the membership row are one transaction.
    pub async fn accept_group_join_request(
        &self,
        executing: Uuid,
        request_uuid: Uuid,
    ) -> Result<(), ServiceError> {
        let mut tx = self.stores.db.start_transaction().await?;

        let request = query!(&mut tx, GroupJoinRequest)
            .condition(GroupJoinRequest::F.uuid.equals(request_uuid.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        let group = *request.group.key();
        let applicant = *request.applicant.key();

        let executing_membership = query!(&mut tx, GroupMember)
            .condition(and!(
                GroupMember::F.group.equals(group.as_ref()),
                GroupMember::F.member.equals(executing.as_ref())
            ))
            .optional()
            .await?
            .ok_or(ServiceError::MissingPrivileges)?;
        if !executing_membership.role.manages_requests() {
            return Err(ServiceError::MissingPrivileges);
        }

        if !request.status.can_transition(RequestStatus::Accepted) {
            return Err(ServiceError::Conflict);
        }

        let updated = update!(&mut tx, GroupJoinRequest)
            .condition(and!(
                GroupJoinRequest::F.uuid.equals(request_uuid.as_ref()),
                GroupJoinRequest::F.status.equals(RequestStatus::Pending)
            ))
            .set(GroupJoinRequest::F.status, RequestStatus::Accepted)
            .exec()
            .await?;
        if updated == 0 {
            return Err(ServiceError::Conflict);
        }

        // Membership keyed off the store, a stale cached list must not
        // produce a duplicate row
        let new_member = if query!(&mut tx, (GroupMember::F.uuid,))
            .condition(and!(
                GroupMember::F.group.equals(group.as_ref()),
                GroupMember::F.member.equals(applicant.as_ref())
            ))
            .optional()
            .await?
            .is_none()
        {
            let member_uuid = Uuid::new_v4();
            insert!(&mut tx, GroupMemberInsert)
                .single(&GroupMemberInsert {
                    uuid: member_uuid,
                    group: ForeignModelByField::Key(group),
                    member: ForeignModelByField::Key(applicant),
                    role: GroupRole::Member,
                })
                .await?;
            query!(&mut tx, GroupMember)
                .condition(GroupMember::F.uuid.equals(member_uuid.as_ref()))
                .optional()
                .await?
        } else {
            None
        };

        tx.commit().await?;

        let cache = &self.stores.cache;
        for manager in self.group_managers(group).await? {
            cache
                .invalidate(&keys::group_application_list(manager))
                .await;
        }
        if let Some(member) = new_member {
            if let Some(payload) = entries::encode(&member_entry(member)) {
                cache
                    .append_to_list(&keys::group_member(group), &payload, cache.relation_ttl())
                    .await;
            }
            cache
                .add_to_set(
                    &keys::group_member_set(group),
                    &applicant.to_string(),
                    cache.derived_ttl(),
                )
                .await;
        }
        cache.invalidate(&keys::group_list(applicant)).await;

        self.dispatcher.notify(
            applicant,
            WsMessage::GroupJoinAnswered {
                request_uuid,
                group,
                accepted: true,
            },
        );

        Ok(())
    }

    /// Reject a group join request
    pub async fn reject_group_join_request(
        &self,
        executing: Uuid,
        request_uuid: Uuid,
    ) -> Result<(), ServiceError> {
        let mut tx = self.stores.db.start_transaction().await?;

        let request = query!(&mut tx, GroupJoinRequest)
            .condition(GroupJoinRequest::F.uuid.equals(request_uuid.as_ref()))
            .optional()
            .await?
            .ok_or(ServiceError::NotFound)?;

        let group = *request.group.key();
        let applicant = *request.applicant.key();

        let executing_membership = query!(&mut tx, GroupMember)
            .condition(and!(
                GroupMember::F.group.equals(group.as_ref()),
                GroupMember::F.member.equals(executing.as_ref())
            ))
            .optional()
            .await?
            .ok_or(ServiceError::MissingPrivileges)?;
        if !executing_membership.role.manages_requests() {
            return Err(ServiceError::MissingPrivileges);
        }

        if !request.status.can_transition(RequestStatus::Rejected) {
            return Err(ServiceError::Conflict);
        }

        let updated = update!(&mut tx, GroupJoinRequest)
            .condition(and!(
                GroupJoinRequest::F.uuid.equals(request_uuid.as_ref()),
                GroupJoinRequest::F.status.equals(RequestStatus::Pending)
            ))
            .set(GroupJoinRequest::F.status, RequestStatus::Rejected)
            .exec()
            .await?;
        if updated == 0 {
            return Err(ServiceError::Conflict);
        }

        tx.commit().await?;

        let cache = &self.stores.cache;
        for manager in self.group_managers(group).await? {
            cache
                .remove_from_list(&keys::group_application_list(manager), |payload| {
                    entries::decode::<GroupJoinRequestEntry>(payload)
                        .map_or(false, |entry| entry.uuid == request_uuid)
                })
                .await;
        }

        self.dispatcher.notify(
            applicant,
            WsMessage::GroupJoinAnswered {
                request_uuid,
                group,
                accepted: false,
            },
        );

        Ok(())
    }

    /// Retrieve the pending join requests of all groups `manager` manages
    pub async fn pending_group_join_requests(
        &self,
        manager: Uuid,
    ) -> Result<Vec<GroupJoinRequestEntry>, ServiceError> {
        let cache = &self.stores.cache;
        let key = keys::group_application_list(manager);

        let loaded = cache
            .list_or_load(&key, cache.relation_ttl(), || async {
                self.load_application_payloads(manager).await.ok()
            })
            .await;

        match loaded {
            Some(items) => Ok(entries::decode_all(items)),
            None => Ok(entries::decode_all(
                self.load_application_payloads(manager).await?,
            )),
        }
    }

    async fn load_application_payloads(&self, manager: Uuid) -> Result<Vec<String>, ServiceError> {
        let memberships = query!(&self.stores.db, GroupMember)
            .condition(GroupMember::F.member.equals(manager.as_ref()))
            .all()
            .await?;

        let mut payloads = Vec::new();
        for membership in memberships {
            if !membership.role.manages_requests() {
                continue;
            }
            let group = *membership.group.key();
            let requests = query!(&self.stores.db, GroupJoinRequest)
                .condition(and!(
                    GroupJoinRequest::F.group.equals(group.as_ref()),
                    GroupJoinRequest::F.status.equals(RequestStatus::Pending)
                ))
                .all()
                .await?;
            payloads.extend(
                requests
                    .into_iter()
                    .filter_map(|request| entries::encode(&join_request_entry(request))),
            );
        }

        Ok(payloads)
    }

    /// The accounts allowed to answer join requests for `group`
    async fn group_managers(&self, group: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let members = query!(&self.stores.db, GroupMember)
            .condition(GroupMember::F.group.equals(group.as_ref()))
            .all()
            .await?;

        Ok(members
            .into_iter()
            .filter(|member| member.role.manages_requests())
            .map(|member| *member.member.key())
            .unique()
            .collect())
    }

    /// Rebuild the display list and the derived membership set of a group
    async fn rebuild_member_caches(&self, group: Uuid, members: &[GroupMember]) {
        let cache = &self.stores.cache;
        let payloads = members
            .iter()
            .filter_map(|member| {
                entries::encode(&GroupMemberEntry {
                    member: *member.member.key(),
                    role: member.role,
                    joined_at: DateTime::from_utc(member.joined_at, Utc),
                })
            })
            .collect::<Vec<_>>();
        cache
            .replace_list(&keys::group_member(group), &payloads, cache.relation_ttl())
            .await;

        let ids = members
            .iter()
            .map(|member| member.member.key().to_string())
            .collect::<Vec<_>>();
        cache
            .replace_set(&keys::group_member_set(group), &ids, cache.derived_ttl())
            .await;
    }

    // --- expiry ------------------------------------------------------------

    /// Delete friend requests that stayed pending past the retention window.
    ///
    /// The delete is conditional on the status still being pending, a
    /// request accepted while the sweep runs survives. Nobody is notified.
    pub async fn expire_friend_requests(&self) -> Result<u64, ServiceError> {
        let cutoff = self.retention_cutoff();

        let mut tx = self.stores.db.start_transaction().await?;

        let expired = query!(&mut tx, (FriendRequest::F.uuid, FriendRequest::F.to.uuid))
            .condition(and!(
                FriendRequest::F.status.equals(RequestStatus::Pending),
                FriendRequest::F.created_at.less_equals(cutoff)
            ))
            .all()
            .await?;

        if expired.is_empty() {
            return Ok(0);
        }

        let removed = rorm::delete!(&mut tx, FriendRequest)
            .condition(and!(
                FriendRequest::F.status.equals(RequestStatus::Pending),
                FriendRequest::F.created_at.less_equals(cutoff)
            ))
            .await?;

        tx.commit().await?;

        let cache = &self.stores.cache;
        for (_, target) in expired.iter().unique_by(|(_, target)| *target) {
            cache.invalidate(&keys::friend_request(*target)).await;
        }

        debug!("Expired {removed} friend requests");
        Ok(removed)
    }

    /// Delete group join requests that stayed pending past the retention
    /// window, with the same conditional-delete guard.
    pub async fn expire_group_join_requests(&self) -> Result<u64, ServiceError> {
        let cutoff = self.retention_cutoff();

        let mut tx = self.stores.db.start_transaction().await?;

        let expired = query!(
            &mut tx,
            (GroupJoinRequest::F.uuid, GroupJoinRequest::F.group.uuid)
        )
        .condition(and!(
            GroupJoinRequest::F.status.equals(RequestStatus::Pending),
            GroupJoinRequest::F.created_at.less_equals(cutoff)
        ))
        .all()
        .await?;

        if expired.is_empty() {
            return Ok(0);
        }

        let removed = rorm::delete!(&mut tx, GroupJoinRequest)
            .condition(and!(
                GroupJoinRequest::F.status.equals(RequestStatus::Pending),
                GroupJoinRequest::F.created_at.less_equals(cutoff)
            ))
            .await?;

        tx.commit().await?;

        let cache = &self.stores.cache;
        for (_, group) in expired.iter().unique_by(|(_, group)| *group) {
            match self.group_managers(*group).await {
                Ok(managers) => {
                    for manager in managers {
                        cache
                            .invalidate(&keys::group_application_list(manager))
                            .await;
                    }
                }
                Err(err) => warn!("Could not resolve managers of {group}: {err}"),
            }
        }

        debug!("Expired {removed} group join requests");
        Ok(removed)
    }
}

fn account_entry(account: Account) -> AccountEntry {
    AccountEntry {
        uuid: account.uuid,
        username: account.username,
        display_name: account.display_name,
        avatar_url: account.avatar_url,
    }
}

fn friend_request_entry(request: FriendRequest) -> FriendRequestEntry {
    FriendRequestEntry {
        uuid: request.uuid,
        from: *request.from.key(),
        to: *request.to.key(),
        message: request.message,
        created_at: DateTime::from_utc(request.created_at, Utc),
    }
}

fn group_entry(group: Group) -> GroupEntry {
    GroupEntry {
        uuid: group.uuid,
        name: group.name,
        owner: *group.owner.key(),
        created_at: DateTime::from_utc(group.created_at, Utc),
    }
}

fn member_entry(member: GroupMember) -> GroupMemberEntry {
    GroupMemberEntry {
        member: *member.member.key(),
        role: member.role,
        joined_at: DateTime::from_utc(member.joined_at, Utc),
    }
}

fn join_request_entry(request: GroupJoinRequest) -> GroupJoinRequestEntry {
    GroupJoinRequestEntry {
        uuid: request.uuid,
        applicant: *request.applicant.key(),
        group: *request.group.key(),
        message: request.message,
        created_at: DateTime::from_utc(request.created_at, Utc),
    }
}
