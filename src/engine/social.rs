//! Feed, direct messages, follows, reactions and group chats.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::{GameEvent, SessionEngine};
use crate::types::{
    normalize_address, DirectMessage, GroupChat, GroupMessage, Post, PostKind, Reaction,
    Rejection,
};

/// Trim and cap message text at `max` characters.
fn clean_content(content: &str, max: usize) -> Result<String, Rejection> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Rejection::EmptyContent);
    }
    Ok(trimmed.chars().take(max).collect())
}

impl SessionEngine {
    /// Publish a post to the session feed.
    pub fn post_to_feed(&mut self, agent_id: &str, content: &str) -> Result<Post, Rejection> {
        let id = normalize_address(agent_id);
        let content = clean_content(content, self.config.max_post_length)?;
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&id)?;

        let post = Post {
            id: uuid::Uuid::new_v4().to_string(),
            author: id.clone(),
            kind: PostKind::Agent,
            content,
            day: session.current_day,
            created_at: Utc::now(),
            reactions: BTreeMap::new(),
        };
        session.feed.push(post.clone());
        debug!(agent_id = %id, post_id = %post.id, day = post.day, "Post created");
        self.emit(GameEvent::PostCreated { post: post.clone() });
        Ok(post)
    }

    pub fn send_direct_message(
        &mut self,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<DirectMessage, Rejection> {
        let from = normalize_address(from);
        let to = normalize_address(to);
        if from == to {
            return Err(Rejection::SelfTarget);
        }
        let content = clean_content(content, self.config.max_post_length)?;
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&from)?;
        session.require_agent(&to)?;

        let message = DirectMessage {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            content,
            day: session.current_day,
            created_at: Utc::now(),
        };
        session.direct_messages.push(message.clone());
        debug!(from = %message.from, to = %message.to, "Direct message sent");
        self.emit(GameEvent::direct_message(&message));
        Ok(message)
    }

    /// Follow `target`. Returns `false` if already following.
    pub fn follow(&mut self, follower: &str, target: &str) -> Result<bool, Rejection> {
        self.set_following(follower, target, true)
    }

    /// Unfollow `target`. Returns `false` if not following.
    pub fn unfollow(&mut self, follower: &str, target: &str) -> Result<bool, Rejection> {
        self.set_following(follower, target, false)
    }

    fn set_following(
        &mut self,
        follower: &str,
        target: &str,
        following: bool,
    ) -> Result<bool, Rejection> {
        let follower = normalize_address(follower);
        let target = normalize_address(target);
        if follower == target {
            return Err(Rejection::SelfTarget);
        }
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&target)?;
        let agent = session.agent_mut(&follower)?;

        let changed = if following {
            agent.following.insert(target.clone())
        } else {
            agent.following.remove(&target)
        };
        if changed {
            self.emit(GameEvent::FollowChanged { follower, target, following });
        }
        Ok(changed)
    }

    /// Set (or replace) this agent's reaction on a post.
    pub fn react_to_post(
        &mut self,
        agent_id: &str,
        post_id: &str,
        reaction: Reaction,
    ) -> Result<Post, Rejection> {
        let id = normalize_address(agent_id);
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&id)?;
        let post = session
            .feed
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| Rejection::PostNotFound(post_id.to_string()))?;

        post.reactions.insert(id.clone(), reaction);
        let post = post.clone();
        self.emit(GameEvent::ReactionAdded {
            post_id: post.id.clone(),
            agent_id: id,
            reaction,
        });
        Ok(post)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Create a group with the creator plus `members`. Unknown invitees are
    /// rejected.
    pub fn create_group(
        &mut self,
        creator: &str,
        name: &str,
        members: &[String],
    ) -> Result<GroupChat, Rejection> {
        let creator = normalize_address(creator);
        let name = clean_content(name, self.config.max_post_length)?;
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&creator)?;

        let mut set = BTreeSet::from([creator.clone()]);
        for member in members {
            let member = normalize_address(member);
            session.require_agent(&member)?;
            set.insert(member);
        }

        let group = GroupChat {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            creator,
            members: set,
            messages: Vec::new(),
        };
        session.groups.insert(group.id.clone(), group.clone());
        info!(group_id = %group.id, members = group.members.len(), "Group created");
        self.emit(GameEvent::GroupCreated {
            group_id: group.id.clone(),
            name: group.name.clone(),
            members: group.members.iter().cloned().collect(),
        });
        Ok(group)
    }

    pub fn send_group_message(
        &mut self,
        agent_id: &str,
        group_id: &str,
        content: &str,
    ) -> Result<GroupMessage, Rejection> {
        let id = normalize_address(agent_id);
        let content = clean_content(content, self.config.max_post_length)?;
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        let day = session.current_day;
        let group = session
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Rejection::GroupNotFound(group_id.to_string()))?;
        if !group.members.contains(&id) {
            return Err(Rejection::NotGroupMember(id));
        }

        let message = GroupMessage {
            id: uuid::Uuid::new_v4().to_string(),
            from: id,
            content,
            day,
            created_at: Utc::now(),
        };
        group.messages.push(message.clone());
        self.emit(GameEvent::group_message(group_id, &message));
        Ok(message)
    }

    pub fn leave_group(&mut self, agent_id: &str, group_id: &str) -> Result<(), Rejection> {
        let id = normalize_address(agent_id);
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        let group = session
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Rejection::GroupNotFound(group_id.to_string()))?;
        if !group.members.remove(&id) {
            return Err(Rejection::NotGroupMember(id));
        }
        self.emit(GameEvent::GroupMembershipChanged {
            group_id: group_id.to_string(),
            agent_id: id,
            joined: false,
        });
        Ok(())
    }

    /// Add `invitee` to a group. Only current members may invite.
    pub fn invite_to_group(
        &mut self,
        inviter: &str,
        group_id: &str,
        invitee: &str,
    ) -> Result<(), Rejection> {
        let inviter = normalize_address(inviter);
        let invitee = normalize_address(invitee);
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.require_agent(&invitee)?;
        let group = session
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Rejection::GroupNotFound(group_id.to_string()))?;
        if !group.members.contains(&inviter) {
            return Err(Rejection::NotGroupMember(inviter));
        }
        if !group.members.insert(invitee.clone()) {
            return Err(Rejection::AlreadyGroupMember(invitee));
        }
        self.emit(GameEvent::GroupMembershipChanged {
            group_id: group_id.to_string(),
            agent_id: invitee,
            joined: true,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::tests::{agent, recorder, started_engine, test_config};
    use super::*;
    use crate::types::AgentType;

    #[test]
    fn test_follow_is_idempotent() {
        let mut engine = started_engine();
        assert_eq!(engine.follow(&agent(0), &agent(1)), Ok(true));
        assert_eq!(engine.follow(&agent(0), &agent(1)), Ok(false));
        assert_eq!(engine.unfollow(&agent(0), &agent(1)), Ok(true));
        assert_eq!(engine.unfollow(&agent(0), &agent(1)), Ok(false));
        assert_eq!(engine.follow(&agent(0), &agent(0)), Err(Rejection::SelfTarget));
    }

    #[test]
    fn test_post_truncated_to_max_length() {
        let mut engine = started_engine();
        let long = "x".repeat(500);
        let post = engine.post_to_feed(&agent(0), &long).unwrap();
        assert_eq!(post.content.chars().count(), 280);
        assert_eq!(post.day, 1);
        assert_eq!(post.kind, PostKind::Agent);
        assert!(matches!(engine.post_to_feed(&agent(0), "   "), Err(Rejection::EmptyContent)));
    }

    #[test]
    fn test_post_requires_roster_membership() {
        let mut engine = started_engine();
        assert!(matches!(
            engine.post_to_feed(&agent(77), "hello"),
            Err(Rejection::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_social_ops_need_active_game() {
        let mut engine = SessionEngine::new(test_config(), super::super::events::silent());
        engine.join_lobby(&agent(0), "a", AgentType::Ai).unwrap();
        assert!(matches!(engine.post_to_feed(&agent(0), "hi"), Err(Rejection::NoActiveGame)));
    }

    #[test]
    fn test_reaction_replaces_previous() {
        let mut engine = started_engine();
        let post = engine.post_to_feed(&agent(0), "buy YES").unwrap();
        engine.react_to_post(&agent(1), &post.id, Reaction::Like).unwrap();
        let post = engine.react_to_post(&agent(1), &post.id, Reaction::Dislike).unwrap();
        assert_eq!(post.likes(), 0);
        assert_eq!(post.dislikes(), 1);
        assert!(matches!(
            engine.react_to_post(&agent(1), "nope", Reaction::Like),
            Err(Rejection::PostNotFound(_))
        ));
    }

    #[test]
    fn test_direct_message_stored_and_broadcast() {
        let (broadcaster, seen) = recorder();
        let mut engine = SessionEngine::new(test_config(), broadcaster);
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        engine.send_direct_message(&agent(0), &agent(1), "psst").unwrap();

        let view = engine.agent_view(&agent(1)).unwrap();
        assert!(view.direct_messages.iter().any(|m| m.content == "psst"));
        assert!(seen.lock().unwrap().iter().any(
            |e| matches!(e, GameEvent::DirectMessageSent { to, .. } if *to == agent(1))
        ));
        assert!(matches!(
            engine.send_direct_message(&agent(0), &agent(0), "me"),
            Err(Rejection::SelfTarget)
        ));
    }

    #[test]
    fn test_group_membership_gating() {
        let mut engine = started_engine();
        let group = engine.create_group(&agent(0), "cabal", &[agent(1)]).unwrap();
        assert_eq!(group.members.len(), 2);

        assert!(matches!(
            engine.send_group_message(&agent(2), &group.id, "let me in"),
            Err(Rejection::NotGroupMember(_))
        ));
        assert!(matches!(
            engine.invite_to_group(&agent(2), &group.id, &agent(3)),
            Err(Rejection::NotGroupMember(_))
        ));

        engine.invite_to_group(&agent(1), &group.id, &agent(2)).unwrap();
        assert!(matches!(
            engine.invite_to_group(&agent(1), &group.id, &agent(2)),
            Err(Rejection::AlreadyGroupMember(_))
        ));
        engine.send_group_message(&agent(2), &group.id, "thanks").unwrap();

        engine.leave_group(&agent(2), &group.id).unwrap();
        assert!(engine.send_group_message(&agent(2), &group.id, "bye").is_err());
        let stored = engine.session().unwrap().group(&group.id).unwrap();
        assert_eq!(stored.messages.len(), 1);
    }

    #[test]
    fn test_create_group_rejects_unknown_invitee() {
        let mut engine = started_engine();
        assert!(matches!(
            engine.create_group(&agent(0), "g", &[agent(99)]),
            Err(Rejection::UnknownAgent(_))
        ));
        assert!(engine.agent_view(&agent(0)).unwrap().groups.is_empty());
    }
}
