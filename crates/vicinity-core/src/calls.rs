//! Call-session state machine and pending connect-request consent.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, VehicleId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Active,
    Ended,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: CallId,
    pub caller_id: VehicleId,
    pub callee_id: VehicleId,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

impl CallSession {
    pub fn involves(&self, vehicle_id: &VehicleId) -> bool {
        self.caller_id == *vehicle_id || self.callee_id == *vehicle_id
    }

    pub fn is_between(&self, a: &VehicleId, b: &VehicleId) -> bool {
        (self.caller_id == *a && self.callee_id == *b)
            || (self.caller_id == *b && self.callee_id == *a)
    }

    pub fn is_live(&self) -> bool {
        self.state != CallState::Ended
    }

    fn end(&mut self, reason: &str, now: DateTime<Utc>) {
        self.state = CallState::Ended;
        self.ended_at = Some(now);
        self.end_reason = Some(reason.to_owned());
    }
}

/// Outcome of [`CallBook::initiate`].
#[derive(Clone, Debug, PartialEq)]
pub struct Initiated {
    pub call_id: CallId,
    /// `false` when an existing live call between the pair was reused.
    pub created: bool,
}

#[derive(Debug, Default)]
pub struct CallBook {
    calls: HashMap<CallId, CallSession>,
}

impl CallBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ringing `callee`. A live call from the same caller to the same
    /// callee is reused.
    pub fn initiate(&mut self, caller: &VehicleId, callee: &VehicleId, now: DateTime<Utc>) -> Initiated {
        if let Some(existing) = self
            .calls
            .values()
            .find(|c| c.is_live() && c.caller_id == *caller && c.callee_id == *callee)
        {
            return Initiated {
                call_id: existing.id.clone(),
                created: false,
            };
        }

        let call = CallSession {
            id: CallId::new(),
            caller_id: caller.clone(),
            callee_id: callee.clone(),
            state: CallState::Ringing,
            started_at: now,
            answered_at: None,
            ended_at: None,
            end_reason: None,
        };
        let call_id = call.id.clone();
        self.calls.insert(call_id.clone(), call);
        Initiated { call_id, created: true }
    }

    /// `answerer` sent an answer to `target`: the ringing call placed by
    /// `target` to `answerer` becomes active.
    pub fn answer(&mut self, answerer: &VehicleId, target: &VehicleId, now: DateTime<Utc>) -> Option<&CallSession> {
        let call = self.calls.values_mut().find(|c| {
            c.state == CallState::Ringing && c.caller_id == *target && c.callee_id == *answerer
        })?;
        call.state = CallState::Active;
        call.answered_at = Some(now);
        Some(call)
    }

    /// End every live call between `a` and `b`. Returns the ended call ids.
    pub fn end_between(&mut self, a: &VehicleId, b: &VehicleId, reason: &str, now: DateTime<Utc>) -> Vec<CallId> {
        self.end_where(|c| c.is_between(a, b), reason, now)
    }

    /// End only calls that are still ringing between `a` and `b`.
    pub fn end_ringing_between(
        &mut self,
        a: &VehicleId,
        b: &VehicleId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<CallId> {
        self.end_where(|c| c.state == CallState::Ringing && c.is_between(a, b), reason, now)
    }

    /// End every live call that references `vehicle_id`.
    pub fn end_for_vehicle(&mut self, vehicle_id: &VehicleId, reason: &str, now: DateTime<Utc>) -> Vec<CallId> {
        self.end_where(|c| c.involves(vehicle_id), reason, now)
    }

    fn end_where<P>(&mut self, pred: P, reason: &str, now: DateTime<Utc>) -> Vec<CallId>
    where
        P: Fn(&CallSession) -> bool,
    {
        let mut ended = Vec::new();
        for call in self.calls.values_mut() {
            if call.is_live() && pred(call) {
                call.end(reason, now);
                ended.push(call.id.clone());
            }
        }
        ended.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ended
    }

    /// End calls that have been ringing for at least `timeout`.
    pub fn expire_ringing(&mut self, timeout: ChronoDuration, reason: &str, now: DateTime<Utc>) -> Vec<CallId> {
        self.end_where(
            |c| c.state == CallState::Ringing && now - c.started_at >= timeout,
            reason,
            now,
        )
    }

    /// Forget a call that never reached the other party.
    pub fn discard(&mut self, call_id: &CallId) -> Option<CallSession> {
        self.calls.remove(call_id)
    }

    /// Remove ended calls older than `retention`. Returns how many were removed.
    pub fn prune_ended(&mut self, retention: ChronoDuration, now: DateTime<Utc>) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, c| match c.ended_at {
            Some(ended_at) => now - ended_at < retention,
            None => true,
        });
        before - self.calls.len()
    }

    pub fn get(&self, call_id: &CallId) -> Option<&CallSession> {
        self.calls.get(call_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallSession> {
        self.calls.values()
    }

    pub fn live_count(&self) -> usize {
        self.calls.values().filter(|c| c.is_live()).count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingConsent {
    pub requester_id: VehicleId,
    pub target_id: VehicleId,
    pub requested_at: DateTime<Utc>,
    pub purpose: Option<String>,
}

/// Pending connect requests keyed by (requester, target).
#[derive(Debug, Default)]
pub struct ConsentBook {
    pending: HashMap<(VehicleId, VehicleId), PendingConsent>,
}

impl ConsentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. A repeated request refreshes the existing entry.
    pub fn request(
        &mut self,
        requester: &VehicleId,
        target: &VehicleId,
        purpose: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.pending.insert(
            (requester.clone(), target.clone()),
            PendingConsent {
                requester_id: requester.clone(),
                target_id: target.clone(),
                requested_at: now,
                purpose,
            },
        );
    }

    /// Consume the request from `requester` to `target`, if one exists.
    pub fn respond(&mut self, requester: &VehicleId, target: &VehicleId) -> Option<PendingConsent> {
        self.pending.remove(&(requester.clone(), target.clone()))
    }

    pub fn contains(&self, requester: &VehicleId, target: &VehicleId) -> bool {
        self.pending.contains_key(&(requester.clone(), target.clone()))
    }

    /// Drop entries older than `ttl`.
    pub fn prune(&mut self, ttl: ChronoDuration, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| now - p.requested_at < ttl);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(s: &str) -> VehicleId {
        VehicleId::from_raw(s)
    }

    #[test]
    fn ringing_then_active_then_ended() {
        let mut book = CallBook::new();
        let now = Utc::now();
        let init = book.initiate(&vid("a"), &vid("b"), now);
        assert!(init.created);
        assert!(init.call_id.as_str().starts_with("call_"));
        assert_eq!(book.get(&init.call_id).unwrap().state, CallState::Ringing);

        // Answer from the wrong side does nothing.
        assert!(book.answer(&vid("a"), &vid("b"), now).is_none());

        let call = book.answer(&vid("b"), &vid("a"), now).unwrap();
        assert_eq!(call.state, CallState::Active);
        assert!(call.answered_at.is_some());

        let ended = book.end_between(&vid("b"), &vid("a"), "ended", now);
        assert_eq!(ended, vec![init.call_id.clone()]);
        let call = book.get(&init.call_id).unwrap();
        assert_eq!(call.state, CallState::Ended);
        assert_eq!(call.end_reason.as_deref(), Some("ended"));
    }

    #[test]
    fn repeated_initiate_reuses_live_call() {
        let mut book = CallBook::new();
        let now = Utc::now();
        let first = book.initiate(&vid("a"), &vid("b"), now);
        let second = book.initiate(&vid("a"), &vid("b"), now);
        assert!(!second.created);
        assert_eq!(first.call_id, second.call_id);

        book.end_between(&vid("a"), &vid("b"), "ended", now);
        let third = book.initiate(&vid("a"), &vid("b"), now);
        assert!(third.created);
        assert_ne!(third.call_id, first.call_id);
    }

    #[test]
    fn disconnect_ends_every_call_of_vehicle() {
        let mut book = CallBook::new();
        let now = Utc::now();
        book.initiate(&vid("a"), &vid("b"), now);
        book.initiate(&vid("c"), &vid("a"), now);
        book.initiate(&vid("c"), &vid("d"), now);

        let ended = book.end_for_vehicle(&vid("a"), "disconnect", now);
        assert_eq!(ended.len(), 2);
        assert_eq!(book.live_count(), 1);
        assert!(book
            .iter()
            .filter(|c| c.involves(&vid("a")))
            .all(|c| c.end_reason.as_deref() == Some("disconnect")));
    }

    #[test]
    fn decline_only_ends_ringing() {
        let mut book = CallBook::new();
        let now = Utc::now();
        let init = book.initiate(&vid("a"), &vid("b"), now);
        book.answer(&vid("b"), &vid("a"), now);
        assert!(book.end_ringing_between(&vid("a"), &vid("b"), "declined", now).is_empty());
        assert_eq!(book.get(&init.call_id).unwrap().state, CallState::Active);
    }

    #[test]
    fn prune_keeps_recent_and_live_calls() {
        let mut book = CallBook::new();
        let t0 = Utc::now();
        let old = book.initiate(&vid("a"), &vid("b"), t0).call_id;
        book.end_between(&vid("a"), &vid("b"), "ended", t0);
        let live = book.initiate(&vid("c"), &vid("d"), t0).call_id;

        let later = t0 + ChronoDuration::seconds(601);
        assert_eq!(book.prune_ended(ChronoDuration::seconds(600), later), 1);
        assert!(book.get(&old).is_none());
        assert!(book.get(&live).is_some());
    }

    #[test]
    fn only_stale_ringing_calls_expire() {
        let mut book = CallBook::new();
        let t0 = Utc::now();
        let stale = book.initiate(&vid("a"), &vid("b"), t0).call_id;
        let answered = book.initiate(&vid("c"), &vid("d"), t0).call_id;
        book.answer(&vid("d"), &vid("c"), t0);
        let fresh = book
            .initiate(&vid("e"), &vid("f"), t0 + ChronoDuration::seconds(50))
            .call_id;

        let ended = book.expire_ringing(ChronoDuration::seconds(60), "timeout", t0 + ChronoDuration::seconds(61));
        assert_eq!(ended, vec![stale.clone()]);
        assert_eq!(book.get(&stale).unwrap().end_reason.as_deref(), Some("timeout"));
        assert_eq!(book.get(&answered).unwrap().state, CallState::Active);
        assert_eq!(book.get(&fresh).unwrap().state, CallState::Ringing);

        // A fresh initiate between the expired pair starts a new call.
        assert!(book.initiate(&vid("a"), &vid("b"), t0).created);
    }

    #[test]
    fn discard_forgets_the_call() {
        let mut book = CallBook::new();
        let id = book.initiate(&vid("a"), &vid("b"), Utc::now()).call_id;
        assert!(book.discard(&id).is_some());
        assert!(book.is_empty());
        assert!(book.discard(&id).is_none());
    }

    #[test]
    fn consent_request_and_respond() {
        let mut consents = ConsentBook::new();
        let now = Utc::now();
        consents.request(&vid("a"), &vid("b"), Some("convoy".into()), now);
        assert!(consents.contains(&vid("a"), &vid("b")));
        assert!(!consents.contains(&vid("b"), &vid("a")));

        assert!(consents.respond(&vid("b"), &vid("a")).is_none());
        let pending = consents.respond(&vid("a"), &vid("b")).unwrap();
        assert_eq!(pending.purpose.as_deref(), Some("convoy"));
        assert!(consents.is_empty());
        assert!(consents.respond(&vid("a"), &vid("b")).is_none());
    }

    #[test]
    fn consent_prune_by_ttl() {
        let mut consents = ConsentBook::new();
        let t0 = Utc::now();
        consents.request(&vid("a"), &vid("b"), None, t0);
        consents.request(&vid("c"), &vid("d"), None, t0 + ChronoDuration::seconds(50));
        let removed = consents.prune(ChronoDuration::seconds(60), t0 + ChronoDuration::seconds(70));
        assert_eq!(removed, 1);
        assert!(consents.contains(&vid("c"), &vid("d")));
    }
}
