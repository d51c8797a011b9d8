//! Consent handshake, call lifecycle and WebRTC relay.
//!
//! Offers, answers and candidates are opaque to the server: they are checked
//! for a target, stamped with the sender and forwarded.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{debug, info};
use vicinity_core::protocol::{
    now_ms, CallInitiateData, CallInitiatePayload, ConnectRequestData, ConnectRequestPayload,
    ConnectResponseData, ConnectResponsePayload, IcePayload, IceRelayData, SdpPayload, SdpRelayData,
    SyncData, SyncPayload,
};
use vicinity_core::{CallId, OutboundEvent, RouteError, VehicleId};

use super::{Hub, Reach};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SyncKind {
    Disconnect,
    EndCall,
}

impl SyncKind {
    fn default_reason(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::EndCall => "ended",
        }
    }
}

impl Hub {
    pub(super) fn on_connect_request(
        &mut self,
        requester: &VehicleId,
        payload: ConnectRequestPayload,
    ) -> Result<(), RouteError> {
        let event = OutboundEvent::ConnectRequest(ConnectRequestData {
            requester_id: requester.clone(),
            target_id: payload.target_id.clone(),
            purpose: payload.purpose.clone(),
            timestamp: now_ms(),
        });
        self.relay(&payload.target_id, &event)?;
        self.consents
            .request(requester, &payload.target_id, payload.purpose, Utc::now());
        debug!(requester = %requester, target = %payload.target_id, "connect request pending");
        Ok(())
    }

    /// Only the target of a pending request may answer it, and only once.
    pub(super) fn on_connect_response(
        &mut self,
        responder: &VehicleId,
        payload: ConnectResponsePayload,
    ) -> Result<(), RouteError> {
        if self
            .consents
            .respond(&payload.requester_id, responder)
            .is_none()
        {
            return Err(RouteError::NoPendingRequest {
                requester: payload.requester_id.to_string(),
                target: responder.to_string(),
            });
        }

        let event = OutboundEvent::ConnectResponse(ConnectResponseData {
            requester_id: payload.requester_id.clone(),
            target_id: responder.clone(),
            approved: payload.approved,
            reason: payload.reason.clone(),
            timestamp: now_ms(),
        });
        if self.deliver(&payload.requester_id, &event) == Reach::Unreachable {
            debug!(requester = %payload.requester_id, "requester gone before response");
        }

        if !payload.approved {
            let reason = payload.reason.as_deref().unwrap_or("declined");
            let ended = self
                .calls
                .end_ringing_between(&payload.requester_id, responder, reason, Utc::now());
            self.record_call_ends(&ended, reason);
        }
        Ok(())
    }

    pub(super) fn on_call_initiate(
        &mut self,
        caller: &VehicleId,
        payload: CallInitiatePayload,
    ) -> Result<(), RouteError> {
        let callee = payload.callee_id;
        if !self.is_reachable(&callee) {
            return Err(RouteError::TargetOffline(callee.to_string()));
        }
        let initiated = self.calls.initiate(caller, &callee, Utc::now());
        let event = OutboundEvent::CallInitiate(CallInitiateData {
            call_id: initiated.call_id.clone(),
            caller_id: caller.clone(),
            callee_id: callee.clone(),
        });
        if let Err(err) = self.relay(&callee, &event) {
            // The callee never heard it ring; a reused call keeps its state.
            if initiated.created {
                self.calls.discard(&initiated.call_id);
            }
            return Err(err);
        }

        if initiated.created {
            info!(call_id = %initiated.call_id, caller = %caller, callee = %callee, "call ringing");
            self.record_event(
                "call_started",
                Some(caller),
                json!({"callId": initiated.call_id, "calleeId": callee}),
            );
        }
        Ok(())
    }

    pub(super) fn on_offer(&mut self, from: &VehicleId, payload: SdpPayload) -> Result<(), RouteError> {
        let target = payload.target_id.clone();
        let event = OutboundEvent::WebrtcOffer(SdpRelayData::from_payload(from, payload));
        self.relay(&target, &event).map(drop)
    }

    /// Relays the answer and moves the matching ringing call to active.
    pub(super) fn on_answer(&mut self, from: &VehicleId, payload: SdpPayload) -> Result<(), RouteError> {
        let target = payload.target_id.clone();
        let event = OutboundEvent::WebrtcAnswer(SdpRelayData::from_payload(from, payload));
        self.relay(&target, &event)?;

        if let Some(call) = self.calls.answer(from, &target, Utc::now()) {
            let call_id = call.id.clone();
            info!(call_id = %call_id, caller = %target, callee = %from, "call active");
            self.record_event("call_answered", Some(from), json!({"callId": call_id}));
        }
        Ok(())
    }

    pub(super) fn on_ice_candidate(&mut self, from: &VehicleId, payload: IcePayload) -> Result<(), RouteError> {
        let target = payload.target_id.clone();
        let event = OutboundEvent::IceCandidate(IceRelayData::from_payload(from, payload));
        self.relay(&target, &event).map(drop)
    }

    /// Ends live calls between the pair, then forwards the notice.
    pub(super) fn on_sync(
        &mut self,
        from: &VehicleId,
        payload: SyncPayload,
        kind: SyncKind,
    ) -> Result<(), RouteError> {
        let reason = payload
            .reason
            .unwrap_or_else(|| kind.default_reason().to_owned());
        let ended = self
            .calls
            .end_between(from, &payload.to_vehicle_id, &reason, Utc::now());
        self.record_call_ends(&ended, &reason);

        let data = SyncData {
            from_vehicle_id: from.clone(),
            to_vehicle_id: payload.to_vehicle_id.clone(),
            reason,
            timestamp: payload.timestamp.unwrap_or_else(now_ms),
        };
        let event = match kind {
            SyncKind::Disconnect => OutboundEvent::SyncDisconnect(data),
            SyncKind::EndCall => OutboundEvent::SyncEndCall(data),
        };
        self.relay(&payload.to_vehicle_id, &event).map(drop)
    }

    /// End every call of a departing vehicle and tell the other party.
    pub(super) fn end_calls_for(&mut self, vehicle_id: &VehicleId, reason: &str) {
        let ended = self.calls.end_for_vehicle(vehicle_id, reason, Utc::now());
        for call_id in &ended {
            let Some(call) = self.calls.get(call_id) else {
                continue;
            };
            let peer = if call.caller_id == *vehicle_id {
                call.callee_id.clone()
            } else {
                call.caller_id.clone()
            };
            let notice = OutboundEvent::SyncEndCall(SyncData {
                from_vehicle_id: vehicle_id.clone(),
                to_vehicle_id: peer.clone(),
                reason: reason.to_owned(),
                timestamp: now_ms(),
            });
            self.deliver(&peer, &notice);
        }
        self.record_call_ends(&ended, reason);
    }

    /// End calls nobody answered in time and tell both parties.
    pub(super) fn expire_ringing_calls(&mut self, timeout: ChronoDuration, now: DateTime<Utc>) {
        let expired = self.calls.expire_ringing(timeout, "timeout", now);
        for call_id in &expired {
            let Some(call) = self.calls.get(call_id) else {
                continue;
            };
            let (caller, callee) = (call.caller_id.clone(), call.callee_id.clone());
            for (from, to) in [(&caller, &callee), (&callee, &caller)] {
                let notice = OutboundEvent::SyncEndCall(SyncData {
                    from_vehicle_id: from.clone(),
                    to_vehicle_id: to.clone(),
                    reason: "timeout".to_owned(),
                    timestamp: now_ms(),
                });
                self.deliver(to, &notice);
            }
        }
        self.record_call_ends(&expired, "timeout");
    }

    fn record_call_ends(&self, ended: &[CallId], reason: &str) {
        for call_id in ended {
            let vehicle = self.calls.get(call_id).map(|c| c.caller_id.clone());
            info!(call_id = %call_id, reason, "call ended");
            self.record_event(
                "call_ended",
                vehicle.as_ref(),
                json!({"callId": call_id, "reason": reason}),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use vicinity_core::calls::CallState;
    use vicinity_core::VehicleId;

    use super::super::test_support::{relaxed_config, Client, Harness};
    use crate::fanout::{Fanout, InProcessChannel};

    fn call_state(h: &Harness, caller: &str, callee: &str) -> Option<CallState> {
        let (caller, callee) = (VehicleId::from_raw(caller), VehicleId::from_raw(callee));
        h.hub
            .calls
            .iter()
            .find(|c| c.caller_id == caller && c.callee_id == callee)
            .map(|c| c.state)
    }

    fn pair(h: &mut Harness) -> (Client, Client) {
        let mut a = h.register("car-a");
        let b = h.register("car-b");
        a.drain();
        (a, b)
    }

    fn request(from: &str, to: &str) -> Value {
        json!({"event": "connect_request", "data": {"requesterId": from, "targetId": to, "purpose": "convoy"}})
    }

    fn response(requester: &str, target: &str, approved: bool) -> Value {
        json!({"event": "connect_response", "data": {"requesterId": requester, "targetId": target, "approved": approved}})
    }

    #[test]
    fn consent_round_trip() {
        let mut h = Harness::new(relaxed_config());
        let (mut a, mut b) = pair(&mut h);

        h.send(&a, request("car-a", "car-b"));
        let forwarded = b.events("connect_request");
        assert_eq!(forwarded[0]["requesterId"], "car-a");
        assert_eq!(forwarded[0]["purpose"], "convoy");

        h.send(&b, response("car-a", "car-b", true));
        let answer = a.events("connect_response");
        assert_eq!(answer[0]["approved"], true);
        assert_eq!(answer[0]["targetId"], "car-b");

        // The request was consumed.
        h.send(&b, response("car-a", "car-b", true));
        let errors = b.events("error");
        assert_eq!(errors[0]["code"], "no_pending_request");
    }

    #[test]
    fn response_without_request_is_rejected() {
        let mut h = Harness::new(relaxed_config());
        let (_a, mut b) = pair(&mut h);
        h.send(&b, response("car-a", "car-b", true));
        assert_eq!(b.events("error")[0]["code"], "no_pending_request");
    }

    #[test]
    fn only_the_target_can_respond() {
        let mut h = Harness::new(relaxed_config());
        let (mut a, _b) = pair(&mut h);
        h.send(&a, request("car-a", "car-b"));
        h.send(&a, response("car-a", "car-b", true));
        let errors = a.events("error");
        assert_eq!(errors[0]["code"], "validation_error");
        assert!(h.hub.consents.contains(&VehicleId::from_raw("car-a"), &VehicleId::from_raw("car-b")));
    }

    #[test]
    fn request_to_offline_target_fails() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        h.send(&a, request("car-a", "ghost"));
        assert_eq!(a.events("error")[0]["code"], "target_offline");
        assert!(h.hub.consents.is_empty());
    }

    #[test]
    fn call_flow_ringing_active_ended() {
        let mut h = Harness::new(relaxed_config());
        let (mut a, mut b) = pair(&mut h);

        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        let ringing = b.events("call_initiate");
        assert!(ringing[0]["callId"].as_str().unwrap().starts_with("call_"));
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ringing));

        h.send(&a, json!({"event": "webrtc_offer", "data": {"targetId": "car-b", "sdp": {"type": "offer", "sdp": "v=0"}, "callId": ringing[0]["callId"]}}));
        let offer = b.events("webrtc_offer");
        assert_eq!(offer[0]["fromVehicleId"], "car-a");
        assert_eq!(offer[0]["sdp"]["type"], "offer");
        assert_eq!(offer[0]["callId"], ringing[0]["callId"]);

        h.send(&b, json!({"event": "webrtc_answer", "data": {"targetId": "car-a", "sdp": {"type": "answer"}}}));
        assert_eq!(a.events("webrtc_answer")[0]["fromVehicleId"], "car-b");
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Active));

        h.send(&a, json!({"event": "ice_candidate", "data": {"targetId": "car-b", "candidate": {"candidate": "udp 1"}}}));
        assert_eq!(b.events("ice_candidate")[0]["candidate"]["candidate"], "udp 1");

        h.send(&b, json!({"event": "sync_end_call", "data": {"fromVehicleId": "car-b", "toVehicleId": "car-a"}}));
        let end = a.events("sync_end_call");
        assert_eq!(end[0]["reason"], "ended");
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ended));
        assert_eq!(h.hub.stats().live_calls, 0);
    }

    #[test]
    fn repeated_initiate_reuses_the_ringing_call() {
        let mut h = Harness::new(relaxed_config());
        let (a, mut b) = pair(&mut h);
        let init = json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}});
        h.send(&a, init.clone());
        h.send(&a, init);
        let ringing = b.events("call_initiate");
        assert_eq!(ringing.len(), 2);
        assert_eq!(ringing[0]["callId"], ringing[1]["callId"]);
        assert_eq!(h.hub.calls.len(), 1);
    }

    #[test]
    fn declined_consent_ends_ringing_call() {
        let mut h = Harness::new(relaxed_config());
        let (a, b) = pair(&mut h);
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        h.send(&a, request("car-a", "car-b"));
        h.send(&b, response("car-a", "car-b", false));
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ended));
        let call = h.hub.calls.iter().next().unwrap();
        assert_eq!(call.end_reason.as_deref(), Some("declined"));
    }

    #[test]
    fn call_to_offline_callee_creates_nothing() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "ghost"}}));
        assert_eq!(a.events("error")[0]["code"], "target_offline");
        assert!(h.hub.calls.is_empty());
    }

    #[test]
    fn relay_to_offline_target_fails() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        h.send(&a, json!({"event": "ice_candidate", "data": {"targetId": "ghost", "candidate": {}}}));
        assert_eq!(a.events("error")[0]["code"], "target_offline");
    }

    #[test]
    fn relayed_offer_carries_only_the_real_sender() {
        let mut h = Harness::new(relaxed_config());
        let (a, mut b) = pair(&mut h);
        h.send(
            &a,
            json!({"event": "webrtc_offer", "data": {"targetId": "car-b", "sdp": "v=0", "fromVehicleId": "car-c"}}),
        );
        let offer = b.events("webrtc_offer");
        assert_eq!(offer.len(), 1);
        assert_eq!(offer[0]["fromVehicleId"], "car-a");
        assert_eq!(offer[0]["sdp"], "v=0");

        h.send(
            &a,
            json!({"event": "ice_candidate", "data": {"targetId": "car-b", "candidate": {}, "fromVehicleId": "car-c"}}),
        );
        assert_eq!(b.events("ice_candidate")[0]["fromVehicleId"], "car-a");
    }

    #[test]
    fn failed_ring_leaves_no_call_behind() {
        let mut h = Harness::new(relaxed_config());
        let (mut a, mut b) = pair(&mut h);
        while h.connections.send(&b.id, Arc::from("{}")) {}

        let init = json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}});
        h.send(&a, init.clone());
        assert_eq!(a.events("error")[0]["code"], "target_offline");
        assert!(h.hub.calls.is_empty());

        // Once the queue drains the next attempt rings normally.
        b.drain();
        h.send(&a, init);
        assert_eq!(b.events("call_initiate").len(), 1);
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ringing));
    }

    #[test]
    fn unanswered_call_times_out_on_sweep() {
        let mut config = relaxed_config();
        config.ring_timeout = Some(ChronoDuration::seconds(30));
        let mut h = Harness::new(config);
        let (mut a, mut b) = pair(&mut h);
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        b.drain();

        h.hub.sweep(std::time::Instant::now(), Utc::now() + ChronoDuration::seconds(31));
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ended));
        let to_callee = b.events("sync_end_call");
        assert_eq!(to_callee[0]["fromVehicleId"], "car-a");
        assert_eq!(to_callee[0]["reason"], "timeout");
        assert_eq!(a.events("sync_end_call")[0]["fromVehicleId"], "car-b");

        // The expired call is not reused.
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        assert_eq!(h.hub.stats().live_calls, 1);
        assert_eq!(h.hub.calls.len(), 2);
    }

    #[test]
    fn ringing_survives_sweep_without_timeout() {
        let mut config = relaxed_config();
        config.ring_timeout = None;
        let mut h = Harness::new(config);
        let (a, _b) = pair(&mut h);
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        h.hub.sweep(std::time::Instant::now(), Utc::now() + ChronoDuration::days(1));
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ringing));
    }

    #[test]
    fn fanout_does_not_make_unknown_callees_reachable() {
        let mut h = Harness::with_deps(relaxed_config(), |mut deps| {
            deps.fanout = Fanout::new("node-a", Arc::new(InProcessChannel::new(16)));
            deps
        });
        let mut a = h.register("car-a");
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "ghost"}}));
        assert_eq!(a.events("error")[0]["code"], "target_offline");
        assert!(h.hub.calls.is_empty());
    }

    #[test]
    fn disconnect_ends_calls_and_notifies_peer() {
        let mut h = Harness::new(relaxed_config());
        let (a, mut b) = pair(&mut h);
        h.send(&a, json!({"event": "call_initiate", "data": {"callerId": "car-a", "calleeId": "car-b"}}));
        h.send(&b, json!({"event": "webrtc_answer", "data": {"targetId": "car-a", "sdp": "v=0"}}));
        b.drain();

        h.disconnect(&a);
        let notice = b.events("sync_end_call");
        assert_eq!(notice[0]["fromVehicleId"], "car-a");
        assert_eq!(notice[0]["reason"], "disconnect");
        assert_eq!(call_state(&h, "car-a", "car-b"), Some(CallState::Ended));
    }
}
