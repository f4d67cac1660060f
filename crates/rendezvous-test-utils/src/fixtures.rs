//! Test fixtures: configuration, waiting requests and client frames.

use common::signaling::{
    ClientMessage, IceCandidate, MatchFilters, SessionDescription, UserProfile, WaitingRequest,
};
use common::types::{ConnectionId, RoomId};
use rendezvous_service::config::Config;
use std::collections::HashMap;

/// Service configuration with the cheapest password hashing.
pub fn test_config() -> Config {
    let vars = HashMap::from([("RV_PASSWORD_HASH_COST".to_string(), "4".to_string())]);
    Config::from_vars(&vars).expect("test config must be valid")
}

/// Builder for `waiting` payloads.
#[derive(Debug, Clone, Default)]
pub struct WaitingRequestBuilder {
    request: WaitingRequest,
}

impl WaitingRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interests(mut self, interests: &[&str]) -> Self {
        self.request.interests = interests.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.request.device_id = device_id.to_string();
        self
    }

    pub fn profile(mut self, gender: &str, country: &str) -> Self {
        self.request.user_profile = UserProfile {
            gender: Some(gender.to_string()),
            country: Some(country.to_string()),
            avatar_url: None,
        };
        self
    }

    pub fn wants_gender(mut self, genders: &[&str]) -> Self {
        self.request.filters = MatchFilters {
            gender: genders.iter().map(|s| (*s).to_string()).collect(),
            countries: self.request.filters.countries,
        };
        self
    }

    pub fn wants_country(mut self, countries: &[&str]) -> Self {
        self.request.filters.countries = countries.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn build(self) -> WaitingRequest {
        self.request
    }
}

/// Encode a client message as a text frame.
pub fn frame(message: &ClientMessage) -> String {
    serde_json::to_string(message).expect("client message must encode")
}

pub fn waiting_frame(request: WaitingRequest) -> String {
    frame(&ClientMessage::Waiting(request))
}

pub fn offer_frame(to: &ConnectionId, sdp: &str) -> String {
    frame(&ClientMessage::Offer {
        offer: SessionDescription::offer(sdp),
        to: to.to_string(),
        room_id: None,
    })
}

pub fn answer_frame(to: &ConnectionId, sdp: &str) -> String {
    frame(&ClientMessage::Answer {
        answer: SessionDescription::answer(sdp),
        to: to.to_string(),
        room_id: None,
    })
}

pub fn ice_frame(to: &ConnectionId, candidate: &str) -> String {
    frame(&ClientMessage::IceCandidate {
        candidate: IceCandidate::new(candidate),
        to: to.to_string(),
        room_id: None,
    })
}

/// Offer addressed to a room member by account id.
pub fn room_offer_frame(room_id: &RoomId, to_account: &str, sdp: &str) -> String {
    frame(&ClientMessage::Offer {
        offer: SessionDescription::offer(sdp),
        to: to_account.to_string(),
        room_id: Some(room_id.clone()),
    })
}
