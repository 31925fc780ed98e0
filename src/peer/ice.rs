use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use tracing::{info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// Конвертация серверов из конфига в RTCIceServer
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Тип кандидата по полю `typ` из SDP-строки
pub fn candidate_kind(candidate: &IceCandidate) -> &'static str {
    let mut fields = candidate.candidate.split_whitespace();
    while let Some(field) = fields.next() {
        if field == "typ" {
            return match fields.next() {
                Some("host") => "host",
                Some("srflx") => "srflx",
                Some("prflx") => "prflx",
                Some("relay") => "relay",
                _ => "unknown",
            };
        }
    }
    "unknown"
}

/// Счётчики кандидатов по типам
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTally {
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
    pub unknown: usize,
}

impl CandidateTally {
    pub fn record(&mut self, candidate: &IceCandidate) {
        match candidate_kind(candidate) {
            "host" => self.host += 1,
            "srflx" => self.srflx += 1,
            "prflx" => self.prflx += 1,
            "relay" => self.relay += 1,
            _ => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.prflx + self.relay + self.unknown
    }
}

pub fn analyze_candidates(label: &str, tally: &CandidateTally) {
    info!(
        "Candidate analysis ({label}): {} host, {} srflx, {} prflx, {} relay",
        tally.host, tally.srflx, tally.prflx, tally.relay
    );

    if tally.srflx == 0 && tally.relay == 0 {
        warn!("No server-reflexive {label} candidates found! Connection through NAT may fail.");
    }
}
