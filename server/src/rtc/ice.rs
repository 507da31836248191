//! Trickle ICE candidate handling.
//!
//! Clients send candidate lines as they discover them, sometimes before the
//! peer session exists; the manager buffers those and flushes them on
//! session creation. Lines arrive in several dialects (`candidate:…`,
//! `a=candidate:…`) and are normalized before being handed to the agent.

use std::fmt;

use super::error::RtcError;

/// Candidate types the signaling layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    Relay,
    PeerReflexive,
}

impl CandidateKind {
    fn parse(token: &str) -> Self {
        match token {
            "srflx" => Self::ServerReflexive,
            "relay" => Self::Relay,
            "prflx" => Self::PeerReflexive,
            // Unknown types degrade to host rather than dropping the line.
            _ => Self::Host,
        }
    }

    const fn token(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::Relay => "relay",
            Self::PeerReflexive => "prflx",
        }
    }
}

/// A parsed remote candidate line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub foundation: String,
    pub component_id: u16,
    pub transport: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub kind: CandidateKind,
}

impl RemoteCandidate {
    /// Parse `[a=]candidate:foundation component transport priority address
    /// port typ <type>`, tolerating trailing extension attributes.
    pub fn parse(line: &str) -> Result<Self, RtcError> {
        let line = line.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let body = line
            .strip_prefix("candidate:")
            .ok_or_else(|| RtcError::Candidate(format!("missing candidate prefix: {line:?}")))?;

        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() < 6 {
            return Err(RtcError::Candidate(format!("too few fields: {body:?}")));
        }

        let component_id = tokens[1]
            .parse()
            .map_err(|_| RtcError::Candidate(format!("bad component id: {:?}", tokens[1])))?;
        let priority = tokens[3]
            .parse()
            .map_err(|_| RtcError::Candidate(format!("bad priority: {:?}", tokens[3])))?;
        let port = tokens[5]
            .parse()
            .map_err(|_| RtcError::Candidate(format!("bad port: {:?}", tokens[5])))?;

        let kind = tokens
            .iter()
            .position(|t| *t == "typ")
            .and_then(|i| tokens.get(i + 1))
            .map_or(CandidateKind::Host, |t| CandidateKind::parse(t));

        Ok(Self {
            foundation: tokens[0].to_string(),
            component_id,
            transport: tokens[2].to_ascii_lowercase(),
            priority,
            address: tokens[4].to_string(),
            port,
            kind,
        })
    }
}

impl fmt::Display for RemoteCandidate {
    /// Canonical form understood by the ICE agent's unmarshaller.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component_id,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.kind.token()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_browser_dialects() {
        for line in [
            "candidate:842163049 1 udp 1677729535 203.0.113.7 46416 typ srflx raddr 0.0.0.0 rport 0",
            "a=candidate:842163049 1 udp 1677729535 203.0.113.7 46416 typ srflx",
        ] {
            let parsed = RemoteCandidate::parse(line).unwrap();
            assert_eq!(parsed.kind, CandidateKind::ServerReflexive);
            assert_eq!(parsed.address, "203.0.113.7");
            assert_eq!(parsed.port, 46416);
            assert_eq!(parsed.component_id, 1);
        }
    }

    #[test]
    fn unknown_type_defaults_to_host() {
        let parsed =
            RemoteCandidate::parse("candidate:1 1 udp 2130706431 192.168.1.4 50000 typ weird")
                .unwrap();
        assert_eq!(parsed.kind, CandidateKind::Host);
    }

    #[test]
    fn missing_typ_defaults_to_host() {
        let parsed =
            RemoteCandidate::parse("candidate:1 1 udp 2130706431 192.168.1.4 50000").unwrap();
        assert_eq!(parsed.kind, CandidateKind::Host);
    }

    #[test]
    fn canonical_round_trip() {
        let line = "candidate:abcd 1 udp 2130706431 192.168.1.4 50000 typ host";
        let parsed = RemoteCandidate::parse(line).unwrap();
        assert_eq!(parsed.to_string(), line);
    }

    #[test]
    fn rejects_garbage() {
        assert!(RemoteCandidate::parse("not a candidate").is_err());
        assert!(RemoteCandidate::parse("candidate:1 1 udp").is_err());
        assert!(RemoteCandidate::parse("candidate:1 x udp 1 192.168.1.4 1 typ host").is_err());
    }
}
