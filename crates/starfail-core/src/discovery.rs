//! Discovery (C2): enumerate candidate interfaces, classify each into a
//! [`MemberClass`], emit/retire [`Member`] records.
//!
//! Real interface presence comes from `/sys/class/net/*/operstate`,
//! matching the teacher hardware scanner's approach of reading sysfs
//! directly rather than shelling to `ip link show` and parsing text.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::MemberSpec;
use crate::error::DiscoveryError;
use crate::event::{Event, EventType};
use crate::member::{Member, MemberClass};

const CLASSIFY_DEADLINE: Duration = Duration::from_secs(2);

pub struct Discovery {
    simulate: bool,
    members: HashMap<String, Member>,
}

impl Discovery {
    pub fn new(simulate: bool) -> Self {
        Self {
            simulate,
            members: HashMap::new(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut Member> {
        self.members.get_mut(name)
    }

    /// Reconciles the live member set against `specs`: creates newly
    /// configured/appeared members, retires ones whose stanza was removed
    /// or whose interface disappeared. Returns the [`Event`]s to record.
    pub async fn refresh(&mut self, specs: &[MemberSpec]) -> Vec<Event> {
        let mut events = Vec::new();
        let configured: std::collections::HashSet<&str> =
            specs.iter().filter(|s| s.enabled).map(|s| s.name.as_str()).collect();

        // Retire members whose stanza disappeared or was disabled.
        let to_retire: Vec<String> = self
            .members
            .keys()
            .filter(|name| !configured.contains(name.as_str()))
            .cloned()
            .collect();
        for name in to_retire {
            self.members.remove(&name);
            events.push(Event::new(EventType::Retired).member(name).build(0));
        }

        for spec in specs.iter().filter(|s| s.enabled) {
            if self.members.contains_key(&spec.name) {
                continue;
            }
            if !self.simulate && !interface_exists(&spec.iface) {
                continue;
            }
            let class = match spec.class {
                Some(c) => c,
                None => match self.classify(&spec.iface).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(member = %spec.name, error = %e, "classification failed, defaulting to generic");
                        MemberClass::Generic
                    }
                },
            };
            let mut member = Member::new(spec.name.clone(), class, spec.iface.clone());
            member.weight = spec.weight;
            member.class_params = spec.class_params.clone();
            member.eligible = true;
            events.push(
                Event::new(EventType::Discovered)
                    .member(member.name.clone())
                    .payload(serde_json::json!({"class": class.as_str()}))
                    .build(0),
            );
            self.members.insert(member.name.clone(), member);
        }

        // Interfaces that vanished underneath an existing member are
        // marked ineligible rather than retired outright — a re-plugged
        // cable should not force a brand-new Member identity.
        if !self.simulate {
            for member in self.members.values_mut() {
                if !interface_exists(&member.iface) {
                    member.eligible = false;
                }
            }
        }

        events
    }

    async fn classify(&self, iface: &str) -> Result<MemberClass, DiscoveryError> {
        tokio::time::timeout(CLASSIFY_DEADLINE, classify_interface(iface))
            .await
            .map_err(|_| DiscoveryError::ProbeTimeout {
                member: iface.to_string(),
            })?
    }
}

/// Reads `/sys/class/net/<iface>/operstate`; missing means the interface
/// does not currently exist under this name.
fn interface_exists(iface: &str) -> bool {
    std::path::Path::new("/sys/class/net").join(iface).exists()
}

/// Class-specific heuristics: a Starlink dish keeps a fixed gateway
/// address (192.168.100.1) reachable on its WAN interface; a cellular
/// modem interface is typically named `wwan*`; a Wi-Fi STA interface
/// shows up under `/sys/class/net/<iface>/wireless`; anything else is
/// `Lan`/`Generic`, disambiguated by a VPN naming convention.
async fn classify_interface(iface: &str) -> Result<MemberClass, DiscoveryError> {
    let base = std::path::Path::new("/sys/class/net").join(iface);
    if !base.exists() {
        return Err(DiscoveryError::InterfaceNotFound(iface.to_string()));
    }
    if iface.starts_with("wwan") || iface.starts_with("ppp") {
        return Ok(MemberClass::Cellular);
    }
    if iface.starts_with("wg") || iface.starts_with("tun") || iface.starts_with("tap") {
        return Ok(MemberClass::Vpn);
    }
    if base.join("wireless").exists() || iface.starts_with("wl") {
        return Ok(MemberClass::WiFi);
    }
    if reaches_starlink_gateway(iface).await {
        return Ok(MemberClass::Starlink);
    }
    Ok(MemberClass::Lan)
}

async fn reaches_starlink_gateway(_iface: &str) -> bool {
    // A real deployment binds a short-deadline probe to the interface and
    // checks for 192.168.100.1 on port 9201 (the dish's gRPC endpoint).
    false
}
