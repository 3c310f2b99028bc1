use crate::config::ClientSettings;
use crate::error::WatchdogError;
use crate::store::SwarmStore;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use swarm_model::WatchdogReport;
use tracing::{debug, info, instrument, warn};

/// Clients without results are forgotten after this much silence.
pub const IDLE_CLIENT_GRACE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    /// Invoked in-process, e.g. by the CLI or an operator's cron entry.
    LocalProcess,
    /// Invoked over a transport that identified the calling peer.
    Peer(IpAddr),
}

/// Capability presented by whoever triggers a watchdog pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTrigger {
    origin: TriggerOrigin,
}

impl WatchdogTrigger {
    pub fn local() -> Self {
        Self {
            origin: TriggerOrigin::LocalProcess,
        }
    }

    pub fn from_peer(addr: IpAddr) -> Self {
        Self {
            origin: TriggerOrigin::Peer(addr),
        }
    }

    pub fn origin(&self) -> TriggerOrigin {
        self.origin
    }

    pub fn is_trusted(&self) -> bool {
        match self.origin {
            TriggerOrigin::LocalProcess => true,
            TriggerOrigin::Peer(IpAddr::V4(addr)) => addr.is_loopback(),
            TriggerOrigin::Peer(IpAddr::V6(addr)) => {
                addr.is_loopback()
                    || addr
                        .to_ipv4_mapped()
                        .map(|v4| v4.is_loopback())
                        .unwrap_or(false)
            }
        }
    }
}

/// Reclaims assignments held by clients that stopped heartbeating, then
/// sweeps orphaned results, idle clients and unused unregistered accounts.
///
/// Safe to call repeatedly: a pass with nothing stale changes nothing.
#[instrument(skip(store, client), fields(origin = ?trigger.origin()))]
pub fn run(
    store: &mut SwarmStore,
    client: &ClientSettings,
    trigger: &WatchdogTrigger,
    now: DateTime<Utc>,
) -> Result<WatchdogReport, WatchdogError> {
    if !trigger.is_trusted() {
        warn!(target: "swarm::watchdog", "rejected trigger from {:?}", trigger.origin());
        return Err(WatchdogError::Unauthorized);
    }

    let stale_cutoff = before(now, client.lease_timeout());
    let stale = store.stale_results(stale_cutoff)?;
    for result_id in &stale {
        if !store.recover_result(*result_id, now)? {
            debug!(
                target: "swarm::watchdog",
                "result {} settled before it could be reclaimed",
                result_id
            );
        }
    }

    let report = WatchdogReport {
        recovered_count: stale.len(),
        orphan_results_deleted: store.delete_orphan_results()?,
        idle_clients_deleted: store.delete_idle_clients(before(now, IDLE_CLIENT_GRACE))?,
        accounts_deleted: store.delete_unregistered_accounts()?,
    };

    if report.recovered_count > 0 {
        info!(
            target: "swarm::watchdog",
            "reset {} timed-out assignment(s)",
            report.recovered_count
        );
    }
    debug!(target: "swarm::watchdog", ?report, "watchdog pass complete");
    Ok(report)
}

fn before(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn only_local_origins_are_trusted() {
        assert!(WatchdogTrigger::local().is_trusted());
        assert!(WatchdogTrigger::from_peer(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_trusted());
        assert!(WatchdogTrigger::from_peer(IpAddr::V6(Ipv6Addr::LOCALHOST)).is_trusted());
        assert!(WatchdogTrigger::from_peer(
            "::ffff:127.0.0.1".parse().expect("mapped loopback")
        )
        .is_trusted());
        assert!(!WatchdogTrigger::from_peer("10.1.2.3".parse().expect("ip")).is_trusted());
        assert!(!WatchdogTrigger::from_peer("2001:db8::1".parse().expect("ip")).is_trusted());
    }

    #[test]
    fn cutoff_saturates_instead_of_overflowing() {
        let now = Utc::now();
        assert_eq!(before(now, Duration::from_secs(u64::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(before(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
    }
}
