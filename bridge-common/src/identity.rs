/// Fixed identity the bridge reports to cluster-facing collaborators.
///
/// Forwarders are not distinct nodes in the cluster inventory, so every
/// instance reports the same constant id. If a registry ever needs to key
/// on node id, uniqueness has to be reintroduced there, not here.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Identity {
    pub fn id(&self) -> &'static str {
        "0"
    }

    pub fn namespace(&self) -> &'static str {
        "default"
    }

    /// The downstream host decides whether to honor `env` requests; the
    /// bridge itself never permits user environment propagation.
    pub fn permit_user_environment(&self) -> bool {
        false
    }

    pub fn component(&self) -> &'static str {
        "forwarding-node"
    }
}
