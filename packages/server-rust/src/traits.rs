use docket_core::Document;

/// Replication role as seen by command dispatch.
/// Implementations: standalone node (always primary), replica set member.
pub trait ReplicationStateView: Send + Sync {
    /// Whether this node currently accepts writes (is primary or standalone).
    fn can_accept_writes(&self) -> bool;

    /// Whether the node is in maintenance/recovery and must reject commands
    /// that are not `maintenance_ok`.
    fn is_recovering(&self) -> bool;
}

/// Sink for mirrored reads used to warm secondary caches.
pub trait RequestMirror: Send + Sync {
    /// Forward a mirrorable copy of a request targeting `db`.
    fn mirror(&self, db: &str, request: Document);
}

/// A standalone node: always writable, never recovering.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneNode;

impl ReplicationStateView for StandaloneNode {
    fn can_accept_writes(&self) -> bool {
        true
    }

    fn is_recovering(&self) -> bool {
        false
    }
}
