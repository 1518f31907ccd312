use std::collections::HashMap;

use rml_core::Va;
use rml_memory::RttiMap;

use crate::JobKind;

/// Host job classes and the phase each one drives.
///
/// These names come out of the type information recovered from the host
/// module; the resolver turns them into vtable addresses so a dispatch
/// observed on a live job object can be classified by a single map lookup.
pub const HOST_JOB_CLASSES: &[(&str, JobKind)] = &[
    ("RBX::HeartbeatTask", JobKind::HEARTBEAT),
    ("RBX::PhysicsJob", JobKind::PHYSICS),
    ("RBX::RenderJob", JobKind::RENDER),
    ("RBX::WaitingHybridScriptsJob", JobKind::WAITING_HYBRID_SCRIPTS),
];

/// Maps host job vtable addresses to [`JobKind`]s.
pub struct JobKindResolver {
    by_vtable: HashMap<Va, JobKind>,
}

impl JobKindResolver {
    /// Builds the resolver from recovered type information.
    ///
    /// Classes missing from the map are logged and skipped; dispatches on
    /// such jobs will simply not be classified.
    pub fn resolve(rtti: &RttiMap) -> Self {
        let mut by_vtable = HashMap::with_capacity(HOST_JOB_CLASSES.len());

        for &(class, kind) in HOST_JOB_CLASSES {
            match rtti.vtable(class) {
                Some(vtable) => {
                    tracing::debug!(class, %vtable, %kind, "job class resolved");
                    by_vtable.insert(vtable, kind);
                }
                None => {
                    tracing::warn!(class, "job class not found in type information");
                }
            }
        }

        Self { by_vtable }
    }

    /// Builds the resolver from known vtable addresses.
    pub fn from_vtables(entries: impl IntoIterator<Item = (Va, JobKind)>) -> Self {
        Self {
            by_vtable: entries.into_iter().collect(),
        }
    }

    /// The phase driven by the job whose vtable sits at `vtable`.
    pub fn kind_for_vtable(&self, vtable: Va) -> Option<JobKind> {
        self.by_vtable.get(&vtable).copied()
    }

    /// Number of resolved job classes.
    pub fn len(&self) -> usize {
        self.by_vtable.len()
    }

    /// Returns `true` if no job classes resolved.
    pub fn is_empty(&self) -> bool {
        self.by_vtable.is_empty()
    }
}
