/// One execution universe of the host: an instance tree plus the threads
/// stepping it.
///
/// Scripts and jobs are scoped to exactly one `DataModelKind`; a mod declares
/// per-kind script sets in its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataModelKind {
    /// The stand-alone player universe.
    Standalone,
    /// The studio edit universe.
    Edit,
    /// A connected client universe.
    Client,
    /// A server universe.
    Server,
}

impl DataModelKind {
    /// All kinds, in manifest order.
    pub const ALL: [DataModelKind; 4] = [
        DataModelKind::Standalone,
        DataModelKind::Edit,
        DataModelKind::Client,
        DataModelKind::Server,
    ];

    /// The manifest key for this kind (`datamodel_context.<key>`).
    pub const fn key(self) -> &'static str {
        match self {
            DataModelKind::Standalone => "standalone",
            DataModelKind::Edit => "edit",
            DataModelKind::Client => "client",
            DataModelKind::Server => "server",
        }
    }
}

impl std::fmt::Display for DataModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// The permission level a script thread runs with.
///
/// The host enforces a capability set per VM thread; RML stamps framework-
/// and mod-loaded code with [`PermissionLevel::Full`] and leaves everything
/// else at the level the caller requested. Bridge entry points consult the
/// running thread's level before performing privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermissionLevel {
    /// Untrusted user script.
    None,
    /// Scripts allowed to call into the bridge.
    Bridge,
    /// Trusted framework and mod code.
    Full,
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::None
    }
}
