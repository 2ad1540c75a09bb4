mod raw {
    // The full list of generated constants is documented at https://docs.rs/built/latest/built/index.html
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Crate version such as 0.1.0
pub const JVMCI_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const JVMCI_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty,
    /// or unknown-git-version if the crate is not built from a git repo.
    pub static ref JVMCI_GIT_VERSION: &'static str = &JVMCI_GIT_VERSION_STRING;

    // Owned string
    static ref JVMCI_GIT_VERSION_STRING: String = match (raw::GIT_COMMIT_HASH, raw::GIT_DIRTY) {
        (Some(hash), dirty) => format!("{}{}", hash, if dirty == Some(true) { "-dirty" } else { "" }),
        (None, _) => "unknown-git-version".to_string(),
    };

    /// Full build version string, logged when a [`crate::JVMCI`] context is built.
    pub static ref JVMCI_FULL_VERSION: String = format!("{} ({}, features: [{}])", JVMCI_PKG_VERSION, *JVMCI_GIT_VERSION, JVMCI_FEATURES);
}
