//! # Allocation preferences and provider locality.
//!
//! | preference     | local provider                  | remote provider |
//! |----------------|---------------------------------|-----------------|
//! | `RequireLocal` | yes                             | never           |
//! | `PreferLocal`  | yes                             | yes             |
//! | `PreferRemote` | after `Config::remote_delay`    | yes             |
//!
//! For statistics, `RequireLocal` is the *local* class and the other two are the
//! *remotable* class.

/// What kind of core a request accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CorePreference {
    /// Only a local provider may serve the request.
    RequireLocal,
    /// Any provider; local providers serve it immediately.
    #[default]
    PreferLocal,
    /// Any provider; remote providers get a head start.
    PreferRemote,
}

impl CorePreference {
    /// True for the local statistics class (`RequireLocal`).
    #[inline]
    pub fn is_local_class(self) -> bool {
        matches!(self, CorePreference::RequireLocal)
    }
}

/// Where a provider's cores live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreLocality {
    /// This machine.
    Local,
    /// A remote build agent.
    Remote,
}

impl CoreLocality {
    /// True if a core of this locality may ever serve `preference`.
    ///
    /// Timing (`remote_delay`) is not considered here.
    #[inline]
    pub fn can_serve(self, preference: CorePreference) -> bool {
        match self {
            CoreLocality::Local => true,
            CoreLocality::Remote => !preference.is_local_class(),
        }
    }

    #[inline]
    pub fn is_local(self) -> bool {
        matches!(self, CoreLocality::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_matrix() {
        use CorePreference::*;
        for pref in [RequireLocal, PreferLocal, PreferRemote] {
            assert!(CoreLocality::Local.can_serve(pref));
        }
        assert!(!CoreLocality::Remote.can_serve(RequireLocal));
        assert!(CoreLocality::Remote.can_serve(PreferLocal));
        assert!(CoreLocality::Remote.can_serve(PreferRemote));
    }

    #[test]
    fn statistics_class() {
        assert!(CorePreference::RequireLocal.is_local_class());
        assert!(!CorePreference::PreferLocal.is_local_class());
        assert!(!CorePreference::PreferRemote.is_local_class());
    }
}
