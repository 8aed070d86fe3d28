//! Install options.

bitflags::bitflags! {
    /// Independent install options. The empty set is the conservative default:
    /// signatures are required, no garbage collection runs, and hooks run.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InstallFlags: u8 {
        /// Skip the authenticity check
        const ALLOW_UNAUTHENTICATED = 0b0001;
        /// Garbage-collect superseded versions after a successful install
        const DO_INSTALL_GC = 0b0010;
        /// Skip activation side effects
        const INHIBIT_HOOKS = 0b0100;
    }
}

impl InstallFlags {
    pub fn allow_unauthenticated(self) -> bool {
        self.contains(Self::ALLOW_UNAUTHENTICATED)
    }

    pub fn do_gc(self) -> bool {
        self.contains(Self::DO_INSTALL_GC)
    }

    pub fn inhibit_hooks(self) -> bool {
        self.contains(Self::INHIBIT_HOOKS)
    }
}
