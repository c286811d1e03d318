use crate::error::{Error, Result};
use crate::system::platform;
use crate::system::snapshot::RuntimeFacts;

pub trait RuntimeIntrospector {
    /// Whether the runtime serialises execution behind one global lock.
    fn has_global_execution_lock(&self) -> bool;

    fn collect(&mut self) -> Result<RuntimeFacts>;
}

/// The natively compiled Rust runtime of this process.
#[derive(Debug, Default)]
pub struct NativeRuntime;

impl RuntimeIntrospector for NativeRuntime {
    fn has_global_execution_lock(&self) -> bool {
        // Native threads run truly in parallel.
        false
    }

    fn collect(&mut self) -> Result<RuntimeFacts> {
        let _span = tracing::debug_span!("probe.runtime").entered();

        let executable = std::env::current_exe()
            .map_err(|e| Error::probe_unavailable("runtime", format!("executable path: {e}")))?;

        Ok(RuntimeFacts {
            version: env!("RTDIAG_RUSTC_VERSION").to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            executable,
            global_execution_lock: self.has_global_execution_lock(),
            stack_limit: platform::stack_limit(),
            implementation: "rustc".to_string(),
            build_profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_live_runtime_state() {
        let facts = NativeRuntime.collect().unwrap();
        assert_eq!(facts.executable, std::env::current_exe().unwrap());
        assert!(!facts.global_execution_lock);
        assert_eq!(facts.implementation, "rustc");
        assert_eq!(facts.build_profile, "debug");
        assert!(facts.platform.starts_with(std::env::consts::OS));
        assert!(!facts.version.is_empty());
    }
}
