//! The four independent resource group locks.

use super::named::NamedMutex;
use super::types::ResourceGroup;
use crate::config::Config;
use crate::context::SetupContext;
use std::path::Path;

/// One [`NamedMutex`] per resource group.
///
/// The groups never interact: holding one neither blocks nor is blocked by
/// a hold on another, so a temperature loop keeps running during a long
/// position scan that holds only `tct`.
#[derive(Debug, Clone)]
pub struct ResourceLockSet {
    bias: NamedMutex,
    signal_acquisition: NamedMutex,
    tct: NamedMutex,
    temperature: NamedMutex,
}

impl ResourceLockSet {
    /// Build the set with every mutex coordinated through `dir`.
    pub fn new(dir: &Path) -> Self {
        let make = |group: ResourceGroup| NamedMutex::new(dir, group.as_str());
        Self {
            bias: make(ResourceGroup::Bias),
            signal_acquisition: make(ResourceGroup::SignalAcquisition),
            tct: make(ResourceGroup::Tct),
            temperature: make(ResourceGroup::Temperature),
        }
    }

    /// Build the set from the resolved context and its config.
    pub fn from_config(ctx: &SetupContext, config: &Config) -> Self {
        let set = Self::new(&ctx.lock_dir);
        let events_path = ctx.events_path();
        set.map(|mutex| {
            let mutex = mutex.with_poll_interval(config.lock_poll_interval());
            if config.audit_log {
                mutex.with_audit_log(events_path.clone())
            } else {
                mutex
            }
        })
    }

    fn map(self, f: impl Fn(NamedMutex) -> NamedMutex) -> Self {
        Self {
            bias: f(self.bias),
            signal_acquisition: f(self.signal_acquisition),
            tct: f(self.tct),
            temperature: f(self.temperature),
        }
    }

    /// The mutex guarding `group`.
    pub fn get(&self, group: ResourceGroup) -> &NamedMutex {
        match group {
            ResourceGroup::Bias => &self.bias,
            ResourceGroup::SignalAcquisition => &self.signal_acquisition,
            ResourceGroup::Tct => &self.tct,
            ResourceGroup::Temperature => &self.temperature,
        }
    }
}
