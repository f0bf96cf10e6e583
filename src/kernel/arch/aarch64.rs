//! AArch64 privilege backend.
//!
//! Computes the SPSR-format word an `eret` would restore for a domain's
//! baseline, and the facility-enable mask for instruction-class grants.
//! The mask bits model the unprivileged-access enables the embedding
//! kernel mirrors into `CNTKCTL_EL1`, `PMUSERENR_EL0`, `MDSCR_EL1` and
//! `SCTLR_EL1.UCI` on context switch.

use crate::types::{Capability, DomainPolicy, ExceptionLevel, InstructionClass};

use super::{PrivilegeBackend, SavedContext};

// PSTATE.M[3:0] encodings (Arm ARM C5.2.19). The h variants select SP_ELx.
const MODE_EL0T: u64 = 0b0000;
const MODE_EL1H: u64 = 0b0101;
const MODE_EL2H: u64 = 0b1001;
const MODE_EL3H: u64 = 0b1101;

// PSTATE.DAIF interrupt masks, bits [9:6] of the SPSR word.
const DAIF_SHIFT: u64 = 6;
const DAIF_MASK_DA: u64 = 0b1100 << DAIF_SHIFT;

/// Enable bit: EL0 physical counter/timer register access.
pub const ENABLE_COUNTER: u64 = 1 << 0;
/// Enable bit: EL0 performance monitor access.
pub const ENABLE_PMU: u64 = 1 << 1;
/// Enable bit: EL0 self-hosted debug register access.
pub const ENABLE_DEBUG: u64 = 1 << 2;
/// Enable bit: EL0 cache maintenance instructions.
pub const ENABLE_CACHE_OPS: u64 = 1 << 3;

/// AArch64 backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64Backend;

impl Aarch64Backend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

/// SPSR mode field for a domain ceiling.
fn mode_for(ceiling: ExceptionLevel) -> u64 {
    match ceiling {
        ExceptionLevel::El0 => MODE_EL0T,
        ExceptionLevel::El1 => MODE_EL1H,
        ExceptionLevel::El2 => MODE_EL2H,
        ExceptionLevel::El3 => MODE_EL3H,
    }
}

/// Enable bit for an instruction class.
fn enable_for(class: InstructionClass) -> u64 {
    match class {
        InstructionClass::PhysicalTimer => ENABLE_COUNTER,
        InstructionClass::PerfMonitor => ENABLE_PMU,
        InstructionClass::Debug => ENABLE_DEBUG,
        InstructionClass::CacheMaintenance => ENABLE_CACHE_OPS,
    }
}

impl PrivilegeBackend for Aarch64Backend {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn max_ceiling(&self) -> ExceptionLevel {
        // The core runs at EL1; it can hand out EL0 and EL1 states but
        // cannot construct an EL2/EL3 return for its tasks.
        ExceptionLevel::El1
    }

    fn baseline(&self, policy: &DomainPolicy) -> SavedContext {
        // SError and debug exceptions stay masked until the first
        // exception return completes; IRQ/FIQ delivery is the embedding
        // kernel's decision and left unmasked here.
        SavedContext {
            spsr: mode_for(policy.ceiling) | DAIF_MASK_DA,
            enables: 0,
        }
    }

    fn grant(&self, baseline: &SavedContext, capability: &Capability) -> SavedContext {
        match capability {
            // Region attachment lives in the translation tables, keyed
            // off the task's recorded capability; the status word is
            // unchanged.
            Capability::Region(_) => *baseline,
            Capability::Instructions(class) => SavedContext {
                spsr: baseline.spsr,
                enables: baseline.enables | enable_for(*class),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyscallFilter;

    fn policy(ceiling: ExceptionLevel) -> DomainPolicy {
        DomainPolicy {
            name: "test".to_owned(),
            ceiling,
            regions: vec!["region-a".to_owned()],
            instructions: vec![InstructionClass::PhysicalTimer],
            syscalls: SyscallFilter::default(),
        }
    }

    #[test]
    fn test_baseline_el0_mode() {
        let backend = Aarch64Backend::new();
        let ctx = backend.baseline(&policy(ExceptionLevel::El0));
        assert_eq!(ctx.spsr & 0b1111, MODE_EL0T);
        assert_eq!(ctx.enables, 0);
    }

    #[test]
    fn test_baseline_el1_uses_handler_stack() {
        let backend = Aarch64Backend::new();
        let ctx = backend.baseline(&policy(ExceptionLevel::El1));
        assert_eq!(ctx.spsr & 0b1111, MODE_EL1H);
    }

    #[test]
    fn test_grant_instruction_class_sets_only_its_bit() {
        let backend = Aarch64Backend::new();
        let base = backend.baseline(&policy(ExceptionLevel::El0));
        let granted = backend.grant(
            &base,
            &Capability::Instructions(InstructionClass::PhysicalTimer),
        );
        assert_eq!(granted.enables, ENABLE_COUNTER);
        assert_eq!(granted.spsr, base.spsr, "mode must not change on a scoped grant");
    }

    #[test]
    fn test_grant_region_leaves_context_unchanged() {
        let backend = Aarch64Backend::new();
        let base = backend.baseline(&policy(ExceptionLevel::El0));
        let granted = backend.grant(&base, &Capability::Region("region-a".to_owned()));
        assert_eq!(granted, base);
    }

    #[test]
    fn test_serror_masked_in_baseline() {
        let backend = Aarch64Backend::new();
        let ctx = backend.baseline(&policy(ExceptionLevel::El0));
        assert_eq!(ctx.spsr & DAIF_MASK_DA, DAIF_MASK_DA);
    }
}
